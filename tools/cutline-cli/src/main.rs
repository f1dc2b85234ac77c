//! Cutline CLI: retime a video along a timeline and burn in overlays.
//!
//! Usage:
//!   cutline render <PROJECT>     Render a project to video
//!   cutline validate <PROJECT>   Check a project without rendering
//!   cutline info <FILES>...      Show video stream details
//!   cutline check                Check for ffmpeg and ffprobe
//!   cutline init <NAME>          Create a starter project

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use cutline_common::config::AppConfig;

mod commands;

#[derive(Parser)]
#[command(
    name = "cutline",
    about = "Frame-accurate video retiming with overlay compositing",
    version,
    author
)]
struct Cli {
    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Render a project to video
    Render {
        /// Project file, or a directory containing cutline.json
        path: PathBuf,

        /// Output file path (overrides the project's export.output)
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Geometric scale applied after retiming
        #[arg(long)]
        scale: Option<f64>,

        /// Frame rate used for frame indices (defaults to the stream's)
        #[arg(long)]
        fps: Option<f64>,
    },

    /// Validate a project without rendering
    Validate {
        /// Project file, or a directory containing cutline.json
        path: PathBuf,
    },

    /// Show video stream information
    Info {
        /// Media files to inspect
        #[arg(required = true)]
        files: Vec<PathBuf>,

        /// Print machine-readable JSON
        #[arg(long)]
        json: bool,
    },

    /// Check for the external tools rendering needs
    Check,

    /// Create a starter project
    Init {
        /// Project name
        name: String,

        /// Source video
        #[arg(long)]
        input: PathBuf,

        /// Directory to create the project in
        #[arg(short, long, default_value = ".")]
        output: PathBuf,

        /// Input length in frames (probed when omitted)
        #[arg(long)]
        frames: Option<u64>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let config = AppConfig::load();
    let mut logging = config.logging.clone();
    if cli.verbose {
        logging.level = "debug".to_string();
    }
    cutline_common::logging::init_logging(&logging);

    match cli.command {
        Commands::Render {
            path,
            output,
            scale,
            fps,
        } => commands::render::run(path, output, scale, fps, &config).await,
        Commands::Validate { path } => commands::validate::run(path, &config),
        Commands::Info { files, json } => commands::info::run(files, json, &config),
        Commands::Check => commands::check::run(&config),
        Commands::Init {
            name,
            input,
            output,
            frames,
        } => commands::init::run(name, input, output, frames, &config),
    }
}
