//! Check for the external tools rendering needs.

use cutline_common::config::{config_file_path, AppConfig};
use cutline_render_engine::probe::tool_version;

pub fn run(config: &AppConfig) -> anyhow::Result<()> {
    println!("Cutline System Check");
    println!("{}", "=".repeat(50));

    let tools = [
        ("ffmpeg", config.render.ffmpeg_path.as_str()),
        ("ffprobe", config.render.ffprobe_path.as_str()),
    ];

    let mut missing = 0;
    for (label, binary) in tools {
        match tool_version(binary) {
            Some(version) => println!("[OK] {label}: {version}"),
            None => {
                missing += 1;
                println!("[MISSING] {label}: '{binary}' could not be run");
            }
        }
    }

    println!();
    println!("Config file: {}", config_file_path().display());
    println!("Keyframe interval: {}s", config.render.keyframe_interval_secs);
    println!("Fallback pixel format: {}", config.render.fallback_pixel_format);

    println!();
    if missing == 0 {
        println!("All required tools are available. Cutline is ready.");
    } else {
        println!("Install ffmpeg or set render.ffmpeg_path / render.ffprobe_path in the config file.");
    }

    Ok(())
}
