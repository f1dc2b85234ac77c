//! Validate a Cutline project without rendering.

use std::path::PathBuf;

use cutline_common::config::AppConfig;
use cutline_render_engine::export::{plan_overlays, RenderJob};
use cutline_render_engine::probe::probe_canvas;

pub fn run(path: PathBuf, config: &AppConfig) -> anyhow::Result<()> {
    println!("Validating project at: {}", path.display());

    let project = super::load_project(&path)?;
    let timeline = &project.project.timeline;

    println!("  Name: {}", project.project.name);
    println!("  Version: {}", project.project.version);
    println!("  Input: {} (track {})", project.project.input, project.project.track);
    println!(
        "  Timeline: {} chunk(s), {} input frames, {} deleted",
        timeline.chunks().len(),
        timeline.total_input_frames(),
        timeline.deleted_frames()
    );
    println!("  Estimated output frames: {}", timeline.estimated_output_frames());

    let mut errors = project.validate_sources();

    let job = RenderJob::from_project(&project);
    if let Err(e) = job.check() {
        errors.push(e.to_string());
    }

    let canvas = probe_canvas(&config.render.ffprobe_path, &job.input);
    println!("  Canvas: {}x{}", canvas.0, canvas.1);
    match plan_overlays(&job, canvas) {
        Ok((sheet, _)) => {
            println!(
                "  Overlays: {} object(s) across {} frame(s)",
                sheet.objects().len(),
                sheet.by_frame().len()
            );
        }
        Err(e) => errors.push(e.to_string()),
    }

    if errors.is_empty() {
        println!("\nProject is valid.");
        return Ok(());
    }

    tracing::warn!(issues = errors.len(), "Project failed validation");
    println!("\nValidation issues:");
    for error in &errors {
        println!("  - {error}");
    }
    anyhow::bail!("{} issue(s) found", errors.len())
}
