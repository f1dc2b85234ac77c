//! Render a project to video.

use std::path::PathBuf;

use cutline_common::config::AppConfig;
use cutline_render_engine::export::{export_project, RenderJob};
use cutline_render_engine::progress::ProgressReporter;
use indicatif::{ProgressBar, ProgressStyle};

/// Terminal progress bar over input frame indices.
#[derive(Default)]
pub struct BarProgress {
    bar: Option<ProgressBar>,
}

impl ProgressReporter for BarProgress {
    fn start(&mut self, total: u64, title: &str) {
        let bar = ProgressBar::new(total);
        bar.set_style(
            ProgressStyle::default_bar()
                .template("{spinner:.green} {msg} [{bar:40.cyan/blue}] {percent}% ({eta})")
                .unwrap_or_else(|_| ProgressStyle::default_bar())
                .progress_chars("=>-"),
        );
        bar.set_message(title.to_string());
        self.bar = Some(bar);
    }

    fn tick(&mut self, current: u64) {
        if let Some(bar) = &self.bar {
            bar.set_position(current);
        }
    }

    fn end(&mut self) {
        if let Some(bar) = self.bar.take() {
            bar.finish_and_clear();
        }
    }
}

pub async fn run(
    path: PathBuf,
    output: Option<PathBuf>,
    scale: Option<f64>,
    fps: Option<f64>,
    config: &AppConfig,
) -> anyhow::Result<()> {
    let project = super::load_project(&path)?;
    println!("Rendering project: {}", project.project.name);

    let mut job = RenderJob::from_project(&project);
    if let Some(output) = output {
        job.output = output;
    }
    if let Some(scale) = scale {
        job.export.scale = scale;
    }
    if fps.is_some() {
        job.export.fps = fps;
    }

    tracing::debug!(
        project = %project.path.display(),
        fps = ?job.export.fps,
        scale = job.export.scale,
        codec_args = ?job.export.codec_args(),
        "Resolved render job"
    );

    println!("  Input: {}", job.input.display());
    println!("  Output: {}", job.output.display());
    println!(
        "  Timeline: {} chunk(s), ~{} output frames",
        job.timeline.chunks().len(),
        job.timeline.estimated_output_frames()
    );
    if !job.overlays.is_empty() {
        println!("  Overlays: {}", job.overlays.len());
    }
    if job.export.needs_scaling() {
        println!("  Scale: {}x", job.export.scale);
    }

    let outcome = export_project(job, config.render.clone(), Box::new(BarProgress::default()))
        .await
        .map_err(|e| match e.diagnostics() {
            Some(diagnostics) if !diagnostics.is_empty() => {
                anyhow::anyhow!("Render failed: {e}\n\nencoder output:\n{diagnostics}")
            }
            _ => anyhow::anyhow!("Render failed: {e}"),
        })?;

    println!("Render complete: {}", outcome.output.display());
    println!(
        "  Frames: {} emitted from {} decoded ({} skipped by seeking)",
        outcome.frames_emitted, outcome.frames_read, outcome.frames_saved_by_seeking
    );
    println!(
        "  Format: {} {}x{} @ {}fps",
        outcome.target_pixel_format, outcome.width, outcome.height, outcome.fps
    );
    if outcome.scale_retried {
        println!("  Scale pass needed the software fallback");
    }
    if let Some(report) = &outcome.report {
        println!("  Report: {}", report.display());
    }
    println!("  Elapsed: {:.1}s", outcome.elapsed_secs);

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bar_progress_lifecycle() {
        let mut progress = BarProgress::default();
        progress.tick(3);
        progress.start(30, "Creating new video");
        progress.tick(12);
        assert_eq!(progress.bar.as_ref().map(|b| b.position()), Some(12));
        progress.end();
        assert!(progress.bar.is_none());
    }
}
