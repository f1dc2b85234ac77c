//! Render jobs and the end-to-end export pipeline.

use std::path::{Path, PathBuf};
use std::time::Instant;

use cutline_common::config::RenderDefaults;
use cutline_common::error::{CutlineError, CutlineResult};
use cutline_project_model::overlay::OverlayTemplate;
use cutline_project_model::project::{ExportConfig, LoadedProject};
use cutline_project_model::timeline::Timeline;
use serde::Serialize;

use crate::assets::OverlayAssets;
use crate::compositor::Compositor;
use crate::frame::PixelFormat;
use crate::probe::probe_canvas;
use crate::progress::ProgressReporter;
use crate::scale::{scale_video, FfmpegCli};
use crate::scheduler::FrameScheduler;
use crate::sheet::Sheet;
use crate::sink::{EncoderSettings, FfmpegEncoderSink};
use crate::source::{FfmpegFrameSource, FrameSource, SourceSettings};

/// A render ready to run, with every path resolved.
#[derive(Debug, Clone)]
pub struct RenderJob {
    /// Source video.
    pub input: PathBuf,

    /// Video stream index within the input.
    pub track: usize,

    pub timeline: Timeline,

    /// Templates with file references already resolved.
    pub overlays: Vec<OverlayTemplate>,

    /// Final output file.
    pub output: PathBuf,

    pub export: ExportConfig,
}

impl RenderJob {
    pub fn from_project(loaded: &LoadedProject) -> Self {
        Self {
            input: loaded.input_path(),
            track: loaded.project.track,
            timeline: loaded.project.timeline.clone(),
            overlays: loaded.resolved_overlays(),
            output: loaded.output_path(),
            export: loaded.project.export.clone(),
        }
    }

    /// Reject settings that would only fail once decoding has started.
    pub fn check(&self) -> CutlineResult<()> {
        if !self.export.scale.is_finite() || self.export.scale <= 0.0 {
            return Err(CutlineError::config(format!(
                "export.scale must be a positive number, got {}",
                self.export.scale
            )));
        }
        if let Some(fps) = self.export.fps {
            if !fps.is_finite() || fps <= 0.0 {
                return Err(CutlineError::config(format!(
                    "export.fps must be a positive number, got {fps}"
                )));
            }
        }
        if self.output == self.input {
            return Err(CutlineError::config("output would overwrite the input"));
        }
        Ok(())
    }
}

/// What a finished render produced.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RenderOutcome {
    pub output: PathBuf,
    pub frames_read: u64,
    pub frames_emitted: u64,
    pub frames_saved_by_seeking: u64,
    pub seeks: u64,
    pub target_pixel_format: String,
    pub fps: f64,
    pub width: u32,
    pub height: u32,
    pub scaled: bool,
    pub scale_retried: bool,
    pub elapsed_secs: f64,
    /// Sidecar report, when it could be written.
    pub report: Option<PathBuf>,
}

/// Resolve and prepare every overlay against a canvas.
///
/// All template, font, color and image errors surface here, before any
/// process is spawned.
pub fn plan_overlays(job: &RenderJob, canvas: (u32, u32)) -> CutlineResult<(Sheet, OverlayAssets)> {
    let sheet = Sheet::build(&job.overlays, &job.timeline, canvas.0, canvas.1)?;
    let assets = OverlayAssets::prepare(&sheet)?;
    Ok((sheet, assets))
}

/// Where the retimed video is encoded before the scale pass.
pub fn intermediate_path(output: &Path) -> PathBuf {
    let stem = output
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "output".to_string());
    let name = match output.extension() {
        Some(ext) => format!("{stem}.unscaled.{}", ext.to_string_lossy()),
        None => format!("{stem}.unscaled"),
    };
    output.with_file_name(name)
}

pub fn report_path(output: &Path) -> PathBuf {
    output.with_extension("render.json")
}

/// Run a render job to completion on the calling thread.
pub fn render_video(
    job: &RenderJob,
    defaults: &RenderDefaults,
    progress: &mut dyn ProgressReporter,
) -> CutlineResult<RenderOutcome> {
    let started = Instant::now();
    let started_at = chrono::Utc::now();
    tracing::info!(
        input = %job.input.display(),
        output = %job.output.display(),
        chunks = job.timeline.chunks().len(),
        overlays = job.overlays.len(),
        "Starting render"
    );

    if !job.input.exists() {
        return Err(CutlineError::FileNotFound {
            path: job.input.clone(),
        });
    }
    job.check()?;

    let fallback = defaults
        .fallback_pixel_format
        .parse::<PixelFormat>()
        .unwrap_or_else(|never| match never {});
    if !fallback.is_allowed() {
        return Err(CutlineError::config(format!(
            "fallback pixel format '{fallback}' is not supported"
        )));
    }

    let canvas = probe_canvas(&defaults.ffprobe_path, &job.input);
    let (sheet, assets) = plan_overlays(job, canvas)?;
    tracing::info!(
        canvas_width = canvas.0,
        canvas_height = canvas.1,
        objects = sheet.objects().len(),
        overlay_frames = sheet.by_frame().len(),
        "Overlays prepared"
    );

    if let Some(parent) = job.output.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }

    let mut source = FfmpegFrameSource::open(SourceSettings {
        ffmpeg: defaults.ffmpeg_path.clone(),
        ffprobe: defaults.ffprobe_path.clone(),
        input: job.input.clone(),
        track: job.track,
        fps: job.export.fps,
        fallback_format: fallback.clone(),
    })?;
    let fps = source.fps();
    let (width, height) = (source.info().width, source.info().height);
    let target = PixelFormat::select_target(&source.info().pixel_format, &fallback);

    let scaling = job.export.needs_scaling();
    let encode_path = if scaling {
        intermediate_path(&job.output)
    } else {
        job.output.clone()
    };

    let mut sink = FfmpegEncoderSink::spawn(
        &defaults.ffmpeg_path,
        &EncoderSettings {
            output: encode_path.clone(),
            pixel_format: target.clone(),
            width,
            height,
            fps,
            codec_args: job.export.codec_args(),
        },
    )?;

    let compositor = Compositor::new(&sheet, &assets);
    let summary = FrameScheduler::new(fps, target.clone(), compositor)
        .with_keyframe_interval(defaults.keyframe_interval_secs)
        .run(&job.timeline, &mut source, &mut sink, progress)?;
    drop(source);

    let mut scale_retried = false;
    if scaling {
        let outcome = scale_video(
            &FfmpegCli::new(&defaults.ffmpeg_path),
            &encode_path,
            &job.output,
            job.export.scale,
        )?;
        scale_retried = outcome.retried;
        if let Err(err) = std::fs::remove_file(&encode_path) {
            tracing::warn!(error = %err, path = %encode_path.display(), "Failed to remove unscaled intermediate");
        }
    }

    let mut outcome = RenderOutcome {
        output: job.output.clone(),
        frames_read: summary.frames_read,
        frames_emitted: summary.frames_emitted,
        frames_saved_by_seeking: summary.frames_saved_by_seeking,
        seeks: summary.seeks,
        target_pixel_format: target.to_string(),
        fps,
        width,
        height,
        scaled: scaling,
        scale_retried,
        elapsed_secs: started.elapsed().as_secs_f64(),
        report: None,
    };

    let path = report_path(&job.output);
    match write_report(&path, job, &outcome, started_at) {
        Ok(()) => {
            tracing::info!(report = %path.display(), "Wrote render report");
            outcome.report = Some(path);
        }
        Err(err) => {
            tracing::warn!(error = %err, path = %path.display(), "Failed to write render report");
        }
    }

    tracing::info!(
        output = %outcome.output.display(),
        frames_emitted = outcome.frames_emitted,
        frames_saved = outcome.frames_saved_by_seeking,
        elapsed_secs = outcome.elapsed_secs,
        "Render finished"
    );
    Ok(outcome)
}

fn write_report(
    path: &Path,
    job: &RenderJob,
    outcome: &RenderOutcome,
    started_at: chrono::DateTime<chrono::Utc>,
) -> CutlineResult<()> {
    let report = serde_json::json!({
        "input": job.input,
        "started_at": started_at.to_rfc3339(),
        "finished_at": chrono::Utc::now().to_rfc3339(),
        "timeline": {
            "chunks": job.timeline.chunks().len(),
            "input_frames": job.timeline.kept_end(),
            "deleted_frames": job.timeline.deleted_frames(),
            "estimated_output_frames": job.timeline.estimated_output_frames(),
        },
        "overlays": job.overlays.len(),
        "outcome": outcome,
    });
    std::fs::write(path, serde_json::to_string_pretty(&report)?)?;
    Ok(())
}

/// Render on a blocking worker so async callers stay responsive.
pub async fn export_project(
    job: RenderJob,
    defaults: RenderDefaults,
    mut progress: Box<dyn ProgressReporter + Send>,
) -> CutlineResult<RenderOutcome> {
    tokio::task::spawn_blocking(move || render_video(&job, &defaults, progress.as_mut()))
        .await
        .map_err(|e| CutlineError::render(format!("render task failed: {e}")))?
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::progress::NoProgress;
    use cutline_project_model::timeline::Chunk;

    fn job(dir: &Path, overlays: Vec<OverlayTemplate>) -> RenderJob {
        let input = dir.join("input.mp4");
        std::fs::write(&input, b"not really a video").unwrap();
        RenderJob {
            input,
            track: 0,
            timeline: Timeline::new(vec![
                Chunk::kept(0, 30, 1.0),
                Chunk::deleted(30, 60),
            ])
            .unwrap(),
            overlays,
            output: dir.join("out/output.mp4"),
            export: ExportConfig::default(),
        }
    }

    fn defaults() -> RenderDefaults {
        RenderDefaults {
            ffmpeg_path: "/nonexistent/ffmpeg".to_string(),
            ffprobe_path: "/nonexistent/ffprobe".to_string(),
            ..RenderDefaults::default()
        }
    }

    #[test]
    fn test_intermediate_path_keeps_extension() {
        assert_eq!(
            intermediate_path(Path::new("/tmp/final.mp4")),
            PathBuf::from("/tmp/final.unscaled.mp4")
        );
        assert_eq!(
            intermediate_path(Path::new("final")),
            PathBuf::from("final.unscaled")
        );
    }

    #[test]
    fn test_report_sits_next_to_output() {
        assert_eq!(
            report_path(Path::new("renders/cut.mp4")),
            PathBuf::from("renders/cut.render.json")
        );
    }

    #[test]
    fn test_from_project_resolves_paths() {
        let dir = tempfile::tempdir().unwrap();
        let loaded =
            LoadedProject::create(dir.path().join("cutline.json"), "demo", "media/in.mp4", 90)
                .unwrap();
        let job = RenderJob::from_project(&loaded);
        assert_eq!(job.input, dir.path().join("media/in.mp4"));
        assert_eq!(job.output, dir.path().join(&loaded.project.export.output));
        assert_eq!(job.timeline.kept_end(), 90);
    }

    #[test]
    fn test_missing_input_is_reported_first() {
        let dir = tempfile::tempdir().unwrap();
        let mut job = job(dir.path(), vec![]);
        job.input = dir.path().join("missing.mp4");
        let err = render_video(&job, &defaults(), &mut NoProgress).unwrap_err();
        assert!(matches!(err, CutlineError::FileNotFound { .. }));
    }

    #[test]
    fn test_bad_scale_is_config_error() {
        let dir = tempfile::tempdir().unwrap();
        let mut job = job(dir.path(), vec![]);
        job.export.scale = 0.0;
        let err = render_video(&job, &defaults(), &mut NoProgress).unwrap_err();
        assert!(err.is_config());
    }

    #[test]
    fn test_overlay_errors_surface_before_decoding() {
        let dir = tempfile::tempdir().unwrap();
        let overlays: Vec<OverlayTemplate> = serde_json::from_str(
            r#"[{"type": "rectangle", "start": "0", "duration": "10",
                 "x": "nowhere", "y": "0", "width": "5", "height": "5"}]"#,
        )
        .unwrap();
        let job = job(dir.path(), overlays);
        let err = render_video(&job, &defaults(), &mut NoProgress).unwrap_err();
        assert!(err.is_config(), "unexpected error: {err}");
        assert!(!dir.path().join("out").exists());
    }

    #[test]
    fn test_plan_overlays_uses_canvas_variables() {
        let dir = tempfile::tempdir().unwrap();
        let overlays: Vec<OverlayTemplate> = serde_json::from_str(
            r#"[{"type": "rectangle", "start": "0", "duration": "end",
                 "x": "centerX", "y": "centerY", "width": "10", "height": "10"}]"#,
        )
        .unwrap();
        let job = job(dir.path(), overlays);
        let (sheet, assets) = plan_overlays(&job, (200, 100)).unwrap();
        assert_eq!(sheet.objects()[0].x, 100);
        assert_eq!(sheet.objects()[0].y, 50);
        assert!(sheet.contains_frame(29));
        assert!(!sheet.contains_frame(30));
        assert_eq!(assets.len(), 1);
    }
}
