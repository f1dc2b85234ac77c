//! Initialize a new Cutline project.

use std::path::{Path, PathBuf};

use cutline_common::config::AppConfig;
use cutline_project_model::LoadedProject;
use cutline_render_engine::probe::{probe_video_stream, StreamInfo};

pub fn run(
    name: String,
    input: PathBuf,
    output: PathBuf,
    frames: Option<u64>,
    config: &AppConfig,
) -> anyhow::Result<()> {
    let project_dir = output.join(&name);
    let project_file = project_dir.join(super::PROJECT_FILE);
    if project_file.exists() {
        anyhow::bail!("{} already exists", project_file.display());
    }

    let total_frames = match frames {
        Some(frames) => frames,
        None => {
            let stream = probe_video_stream(&config.render.ffprobe_path, &input, 0)
                .map_err(|e| anyhow::anyhow!("Cannot probe {}: {e} (pass --frames)", input.display()))?;
            frame_count(&stream).ok_or_else(|| {
                anyhow::anyhow!("Cannot tell how many frames {} has; pass --frames", input.display())
            })?
        }
    };

    let input_ref = absolute(&input);
    println!("Creating project '{}' at {}", name, project_dir.display());

    let project = LoadedProject::create(&project_file, &name, input_ref.display().to_string(), total_frames)
        .map_err(|e| anyhow::anyhow!("Failed to create project: {e}"))?;

    println!("Project created successfully:");
    println!("  File: {}", project.path.display());
    println!("  Input: {}", project.project.input);
    println!("  Timeline: 0..{total_frames} at 1x");
    println!("  Output: {}", project.output_path().display());
    println!();
    println!("Edit timeline.chunks and overlays, then run:");
    println!("  cutline render {}", project.path.display());

    Ok(())
}

/// Frame count from the container, or estimated from duration and rate.
fn frame_count(stream: &StreamInfo) -> Option<u64> {
    stream.frame_count.filter(|n| *n > 0).or_else(|| {
        let frames = (stream.duration_secs? * stream.frame_rate?).round();
        (frames >= 1.0).then_some(frames as u64)
    })
}

fn absolute(path: &Path) -> PathBuf {
    std::fs::canonicalize(path).unwrap_or_else(|_| path.to_path_buf())
}

#[cfg(test)]
mod tests {
    use super::*;
    use cutline_render_engine::PixelFormat;

    #[test]
    fn test_frame_count_prefers_container_count() {
        let mut stream = StreamInfo::new(640, 480, PixelFormat::Yuv420p);
        stream.frame_count = Some(250);
        stream.duration_secs = Some(20.0);
        stream.frame_rate = Some(30.0);
        assert_eq!(frame_count(&stream), Some(250));
    }

    #[test]
    fn test_frame_count_estimated_from_duration() {
        let mut stream = StreamInfo::new(640, 480, PixelFormat::Yuv420p);
        stream.duration_secs = Some(10.01);
        stream.frame_rate = Some(29.97);
        assert_eq!(frame_count(&stream), Some(300));

        stream.frame_rate = None;
        assert_eq!(frame_count(&stream), None);
    }

    #[test]
    fn test_init_with_explicit_frames() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("talk.mp4");
        std::fs::write(&input, b"").unwrap();

        run(
            "demo".to_string(),
            input,
            dir.path().to_path_buf(),
            Some(120),
            &AppConfig::default(),
        )
        .unwrap();

        let loaded = LoadedProject::load(dir.path().join("demo").join(super::super::PROJECT_FILE)).unwrap();
        assert_eq!(loaded.project.name, "demo");
        assert_eq!(loaded.project.timeline.kept_end(), 120);
    }
}
