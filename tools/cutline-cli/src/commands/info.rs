//! Show video stream information.

use std::path::PathBuf;

use cutline_common::config::AppConfig;
use cutline_render_engine::probe::{probe_media, MediaInfo, StreamInfo};

pub fn run(files: Vec<PathBuf>, json: bool, config: &AppConfig) -> anyhow::Result<()> {
    let mut reports = vec![];
    let mut failures = 0;

    for file in &files {
        match probe_media(&config.render.ffprobe_path, file) {
            Ok(media) if json => reports.push(media_json(&media)),
            Ok(media) => print_media(&media),
            Err(e) => {
                failures += 1;
                if json {
                    reports.push(serde_json::json!({
                        "path": file,
                        "error": e.to_string(),
                    }));
                } else {
                    println!("{}: {e}\n", file.display());
                }
            }
        }
    }

    if json {
        println!("{}", serde_json::to_string_pretty(&reports)?);
    }
    if failures == files.len() {
        anyhow::bail!("no file could be inspected");
    }
    Ok(())
}

fn print_media(media: &MediaInfo) {
    println!("{}", media.path.display());
    if let Some(format) = &media.format_name {
        println!("  Container: {format}");
    }
    if let Some(duration) = media.duration_secs {
        println!("  Duration: {duration:.2}s");
    }
    if let Some(bit_rate) = media.bit_rate {
        println!("  Bitrate: {} kb/s", bit_rate / 1000);
    }
    if media.video.is_empty() {
        println!("  No video streams");
    }
    for (track, stream) in media.video.iter().enumerate() {
        let (aw, ah) = stream.aspect_ratio();
        println!(
            "  Video track {track} (stream #{}): {} {}x{} ({aw}:{ah}) {}",
            stream.stream_index,
            stream.codec.as_deref().unwrap_or("unknown"),
            stream.width,
            stream.height,
            stream.pixel_format
        );
        if let Some(fps) = stream.frame_rate {
            println!("    Frame rate: {fps:.3} fps");
        }
        if let Some(frames) = stream.frame_count {
            println!("    Frames: {frames}");
        }
        if let Some(duration) = stream.duration_secs {
            println!("    Duration: {duration:.2}s");
        }
        if let Some(bit_rate) = stream.bit_rate {
            println!("    Bitrate: {} kb/s", bit_rate / 1000);
        }
    }
    println!(
        "  Audio streams: {}, subtitle streams: {}",
        media.audio_streams, media.subtitle_streams
    );
    println!();
}

fn media_json(media: &MediaInfo) -> serde_json::Value {
    serde_json::json!({
        "path": media.path,
        "format": media.format_name,
        "duration_secs": media.duration_secs,
        "bit_rate": media.bit_rate,
        "video": media.video.iter().map(stream_json).collect::<Vec<_>>(),
        "audio_streams": media.audio_streams,
        "subtitle_streams": media.subtitle_streams,
    })
}

fn stream_json(stream: &StreamInfo) -> serde_json::Value {
    let (aw, ah) = stream.aspect_ratio();
    serde_json::json!({
        "stream_index": stream.stream_index,
        "codec": stream.codec,
        "width": stream.width,
        "height": stream.height,
        "aspect_ratio": format!("{aw}:{ah}"),
        "pixel_format": stream.pixel_format.name(),
        "frame_rate": stream.frame_rate,
        "duration_secs": stream.duration_secs,
        "bit_rate": stream.bit_rate,
        "frame_count": stream.frame_count,
    })
}
