//! Decoded-frame sources.
//!
//! [`FfmpegFrameSource`] runs `ffmpeg` as a child process that writes raw
//! frames to its stdout. Presentation times and keyframe flags come from an
//! ffprobe packet scan taken when the source is opened, so seeking can land
//! exactly on a known keyframe.

use std::io::Read;
use std::path::{Path, PathBuf};
use std::process::{Child, ChildStdout, Command, Stdio};
use std::thread::JoinHandle;

use cutline_common::error::{CutlineError, CutlineResult};
use tracing::{debug, warn};

use crate::frame::{PixelFormat, VideoFrame};
use crate::probe::{probe_packets, probe_video_stream, PacketTiming, StreamInfo};

/// Sequential frames in presentation order.
pub trait FrameSource {
    /// The stream being decoded.
    fn info(&self) -> &StreamInfo;

    /// The next frame, or `None` at end of stream.
    fn next_frame(&mut self) -> CutlineResult<Option<VideoFrame>>;

    /// Reposition at or before `frame_index`. Subsequent frames continue from
    /// there in presentation order.
    fn seek(&mut self, frame_index: u64) -> CutlineResult<()>;
}

/// Where and how to decode.
#[derive(Debug, Clone)]
pub struct SourceSettings {
    pub ffmpeg: String,
    pub ffprobe: String,
    pub input: PathBuf,
    pub track: usize,
    /// Rate used to convert frame indices to seek times; the stream's own
    /// rate when unset.
    pub fps: Option<f64>,
    /// Decode format used when the stream's own format is not allowed.
    pub fallback_format: PixelFormat,
}

/// Frame source backed by an ffmpeg decoder process.
pub struct FfmpegFrameSource {
    settings: SourceSettings,
    info: StreamInfo,
    fps: f64,
    decode_format: PixelFormat,
    frame_size: usize,
    packets: Vec<PacketTiming>,
    /// Index into `packets` of the next frame to be read.
    position: usize,
    decoder: Option<Decoder>,
}

impl FfmpegFrameSource {
    pub fn open(settings: SourceSettings) -> CutlineResult<Self> {
        if !settings.input.exists() {
            return Err(CutlineError::FileNotFound {
                path: settings.input.clone(),
            });
        }

        let info = probe_video_stream(&settings.ffprobe, &settings.input, settings.track)?;
        let packets = probe_packets(&settings.ffprobe, &settings.input, settings.track)
            .unwrap_or_else(|e| {
                warn!(error = %e, "Packet scan failed; seeking disabled");
                vec![]
            });

        let fps = settings
            .fps
            .or(info.frame_rate)
            .filter(|fps| fps.is_finite() && *fps > 0.0)
            .ok_or_else(|| {
                CutlineError::decode(format!(
                    "cannot determine the frame rate of {}; set export.fps",
                    settings.input.display()
                ))
            })?;

        let decode_format = PixelFormat::select_target(&info.pixel_format, &settings.fallback_format);
        let frame_size = decode_format
            .frame_size(info.width, info.height)
            .filter(|size| *size > 0)
            .ok_or_else(|| {
                CutlineError::unsupported(format!(
                    "cannot decode {}x{} frames as {decode_format}",
                    info.width, info.height
                ))
            })?;

        let keyframes = packets.iter().filter(|p| p.key_frame).count();
        debug!(
            path = %settings.input.display(),
            track = settings.track,
            fps,
            width = info.width,
            height = info.height,
            source_format = %info.pixel_format,
            decode_format = %decode_format,
            packets = packets.len(),
            keyframes,
            "Opened frame source"
        );

        let decoder = Decoder::spawn(&settings, &decode_format, None)?;
        Ok(Self {
            settings,
            info,
            fps,
            decode_format,
            frame_size,
            packets,
            position: 0,
            decoder: Some(decoder),
        })
    }

    /// Frame rate used for frame indices.
    pub fn fps(&self) -> f64 {
        self.fps
    }

    /// Index into the packet table of the last keyframe at or before
    /// `frame_index`.
    fn keyframe_before(&self, frame_index: u64) -> Option<usize> {
        let target_time = frame_index as f64 / self.fps;
        self.packets
            .iter()
            .rposition(|p| p.key_frame && p.time <= target_time + 1e-6)
    }

    fn fallback_timing(&self) -> (f64, bool) {
        let rate = self.info.frame_rate.unwrap_or(self.fps);
        (
            self.info.start_time + self.position as f64 / rate,
            self.position == 0,
        )
    }
}

impl FrameSource for FfmpegFrameSource {
    fn info(&self) -> &StreamInfo {
        &self.info
    }

    fn next_frame(&mut self) -> CutlineResult<Option<VideoFrame>> {
        let Some(decoder) = self.decoder.as_mut() else {
            return Ok(None);
        };

        let mut data = vec![0u8; self.frame_size];
        let complete = decoder
            .read_frame(&mut data)
            .map_err(|e| CutlineError::decode(format!("failed reading decoded frame: {e}")))?;
        if !complete {
            if let Some(decoder) = self.decoder.take() {
                decoder.finish()?;
            }
            return Ok(None);
        }

        let (time, key_frame) = match self.packets.get(self.position) {
            Some(packet) => (packet.time, packet.key_frame),
            None => self.fallback_timing(),
        };
        self.position += 1;

        VideoFrame::new(
            time,
            key_frame,
            self.decode_format.clone(),
            self.info.width,
            self.info.height,
            data,
        )
        .map(Some)
    }

    fn seek(&mut self, frame_index: u64) -> CutlineResult<()> {
        let Some(keyframe) = self.keyframe_before(frame_index) else {
            debug!(frame_index, "No keyframe before seek target");
            return Ok(());
        };
        if keyframe <= self.position {
            debug!(
                frame_index,
                keyframe,
                position = self.position,
                "Seek would not move forward; decoding through"
            );
            return Ok(());
        }

        if let Some(old) = self.decoder.take() {
            old.kill();
        }
        let seek_time = (self.packets[keyframe].time - self.info.start_time).max(0.0);
        debug!(frame_index, keyframe, seek_time, "Restarting decoder at keyframe");
        self.decoder = Some(Decoder::spawn(&self.settings, &self.decode_format, Some(seek_time))?);
        self.position = keyframe;
        Ok(())
    }
}

impl Drop for FfmpegFrameSource {
    fn drop(&mut self) {
        if let Some(decoder) = self.decoder.take() {
            decoder.kill();
        }
    }
}

struct Decoder {
    child: Child,
    stdout: ChildStdout,
    stderr_task: Option<JoinHandle<String>>,
}

impl Decoder {
    fn spawn(
        settings: &SourceSettings,
        format: &PixelFormat,
        start: Option<f64>,
    ) -> CutlineResult<Self> {
        let args = decoder_args(&settings.input, settings.track, format, start);
        debug!(args = ?args, "Spawning decoder");

        let mut child = Command::new(&settings.ffmpeg)
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| CutlineError::decode(format!("Failed to start {}: {e}", settings.ffmpeg)))?;

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| CutlineError::decode("Failed to capture decoder stdout"))?;
        let stderr_task = child.stderr.take().map(crate::sink::drain_stderr);

        Ok(Self {
            child,
            stdout,
            stderr_task,
        })
    }

    /// Fill `buf` with one frame. Returns `false` at end of stream.
    fn read_frame(&mut self, buf: &mut [u8]) -> std::io::Result<bool> {
        let mut filled = 0;
        while filled < buf.len() {
            match self.stdout.read(&mut buf[filled..]) {
                Ok(0) => break,
                Ok(n) => filled += n,
                Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e),
            }
        }
        if filled > 0 && filled < buf.len() {
            warn!(bytes = filled, expected = buf.len(), "Discarding truncated final frame");
        }
        Ok(filled == buf.len())
    }

    fn finish(mut self) -> CutlineResult<()> {
        let status = self
            .child
            .wait()
            .map_err(|e| CutlineError::decode(format!("Failed to wait on decoder: {e}")))?;
        let stderr = self.join_stderr();
        if !status.success() {
            return Err(CutlineError::decode(format!(
                "decoder exited with {status}: {}",
                stderr.trim()
            )));
        }
        Ok(())
    }

    fn kill(mut self) {
        let _ = self.child.kill();
        let _ = self.child.wait();
        self.join_stderr();
    }

    fn join_stderr(&mut self) -> String {
        self.stderr_task
            .take()
            .map(|task| {
                task.join()
                    .unwrap_or_else(|_| "<failed to join stderr reader>".to_string())
            })
            .unwrap_or_default()
    }
}

/// ffmpeg arguments that decode one video stream to raw frames on stdout.
pub fn decoder_args(input: &Path, track: usize, format: &PixelFormat, start: Option<f64>) -> Vec<String> {
    let mut args: Vec<String> = ["-hide_banner", "-loglevel", "error", "-nostdin"]
        .into_iter()
        .map(String::from)
        .collect();
    if let Some(start) = start {
        args.extend([
            "-ss".to_string(),
            format!("{start:.6}"),
            "-noaccurate_seek".to_string(),
        ]);
    }
    args.extend([
        "-i".to_string(),
        input.display().to_string(),
        "-map".to_string(),
        format!("0:v:{track}"),
        "-an".to_string(),
        "-sn".to_string(),
        "-fps_mode".to_string(),
        "passthrough".to_string(),
        "-f".to_string(),
        "rawvideo".to_string(),
        "-pix_fmt".to_string(),
        format.name().to_string(),
        "pipe:1".to_string(),
    ]);
    args
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decoder_args_without_seek() {
        let args = decoder_args(Path::new("in.mp4"), 1, &PixelFormat::Yuv420p, None);
        assert!(!args.contains(&"-ss".to_string()));
        let joined = args.join(" ");
        assert!(joined.contains("-i in.mp4 -map 0:v:1"));
        assert!(joined.ends_with("-f rawvideo -pix_fmt yuv420p pipe:1"));
    }

    #[test]
    fn test_decoder_args_seek_precedes_input() {
        let args = decoder_args(Path::new("in.mp4"), 0, &PixelFormat::Rgb24, Some(12.5));
        let ss = args.iter().position(|a| a == "-ss").unwrap();
        let input = args.iter().position(|a| a == "-i").unwrap();
        assert!(ss < input);
        assert_eq!(args[ss + 1], "12.500000");
        assert_eq!(args[ss + 2], "-noaccurate_seek");
    }

    #[test]
    fn test_open_missing_input() {
        let result = FfmpegFrameSource::open(SourceSettings {
            ffmpeg: "ffmpeg".into(),
            ffprobe: "ffprobe".into(),
            input: PathBuf::from("/nonexistent/input.mp4"),
            track: 0,
            fps: Some(30.0),
            fallback_format: PixelFormat::Yuv420p,
        });
        assert!(matches!(result, Err(CutlineError::FileNotFound { .. })));
    }
}
