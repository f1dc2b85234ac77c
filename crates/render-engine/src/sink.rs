//! Encoder sinks: where emitted raw frames go.

use std::io::{BufReader, Read, Write};
use std::path::PathBuf;
use std::process::{Child, ChildStderr, ChildStdin, Command, Stdio};
use std::thread::JoinHandle;

use cutline_common::error::{CutlineError, CutlineResult};
use tracing::{debug, info};

use crate::frame::PixelFormat;

/// Blocking consumer of raw frames in emission order.
pub trait EncoderSink {
    /// Write one frame's bytes. Blocks while the encoder is busy.
    fn write_frame(&mut self, data: &[u8]) -> std::io::Result<()>;

    /// Close the input and wait for the encoder to exit successfully.
    fn finish(&mut self) -> CutlineResult<()>;

    /// Close the input after a failure, wait for the encoder to exit, and
    /// return its diagnostics.
    fn abort(&mut self) -> String;
}

/// Raw input description and output settings for the encoder.
#[derive(Debug, Clone, PartialEq)]
pub struct EncoderSettings {
    pub output: PathBuf,
    pub pixel_format: PixelFormat,
    pub width: u32,
    pub height: u32,
    pub fps: f64,
    /// Codec arguments placed between the input and the output path.
    pub codec_args: Vec<String>,
}

impl EncoderSettings {
    pub fn ffmpeg_args(&self) -> Vec<String> {
        let mut args: Vec<String> = [
            "-hide_banner",
            "-loglevel",
            "error",
            "-nostats",
            "-y",
            "-f",
            "rawvideo",
            "-c:v",
            "rawvideo",
            "-pix_fmt",
        ]
        .into_iter()
        .map(String::from)
        .collect();

        args.extend([
            self.pixel_format.name().to_string(),
            "-s".to_string(),
            format!("{}x{}", self.width, self.height),
            "-framerate".to_string(),
            format!("{}", self.fps),
            "-i".to_string(),
            "-".to_string(),
            "-an".to_string(),
        ]);
        args.extend(self.codec_args.iter().cloned());
        args.push(self.output.display().to_string());
        args
    }
}

/// Read a child's stderr to completion on a helper thread so the child
/// never blocks on a full pipe.
pub(crate) fn drain_stderr(stderr: ChildStderr) -> JoinHandle<String> {
    std::thread::spawn(move || -> String {
        let mut reader = BufReader::new(stderr);
        let mut output = String::new();
        match reader.read_to_string(&mut output) {
            Ok(_) => output,
            Err(err) => format!("<failed to read ffmpeg stderr: {err}>"),
        }
    })
}

/// Encoder sink backed by an ffmpeg process reading raw frames on stdin.
pub struct FfmpegEncoderSink {
    child: Child,
    stdin: Option<ChildStdin>,
    stderr_task: Option<JoinHandle<String>>,
    frames_written: u64,
    finished: bool,
}

impl FfmpegEncoderSink {
    pub fn spawn(ffmpeg: &str, settings: &EncoderSettings) -> CutlineResult<Self> {
        let args = settings.ffmpeg_args();
        debug!(args = ?args, "Spawning encoder");

        let mut child = Command::new(ffmpeg)
            .args(&args)
            .stdin(Stdio::piped())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| CutlineError::encode(format!("Failed to start {ffmpeg}: {e}"), ""))?;

        info!(
            pid = child.id(),
            output = %settings.output.display(),
            pixel_format = %settings.pixel_format,
            width = settings.width,
            height = settings.height,
            fps = settings.fps,
            "Encoder started"
        );

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| CutlineError::encode("Failed to capture encoder stdin", ""))?;
        let stderr_task = child.stderr.take().map(drain_stderr);

        Ok(Self {
            child,
            stdin: Some(stdin),
            stderr_task,
            frames_written: 0,
            finished: false,
        })
    }

    pub fn frames_written(&self) -> u64 {
        self.frames_written
    }

    fn close_and_wait(&mut self) -> (Option<std::process::ExitStatus>, String) {
        // Dropping stdin signals end of input.
        self.stdin.take();
        let status = if self.finished {
            None
        } else {
            self.finished = true;
            self.child.wait().ok()
        };
        let diagnostics = self
            .stderr_task
            .take()
            .map(|task| {
                task.join()
                    .unwrap_or_else(|_| "<failed to join stderr reader>".to_string())
            })
            .unwrap_or_default();
        (status, diagnostics)
    }
}

impl EncoderSink for FfmpegEncoderSink {
    fn write_frame(&mut self, data: &[u8]) -> std::io::Result<()> {
        let stdin = self.stdin.as_mut().ok_or_else(|| {
            std::io::Error::new(std::io::ErrorKind::BrokenPipe, "encoder input is closed")
        })?;
        stdin.write_all(data)?;
        self.frames_written += 1;
        Ok(())
    }

    fn finish(&mut self) -> CutlineResult<()> {
        if let Some(stdin) = self.stdin.as_mut() {
            stdin.flush()?;
        }
        let (status, diagnostics) = self.close_and_wait();
        match status {
            Some(status) if status.success() => {
                info!(frames = self.frames_written, "Encoder finished");
                Ok(())
            }
            Some(status) => Err(CutlineError::encode(
                format!("encoder exited with {status}"),
                diagnostics.trim(),
            )),
            None => Err(CutlineError::encode(
                "encoder was already closed",
                diagnostics.trim(),
            )),
        }
    }

    fn abort(&mut self) -> String {
        let (status, diagnostics) = self.close_and_wait();
        debug!(status = ?status, "Encoder aborted");
        diagnostics.trim().to_string()
    }
}

impl Drop for FfmpegEncoderSink {
    fn drop(&mut self) {
        if !self.finished {
            self.stdin.take();
            let _ = self.child.wait();
        }
    }
}
