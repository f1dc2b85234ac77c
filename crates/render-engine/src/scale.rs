//! Geometric scale post-process.
//!
//! Runs after the retimed video is encoded. Some hardware encoders reject the
//! scaled stream outright; when ffmpeg's diagnostics carry a known failure
//! marker the command is retried once with `-allow_sw 1`.

use std::path::Path;
use std::process::{Command, Stdio};

use cutline_common::error::{CutlineError, CutlineResult};
use tracing::{info, warn};

/// Diagnostic substrings that trigger the compatibility retry.
pub const FAILURE_MARKERS: [&str; 2] = ["Error", "failed"];

/// Flag pair inserted before the output path on retry.
pub const COMPATIBILITY_FLAG: [&str; 2] = ["-allow_sw", "1"];

/// Result of one external command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandOutput {
    pub success: bool,
    pub diagnostics: String,
}

/// Runs an ffmpeg-style command line.
pub trait CommandRunner {
    fn run(&self, args: &[String]) -> CutlineResult<CommandOutput>;
}

/// Runs the ffmpeg binary.
#[derive(Debug, Clone)]
pub struct FfmpegCli {
    binary: String,
}

impl FfmpegCli {
    pub fn new(binary: impl Into<String>) -> Self {
        Self {
            binary: binary.into(),
        }
    }
}

impl CommandRunner for FfmpegCli {
    fn run(&self, args: &[String]) -> CutlineResult<CommandOutput> {
        tracing::debug!(binary = %self.binary, args = ?args, "Running command");
        let output = Command::new(&self.binary)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .output()
            .map_err(|e| CutlineError::render(format!("Failed to start {}: {e}", self.binary)))?;

        Ok(CommandOutput {
            success: output.status.success(),
            diagnostics: String::from_utf8_lossy(&output.stderr).into_owned(),
        })
    }
}

pub fn has_failure_markers(diagnostics: &str) -> bool {
    FAILURE_MARKERS.iter().any(|m| diagnostics.contains(m))
}

pub fn scale_args(input: &Path, output: &Path, factor: f64) -> Vec<String> {
    vec![
        "-hide_banner".to_string(),
        "-y".to_string(),
        "-i".to_string(),
        input.display().to_string(),
        "-vf".to_string(),
        format!("scale=iw*{factor}:ih*{factor}"),
        output.display().to_string(),
    ]
}

/// How the scale step went.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScaleOutcome {
    pub retried: bool,
}

/// Scale `input` by `factor` into `output`.
pub fn scale_video(
    runner: &dyn CommandRunner,
    input: &Path,
    output: &Path,
    factor: f64,
) -> CutlineResult<ScaleOutcome> {
    let mut args = scale_args(input, output, factor);
    let first = runner.run(&args)?;

    if !has_failure_markers(&first.diagnostics) {
        if !first.success {
            return Err(CutlineError::encode("scale step failed", first.diagnostics.trim()));
        }
        info!(factor, output = %output.display(), "Scaled video");
        return Ok(ScaleOutcome { retried: false });
    }

    warn!("Scale step reported errors; retrying with {}", COMPATIBILITY_FLAG.join(" "));
    let at = args.len() - 1;
    args.splice(at..at, COMPATIBILITY_FLAG.iter().map(|s| s.to_string()));

    let second = runner.run(&args)?;
    if !second.success || has_failure_markers(&second.diagnostics) {
        return Err(CutlineError::encode(
            "scale step failed after compatibility retry",
            second.diagnostics.trim(),
        ));
    }
    info!(factor, output = %output.display(), "Scaled video on retry");
    Ok(ScaleOutcome { retried: true })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;
    use std::collections::VecDeque;

    struct ScriptedRunner {
        replies: RefCell<VecDeque<CommandOutput>>,
        calls: RefCell<Vec<Vec<String>>>,
    }

    impl ScriptedRunner {
        fn new(replies: Vec<(bool, &str)>) -> Self {
            Self {
                replies: RefCell::new(
                    replies
                        .into_iter()
                        .map(|(success, diagnostics)| CommandOutput {
                            success,
                            diagnostics: diagnostics.to_string(),
                        })
                        .collect(),
                ),
                calls: RefCell::new(vec![]),
            }
        }
    }

    impl CommandRunner for ScriptedRunner {
        fn run(&self, args: &[String]) -> CutlineResult<CommandOutput> {
            self.calls.borrow_mut().push(args.to_vec());
            self.replies
                .borrow_mut()
                .pop_front()
                .ok_or_else(|| CutlineError::render("unexpected call"))
        }
    }

    #[test]
    fn test_scale_args() {
        let args = scale_args(Path::new("a.mp4"), Path::new("b.mp4"), 0.5);
        assert_eq!(args[4..], ["-vf", "scale=iw*0.5:ih*0.5", "b.mp4"]);
    }

    #[test]
    fn test_clean_run_does_not_retry() {
        let runner = ScriptedRunner::new(vec![(true, "frame=  10 fps=0.0")]);
        let outcome = scale_video(&runner, Path::new("a.mp4"), Path::new("b.mp4"), 2.0).unwrap();
        assert!(!outcome.retried);
        assert_eq!(runner.calls.borrow().len(), 1);
    }

    #[test]
    fn test_failure_marker_triggers_single_retry_with_flag() {
        let runner = ScriptedRunner::new(vec![
            (false, "Error while opening encoder"),
            (true, ""),
        ]);
        let outcome = scale_video(&runner, Path::new("a.mp4"), Path::new("b.mp4"), 2.0).unwrap();
        assert!(outcome.retried);

        let calls = runner.calls.borrow();
        assert_eq!(calls.len(), 2);
        let retry = &calls[1];
        assert_eq!(retry[retry.len() - 3..], ["-allow_sw", "1", "b.mp4"]);
    }

    #[test]
    fn test_second_failure_is_surfaced() {
        let runner = ScriptedRunner::new(vec![
            (false, "Conversion failed!"),
            (false, "Conversion failed!"),
        ]);
        let err = scale_video(&runner, Path::new("a.mp4"), Path::new("b.mp4"), 2.0).unwrap_err();
        assert_eq!(err.diagnostics(), Some("Conversion failed!"));
        assert_eq!(runner.calls.borrow().len(), 2);
    }

    #[test]
    fn test_failure_without_markers_is_not_retried() {
        let runner = ScriptedRunner::new(vec![(false, "No such file")]);
        let err = scale_video(&runner, Path::new("a.mp4"), Path::new("b.mp4"), 2.0).unwrap_err();
        assert!(matches!(err, CutlineError::Encode { .. }));
        assert_eq!(runner.calls.borrow().len(), 1);
    }
}
