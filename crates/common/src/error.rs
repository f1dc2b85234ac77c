//! Error types shared across Cutline crates.

use std::path::PathBuf;

/// Top-level error type for Cutline operations.
#[derive(Debug, thiserror::Error)]
pub enum CutlineError {
    /// Invalid overlay or render configuration, reported before any frame
    /// is processed.
    #[error("Configuration error: {message}")]
    Config { message: String },

    #[error("Timeline error: {message}")]
    Timeline { message: String },

    #[error("Decode error: {message}")]
    Decode { message: String },

    /// Fatal failure while streaming frames into the encoder.
    #[error("Encoding error: {message}")]
    Encode {
        message: String,
        /// Diagnostic output collected from the encoder process.
        diagnostics: String,
    },

    #[error("Render error: {message}")]
    Render { message: String },

    #[error("File not found: {path}")]
    FileNotFound { path: PathBuf },

    #[error("Unsupported operation: {message}")]
    Unsupported { message: String },

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Image(#[from] image::ImageError),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// Result type alias using CutlineError.
pub type CutlineResult<T> = Result<T, CutlineError>;

impl CutlineError {
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config {
            message: msg.into(),
        }
    }

    pub fn timeline(msg: impl Into<String>) -> Self {
        Self::Timeline {
            message: msg.into(),
        }
    }

    pub fn decode(msg: impl Into<String>) -> Self {
        Self::Decode {
            message: msg.into(),
        }
    }

    pub fn encode(msg: impl Into<String>, diagnostics: impl Into<String>) -> Self {
        Self::Encode {
            message: msg.into(),
            diagnostics: diagnostics.into(),
        }
    }

    pub fn render(msg: impl Into<String>) -> Self {
        Self::Render {
            message: msg.into(),
        }
    }

    pub fn unsupported(msg: impl Into<String>) -> Self {
        Self::Unsupported {
            message: msg.into(),
        }
    }

    /// Whether this error was raised while validating configuration, i.e.
    /// before any frame was decoded.
    pub fn is_config(&self) -> bool {
        matches!(self, Self::Config { .. } | Self::Timeline { .. })
    }

    /// Encoder diagnostics attached to a streaming failure, if any.
    pub fn diagnostics(&self) -> Option<&str> {
        match self {
            Self::Encode { diagnostics, .. } => Some(diagnostics),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_errors_are_classified() {
        assert!(CutlineError::config("bad field").is_config());
        assert!(CutlineError::timeline("gap").is_config());
        assert!(!CutlineError::render("boom").is_config());
    }

    #[test]
    fn test_encode_error_carries_diagnostics() {
        let err = CutlineError::encode("broken pipe", "Error opening output");
        assert_eq!(err.diagnostics(), Some("Error opening output"));
        assert_eq!(err.to_string(), "Encoding error: broken pipe");
        assert_eq!(CutlineError::decode("eof").diagnostics(), None);
    }
}
