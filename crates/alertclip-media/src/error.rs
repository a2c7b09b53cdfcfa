//! Error types for media tool operations.

use std::path::PathBuf;
use thiserror::Error;

/// Result type for media operations.
pub type MediaResult<T> = Result<T, MediaError>;

/// Errors that can occur while driving external media tools.
#[derive(Debug, Error)]
pub enum MediaError {
    #[error("{tool} not found on PATH")]
    ToolNotFound { tool: &'static str },

    #[error("{tool} failed: {message}")]
    ToolFailed {
        tool: String,
        message: String,
        /// Bounded tail of the tool's diagnostic output
        tail: Vec<String>,
        exit_code: Option<i32>,
    },

    #[error("probe failed: {message}")]
    ProbeFailed { message: String },

    #[error("download failed: {message}")]
    DownloadFailed { message: String },

    #[error("file not found: {0}")]
    FileNotFound(PathBuf),

    #[error("operation cancelled")]
    Cancelled,

    #[error("operation timed out after {0} seconds")]
    Timeout(u64),

    #[error("invalid media file: {0}")]
    InvalidMedia(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON parse error: {0}")]
    JsonParse(#[from] serde_json::Error),
}

impl MediaError {
    /// Create a tool failure carrying the captured diagnostic tail.
    pub fn tool_failed(
        tool: impl Into<String>,
        message: impl Into<String>,
        tail: Vec<String>,
        exit_code: Option<i32>,
    ) -> Self {
        Self::ToolFailed {
            tool: tool.into(),
            message: message.into(),
            tail,
            exit_code,
        }
    }

    pub fn probe_failed(message: impl Into<String>) -> Self {
        Self::ProbeFailed {
            message: message.into(),
        }
    }

    pub fn download_failed(message: impl Into<String>) -> Self {
        Self::DownloadFailed {
            message: message.into(),
        }
    }

    /// Whether a retry has a reasonable chance of succeeding.
    ///
    /// Only transient download failures qualify; validation-ish and
    /// environment errors do not.
    pub fn is_transient(&self) -> bool {
        match self {
            MediaError::DownloadFailed { message } => {
                let m = message.to_lowercase();
                m.contains("timed out")
                    || m.contains("timeout")
                    || m.contains("connection")
                    || m.contains("temporary")
                    || m.contains("503")
                    || m.contains("502")
            }
            MediaError::Timeout(_) => true,
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transient_classification() {
        assert!(MediaError::download_failed("Connection reset by peer").is_transient());
        assert!(MediaError::download_failed("HTTP Error 503").is_transient());
        assert!(!MediaError::download_failed("Video unavailable").is_transient());
        assert!(MediaError::Timeout(300).is_transient());
        assert!(!MediaError::Cancelled.is_transient());
    }
}
