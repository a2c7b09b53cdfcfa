//! Engine error taxonomy.

use alertclip_media::MediaError;
use alertclip_models::JobStatus;
use thiserror::Error;

pub type EngineResult<T> = Result<T, EngineError>;

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("acquisition failed: {0}")]
    Acquisition(String),

    #[error("invalid {field}: {message}")]
    Validation {
        field: &'static str,
        message: String,
    },

    #[error("probe failed: {0}")]
    Probe(String),

    #[error("{stage} stage failed: {message}")]
    Stage {
        stage: &'static str,
        message: String,
    },

    #[error("required tool missing: {0}")]
    DependencyMissing(String),

    #[error("job cancelled")]
    Cancelled,

    #[error("job {0} is already processing")]
    JobBusy(String),

    #[error("job {0} not found")]
    JobNotFound(String),

    #[error("job is {actual}, expected {expected}")]
    InvalidState {
        expected: &'static str,
        actual: JobStatus,
    },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl EngineError {
    pub fn validation(field: &'static str, message: impl Into<String>) -> Self {
        Self::Validation {
            field,
            message: message.into(),
        }
    }

    /// Classify a media-layer error raised during acquisition.
    pub fn from_acquisition(err: MediaError) -> Self {
        match err {
            MediaError::Cancelled => Self::Cancelled,
            MediaError::ToolNotFound { tool } => Self::DependencyMissing(tool.to_string()),
            MediaError::ProbeFailed { message } => Self::Probe(message),
            other => Self::Acquisition(other.to_string()),
        }
    }

    /// Classify a media-layer error raised by a pipeline stage.
    pub fn from_stage(stage: &'static str, err: MediaError) -> Self {
        match err {
            MediaError::Cancelled => Self::Cancelled,
            MediaError::ToolNotFound { tool } => Self::DependencyMissing(tool.to_string()),
            other => Self::Stage {
                stage,
                message: other.to_string(),
            },
        }
    }
}
