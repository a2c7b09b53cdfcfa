//! Shared data models for the AlertClip backend.

pub mod job;
pub mod params;
pub mod timestamp;

pub use job::{Job, JobStatus};
pub use params::{
    BufferAudioPolicy, CropRect, OutputSize, ProcessParams, ResolutionPreset, TrimWindow,
};
pub use timestamp::{format_seconds, parse_timestamp, TimestampError};

/// Validate that a job id is safe for path construction.
///
/// Ids generated by the registry always pass, but anything arriving
/// over HTTP is re-checked before it gets near a filesystem path.
pub fn is_safe_job_id(id: &str) -> bool {
    !id.is_empty()
        && id.len() <= 64
        && id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_safe_job_id() {
        assert!(is_safe_job_id("a1b2c3d4e5f6"));
        assert!(is_safe_job_id("job_1-x"));
        assert!(!is_safe_job_id(""));
        assert!(!is_safe_job_id("../etc/passwd"));
        assert!(!is_safe_job_id("a/b"));
        assert!(!is_safe_job_id(&"x".repeat(65)));
    }
}
