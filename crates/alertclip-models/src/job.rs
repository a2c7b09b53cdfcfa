//! Job record and lifecycle state machine.
//!
//! A `Job` tracks one clip-creation request end-to-end. The registry
//! owns the record; the job's background task is the only writer and
//! polling clients read cloned snapshots.

use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Job lifecycle status.
///
/// Transitions move strictly forward through the variants in order;
/// `Error` is terminal and reachable from any non-terminal state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    /// Job allocated, no source acquired yet
    #[default]
    Created,
    /// Source acquisition in progress
    Downloading,
    /// Source acquired and probed, awaiting transform parameters
    Downloaded,
    /// Pipeline executing
    Processing,
    /// Output produced
    Complete,
    /// Terminal failure
    Error,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Created => "created",
            JobStatus::Downloading => "downloading",
            JobStatus::Downloaded => "downloaded",
            JobStatus::Processing => "processing",
            JobStatus::Complete => "complete",
            JobStatus::Error => "error",
        }
    }

    /// Terminal states receive no further updates.
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Complete | JobStatus::Error)
    }

    /// Ordinal position used to enforce forward-only transitions.
    fn rank(&self) -> u8 {
        match self {
            JobStatus::Created => 0,
            JobStatus::Downloading => 1,
            JobStatus::Downloaded => 2,
            JobStatus::Processing => 3,
            JobStatus::Complete => 4,
            JobStatus::Error => 5,
        }
    }

    /// Whether moving to `next` is a legal transition.
    pub fn can_transition_to(&self, next: JobStatus) -> bool {
        if self.is_terminal() {
            return false;
        }
        if next == JobStatus::Error {
            return true;
        }
        next.rank() > self.rank()
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// One user-initiated clip-creation request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    /// Opaque unique token, never reused
    pub id: String,
    /// Current lifecycle status
    pub status: JobStatus,
    /// Human-readable current stage
    pub stage: String,
    /// Aggregate progress percentage (0-100)
    pub progress: u8,
    /// Error detail, present iff status == Error
    pub error: Option<String>,
    /// Acquired video source
    pub source_video_path: Option<PathBuf>,
    /// Acquired separate audio source, if any
    pub source_audio_path: Option<PathBuf>,
    /// Final output, set at most once just before Complete
    pub output_path: Option<PathBuf>,
    /// Creation time
    pub created_at: DateTime<Utc>,
    /// Last mutation time
    pub updated_at: DateTime<Utc>,
}

impl Job {
    pub fn new(id: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: id.into(),
            status: JobStatus::Created,
            stage: String::new(),
            progress: 0,
            error: None,
            source_video_path: None,
            source_audio_path: None,
            output_path: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// Advance the status. Illegal transitions are ignored rather than
    /// panicking; the registry logs them at the call site.
    ///
    /// Returns `true` if the transition was applied.
    pub fn set_status(&mut self, status: JobStatus) -> bool {
        if !self.status.can_transition_to(status) {
            return false;
        }
        // Each active phase reports its own 0-100 range.
        if matches!(status, JobStatus::Downloading | JobStatus::Processing) {
            self.progress = 0;
        }
        self.status = status;
        self.updated_at = Utc::now();
        true
    }

    /// Update the stage label and progress. Progress never regresses.
    pub fn set_progress(&mut self, stage: impl Into<String>, progress: u8) {
        self.stage = stage.into();
        self.progress = self.progress.max(progress.min(100));
        self.updated_at = Utc::now();
    }

    /// Mark the job complete with its output file.
    ///
    /// The output path is written in the same mutation as the status
    /// flip so a snapshot can never observe `complete` without it.
    pub fn complete(&mut self, output: PathBuf) {
        if self.set_status(JobStatus::Complete) {
            self.output_path = Some(output);
            self.progress = 100;
            self.stage = "Done".into();
        }
    }

    /// Mark the job failed with a cause.
    pub fn fail(&mut self, error: impl Into<String>) {
        if self.set_status(JobStatus::Error) {
            self.error = Some(error.into());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_forward_only_transitions() {
        let mut job = Job::new("j1");
        assert!(job.set_status(JobStatus::Downloading));
        assert!(job.set_status(JobStatus::Downloaded));
        // Regression is rejected
        assert!(!job.set_status(JobStatus::Downloading));
        assert_eq!(job.status, JobStatus::Downloaded);
        assert!(job.set_status(JobStatus::Processing));
    }

    #[test]
    fn test_progress_resets_at_phase_start() {
        let mut job = Job::new("j1");
        job.set_status(JobStatus::Downloading);
        job.set_progress("Downloading", 100);
        job.set_status(JobStatus::Downloaded);
        assert_eq!(job.progress, 100);
        job.set_status(JobStatus::Processing);
        assert_eq!(job.progress, 0);
        job.set_progress("trim", 5);
        assert_eq!(job.progress, 5);
    }

    #[test]
    fn test_error_is_terminal() {
        let mut job = Job::new("j1");
        job.set_status(JobStatus::Processing);
        job.fail("boom");
        assert_eq!(job.status, JobStatus::Error);
        assert_eq!(job.error.as_deref(), Some("boom"));
        assert!(!job.set_status(JobStatus::Complete));
        assert!(job.is_terminal());
    }

    #[test]
    fn test_complete_sets_output_atomically() {
        let mut job = Job::new("j1");
        job.set_status(JobStatus::Processing);
        job.complete(PathBuf::from("/out/alert_j1.mp4"));
        assert_eq!(job.status, JobStatus::Complete);
        assert!(job.output_path.is_some());
        assert_eq!(job.progress, 100);
    }

    #[test]
    fn test_complete_after_error_ignored() {
        let mut job = Job::new("j1");
        job.fail("dead");
        job.complete(PathBuf::from("/out/x.mp4"));
        assert_eq!(job.status, JobStatus::Error);
        assert!(job.output_path.is_none());
    }

    #[test]
    fn test_progress_never_regresses() {
        let mut job = Job::new("j1");
        job.set_progress("Trimming", 40);
        job.set_progress("Trimming", 25);
        assert_eq!(job.progress, 40);
        job.set_progress("Encoding", 90);
        assert_eq!(job.progress, 90);
    }

    #[test]
    fn test_status_serde_snake_case() {
        let s = serde_json::to_string(&JobStatus::Downloading).unwrap();
        assert_eq!(s, "\"downloading\"");
    }
}
