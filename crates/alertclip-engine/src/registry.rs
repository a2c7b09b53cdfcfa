//! Process-wide job registry.
//!
//! The registry is the single entry point for job lifecycle and
//! control. It owns every job record, enforces at-most-one running
//! pipeline per job, hands each job an isolated working directory,
//! and supervises the background tasks that drive acquisition and
//! processing.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, RwLock};

use tokio::sync::watch;
use tracing::{error, info, warn};
use uuid::Uuid;

use alertclip_media::{fsops, SourceMetadata, Toolchain};
use alertclip_models::{Job, JobStatus, ProcessParams};

use crate::acquire::{AcquireRequest, MediaHandle, SourceAcquirer};
use crate::config::EngineConfig;
use crate::error::{EngineError, EngineResult};
use crate::pipeline::PipelineExecutor;
use crate::plan::plan_transform;

/// Length of generated job identifiers.
const JOB_ID_LEN: usize = 12;

struct JobEntry {
    job: Arc<RwLock<Job>>,
    cancel_tx: watch::Sender<bool>,
    video: Option<MediaHandle>,
    audio: Option<MediaHandle>,
    /// A background task currently owns this job
    active: bool,
}

/// Registry of all jobs in this process.
#[derive(Clone)]
pub struct JobRegistry {
    jobs: Arc<RwLock<HashMap<String, JobEntry>>>,
    acquirer: SourceAcquirer,
    executor: PipelineExecutor,
    config: EngineConfig,
}

impl JobRegistry {
    pub fn new(tools: Toolchain, config: EngineConfig) -> Self {
        Self {
            jobs: Arc::new(RwLock::new(HashMap::new())),
            acquirer: SourceAcquirer::new(tools.clone(), config.clone()),
            executor: PipelineExecutor::new(tools, config.clone()),
            config,
        }
    }

    /// Fetch source metadata without creating a job.
    pub async fn validate_source(&self, url: &str) -> EngineResult<SourceMetadata> {
        self.acquirer.validate_url(url).await
    }

    /// Allocate a new job record and return its identifier.
    pub fn create_job(&self) -> String {
        let id = Uuid::new_v4().simple().to_string()[..JOB_ID_LEN].to_string();
        let (cancel_tx, _) = watch::channel(false);
        let entry = JobEntry {
            job: Arc::new(RwLock::new(Job::new(&id))),
            cancel_tx,
            video: None,
            audio: None,
            active: false,
        };
        self.jobs.write().unwrap().insert(id.clone(), entry);
        metrics::counter!("jobs_created_total").increment(1);
        info!(job_id = %id, "Job created");
        id
    }

    /// Per-job acquisition directory.
    pub fn download_dir(&self, job_id: &str) -> PathBuf {
        self.config.downloads_root.join(job_id)
    }

    /// Start acquiring remote sources for a fresh job. Returns the job
    /// id immediately; acquisition continues in the background and is
    /// observable through `snapshot`.
    pub fn acquire(&self, request: AcquireRequest) -> EngineResult<String> {
        let job_id = self.create_job();
        let (job, cancel_rx) = {
            let mut jobs = self.jobs.write().unwrap();
            let entry = jobs.get_mut(&job_id).ok_or_else(|| EngineError::JobNotFound(job_id.clone()))?;
            entry.active = true;
            (Arc::clone(&entry.job), entry.cancel_tx.subscribe())
        };
        job.write().unwrap().set_status(JobStatus::Downloading);

        let registry = self.clone();
        let id = job_id.clone();
        let task = tokio::spawn(async move {
            let job_dir = registry.download_dir(&id);
            let progress_job = Arc::clone(&job);
            let result = registry
                .acquirer
                .acquire_remote(&job_dir, &request, cancel_rx, move |pct| {
                    progress_job
                        .write()
                        .unwrap()
                        .set_progress("Downloading", pct);
                })
                .await;

            match result {
                Ok((video, audio)) => {
                    {
                        let mut jobs = registry.jobs.write().unwrap();
                        if let Some(entry) = jobs.get_mut(&id) {
                            entry.video = Some(video.clone());
                            entry.audio = audio.clone();
                        }
                    }
                    let mut job = job.write().unwrap();
                    job.source_video_path = Some(video.path);
                    job.source_audio_path = audio.map(|a| a.path);
                    job.set_progress("Download complete", 100);
                    job.set_status(JobStatus::Downloaded);
                }
                Err(e) => {
                    warn!(job_id = %id, error = %e, "Acquisition failed");
                    job.write().unwrap().fail(e.to_string());
                }
            }
        });
        self.supervise(job_id.clone(), task);
        Ok(job_id)
    }

    /// Register an already-saved upload as the job's video source.
    ///
    /// The caller creates the job, writes the file into the job's
    /// download directory, then hands the path here for probing.
    pub async fn attach_upload(
        &self,
        job_id: &str,
        path: &std::path::Path,
    ) -> EngineResult<MediaHandle> {
        {
            let jobs = self.jobs.read().unwrap();
            let entry = jobs
                .get(job_id)
                .ok_or_else(|| EngineError::JobNotFound(job_id.to_string()))?;
            let status = entry.job.read().unwrap().status;
            if status != JobStatus::Created {
                return Err(EngineError::InvalidState {
                    expected: "created",
                    actual: status,
                });
            }
        }

        let handle = match self.acquirer.register_upload(path).await {
            Ok(handle) => handle,
            Err(e) => {
                self.with_job(job_id, |job| job.fail(e.to_string()))?;
                return Err(e);
            }
        };

        {
            let mut jobs = self.jobs.write().unwrap();
            let entry = jobs
                .get_mut(job_id)
                .ok_or_else(|| EngineError::JobNotFound(job_id.to_string()))?;
            entry.video = Some(handle.clone());
        }
        self.with_job(job_id, |job| {
            job.source_video_path = Some(handle.path.clone());
            job.set_status(JobStatus::Downloaded);
            job.set_progress("Upload registered", 100);
        })?;
        Ok(handle)
    }

    /// Probed properties of the acquired video source.
    pub fn probe_info(&self, job_id: &str) -> EngineResult<MediaHandle> {
        let jobs = self.jobs.read().unwrap();
        let entry = jobs
            .get(job_id)
            .ok_or_else(|| EngineError::JobNotFound(job_id.to_string()))?;
        entry
            .video
            .clone()
            .ok_or_else(|| EngineError::InvalidState {
                expected: "downloaded",
                actual: entry.job.read().unwrap().status,
            })
    }

    /// Path of the acquired source file, for streaming to the client.
    pub fn media_path(&self, job_id: &str) -> EngineResult<PathBuf> {
        self.probe_info(job_id).map(|h| h.path)
    }

    /// Validate parameters and launch the processing pipeline.
    ///
    /// Rejects jobs that are not in the `downloaded` state and jobs
    /// that already have a task running. Parameter validation happens
    /// before the job is touched, so a bad request leaves the job
    /// ready for a corrected retry.
    pub fn start_processing(
        &self,
        job_id: &str,
        params: ProcessParams,
        static_image: Option<PathBuf>,
    ) -> EngineResult<()> {
        let (job, cancel_rx, plan) = {
            let mut jobs = self.jobs.write().unwrap();
            let entry = jobs
                .get_mut(job_id)
                .ok_or_else(|| EngineError::JobNotFound(job_id.to_string()))?;
            if entry.active {
                return Err(EngineError::JobBusy(job_id.to_string()));
            }
            let status = entry.job.read().unwrap().status;
            if status != JobStatus::Downloaded {
                return Err(EngineError::InvalidState {
                    expected: "downloaded",
                    actual: status,
                });
            }
            let video = entry.video.as_ref().ok_or_else(|| EngineError::InvalidState {
                expected: "downloaded",
                actual: status,
            })?;
            let plan = plan_transform(
                video,
                entry.audio.as_ref(),
                &params,
                self.config.buffer_audio,
                static_image,
            )?;
            entry.active = true;
            (Arc::clone(&entry.job), entry.cancel_tx.subscribe(), plan)
        };

        job.write().unwrap().set_status(JobStatus::Processing);
        info!(
            job_id,
            clip_duration = plan.clip_duration,
            normalize = plan.normalize,
            "Processing started"
        );

        let registry = self.clone();
        let id = job_id.to_string();
        let task = tokio::spawn(async move {
            let progress_job = Arc::clone(&job);
            let result = registry
                .executor
                .execute(&id, &plan, cancel_rx, move |stage, pct| {
                    progress_job.write().unwrap().set_progress(stage, pct);
                })
                .await;

            let mut job = job.write().unwrap();
            match result {
                Ok(output) => job.complete(output),
                Err(EngineError::Cancelled) => {
                    info!(job_id = %id, "Processing cancelled");
                    job.fail("cancelled");
                }
                Err(e) => {
                    error!(job_id = %id, error = %e, "Processing failed");
                    job.fail(e.to_string());
                }
            }
        });
        self.supervise(job_id.to_string(), task);
        Ok(())
    }

    /// Request cancellation of the job's running task.
    ///
    /// Only jobs with an active phase can be cancelled. Flipping the
    /// watch channel on an idle job would poison its next
    /// `start_processing`.
    pub fn cancel(&self, job_id: &str) -> EngineResult<()> {
        let jobs = self.jobs.read().unwrap();
        let entry = jobs
            .get(job_id)
            .ok_or_else(|| EngineError::JobNotFound(job_id.to_string()))?;
        let status = entry.job.read().unwrap().status;
        if !matches!(status, JobStatus::Downloading | JobStatus::Processing) {
            return Err(EngineError::InvalidState {
                expected: "downloading or processing",
                actual: status,
            });
        }
        let _ = entry.cancel_tx.send(true);
        info!(job_id, "Cancellation requested");
        Ok(())
    }

    /// Cloned snapshot of the job record.
    pub fn snapshot(&self, job_id: &str) -> EngineResult<Job> {
        let jobs = self.jobs.read().unwrap();
        let entry = jobs
            .get(job_id)
            .ok_or_else(|| EngineError::JobNotFound(job_id.to_string()))?;
        let job = entry.job.read().unwrap().clone();
        Ok(job)
    }

    /// Output path of a completed job.
    pub fn result_path(&self, job_id: &str) -> EngineResult<PathBuf> {
        let job = self.snapshot(job_id)?;
        if job.status != JobStatus::Complete {
            return Err(EngineError::InvalidState {
                expected: "complete",
                actual: job.status,
            });
        }
        job.output_path.ok_or_else(|| {
            EngineError::Stage {
                stage: "encode",
                message: "completed job has no output file".to_string(),
            }
        })
    }

    /// Drop the job and delete its temporary directories. The output
    /// file, if any, stays under the output root.
    pub async fn cleanup(&self, job_id: &str) -> EngineResult<()> {
        let entry = self
            .jobs
            .write()
            .unwrap()
            .remove(job_id)
            .ok_or_else(|| EngineError::JobNotFound(job_id.to_string()))?;
        // A still-running task is told to stop; its kill-on-drop
        // children die with it.
        let _ = entry.cancel_tx.send(true);

        fsops::remove_dir_if_exists(self.config.downloads_root.join(job_id))
            .await
            .map_err(EngineError::from_acquisition)?;
        fsops::remove_dir_if_exists(self.config.processing_root.join(job_id))
            .await
            .map_err(EngineError::from_acquisition)?;
        info!(job_id, "Job cleaned up");
        Ok(())
    }

    fn with_job(&self, job_id: &str, f: impl FnOnce(&mut Job)) -> EngineResult<()> {
        let jobs = self.jobs.read().unwrap();
        let entry = jobs
            .get(job_id)
            .ok_or_else(|| EngineError::JobNotFound(job_id.to_string()))?;
        f(&mut entry.job.write().unwrap());
        Ok(())
    }

    /// Watch a job's background task and surface a panic as a job
    /// error instead of a silently stuck record.
    fn supervise(&self, job_id: String, task: tokio::task::JoinHandle<()>) {
        let registry = self.clone();
        tokio::spawn(async move {
            if let Err(join_err) = task.await {
                error!(job_id = %job_id, error = %join_err, "Job task panicked");
                let _ = registry.with_job(&job_id, |job| job.fail("internal task failure"));
            }
            if let Some(entry) = registry.jobs.write().unwrap().get_mut(&job_id) {
                entry.active = false;
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alertclip_models::{CropRect, ResolutionPreset, TrimWindow};
    use tempfile::TempDir;

    fn test_registry(tmp: &TempDir) -> JobRegistry {
        let tools = Toolchain {
            ffmpeg: PathBuf::from("/usr/bin/ffmpeg"),
            ffprobe: PathBuf::from("/usr/bin/ffprobe"),
            ytdlp: PathBuf::from("/usr/bin/yt-dlp"),
        };
        let config = EngineConfig {
            downloads_root: tmp.path().join("downloads"),
            processing_root: tmp.path().join("processing"),
            output_root: tmp.path().join("output"),
            ..EngineConfig::default()
        };
        JobRegistry::new(tools, config)
    }

    fn ready_entry(registry: &JobRegistry, job_id: &str) {
        let mut jobs = registry.jobs.write().unwrap();
        let entry = jobs.get_mut(job_id).unwrap();
        entry.video = Some(MediaHandle {
            path: PathBuf::from("/tmp/clip.mp4"),
            duration: 30.0,
            width: 1920,
            height: 1080,
            fps: 60.0,
            has_audio: true,
            sample_rate: Some(48_000),
        });
        let mut job = entry.job.write().unwrap();
        job.set_status(JobStatus::Downloading);
        job.set_status(JobStatus::Downloaded);
    }

    fn params() -> ProcessParams {
        ProcessParams {
            crop: CropRect {
                x: 0,
                y: 0,
                width: 1280,
                height: 720,
            },
            trim: TrimWindow {
                start: 0.0,
                end: 5.0,
            },
            audio_trim: None,
            resolution: ResolutionPreset::P720,
            normalize_audio: false,
            buffer_secs: 0.0,
            use_static_image: false,
        }
    }

    #[tokio::test]
    async fn test_create_and_snapshot() {
        let tmp = TempDir::new().unwrap();
        let registry = test_registry(&tmp);
        let id = registry.create_job();
        assert_eq!(id.len(), JOB_ID_LEN);
        let job = registry.snapshot(&id).unwrap();
        assert_eq!(job.status, JobStatus::Created);
        assert_eq!(job.progress, 0);
    }

    #[tokio::test]
    async fn test_unknown_job_is_not_found() {
        let tmp = TempDir::new().unwrap();
        let registry = test_registry(&tmp);
        assert!(matches!(
            registry.snapshot("missing"),
            Err(EngineError::JobNotFound(_))
        ));
        assert!(matches!(
            registry.cancel("missing"),
            Err(EngineError::JobNotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_processing_requires_downloaded_state() {
        let tmp = TempDir::new().unwrap();
        let registry = test_registry(&tmp);
        let id = registry.create_job();
        let err = registry.start_processing(&id, params(), None).unwrap_err();
        assert!(matches!(err, EngineError::InvalidState { .. }));
    }

    #[tokio::test]
    async fn test_processing_rejects_invalid_params_without_state_change() {
        let tmp = TempDir::new().unwrap();
        let registry = test_registry(&tmp);
        let id = registry.create_job();
        ready_entry(&registry, &id);

        let mut bad = params();
        bad.crop.width = 4000;
        let err = registry.start_processing(&id, bad, None).unwrap_err();
        assert!(matches!(err, EngineError::Validation { .. }));

        // The job is still ready for a corrected request.
        let job = registry.snapshot(&id).unwrap();
        assert_eq!(job.status, JobStatus::Downloaded);
    }

    #[tokio::test]
    async fn test_second_start_is_busy() {
        let tmp = TempDir::new().unwrap();
        let registry = test_registry(&tmp);
        let id = registry.create_job();
        ready_entry(&registry, &id);

        // First start wins; ffmpeg path won't exist but the busy check
        // happens before the task reports back.
        registry.start_processing(&id, params(), None).unwrap();
        let err = registry.start_processing(&id, params(), None).unwrap_err();
        assert!(matches!(err, EngineError::JobBusy(_)));
    }

    #[tokio::test]
    async fn test_jobs_are_isolated() {
        let tmp = TempDir::new().unwrap();
        let registry = test_registry(&tmp);
        let a = registry.create_job();
        let b = registry.create_job();
        assert_ne!(a, b);
        assert_ne!(registry.download_dir(&a), registry.download_dir(&b));

        let dl_b = registry.download_dir(&b);
        tokio::fs::create_dir_all(registry.download_dir(&a))
            .await
            .unwrap();
        tokio::fs::create_dir_all(&dl_b).await.unwrap();

        // Cleaning up one job leaves the other's record and files.
        registry.cleanup(&a).await.unwrap();
        assert!(matches!(
            registry.snapshot(&a),
            Err(EngineError::JobNotFound(_))
        ));
        assert_eq!(registry.snapshot(&b).unwrap().status, JobStatus::Created);
        assert!(dl_b.exists());
    }

    #[tokio::test]
    async fn test_failed_download_ends_in_error() {
        let tmp = TempDir::new().unwrap();
        let tools = Toolchain {
            ffmpeg: tmp.path().join("missing/ffmpeg"),
            ffprobe: tmp.path().join("missing/ffprobe"),
            ytdlp: tmp.path().join("missing/yt-dlp"),
        };
        let config = EngineConfig {
            downloads_root: tmp.path().join("downloads"),
            processing_root: tmp.path().join("processing"),
            output_root: tmp.path().join("output"),
            ..EngineConfig::default()
        };
        let registry = JobRegistry::new(tools, config);

        let id = registry
            .acquire(AcquireRequest {
                url: "https://example.com/watch?v=abc".to_string(),
                window: TrimWindow {
                    start: 0.0,
                    end: 5.0,
                },
                audio_url: None,
                audio_window: None,
            })
            .unwrap();

        // Never stuck in downloading: the spawn failure must land the
        // job in a terminal error state.
        let mut job = registry.snapshot(&id).unwrap();
        for _ in 0..200 {
            if job.is_terminal() {
                break;
            }
            tokio::time::sleep(std::time::Duration::from_millis(20)).await;
            job = registry.snapshot(&id).unwrap();
        }
        assert_eq!(job.status, JobStatus::Error);
        assert!(job.error.is_some());
    }

    #[tokio::test]
    async fn test_cancel_rejects_idle_job() {
        let tmp = TempDir::new().unwrap();
        let registry = test_registry(&tmp);
        let id = registry.create_job();
        assert!(matches!(
            registry.cancel(&id),
            Err(EngineError::InvalidState { .. })
        ));

        ready_entry(&registry, &id);
        assert!(matches!(
            registry.cancel(&id),
            Err(EngineError::InvalidState { .. })
        ));
        // The cancel channel stayed untouched, so processing can still
        // start normally.
        registry.start_processing(&id, params(), None).unwrap();
    }

    #[tokio::test]
    async fn test_attach_upload_requires_fresh_job() {
        let tmp = TempDir::new().unwrap();
        let registry = test_registry(&tmp);
        let id = registry.create_job();
        ready_entry(&registry, &id);
        let err = registry
            .attach_upload(&id, &PathBuf::from("/tmp/x.mp4"))
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::InvalidState { .. }));
    }

    #[tokio::test]
    async fn test_result_requires_complete() {
        let tmp = TempDir::new().unwrap();
        let registry = test_registry(&tmp);
        let id = registry.create_job();
        ready_entry(&registry, &id);
        let err = registry.result_path(&id).unwrap_err();
        assert!(matches!(err, EngineError::InvalidState { .. }));
    }

    #[tokio::test]
    async fn test_cleanup_removes_job_and_dirs() {
        let tmp = TempDir::new().unwrap();
        let registry = test_registry(&tmp);
        let id = registry.create_job();
        let dl = registry.download_dir(&id);
        tokio::fs::create_dir_all(&dl).await.unwrap();

        registry.cleanup(&id).await.unwrap();
        assert!(!dl.exists());
        assert!(matches!(
            registry.snapshot(&id),
            Err(EngineError::JobNotFound(_))
        ));
    }
}
