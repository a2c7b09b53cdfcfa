//! Source acquisition.
//!
//! Resolves a job's visual and audio sources into probed, immutable
//! `MediaHandle`s. URL locators are fetched with yt-dlp section
//! downloads; local uploads are taken as-is. When a separate audio
//! source is requested the two downloads run concurrently, each into
//! its own file in the job's directory.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};

use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tracing::{info, warn};

use alertclip_media::{
    clean_video_url, download_audio_section, download_section, fetch_metadata, probe_media,
    MediaError, SourceMetadata, Toolchain,
};
use alertclip_models::TrimWindow;

use crate::config::EngineConfig;
use crate::error::{EngineError, EngineResult};

/// Extensions accepted for local uploads.
const ALLOWED_UPLOAD_EXTENSIONS: &[&str] = &["mp4", "mov", "avi", "mkv", "webm", "wmv", "m4v"];

/// Bound on the URL metadata cache.
const METADATA_CACHE_CAP: usize = 128;

/// A resolved, probed local media file. Immutable once created.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MediaHandle {
    pub path: PathBuf,
    pub duration: f64,
    pub width: u32,
    pub height: u32,
    pub fps: f64,
    pub has_audio: bool,
    pub sample_rate: Option<u32>,
}

/// Acquisition request for a URL-addressed source.
#[derive(Debug, Clone, Deserialize)]
pub struct AcquireRequest {
    pub url: String,
    pub window: TrimWindow,
    /// Separate audio source, fetched independently when present
    pub audio_url: Option<String>,
    pub audio_window: Option<TrimWindow>,
}

/// Resolves source locators into `MediaHandle`s.
#[derive(Clone)]
pub struct SourceAcquirer {
    tools: Toolchain,
    config: EngineConfig,
    /// Validated-URL metadata, so repeated validation of the same
    /// locator skips the yt-dlp round trip
    metadata_cache: Arc<Mutex<HashMap<String, SourceMetadata>>>,
}

impl SourceAcquirer {
    pub fn new(tools: Toolchain, config: EngineConfig) -> Self {
        Self {
            tools,
            config,
            metadata_cache: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Fetch title/duration for a locator without downloading.
    pub async fn validate_url(&self, url: &str) -> EngineResult<SourceMetadata> {
        let url = clean_video_url(url);
        if let Some(meta) = self.metadata_cache.lock().unwrap().get(&url) {
            return Ok(meta.clone());
        }

        let meta = fetch_metadata(&self.tools, &url, self.config.metadata_timeout)
            .await
            .map_err(EngineError::from_acquisition)?;

        let mut cache = self.metadata_cache.lock().unwrap();
        if cache.len() >= METADATA_CACHE_CAP {
            cache.clear();
        }
        cache.insert(url, meta.clone());
        Ok(meta)
    }

    /// Acquire a job's sources from URLs into `job_dir`.
    ///
    /// The video section lands at `clip.<ext>`; a separate audio
    /// source, when requested, lands at `audio.wav`. The two downloads
    /// are independent and run concurrently. `on_progress` receives a
    /// combined 0-100 percent.
    pub async fn acquire_remote<F>(
        &self,
        job_dir: &Path,
        request: &AcquireRequest,
        cancel_rx: watch::Receiver<bool>,
        on_progress: F,
    ) -> EngineResult<(MediaHandle, Option<MediaHandle>)>
    where
        F: Fn(u8) + Send + Sync + 'static,
    {
        alertclip_media::fsops::ensure_dir(job_dir)
            .await
            .map_err(EngineError::from_acquisition)?;

        let url = clean_video_url(&request.url);
        let has_audio_source = request.audio_url.is_some();
        let on_progress = Arc::new(on_progress);

        // Shared percent slots so the combined number stays monotone
        // no matter which download reports next.
        let video_pct = Arc::new(AtomicU32::new(0));
        let audio_pct = Arc::new(AtomicU32::new(0));

        let report = {
            let video_pct = Arc::clone(&video_pct);
            let audio_pct = Arc::clone(&audio_pct);
            let on_progress = Arc::clone(&on_progress);
            move || {
                let v = video_pct.load(Ordering::Relaxed);
                let combined = if has_audio_source {
                    (v + audio_pct.load(Ordering::Relaxed)) / 2
                } else {
                    v
                };
                on_progress(combined.min(100) as u8);
            }
        };

        let video_template = job_dir.join("clip.%(ext)s");
        let video_fut = self.download_with_retry({
            let tools = self.tools.clone();
            let url = url.clone();
            let window = request.window;
            let timeout = self.config.download_timeout;
            let cancel_rx = cancel_rx.clone();
            let video_pct = Arc::clone(&video_pct);
            let report = report.clone();
            move || {
                let tools = tools.clone();
                let url = url.clone();
                let template = video_template.clone();
                let cancel_rx = cancel_rx.clone();
                let video_pct = Arc::clone(&video_pct);
                let report = report.clone();
                async move {
                    download_section(
                        &tools,
                        &url,
                        window.start,
                        window.end,
                        &template,
                        timeout,
                        Some(cancel_rx),
                        move |update| {
                            video_pct.store(update.percent as u32, Ordering::Relaxed);
                            report();
                        },
                    )
                    .await
                }
            }
        });

        let audio_fut = async {
            let Some(audio_url) = request.audio_url.as_deref() else {
                return Ok(());
            };
            let audio_window = request.audio_window.ok_or_else(|| {
                EngineError::validation("audio_window", "separate audio source requires a window")
            })?;
            let audio_url = clean_video_url(audio_url);
            let audio_template = job_dir.join("audio.%(ext)s");
            self.download_with_retry({
                let tools = self.tools.clone();
                let timeout = self.config.download_timeout;
                let cancel_rx = cancel_rx.clone();
                let audio_pct = Arc::clone(&audio_pct);
                let report = report.clone();
                move || {
                    let tools = tools.clone();
                    let url = audio_url.clone();
                    let template = audio_template.clone();
                    let cancel_rx = cancel_rx.clone();
                    let audio_pct = Arc::clone(&audio_pct);
                    let report = report.clone();
                    async move {
                        download_audio_section(
                            &tools,
                            &url,
                            audio_window.start,
                            audio_window.end,
                            &template,
                            timeout,
                            Some(cancel_rx),
                            move |update| {
                                audio_pct.store(update.percent as u32, Ordering::Relaxed);
                                report();
                            },
                        )
                        .await
                    }
                }
            })
            .await
        };

        let (video_result, audio_result) = tokio::join!(video_fut, audio_fut);
        video_result?;
        audio_result?;

        let video_path = alertclip_media::fsops::find_by_stem(job_dir, "clip")
            .await
            .map_err(EngineError::from_acquisition)?
            .ok_or_else(|| EngineError::Acquisition("no file downloaded".to_string()))?;
        let video = self.probe_handle(&video_path).await?;

        let audio = if has_audio_source {
            let audio_path = alertclip_media::fsops::find_by_stem(job_dir, "audio")
                .await
                .map_err(EngineError::from_acquisition)?
                .ok_or_else(|| EngineError::Acquisition("no audio file downloaded".to_string()))?;
            Some(self.probe_handle(&audio_path).await?)
        } else {
            None
        };

        info!(
            video = %video.path.display(),
            duration = video.duration,
            separate_audio = audio.is_some(),
            "Acquisition complete"
        );
        Ok((video, audio))
    }

    /// Build a handle for an already-saved local upload.
    pub async fn register_upload(&self, path: &Path) -> EngineResult<MediaHandle> {
        self.probe_handle(path).await
    }

    async fn probe_handle(&self, path: &Path) -> EngineResult<MediaHandle> {
        let info = probe_media(&self.tools, path)
            .await
            .map_err(EngineError::from_acquisition)?;
        Ok(MediaHandle {
            path: path.to_path_buf(),
            duration: info.duration,
            width: info.width,
            height: info.height,
            fps: info.fps,
            has_audio: info.has_audio,
            sample_rate: info.sample_rate,
        })
    }

    /// Run a download, retrying once on transient failure.
    async fn download_with_retry<Fut, Mk>(&self, make: Mk) -> EngineResult<()>
    where
        Mk: Fn() -> Fut,
        Fut: std::future::Future<Output = Result<(), MediaError>>,
    {
        match make().await {
            Ok(()) => Ok(()),
            Err(e) if e.is_transient() => {
                warn!(error = %e, "Transient download failure, retrying once");
                make().await.map_err(EngineError::from_acquisition)
            }
            Err(e) => Err(EngineError::from_acquisition(e)),
        }
    }
}

/// Whether a filename has an accepted upload extension.
pub fn is_allowed_upload(filename: &str) -> bool {
    filename
        .rsplit_once('.')
        .map(|(_, ext)| ALLOWED_UPLOAD_EXTENSIONS.contains(&ext.to_lowercase().as_str()))
        .unwrap_or(false)
}
