//! Engine configuration.

use std::path::PathBuf;
use std::time::Duration;

use alertclip_models::BufferAudioPolicy;

/// Configuration for the job engine.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Per-job acquisition directories live under here
    pub downloads_root: PathBuf,
    /// Per-job intermediate files live under here
    pub processing_root: PathBuf,
    /// Final outputs are written here
    pub output_root: PathBuf,
    /// Wall-clock bound for one download invocation
    pub download_timeout: Duration,
    /// Wall-clock bound for metadata fetches
    pub metadata_timeout: Duration,
    /// Wall-clock bound for each pipeline stage invocation
    pub stage_timeout: Duration,
    /// What the audio track holds under the end-buffer frame hold
    pub buffer_audio: BufferAudioPolicy,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            downloads_root: PathBuf::from("temp/downloads"),
            processing_root: PathBuf::from("temp/processing"),
            output_root: PathBuf::from("output"),
            download_timeout: Duration::from_secs(300),
            metadata_timeout: Duration::from_secs(30),
            stage_timeout: Duration::from_secs(300),
            buffer_audio: BufferAudioPolicy::Silence,
        }
    }
}

impl EngineConfig {
    /// Create config from environment variables.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            downloads_root: std::env::var("ALERTCLIP_DOWNLOADS_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.downloads_root),
            processing_root: std::env::var("ALERTCLIP_PROCESSING_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.processing_root),
            output_root: std::env::var("ALERTCLIP_OUTPUT_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.output_root),
            download_timeout: env_secs("ALERTCLIP_DOWNLOAD_TIMEOUT", defaults.download_timeout),
            metadata_timeout: env_secs("ALERTCLIP_METADATA_TIMEOUT", defaults.metadata_timeout),
            stage_timeout: env_secs("ALERTCLIP_STAGE_TIMEOUT", defaults.stage_timeout),
            buffer_audio: match std::env::var("ALERTCLIP_BUFFER_AUDIO").as_deref() {
                Ok("hold_tail") => BufferAudioPolicy::HoldTail,
                _ => BufferAudioPolicy::Silence,
            },
        }
    }
}

fn env_secs(key: &str, default: Duration) -> Duration {
    std::env::var(key)
        .ok()
        .and_then(|s| s.parse().ok())
        .map(Duration::from_secs)
        .unwrap_or(default)
}
