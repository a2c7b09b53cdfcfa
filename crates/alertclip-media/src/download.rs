//! Source acquisition via yt-dlp.
//!
//! Downloads are range-limited with `--download-sections` so only the
//! requested window is fetched. Separate audio sources are extracted
//! straight to WAV so no lossy re-encode happens before the final mux.

use std::path::Path;
use std::time::Duration;

use serde::Deserialize;
use tokio::sync::watch;
use tracing::{debug, info};
use url::Url;

use crate::command::{ToolCommand, ToolRunner};
use crate::error::{MediaError, MediaResult};
use crate::progress::{NullProgressParser, ProgressUpdate, YtDlpProgressParser};
use crate::tools::Toolchain;

/// Format selector matching the original downloader behavior: best
/// mp4 video plus m4a audio, merged into mp4.
const VIDEO_FORMAT: &str = "bestvideo[ext=mp4]+bestaudio[ext=m4a]/best[ext=mp4]/best";

/// Audio-only selector for separate audio sources.
const AUDIO_FORMAT: &str = "bestaudio[ext=m4a]/bestaudio";

/// Metadata for a remote source, from `yt-dlp --dump-json`.
#[derive(Debug, Clone, Deserialize)]
pub struct SourceMetadata {
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub duration: Option<f64>,
    #[serde(default)]
    pub thumbnail: Option<String>,
}

/// Canonicalize a video URL.
///
/// YouTube URLs are reduced to the bare watch URL so playlist/radio
/// parameters don't drag in extra content; `youtu.be` short links are
/// expanded. Everything else passes through untouched.
pub fn clean_video_url(raw: &str) -> String {
    let Ok(parsed) = Url::parse(raw) else {
        return raw.to_string();
    };
    let Some(host) = parsed.host_str().map(|h| h.to_lowercase()) else {
        return raw.to_string();
    };

    if host.ends_with("youtu.be") {
        let id = parsed.path().trim_matches('/');
        if !id.is_empty() {
            return format!("https://www.youtube.com/watch?v={id}");
        }
    }

    if host.ends_with("youtube.com") {
        if let Some(id) = parsed
            .query_pairs()
            .find(|(k, _)| k == "v")
            .map(|(_, v)| v.to_string())
        {
            return format!("https://www.youtube.com/watch?v={id}");
        }
    }

    raw.to_string()
}

/// Fetch title/duration metadata without downloading.
pub async fn fetch_metadata(
    tools: &Toolchain,
    url: &str,
    timeout: Duration,
) -> MediaResult<SourceMetadata> {
    let cmd = ToolCommand::new(&tools.ytdlp)
        .args(["--dump-json", "--no-download"])
        .arg(url);

    let output = ToolRunner::new()
        .with_timeout(timeout)
        .run(&cmd, NullProgressParser, |_| {})
        .await
        .map_err(classify_ytdlp_error)?;

    let metadata: SourceMetadata = serde_json::from_str(output.stdout.trim())
        .map_err(|e| MediaError::download_failed(format!("unparseable video metadata: {e}")))?;

    debug!(title = ?metadata.title, duration = ?metadata.duration, "Fetched source metadata");
    Ok(metadata)
}

/// Download the `[start,end)` section of a video into `output_template`
/// (a yt-dlp `-o` template, e.g. `<dir>/clip.%(ext)s`).
pub async fn download_section<F>(
    tools: &Toolchain,
    url: &str,
    start_secs: f64,
    end_secs: f64,
    output_template: impl AsRef<Path>,
    timeout: Duration,
    cancel_rx: Option<watch::Receiver<bool>>,
    on_progress: F,
) -> MediaResult<()>
where
    F: FnMut(ProgressUpdate) + Send + 'static,
{
    let section = format!("*{:.3}-{:.3}", start_secs, end_secs);
    let ffmpeg_dir = tools
        .ffmpeg
        .parent()
        .map(|p| p.to_string_lossy().to_string());

    let mut cmd = ToolCommand::new(&tools.ytdlp)
        .args(["-f", VIDEO_FORMAT])
        .args(["--download-sections".to_string(), section])
        .args(["--merge-output-format", "mp4"])
        .args(["--newline", "-o"])
        .arg(output_template.as_ref().to_string_lossy());
    if let Some(dir) = ffmpeg_dir {
        cmd = cmd.args(["--ffmpeg-location".to_string(), dir]);
    }
    let cmd = cmd.arg(url);

    info!(url, start = start_secs, end = end_secs, "Downloading video section");
    run_download(cmd, timeout, cancel_rx, on_progress).await
}

/// Download the `[start,end)` section of a source as lossless WAV
/// audio (separate audio track acquisition).
pub async fn download_audio_section<F>(
    tools: &Toolchain,
    url: &str,
    start_secs: f64,
    end_secs: f64,
    output_template: impl AsRef<Path>,
    timeout: Duration,
    cancel_rx: Option<watch::Receiver<bool>>,
    on_progress: F,
) -> MediaResult<()>
where
    F: FnMut(ProgressUpdate) + Send + 'static,
{
    let section = format!("*{:.3}-{:.3}", start_secs, end_secs);
    let ffmpeg_dir = tools
        .ffmpeg
        .parent()
        .map(|p| p.to_string_lossy().to_string());

    let mut cmd = ToolCommand::new(&tools.ytdlp)
        .args(["-f", AUDIO_FORMAT])
        .args(["--download-sections".to_string(), section])
        // WAV keeps the intermediate lossless
        .args(["-x", "--audio-format", "wav"])
        .args(["--newline", "-o"])
        .arg(output_template.as_ref().to_string_lossy());
    if let Some(dir) = ffmpeg_dir {
        cmd = cmd.args(["--ffmpeg-location".to_string(), dir]);
    }
    let cmd = cmd.arg(url);

    info!(url, start = start_secs, end = end_secs, "Downloading audio section");
    run_download(cmd, timeout, cancel_rx, on_progress).await
}

async fn run_download<F>(
    cmd: ToolCommand,
    timeout: Duration,
    cancel_rx: Option<watch::Receiver<bool>>,
    on_progress: F,
) -> MediaResult<()>
where
    F: FnMut(ProgressUpdate) + Send + 'static,
{
    let mut runner = ToolRunner::new().with_timeout(timeout);
    if let Some(rx) = cancel_rx {
        runner = runner.with_cancel(rx);
    }

    runner
        .run(&cmd, YtDlpProgressParser::new(), on_progress)
        .await
        .map_err(classify_ytdlp_error)?;
    Ok(())
}

/// Convert raw tool failures into download errors with a readable
/// cause; cancellation and timeout pass through untouched.
fn classify_ytdlp_error(err: MediaError) -> MediaError {
    match err {
        MediaError::ToolFailed { message, tail, .. } => {
            // yt-dlp prints its useful complaint on an ERROR: line.
            let cause = tail
                .iter()
                .rev()
                .find(|l| l.contains("ERROR"))
                .cloned()
                .unwrap_or(message);
            MediaError::download_failed(cause)
        }
        other => other,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clean_youtube_url() {
        assert_eq!(
            clean_video_url("https://www.youtube.com/watch?v=abc123&list=RDabc123&index=2"),
            "https://www.youtube.com/watch?v=abc123"
        );
        assert_eq!(
            clean_video_url("https://youtu.be/abc123?t=42"),
            "https://www.youtube.com/watch?v=abc123"
        );
    }

    #[test]
    fn test_clean_url_passthrough() {
        let tiktok = "https://www.tiktok.com/@user/video/123";
        assert_eq!(clean_video_url(tiktok), tiktok);
        let insta = "https://www.instagram.com/reel/xyz/";
        assert_eq!(clean_video_url(insta), insta);
        assert_eq!(clean_video_url("not a url"), "not a url");
    }

    #[test]
    fn test_classify_ytdlp_error_prefers_error_line() {
        let err = MediaError::tool_failed(
            "yt-dlp",
            "last line",
            vec![
                "[youtube] extracting".into(),
                "ERROR: [youtube] abc: Video unavailable".into(),
                "cleanup".into(),
            ],
            Some(1),
        );
        match classify_ytdlp_error(err) {
            MediaError::DownloadFailed { message } => {
                assert!(message.contains("Video unavailable"));
            }
            other => panic!("unexpected: {other}"),
        }
    }

    #[test]
    fn test_classify_passes_cancellation_through() {
        assert!(matches!(
            classify_ytdlp_error(MediaError::Cancelled),
            MediaError::Cancelled
        ));
    }

    #[test]
    fn test_metadata_deserialization() {
        let json = r#"{"title": "A Clip", "duration": 120.0, "thumbnail": "https://x/y.jpg", "extra": 1}"#;
        let m: SourceMetadata = serde_json::from_str(json).unwrap();
        assert_eq!(m.title.as_deref(), Some("A Clip"));
        assert_eq!(m.duration, Some(120.0));
    }
}
