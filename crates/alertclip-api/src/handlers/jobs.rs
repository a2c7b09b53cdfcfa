//! Job status, media access and lifecycle control handlers.

use std::path::Path as FsPath;

use axum::body::Body;
use axum::extract::{Path, State};
use axum::http::{header, StatusCode};
use axum::response::Response;
use axum::Json;
use serde::Serialize;
use tokio_util::io::ReaderStream;

use alertclip_models::JobStatus;

use crate::error::{ApiError, ApiResult};
use crate::handlers::ensure_safe_job_id;
use crate::state::AppState;

#[derive(Serialize)]
pub struct ProbeResponse {
    pub width: u32,
    pub height: u32,
    pub fps: f64,
    pub duration: f64,
    pub has_audio: bool,
}

/// Probed properties of the acquired source.
pub async fn probe_job(
    State(state): State<AppState>,
    Path(job_id): Path<String>,
) -> ApiResult<Json<ProbeResponse>> {
    ensure_safe_job_id(&job_id)?;
    let handle = state.registry.probe_info(&job_id)?;
    Ok(Json(ProbeResponse {
        width: handle.width,
        height: handle.height,
        fps: handle.fps,
        duration: handle.duration,
        has_audio: handle.has_audio,
    }))
}

/// Stream the acquired source file, for the crop-selection preview.
pub async fn stream_media(
    State(state): State<AppState>,
    Path(job_id): Path<String>,
) -> ApiResult<Response> {
    ensure_safe_job_id(&job_id)?;
    let path = state.registry.media_path(&job_id)?;
    stream_file(&path, None).await
}

#[derive(Serialize)]
pub struct StatusResponse {
    pub status: JobStatus,
    pub stage: String,
    pub progress: u8,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Poll a job's lifecycle state.
pub async fn job_status(
    State(state): State<AppState>,
    Path(job_id): Path<String>,
) -> ApiResult<Json<StatusResponse>> {
    ensure_safe_job_id(&job_id)?;
    let job = state.registry.snapshot(&job_id)?;
    Ok(Json(StatusResponse {
        status: job.status,
        stage: job.stage,
        progress: job.progress,
        error: job.error,
    }))
}

/// Download the finished clip. 404 until the job completes.
pub async fn job_result(
    State(state): State<AppState>,
    Path(job_id): Path<String>,
) -> ApiResult<Response> {
    ensure_safe_job_id(&job_id)?;
    let path = state
        .registry
        .result_path(&job_id)
        .map_err(|e| match e {
            alertclip_engine::EngineError::InvalidState { .. } => {
                ApiError::not_found("Result not ready")
            }
            other => other.into(),
        })?;
    let name = format!("alert_{job_id}.mp4");
    stream_file(&path, Some(&name)).await
}

#[derive(Serialize)]
pub struct AckResponse {
    pub job_id: String,
    pub status: &'static str,
}

/// Request cancellation of the job's running task.
pub async fn cancel_job(
    State(state): State<AppState>,
    Path(job_id): Path<String>,
) -> ApiResult<Json<AckResponse>> {
    ensure_safe_job_id(&job_id)?;
    state.registry.cancel(&job_id)?;
    Ok(Json(AckResponse {
        job_id,
        status: "cancelling",
    }))
}

/// Drop the job and delete its temporary files.
pub async fn cleanup_job(
    State(state): State<AppState>,
    Path(job_id): Path<String>,
) -> ApiResult<Json<AckResponse>> {
    ensure_safe_job_id(&job_id)?;
    state.registry.cleanup(&job_id).await?;
    Ok(Json(AckResponse {
        job_id,
        status: "cleaned",
    }))
}

/// Stream a file from disk without buffering it in memory.
async fn stream_file(path: &FsPath, download_name: Option<&str>) -> ApiResult<Response> {
    let file = tokio::fs::File::open(path)
        .await
        .map_err(|_| ApiError::not_found("File no longer on disk"))?;
    let len = file.metadata().await.ok().map(|m| m.len());

    // No Range support, so don't advertise it; players that see
    // `Accept-Ranges: bytes` expect partial requests to work.
    let mut builder = Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, content_type_for(path));
    if let Some(len) = len {
        builder = builder.header(header::CONTENT_LENGTH, len);
    }
    if let Some(name) = download_name {
        builder = builder.header(
            header::CONTENT_DISPOSITION,
            format!("attachment; filename=\"{name}\""),
        );
    }

    builder
        .body(Body::from_stream(ReaderStream::new(file)))
        .map_err(|e| ApiError::internal(format!("Failed to build response: {e}")))
}

fn content_type_for(path: &FsPath) -> &'static str {
    match path.extension().and_then(|e| e.to_str()) {
        Some("mp4") | Some("m4v") => "video/mp4",
        Some("webm") => "video/webm",
        Some("mkv") => "video/x-matroska",
        Some("mov") => "video/quicktime",
        Some("wav") => "audio/wav",
        _ => "application/octet-stream",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_stream_file_headers() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("clip.mp4");
        tokio::fs::write(&path, b"data").await.unwrap();

        let resp = stream_file(&path, Some("alert_abc.mp4")).await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        assert_eq!(resp.headers()[header::CONTENT_TYPE], "video/mp4");
        assert_eq!(resp.headers()[header::CONTENT_LENGTH], "4");
        assert!(resp.headers().get(header::ACCEPT_RANGES).is_none());
        assert!(resp.headers()[header::CONTENT_DISPOSITION]
            .to_str()
            .unwrap()
            .contains("alert_abc.mp4"));
    }

    #[test]
    fn test_content_type_mapping() {
        assert_eq!(content_type_for(FsPath::new("a/clip.mp4")), "video/mp4");
        assert_eq!(content_type_for(FsPath::new("audio.wav")), "audio/wav");
        assert_eq!(
            content_type_for(FsPath::new("noext")),
            "application/octet-stream"
        );
    }
}
