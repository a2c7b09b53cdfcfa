//! Source intake handlers: URL validation, remote acquisition, and
//! local upload.

use axum::extract::{Multipart, State};
use axum::Json;
use serde::{Deserialize, Serialize};
use tokio::io::AsyncWriteExt;
use tracing::info;

use alertclip_engine::{is_allowed_upload, AcquireRequest, EngineError};
use alertclip_models::{parse_timestamp, TrimWindow};

use crate::error::{ApiError, ApiResult};
use crate::state::AppState;

#[derive(Deserialize)]
pub struct ValidateRequest {
    pub url: String,
}

#[derive(Serialize)]
pub struct ValidateResponse {
    pub valid: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duration: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub thumbnail: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Check a source URL and return its metadata without downloading.
///
/// An unreachable or unsupported URL is a normal answer here, not an
/// HTTP error: the client shows `error` next to its URL field.
pub async fn validate_source(
    State(state): State<AppState>,
    Json(req): Json<ValidateRequest>,
) -> ApiResult<Json<ValidateResponse>> {
    match state.registry.validate_source(&req.url).await {
        Ok(meta) => Ok(Json(ValidateResponse {
            valid: true,
            title: meta.title,
            duration: meta.duration,
            thumbnail: meta.thumbnail,
            error: None,
        })),
        Err(EngineError::Acquisition(cause)) => Ok(Json(ValidateResponse {
            valid: false,
            title: None,
            duration: None,
            thumbnail: None,
            error: Some(cause),
        })),
        Err(e) => Err(e.into()),
    }
}

#[derive(Deserialize)]
pub struct AcquireBody {
    pub url: String,
    /// Timestamps accept `HH:MM:SS`, `MM:SS` or plain seconds
    pub start_time: String,
    pub end_time: String,
    pub audio_url: Option<String>,
    pub audio_start_time: Option<String>,
    pub audio_end_time: Option<String>,
}

#[derive(Serialize)]
pub struct AcquireResponse {
    pub job_id: String,
}

/// Start acquiring a time range of a remote source. Returns the job id
/// immediately; progress is observable through the status endpoint.
pub async fn acquire_source(
    State(state): State<AppState>,
    Json(body): Json<AcquireBody>,
) -> ApiResult<Json<AcquireResponse>> {
    let window = parse_window(&body.start_time, &body.end_time)?;

    let audio_window = match (&body.audio_url, &body.audio_start_time, &body.audio_end_time) {
        (None, _, _) => None,
        (Some(_), Some(start), Some(end)) => Some(parse_window(start, end)?),
        (Some(_), _, _) => {
            return Err(ApiError::bad_request(
                "audio_url requires audio_start_time and audio_end_time",
            ))
        }
    };

    let job_id = state.registry.acquire(AcquireRequest {
        url: body.url,
        window,
        audio_url: body.audio_url,
        audio_window,
    })?;
    Ok(Json(AcquireResponse { job_id }))
}

fn parse_window(start: &str, end: &str) -> ApiResult<TrimWindow> {
    let start = parse_timestamp(start).map_err(|e| ApiError::bad_request(e.to_string()))?;
    let end = parse_timestamp(end).map_err(|e| ApiError::bad_request(e.to_string()))?;
    if end <= start {
        return Err(ApiError::bad_request("end_time must come after start_time"));
    }
    Ok(TrimWindow { start, end })
}

#[derive(Serialize)]
pub struct UploadResponse {
    pub job_id: String,
    pub duration: f64,
}

/// Accept a local video upload as a job's source.
///
/// The file streams to disk chunk by chunk; the request body limit
/// bounds the total size.
pub async fn upload_source(
    State(state): State<AppState>,
    mut multipart: Multipart,
) -> ApiResult<Json<UploadResponse>> {
    while let Some(mut field) = multipart
        .next_field()
        .await
        .map_err(|e| ApiError::bad_request(format!("Malformed multipart body: {e}")))?
    {
        if field.name() != Some("file") {
            continue;
        }
        let filename = field
            .file_name()
            .map(|s| s.to_string())
            .ok_or_else(|| ApiError::bad_request("Upload is missing a filename"))?;
        if !is_allowed_upload(&filename) {
            return Err(ApiError::bad_request("Unsupported file type"));
        }
        let ext = filename.rsplit_once('.').map(|(_, e)| e.to_lowercase()).unwrap_or_default();

        let job_id = state.registry.create_job();
        let dir = state.registry.download_dir(&job_id);
        tokio::fs::create_dir_all(&dir)
            .await
            .map_err(|e| ApiError::internal(e.to_string()))?;
        let path = dir.join(format!("clip.{ext}"));

        let mut file = tokio::fs::File::create(&path)
            .await
            .map_err(|e| ApiError::internal(e.to_string()))?;
        let mut written: u64 = 0;
        while let Some(chunk) = field
            .chunk()
            .await
            .map_err(|e| ApiError::bad_request(format!("Upload interrupted: {e}")))?
        {
            written += chunk.len() as u64;
            file.write_all(&chunk)
                .await
                .map_err(|e| ApiError::internal(e.to_string()))?;
        }
        file.flush()
            .await
            .map_err(|e| ApiError::internal(e.to_string()))?;

        info!(job_id = %job_id, bytes = written, filename = %filename, "Upload received");
        let handle = state.registry.attach_upload(&job_id, &path).await?;
        return Ok(Json(UploadResponse {
            job_id,
            duration: handle.duration,
        }));
    }

    Err(ApiError::bad_request("No file field in upload"))
}
