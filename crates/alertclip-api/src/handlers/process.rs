//! Processing launch handler.

use std::path::PathBuf;

use axum::body::Body;
use axum::extract::{FromRequest, Multipart, Path, State};
use axum::http::{header, Request, StatusCode};
use axum::Json;
use serde::Serialize;
use tracing::info;

use alertclip_models::ProcessParams;

use crate::error::{ApiError, ApiResult};
use crate::handlers::ensure_safe_job_id;
use crate::state::AppState;

const ALLOWED_IMAGE_EXTENSIONS: &[&str] = &["png", "jpg", "jpeg", "webp"];

#[derive(Serialize)]
pub struct ProcessResponse {
    pub job_id: String,
    pub status: &'static str,
}

/// Validate transform parameters and launch the pipeline.
///
/// Accepts either a JSON body with the parameters, or a multipart form
/// with a `params` JSON field plus an optional `image` file for
/// static-image mode.
pub async fn start_process(
    State(state): State<AppState>,
    Path(job_id): Path<String>,
    req: Request<Body>,
) -> ApiResult<(StatusCode, Json<ProcessResponse>)> {
    ensure_safe_job_id(&job_id)?;

    let content_type = req
        .headers()
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("")
        .to_string();

    let (params, image) = if content_type.starts_with("multipart/form-data") {
        read_multipart(&state, &job_id, req).await?
    } else {
        let bytes = axum::body::to_bytes(req.into_body(), state.config.max_body_size)
            .await
            .map_err(|e| ApiError::bad_request(format!("Unreadable body: {e}")))?;
        let params: ProcessParams = serde_json::from_slice(&bytes)
            .map_err(|e| ApiError::bad_request(format!("Invalid parameters: {e}")))?;
        (params, None)
    };

    state.registry.start_processing(&job_id, params, image)?;
    info!(job_id = %job_id, "Processing accepted");
    Ok((
        StatusCode::ACCEPTED,
        Json(ProcessResponse {
            job_id,
            status: "processing",
        }),
    ))
}

async fn read_multipart(
    state: &AppState,
    job_id: &str,
    req: Request<Body>,
) -> ApiResult<(ProcessParams, Option<PathBuf>)> {
    let mut multipart = Multipart::from_request(req, &())
        .await
        .map_err(|e| ApiError::bad_request(format!("Malformed multipart body: {e}")))?;

    let mut params: Option<ProcessParams> = None;
    let mut image: Option<PathBuf> = None;

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| ApiError::bad_request(format!("Malformed multipart body: {e}")))?
    {
        match field.name() {
            Some("params") => {
                let text = field
                    .text()
                    .await
                    .map_err(|e| ApiError::bad_request(format!("Unreadable params: {e}")))?;
                params = Some(
                    serde_json::from_str(&text)
                        .map_err(|e| ApiError::bad_request(format!("Invalid parameters: {e}")))?,
                );
            }
            Some("image") => {
                let ext = field
                    .file_name()
                    .and_then(|n| n.rsplit_once('.'))
                    .map(|(_, e)| e.to_lowercase())
                    .filter(|e| ALLOWED_IMAGE_EXTENSIONS.contains(&e.as_str()))
                    .ok_or_else(|| ApiError::bad_request("Unsupported image type"))?;
                let bytes = field
                    .bytes()
                    .await
                    .map_err(|e| ApiError::bad_request(format!("Unreadable image: {e}")))?;

                let dir = state.engine_config.processing_root.join(job_id);
                tokio::fs::create_dir_all(&dir)
                    .await
                    .map_err(|e| ApiError::internal(e.to_string()))?;
                let path = dir.join(format!("static_image.{ext}"));
                tokio::fs::write(&path, &bytes)
                    .await
                    .map_err(|e| ApiError::internal(e.to_string()))?;
                image = Some(path);
            }
            _ => {}
        }
    }

    let params = params.ok_or_else(|| ApiError::bad_request("Missing params field"))?;
    Ok((params, image))
}
