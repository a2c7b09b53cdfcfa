//! HTTP handlers.

pub mod deps;
pub mod health;
pub mod jobs;
pub mod process;
pub mod sources;

use alertclip_models::is_safe_job_id;

use crate::error::{ApiError, ApiResult};

/// Reject job identifiers that could escape the per-job directories.
pub(crate) fn ensure_safe_job_id(job_id: &str) -> ApiResult<()> {
    if is_safe_job_id(job_id) {
        Ok(())
    } else {
        Err(ApiError::bad_request("Invalid job id"))
    }
}
