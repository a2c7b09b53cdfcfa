//! External dependency checks.

use axum::extract::State;
use axum::Json;
use serde::Serialize;

use alertclip_media::ToolStatus;

use crate::state::AppState;

#[derive(Serialize)]
pub struct CheckDepsResponse {
    pub tools: Vec<ToolStatus>,
    pub all_installed: bool,
}

/// Report the installed versions of ffmpeg, ffprobe and yt-dlp.
pub async fn check_deps(State(state): State<AppState>) -> Json<CheckDepsResponse> {
    let tools = state.tools.check().await;
    let all_installed = tools.iter().all(|t| t.installed);
    Json(CheckDepsResponse {
        tools,
        all_installed,
    })
}
