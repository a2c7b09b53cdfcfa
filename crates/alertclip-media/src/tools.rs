//! External tool discovery.
//!
//! The three tools the pipeline shells out to are located once at
//! startup; a missing tool is reported both at startup and through
//! the `/api/check-deps` endpoint rather than as a mid-job surprise.

use std::path::PathBuf;
use std::process::Stdio;

use serde::Serialize;
use tokio::process::Command;
use tracing::info;

use crate::error::{MediaError, MediaResult};

/// The external tools this system depends on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tool {
    Ffmpeg,
    Ffprobe,
    YtDlp,
}

impl Tool {
    pub fn name(&self) -> &'static str {
        match self {
            Tool::Ffmpeg => "ffmpeg",
            Tool::Ffprobe => "ffprobe",
            Tool::YtDlp => "yt-dlp",
        }
    }

    fn version_arg(&self) -> &'static str {
        match self {
            Tool::Ffmpeg | Tool::Ffprobe => "-version",
            Tool::YtDlp => "--version",
        }
    }
}

/// Resolved tool paths, looked up once and shared.
#[derive(Debug, Clone)]
pub struct Toolchain {
    pub ffmpeg: PathBuf,
    pub ffprobe: PathBuf,
    pub ytdlp: PathBuf,
}

impl Toolchain {
    /// Locate all required tools on PATH.
    pub fn discover() -> MediaResult<Self> {
        let ffmpeg = find_tool(Tool::Ffmpeg)?;
        let ffprobe = find_tool(Tool::Ffprobe)?;
        let ytdlp = find_tool(Tool::YtDlp)?;
        info!(
            ffmpeg = %ffmpeg.display(),
            ffprobe = %ffprobe.display(),
            ytdlp = %ytdlp.display(),
            "Located external tools"
        );
        Ok(Self { ffmpeg, ffprobe, ytdlp })
    }

    pub fn path_for(&self, tool: Tool) -> &PathBuf {
        match tool {
            Tool::Ffmpeg => &self.ffmpeg,
            Tool::Ffprobe => &self.ffprobe,
            Tool::YtDlp => &self.ytdlp,
        }
    }

    /// Probe each tool's version for the dependency-check endpoint.
    pub async fn check(&self) -> Vec<ToolStatus> {
        let mut out = Vec::with_capacity(3);
        for tool in [Tool::Ffmpeg, Tool::Ffprobe, Tool::YtDlp] {
            out.push(check_version(tool, self.path_for(tool)).await);
        }
        out
    }
}

/// Installation status of one external tool.
#[derive(Debug, Clone, Serialize)]
pub struct ToolStatus {
    pub name: &'static str,
    pub installed: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
}

fn find_tool(tool: Tool) -> MediaResult<PathBuf> {
    which::which(tool.name()).map_err(|_| MediaError::ToolNotFound { tool: tool.name() })
}

async fn check_version(tool: Tool, path: &PathBuf) -> ToolStatus {
    let output = Command::new(path)
        .arg(tool.version_arg())
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .output()
        .await;

    match output {
        Ok(out) => {
            let text = String::from_utf8_lossy(&out.stdout);
            let text = if text.trim().is_empty() {
                String::from_utf8_lossy(&out.stderr).to_string()
            } else {
                text.to_string()
            };
            let first_line = text.lines().next().map(|l| l.trim().to_string());
            ToolStatus {
                name: tool.name(),
                installed: first_line.is_some(),
                version: first_line,
            }
        }
        Err(_) => ToolStatus {
            name: tool.name(),
            installed: false,
            version: None,
        },
    }
}
