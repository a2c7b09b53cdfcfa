//! External media tool plumbing.
//!
//! This crate provides:
//! - Tool discovery for ffmpeg, ffprobe, and yt-dlp
//! - Type-safe command building and a runner that streams live tool
//!   output through pluggable progress parsers
//! - Cancellation and timeout support via tokio
//! - ffprobe-based media probing
//! - yt-dlp section downloads and metadata fetches
//! - Two-pass loudness measurement parsing

pub mod command;
pub mod download;
pub mod error;
pub mod fsops;
pub mod loudness;
pub mod probe;
pub mod progress;
pub mod tools;

pub use command::{ToolCommand, ToolRunner};
pub use download::{clean_video_url, download_audio_section, download_section, fetch_metadata, SourceMetadata};
pub use error::{MediaError, MediaResult};
pub use loudness::{
    build_loudnorm_filter, measurement_filter, parse_loudnorm_measurement, LoudnormMeasurement,
};
pub use probe::{probe_media, MediaInfo};
pub use progress::{
    FfmpegProgressParser, NullProgressParser, ProgressParser, ProgressUpdate, YtDlpProgressParser,
};
pub use tools::{Tool, ToolStatus, Toolchain};
