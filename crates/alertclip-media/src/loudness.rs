//! EBU R128 loudness normalization support.
//!
//! Two-pass loudnorm: pass one measures the source (ffmpeg prints a
//! JSON block on stderr), pass two applies the correction with the
//! measured values in linear mode. Both passes operate on PCM audio
//! so no generation loss accumulates.

use serde::Deserialize;

use crate::error::{MediaError, MediaResult};

/// Normalization targets: -16 LUFS integrated, -1.5 dBTP, LRA 11.
pub const LOUDNORM_TARGETS: &str = "I=-16:TP=-1.5:LRA=11";

/// Measurement filter for the analysis pass.
pub fn measurement_filter() -> String {
    format!("loudnorm={}:print_format=json", LOUDNORM_TARGETS)
}

/// Measured loudness values from the analysis pass.
#[derive(Debug, Clone, Deserialize)]
pub struct LoudnormMeasurement {
    pub input_i: String,
    pub input_tp: String,
    pub input_lra: String,
    pub input_thresh: String,
    pub target_offset: String,
}

/// Extract the loudnorm JSON block from captured ffmpeg stderr lines.
///
/// The block is the last `{...}` region containing an `input_i` key;
/// everything around it is ordinary ffmpeg chatter.
pub fn parse_loudnorm_measurement(stderr_lines: &[String]) -> MediaResult<LoudnormMeasurement> {
    let text = stderr_lines.join("\n");

    let marker = text
        .rfind("\"input_i\"")
        .ok_or_else(|| MediaError::probe_failed("no loudnorm measurement in ffmpeg output"))?;
    let start = text[..marker]
        .rfind('{')
        .ok_or_else(|| MediaError::probe_failed("malformed loudnorm measurement block"))?;
    let end = text[marker..]
        .find('}')
        .map(|i| marker + i + 1)
        .ok_or_else(|| MediaError::probe_failed("unterminated loudnorm measurement block"))?;

    serde_json::from_str(&text[start..end])
        .map_err(|e| MediaError::probe_failed(format!("unparseable loudnorm measurement: {e}")))
}

/// Build the correction-pass filter from measured values.
pub fn build_loudnorm_filter(measured: &LoudnormMeasurement) -> String {
    format!(
        "loudnorm={}:measured_I={}:measured_TP={}:measured_LRA={}:measured_thresh={}:offset={}:linear=true",
        LOUDNORM_TARGETS,
        measured.input_i,
        measured.input_tp,
        measured.input_lra,
        measured.input_thresh,
        measured.target_offset,
    )
}
