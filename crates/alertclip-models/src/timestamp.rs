//! Timestamp parsing and formatting.
//!
//! Accepts `HH:MM:SS`, `MM:SS`, or `SS`, each with optional
//! fractional seconds, matching what the trim UI submits.

use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TimestampError {
    #[error("empty timestamp")]
    Empty,

    #[error("invalid {0} value: {1}")]
    InvalidValue(&'static str, String),

    #[error("timestamp components must be non-negative")]
    Negative,

    #[error("invalid timestamp format: {0}")]
    InvalidFormat(String),
}

/// Parse a timestamp string to total seconds.
pub fn parse_timestamp(ts: &str) -> Result<f64, TimestampError> {
    let ts = ts.trim();
    if ts.is_empty() {
        return Err(TimestampError::Empty);
    }

    let parts: Vec<&str> = ts.split(':').collect();
    let parse =
        |label: &'static str, s: &str| -> Result<f64, TimestampError> {
            let v: f64 = s
                .parse()
                .map_err(|_| TimestampError::InvalidValue(label, s.to_string()))?;
            if v < 0.0 {
                return Err(TimestampError::Negative);
            }
            Ok(v)
        };

    match parts.len() {
        1 => parse("seconds", parts[0]),
        2 => Ok(parse("minutes", parts[0])? * 60.0 + parse("seconds", parts[1])?),
        3 => Ok(parse("hours", parts[0])? * 3600.0
            + parse("minutes", parts[1])? * 60.0
            + parse("seconds", parts[2])?),
        _ => Err(TimestampError::InvalidFormat(ts.to_string())),
    }
}

/// Format seconds into `HH:MM:SS` or `HH:MM:SS.mmm`.
pub fn format_seconds(total_secs: f64) -> String {
    let hours = (total_secs / 3600.0).floor() as u32;
    let mins = ((total_secs % 3600.0) / 60.0).floor() as u32;
    let secs = total_secs % 60.0;

    if (secs - secs.floor()).abs() > 0.0001 {
        format!("{:02}:{:02}:{:06.3}", hours, mins, secs)
    } else {
        format!("{:02}:{:02}:{:02}", hours, mins, secs.floor() as u32)
    }
}
