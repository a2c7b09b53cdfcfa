//! Live tool-output progress parsing.
//!
//! Each external tool reports progress in its own format. The runner
//! is decoupled from those formats through the `ProgressParser`
//! strategy: one parser per tool maps a line of live output to an
//! optional normalized update. Most lines carry no progress
//! information and yield `None`.

/// Normalized progress event emitted by a running tool.
#[derive(Debug, Clone, PartialEq)]
pub struct ProgressUpdate {
    /// Percent complete within this invocation (0-100)
    pub percent: f64,
    /// Whether the tool reported completion
    pub is_complete: bool,
}

/// Strategy mapping one line of a tool's live output to progress.
///
/// Parsers are stateful because some protocols (ffmpeg's
/// `-progress pipe:2`) spread one update across several lines.
pub trait ProgressParser: Send {
    fn parse_line(&mut self, line: &str) -> Option<ProgressUpdate>;
}

/// Parser for ffmpeg's `-progress pipe:2` key=value output.
///
/// Percent is derived from `out_time_ms` against the expected output
/// duration. An update is emitted on each `progress=` terminator line.
pub struct FfmpegProgressParser {
    total_duration_ms: i64,
    out_time_ms: i64,
}

impl FfmpegProgressParser {
    /// `total_duration_secs` is the expected output duration of the
    /// invocation being watched, not the source duration.
    pub fn new(total_duration_secs: f64) -> Self {
        Self {
            total_duration_ms: (total_duration_secs * 1000.0) as i64,
            out_time_ms: 0,
        }
    }

    fn percent(&self) -> f64 {
        if self.total_duration_ms <= 0 {
            return 0.0;
        }
        ((self.out_time_ms as f64 / self.total_duration_ms as f64) * 100.0).clamp(0.0, 100.0)
    }
}

impl ProgressParser for FfmpegProgressParser {
    fn parse_line(&mut self, line: &str) -> Option<ProgressUpdate> {
        let (key, value) = line.trim().split_once('=')?;
        match key {
            "out_time_us" | "out_time_ms" => {
                // Both keys carry microseconds in modern ffmpeg builds.
                if let Ok(us) = value.parse::<i64>() {
                    self.out_time_ms = us / 1000;
                }
                None
            }
            "progress" => {
                let is_complete = value == "end";
                Some(ProgressUpdate {
                    percent: if is_complete { 100.0 } else { self.percent() },
                    is_complete,
                })
            }
            _ => None,
        }
    }
}

/// Parser for yt-dlp's `[download]  42.3% of ...` status lines.
#[derive(Default)]
pub struct YtDlpProgressParser;

impl YtDlpProgressParser {
    pub fn new() -> Self {
        Self
    }
}

impl ProgressParser for YtDlpProgressParser {
    fn parse_line(&mut self, line: &str) -> Option<ProgressUpdate> {
        let rest = line.trim().strip_prefix("[download]")?.trim_start();
        let percent_str = rest.split_whitespace().next()?.strip_suffix('%')?;
        let percent: f64 = percent_str.parse().ok()?;
        Some(ProgressUpdate {
            percent: percent.clamp(0.0, 100.0),
            is_complete: percent >= 100.0,
        })
    }
}

/// Parser that ignores all output (probe-style invocations).
#[derive(Default)]
pub struct NullProgressParser;

impl ProgressParser for NullProgressParser {
    fn parse_line(&mut self, _line: &str) -> Option<ProgressUpdate> {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ffmpeg_parser_accumulates_then_emits() {
        let mut parser = FfmpegProgressParser::new(10.0);

        assert!(parser.parse_line("frame=120").is_none());
        assert!(parser.parse_line("out_time_us=5000000").is_none());

        let update = parser.parse_line("progress=continue").unwrap();
        assert!((update.percent - 50.0).abs() < 0.01);
        assert!(!update.is_complete);

        let end = parser.parse_line("progress=end").unwrap();
        assert!((end.percent - 100.0).abs() < 0.01);
        assert!(end.is_complete);
    }

    #[test]
    fn test_ffmpeg_parser_clamps_overshoot() {
        let mut parser = FfmpegProgressParser::new(1.0);
        parser.parse_line("out_time_us=2000000");
        let update = parser.parse_line("progress=continue").unwrap();
        assert!((update.percent - 100.0).abs() < 0.01);
    }

    #[test]
    fn test_ffmpeg_parser_zero_duration() {
        let mut parser = FfmpegProgressParser::new(0.0);
        parser.parse_line("out_time_us=5000000");
        let update = parser.parse_line("progress=continue").unwrap();
        assert_eq!(update.percent, 0.0);
    }

    #[test]
    fn test_ytdlp_parser() {
        let mut parser = YtDlpProgressParser::new();

        let update = parser
            .parse_line("[download]  42.3% of 10.00MiB at 1.20MiB/s ETA 00:05")
            .unwrap();
        assert!((update.percent - 42.3).abs() < 0.01);
        assert!(!update.is_complete);

        let done = parser
            .parse_line("[download] 100% of 10.00MiB in 00:08")
            .unwrap();
        assert!(done.is_complete);

        assert!(parser.parse_line("[info] Downloading video thumbnail").is_none());
        assert!(parser.parse_line("[download] Destination: clip.mp4").is_none());
    }

    #[test]
    fn test_null_parser() {
        let mut parser = NullProgressParser;
        assert!(parser.parse_line("progress=end").is_none());
    }
}
