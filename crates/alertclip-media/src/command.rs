//! External tool command building and execution.
//!
//! `ToolRunner` is the single place a child process is spawned. It
//! streams the tool's live output line-by-line through a
//! `ProgressParser`, keeps a bounded tail of diagnostics for error
//! reporting, and supports wall-clock timeouts and cooperative
//! cancellation. Multiple runners execute concurrently across jobs;
//! within a job the caller sequences invocations.

use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::watch;
use tracing::{debug, warn};

use crate::error::{MediaError, MediaResult};
use crate::progress::{ProgressParser, ProgressUpdate};

/// Number of trailing output lines retained for diagnostics.
const DIAGNOSTIC_TAIL_LINES: usize = 40;

/// One external tool invocation.
#[derive(Debug, Clone)]
pub struct ToolCommand {
    program: PathBuf,
    args: Vec<String>,
}

impl ToolCommand {
    pub fn new(program: impl AsRef<Path>) -> Self {
        Self {
            program: program.as_ref().to_path_buf(),
            args: Vec::new(),
        }
    }

    /// An ffmpeg invocation with the standard prefix: overwrite,
    /// errors-only logging, machine-readable progress on stderr.
    pub fn ffmpeg(program: impl AsRef<Path>) -> Self {
        Self::new(program).args(["-y", "-v", "error", "-progress", "pipe:2"])
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    /// Input seek + file (`-ss <secs> -i <path>`).
    pub fn seek_input(self, seconds: f64, input: impl AsRef<Path>) -> Self {
        self.args(["-ss".to_string(), format!("{:.3}", seconds)])
            .input(input)
    }

    /// Input file (`-i <path>`).
    pub fn input(self, input: impl AsRef<Path>) -> Self {
        self.arg("-i").arg(input.as_ref().to_string_lossy())
    }

    /// Output duration limit (`-t <secs>`).
    pub fn limit_duration(self, seconds: f64) -> Self {
        self.args(["-t".to_string(), format!("{:.3}", seconds)])
    }

    /// Output file path, placed last by convention.
    pub fn output(self, output: impl AsRef<Path>) -> Self {
        self.arg(output.as_ref().to_string_lossy())
    }

    pub fn program(&self) -> &Path {
        &self.program
    }

    pub fn build_args(&self) -> &[String] {
        &self.args
    }

    fn tool_name(&self) -> String {
        self.program
            .file_stem()
            .map(|s| s.to_string_lossy().to_string())
            .unwrap_or_else(|| self.program.to_string_lossy().to_string())
    }
}

/// Captured result of a successful invocation.
#[derive(Debug, Default)]
pub struct RunOutput {
    /// Full stdout (used by `--dump-json` style calls)
    pub stdout: String,
    /// Bounded tail of all output lines
    pub tail: Vec<String>,
}

/// Runner with cancellation and timeout support.
pub struct ToolRunner {
    cancel_rx: Option<watch::Receiver<bool>>,
    timeout: Option<Duration>,
}

impl Default for ToolRunner {
    fn default() -> Self {
        Self::new()
    }
}

impl ToolRunner {
    pub fn new() -> Self {
        Self {
            cancel_rx: None,
            timeout: None,
        }
    }

    /// Attach a cancellation signal. When the channel flips to `true`
    /// the child is killed and the run reports `Cancelled`.
    pub fn with_cancel(mut self, cancel_rx: watch::Receiver<bool>) -> Self {
        self.cancel_rx = Some(cancel_rx);
        self
    }

    /// Upper wall-clock bound for the invocation.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Run a command, feeding live output lines through `parser` and
    /// emitting normalized updates via `on_progress`.
    pub async fn run<P, F>(
        &self,
        cmd: &ToolCommand,
        parser: P,
        mut on_progress: F,
    ) -> MediaResult<RunOutput>
    where
        P: ProgressParser + 'static,
        F: FnMut(ProgressUpdate) + Send + 'static,
    {
        // Reject immediately if cancellation already requested.
        if let Some(rx) = &self.cancel_rx {
            if *rx.borrow() {
                return Err(MediaError::Cancelled);
            }
        }

        debug!(
            program = %cmd.program.display(),
            args = %cmd.args.join(" "),
            "Spawning external tool"
        );

        let mut child = Command::new(&cmd.program)
            .args(&cmd.args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()?;

        let stdout = child.stdout.take().ok_or_else(|| {
            MediaError::tool_failed(cmd.tool_name(), "stdout not captured", Vec::new(), None)
        })?;
        let stderr = child.stderr.take().ok_or_else(|| {
            MediaError::tool_failed(cmd.tool_name(), "stderr not captured", Vec::new(), None)
        })?;

        // One task drains both streams so the stateful parser sees
        // every line without locking.
        let io_task = tokio::spawn(async move {
            let mut parser = parser;
            let mut stdout_lines = BufReader::new(stdout).lines();
            let mut stderr_lines = BufReader::new(stderr).lines();
            let mut tail: VecDeque<String> = VecDeque::with_capacity(DIAGNOSTIC_TAIL_LINES);
            let mut stdout_buf = String::new();
            let mut stdout_open = true;
            let mut stderr_open = true;

            while stdout_open || stderr_open {
                tokio::select! {
                    line = stdout_lines.next_line(), if stdout_open => match line {
                        Ok(Some(line)) => {
                            stdout_buf.push_str(&line);
                            stdout_buf.push('\n');
                            if let Some(update) = parser.parse_line(&line) {
                                on_progress(update);
                            }
                            push_tail(&mut tail, line);
                        }
                        _ => stdout_open = false,
                    },
                    line = stderr_lines.next_line(), if stderr_open => match line {
                        Ok(Some(line)) => {
                            if let Some(update) = parser.parse_line(&line) {
                                on_progress(update);
                            }
                            push_tail(&mut tail, line);
                        }
                        _ => stderr_open = false,
                    },
                }
            }

            (stdout_buf, tail.into_iter().collect::<Vec<_>>())
        });

        let wait_result = self.wait_for_exit(&mut child).await;

        let (stdout_buf, tail) = io_task.await.unwrap_or_default();

        let status = match wait_result {
            Ok(status) => status,
            Err(e) => {
                debug!(tail = ?tail, "Tool terminated abnormally");
                return Err(e);
            }
        };

        if status.success() {
            Ok(RunOutput {
                stdout: stdout_buf,
                tail,
            })
        } else {
            let message = tail
                .iter()
                .rev()
                .find(|l| !l.trim().is_empty())
                .cloned()
                .unwrap_or_else(|| "no diagnostic output".to_string());
            Err(MediaError::tool_failed(
                cmd.tool_name(),
                message,
                tail,
                status.code(),
            ))
        }
    }

    /// Wait for the child, honoring timeout and cancellation.
    async fn wait_for_exit(&self, child: &mut Child) -> MediaResult<std::process::ExitStatus> {
        let mut cancel_rx = self.cancel_rx.clone();

        let wait = async {
            match cancel_rx.as_mut() {
                Some(rx) => {
                    tokio::select! {
                        status = child.wait() => status.map_err(MediaError::from),
                        _ = async { let _ = rx.wait_for(|cancelled| *cancelled).await; } => {
                            warn!("Cancellation requested, killing child process");
                            let _ = child.kill().await;
                            Err(MediaError::Cancelled)
                        }
                    }
                }
                None => child.wait().await.map_err(MediaError::from),
            }
        };

        match self.timeout {
            Some(timeout) => match tokio::time::timeout(timeout, wait).await {
                Ok(result) => result,
                Err(_) => {
                    warn!(
                        timeout_secs = timeout.as_secs(),
                        "Tool timed out, killing child process"
                    );
                    let _ = child.kill().await;
                    Err(MediaError::Timeout(timeout.as_secs()))
                }
            },
            None => wait.await,
        }
    }
}

fn push_tail(tail: &mut VecDeque<String>, line: String) {
    if tail.len() == DIAGNOSTIC_TAIL_LINES {
        tail.pop_front();
    }
    tail.push_back(line);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::progress::NullProgressParser;
    use std::sync::{Arc, Mutex};

    #[test]
    fn test_command_builder() {
        let cmd = ToolCommand::ffmpeg("/usr/bin/ffmpeg")
            .seek_input(10.0, "input.mp4")
            .limit_duration(5.0)
            .args(["-c", "copy"])
            .output("out.mp4");

        let args = cmd.build_args();
        assert_eq!(&args[..5], &["-y", "-v", "error", "-progress", "pipe:2"]);
        assert!(args.windows(2).any(|w| w == ["-ss", "10.000"]));
        assert!(args.windows(2).any(|w| w == ["-t", "5.000"]));
        assert_eq!(args.last().unwrap(), "out.mp4");
    }

    #[test]
    fn test_tail_is_bounded() {
        let mut tail = VecDeque::new();
        for i in 0..100 {
            push_tail(&mut tail, format!("line {}", i));
        }
        assert_eq!(tail.len(), DIAGNOSTIC_TAIL_LINES);
        assert_eq!(tail.front().unwrap(), "line 60");
        assert_eq!(tail.back().unwrap(), "line 99");
    }

    #[tokio::test]
    async fn test_run_captures_stdout() {
        let cmd = ToolCommand::new("echo").arg("hello");
        let output = ToolRunner::new()
            .run(&cmd, NullProgressParser, |_| {})
            .await
            .unwrap();
        assert_eq!(output.stdout.trim(), "hello");
    }

    #[tokio::test]
    async fn test_run_nonzero_exit_carries_tail() {
        let cmd = ToolCommand::new("sh").args(["-c", "echo oops >&2; exit 3"]);
        let err = ToolRunner::new()
            .run(&cmd, NullProgressParser, |_| {})
            .await
            .unwrap_err();
        match err {
            MediaError::ToolFailed { message, tail, exit_code, .. } => {
                assert_eq!(message, "oops");
                assert_eq!(tail, vec!["oops".to_string()]);
                assert_eq!(exit_code, Some(3));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn test_run_timeout_kills_child() {
        let cmd = ToolCommand::new("sleep").arg("30");
        let err = ToolRunner::new()
            .with_timeout(Duration::from_millis(100))
            .run(&cmd, NullProgressParser, |_| {})
            .await
            .unwrap_err();
        assert!(matches!(err, MediaError::Timeout(_)));
    }

    #[tokio::test]
    async fn test_run_cancellation() {
        let (tx, rx) = watch::channel(false);
        let cmd = ToolCommand::new("sleep").arg("30");
        let runner = ToolRunner::new().with_cancel(rx);

        let handle = tokio::spawn(async move {
            runner.run(&cmd, NullProgressParser, |_| {}).await
        });
        tokio::time::sleep(Duration::from_millis(100)).await;
        tx.send(true).unwrap();

        let err = handle.await.unwrap().unwrap_err();
        assert!(matches!(err, MediaError::Cancelled));
    }

    #[tokio::test]
    async fn test_already_cancelled_rejected_before_spawn() {
        let (tx, rx) = watch::channel(false);
        tx.send(true).unwrap();
        let cmd = ToolCommand::new("echo").arg("never");
        let err = ToolRunner::new()
            .with_cancel(rx)
            .run(&cmd, NullProgressParser, |_| {})
            .await
            .unwrap_err();
        assert!(matches!(err, MediaError::Cancelled));
    }

    #[tokio::test]
    async fn test_progress_callback_fires() {
        // Emit yt-dlp style progress lines through a real parser.
        let cmd = ToolCommand::new("sh").args([
            "-c",
            "echo '[download]  50.0% of 1MiB'; echo '[download] 100% of 1MiB'",
        ]);
        let seen: Arc<Mutex<Vec<f64>>> = Arc::new(Mutex::new(Vec::new()));
        let seen_clone = Arc::clone(&seen);

        ToolRunner::new()
            .run(&cmd, crate::progress::YtDlpProgressParser::new(), move |u| {
                seen_clone.lock().unwrap().push(u.percent);
            })
            .await
            .unwrap();

        let seen = seen.lock().unwrap();
        assert_eq!(seen.len(), 2);
        assert!((seen[0] - 50.0).abs() < 0.01);
        assert!((seen[1] - 100.0).abs() < 0.01);
    }
}
