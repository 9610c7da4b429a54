//! Bounded execution of read-only external commands.

use std::fmt::Write;
use std::path::Path;
use std::process::Stdio;
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::Command;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::error::ToolError;

/// Run `program` with `args` in `cwd`, collecting stdout and stderr lines.
///
/// At most `max_chars` characters are kept; the rest of the output is still
/// drained but only counted, and a truncation line is appended. The child is
/// killed when `timeout` passes or `cancel` fires; whatever was read up to
/// then is returned as partial output.
///
/// # Errors
///
/// - [`ToolError::Execution`] if the program cannot be started or exits
///   unsuccessfully
/// - [`ToolError::Timeout`] with partial output on deadline
/// - [`ToolError::Cancelled`] on interrupt
pub async fn run_command(
    program: &str,
    args: &[&str],
    cwd: &Path,
    timeout: Duration,
    max_chars: usize,
    cancel: &CancellationToken,
) -> Result<String, ToolError> {
    let mut child = Command::new(program)
        .args(args)
        .current_dir(cwd)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn()
        .map_err(|e| match e.kind() {
            std::io::ErrorKind::NotFound => {
                ToolError::execution(format!("{program} is not installed or not on PATH"))
            }
            _ => ToolError::execution(format!("failed to start {program}: {e}")),
        })?;

    let (line_tx, mut line_rx) = mpsc::channel::<String>(64);
    if let Some(stdout) = child.stdout.take() {
        tokio::spawn(forward_lines(stdout, line_tx.clone(), ""));
    }
    if let Some(stderr) = child.stderr.take() {
        tokio::spawn(forward_lines(stderr, line_tx.clone(), "[stderr] "));
    }
    drop(line_tx);

    let mut combined = CappedOutput::new(max_chars);
    let deadline = tokio::time::Instant::now() + timeout;

    loop {
        tokio::select! {
            line = line_rx.recv() => {
                match line {
                    Some(chunk) => combined.push(&chunk),
                    None => break,
                }
            }
            () = tokio::time::sleep_until(deadline) => {
                let _ = child.kill().await;
                tracing::warn!(program, timeout_secs = timeout.as_secs(), "command timed out");
                return Err(ToolError::Timeout {
                    timeout_secs: timeout.as_secs(),
                    partial_output: non_empty(combined.finish()),
                });
            }
            () = cancel.cancelled() => {
                let _ = child.kill().await;
                tracing::info!(program, "command cancelled");
                return Err(ToolError::Cancelled);
            }
        }
    }

    let status = child.wait().await?;
    let combined = combined.finish();
    if status.success() {
        Ok(combined)
    } else {
        Err(ToolError::Execution {
            message: format!("{program} exited with {status}"),
            partial_output: non_empty(combined),
        })
    }
}

async fn forward_lines<R>(stream: R, tx: mpsc::Sender<String>, prefix: &'static str)
where
    R: AsyncRead + Unpin,
{
    let mut reader = BufReader::new(stream);
    let mut buf = Vec::new();
    while reader.read_until(b'\n', &mut buf).await.unwrap_or(0) > 0 {
        let line = String::from_utf8_lossy(&buf);
        if tx.send(format!("{prefix}{line}")).await.is_err() {
            break;
        }
        buf.clear();
    }
}

/// Output buffer that stops growing at a char limit.
#[derive(Debug)]
struct CappedOutput {
    text: String,
    chars: usize,
    limit: usize,
    dropped: usize,
}

impl CappedOutput {
    fn new(limit: usize) -> Self {
        Self {
            text: String::new(),
            chars: 0,
            limit,
            dropped: 0,
        }
    }

    fn push(&mut self, chunk: &str) {
        let n = chunk.chars().count();
        if self.dropped > 0 {
            self.dropped += n;
            return;
        }
        let room = self.limit - self.chars;
        if n <= room {
            self.text.push_str(chunk);
            self.chars += n;
            return;
        }
        let cut = chunk.char_indices().nth(room).map_or(chunk.len(), |(i, _)| i);
        self.text.push_str(&chunk[..cut]);
        self.chars = self.limit;
        self.dropped = n - room;
    }

    fn finish(mut self) -> String {
        if self.dropped > 0 {
            if !self.text.is_empty() && !self.text.ends_with('\n') {
                self.text.push('\n');
            }
            let _ = writeln!(self.text, "... [output truncated, {} more chars]", self.dropped);
        }
        self.text
    }
}

fn non_empty(s: String) -> Option<String> {
    if s.is_empty() { None } else { Some(s) }
}
