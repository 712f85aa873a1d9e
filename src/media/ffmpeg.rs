//! Shared subprocess plumbing for the external media tools.
//!
//! Executable paths are resolved once per process; every invocation is
//! killed when its future is dropped, which is how both job timeouts and
//! cancellation reach a running tool.

use std::path::PathBuf;
use std::process::{Output, Stdio};
use std::sync::OnceLock;
use std::time::Duration;
use tokio::process::Command;
use tokio_util::sync::CancellationToken;

static FFMPEG_PATH: OnceLock<PathBuf> = OnceLock::new();
static FFPROBE_PATH: OnceLock<PathBuf> = OnceLock::new();

/// Resolved path of the `ffmpeg` executable.
pub fn ffmpeg_path() -> &'static PathBuf {
    FFMPEG_PATH.get_or_init(|| lookup("ffmpeg"))
}

/// Resolved path of the `ffprobe` executable.
pub fn ffprobe_path() -> &'static PathBuf {
    FFPROBE_PATH.get_or_init(|| lookup("ffprobe"))
}

fn lookup(program: &str) -> PathBuf {
    if let Some(paths) = std::env::var_os("PATH") {
        for dir in std::env::split_paths(&paths) {
            let candidate = dir.join(program);
            if candidate.is_file() {
                return candidate;
            }
        }
    }
    // Fall back to the bare name and let spawn surface the error.
    PathBuf::from(program)
}

#[derive(Debug)]
pub enum ToolError {
    /// Tool could not be spawned or awaited
    Io(std::io::Error),
    /// Wall-clock deadline elapsed; the process was killed
    Timeout(Duration),
    /// Job cancellation; the process was killed
    Cancelled,
}

impl std::fmt::Display for ToolError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ToolError::Io(e) => write!(f, "tool execution failed: {}", e),
            ToolError::Timeout(d) => write!(f, "tool timed out after {:?}", d),
            ToolError::Cancelled => write!(f, "tool cancelled"),
        }
    }
}

impl std::error::Error for ToolError {}

/// Run a tool to completion, racing it against cancellation and an optional
/// deadline. The child is spawned with `kill_on_drop`, so losing either race
/// terminates it immediately.
pub async fn run_tool(
    mut cmd: Command,
    cancel: &CancellationToken,
    deadline: Option<Duration>,
) -> Result<Output, ToolError> {
    cmd.stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    let child = cmd.spawn().map_err(ToolError::Io)?;
    let wait = child.wait_with_output();
    tokio::pin!(wait);

    tokio::select! {
        out = &mut wait => out.map_err(ToolError::Io),
        _ = cancel.cancelled() => Err(ToolError::Cancelled),
        _ = sleep_or_forever(deadline) => Err(ToolError::Timeout(deadline.unwrap_or_default())),
    }
}

async fn sleep_or_forever(deadline: Option<Duration>) {
    match deadline {
        Some(d) => tokio::time::sleep(d).await,
        None => std::future::pending().await,
    }
}

/// Last `limit` characters of a tool's stderr, for error reporting.
pub fn stderr_tail(output: &Output, limit: usize) -> String {
    let text = String::from_utf8_lossy(&output.stderr);
    let trimmed = text.trim_end();
    match trimmed.char_indices().nth_back(limit.saturating_sub(1)) {
        Some((idx, _)) => trimmed[idx..].to_string(),
        None => trimmed.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn output_with_stderr(stderr: &str) -> Output {
        use std::os::unix::process::ExitStatusExt;
        Output {
            status: std::process::ExitStatus::from_raw(0),
            stdout: Vec::new(),
            stderr: stderr.as_bytes().to_vec(),
        }
    }

    #[test]
    fn test_stderr_tail_short() {
        let out = output_with_stderr("boom\n");
        assert_eq!(stderr_tail(&out, 512), "boom");
    }

    #[test]
    fn test_stderr_tail_truncates() {
        let out = output_with_stderr(&"x".repeat(1000));
        assert_eq!(stderr_tail(&out, 10).len(), 10);
    }

    #[tokio::test]
    async fn test_run_tool_cancellation() {
        let mut cmd = Command::new("sleep");
        cmd.arg("30");
        let cancel = CancellationToken::new();
        cancel.cancel();
        let err = run_tool(cmd, &cancel, None).await.unwrap_err();
        assert!(matches!(err, ToolError::Cancelled));
    }

    #[tokio::test]
    async fn test_run_tool_deadline() {
        let mut cmd = Command::new("sleep");
        cmd.arg("30");
        let cancel = CancellationToken::new();
        let err = run_tool(cmd, &cancel, Some(Duration::from_millis(50)))
            .await
            .unwrap_err();
        assert!(matches!(err, ToolError::Timeout(_)));
    }

    #[tokio::test]
    async fn test_run_tool_success() {
        let mut cmd = Command::new("true");
        cmd.arg("");
        let cancel = CancellationToken::new();
        let out = run_tool(cmd, &cancel, None).await.unwrap();
        assert!(out.status.success());
    }
}
