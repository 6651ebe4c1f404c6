//! Run child processes with a timeout and bounded output capture.
//!
//! Shared by `shell.exec`, the git tools and the verification runner.

use std::process::Stdio;
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::Command;
use tracing::{debug, warn};

/// How long to keep draining pipes after a timed-out child was killed.
/// Grandchildren may hold the pipe open; their output is abandoned.
const DRAIN_GRACE: Duration = Duration::from_millis(500);

/// Captured child process output.
#[derive(Debug, Clone)]
pub struct CommandOutput {
    /// `None` when killed by a signal or on timeout
    pub exit_code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
    pub stdout_truncated: usize,
    pub stderr_truncated: usize,
    pub timed_out: bool,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        !self.timed_out && self.exit_code == Some(0)
    }
}

/// Build a `sh -c <command>` invocation in `cwd`.
pub fn shell_command(command: &str, cwd: &std::path::Path) -> Command {
    let mut cmd = if cfg!(target_os = "windows") {
        let mut c = Command::new("cmd");
        c.args(["/C", command]);
        c
    } else {
        let mut c = Command::new("sh");
        c.args(["-c", command]);
        c
    };
    cmd.current_dir(cwd);
    cmd
}

/// Run `cmd` to completion or until `timeout`, killing it on expiry.
///
/// At most `output_limit_bytes` of each stream is kept; the rest is drained
/// and counted in `*_truncated`. Spawn failures are the only `Err`.
pub async fn run_with_timeout(
    mut cmd: Command,
    timeout: Duration,
    output_limit_bytes: usize,
) -> std::io::Result<CommandOutput> {
    cmd.stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    let mut child = cmd.spawn()?;
    debug!(pid = ?child.id(), timeout_secs = timeout.as_secs(), "Spawned child process");

    let stdout = child.stdout.take();
    let stderr = child.stderr.take();
    let stdout_task = tokio::spawn(read_limited(stdout, output_limit_bytes));
    let stderr_task = tokio::spawn(read_limited(stderr, output_limit_bytes));

    let (exit_code, timed_out) = match tokio::time::timeout(timeout, child.wait()).await {
        Ok(status) => (status?.code(), false),
        Err(_) => {
            warn!(timeout_secs = timeout.as_secs(), "Command timed out, killing");
            let _ = child.kill().await;
            (None, true)
        }
    };

    let (stdout, stdout_truncated) = join_reader(stdout_task, timed_out).await;
    let (stderr, stderr_truncated) = join_reader(stderr_task, timed_out).await;

    if stdout_truncated > 0 || stderr_truncated > 0 {
        debug!(stdout_truncated, stderr_truncated, "Output truncated");
    }

    Ok(CommandOutput {
        exit_code,
        stdout,
        stderr,
        stdout_truncated,
        stderr_truncated,
        timed_out,
    })
}

async fn join_reader(
    task: tokio::task::JoinHandle<(Vec<u8>, usize)>,
    timed_out: bool,
) -> (String, usize) {
    let joined = if timed_out {
        match tokio::time::timeout(DRAIN_GRACE, task).await {
            Ok(joined) => joined.ok(),
            Err(_) => None,
        }
    } else {
        task.await.ok()
    };
    let (bytes, truncated) = joined.unwrap_or_default();
    (String::from_utf8_lossy(&bytes).into_owned(), truncated)
}

async fn read_limited<R>(reader: Option<R>, limit: usize) -> (Vec<u8>, usize)
where
    R: AsyncRead + Unpin,
{
    let Some(mut reader) = reader else {
        return (Vec::new(), 0);
    };
    let mut kept = Vec::new();
    let mut dropped = 0usize;
    let mut buf = [0u8; 8192];
    loop {
        match reader.read(&mut buf).await {
            Ok(0) | Err(_) => break,
            Ok(n) => {
                let room = limit.saturating_sub(kept.len());
                let take = room.min(n);
                kept.extend_from_slice(&buf[..take]);
                dropped += n - take;
            }
        }
    }
    (kept, dropped)
}

/// The last `n` lines of `text`.
pub fn tail_lines(text: &str, n: usize) -> String {
    let lines: Vec<&str> = text.lines().collect();
    let start = lines.len().saturating_sub(n);
    lines[start..].join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn captures_stdout_and_exit_code() {
        let dir = tempfile::tempdir().unwrap();
        let out = run_with_timeout(
            shell_command("echo hello; echo oops >&2; exit 3", dir.path()),
            Duration::from_secs(10),
            1024,
        )
        .await
        .unwrap();
        assert_eq!(out.exit_code, Some(3));
        assert_eq!(out.stdout.trim(), "hello");
        assert_eq!(out.stderr.trim(), "oops");
        assert!(!out.success());
    }

    #[tokio::test]
    async fn times_out_and_kills() {
        let dir = tempfile::tempdir().unwrap();
        let started = std::time::Instant::now();
        let out = run_with_timeout(
            shell_command("exec sleep 30", dir.path()),
            Duration::from_millis(200),
            1024,
        )
        .await
        .unwrap();
        assert!(out.timed_out);
        assert!(out.exit_code.is_none());
        assert!(started.elapsed() < Duration::from_secs(10));
    }

    #[tokio::test]
    async fn output_is_bounded() {
        let dir = tempfile::tempdir().unwrap();
        let out = run_with_timeout(
            shell_command("printf 'abcdefghij'", dir.path()),
            Duration::from_secs(10),
            4,
        )
        .await
        .unwrap();
        assert_eq!(out.stdout, "abcd");
        assert_eq!(out.stdout_truncated, 6);
    }

    #[tokio::test]
    async fn runs_in_cwd() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("marker.txt"), "").unwrap();
        let out = run_with_timeout(shell_command("ls", dir.path()), Duration::from_secs(10), 1024)
            .await
            .unwrap();
        assert!(out.stdout.contains("marker.txt"));
    }

    #[test]
    fn tail_keeps_last_lines() {
        assert_eq!(tail_lines("a\nb\nc\nd", 2), "c\nd");
        assert_eq!(tail_lines("a", 5), "a");
        assert_eq!(tail_lines("", 5), "");
    }
}
