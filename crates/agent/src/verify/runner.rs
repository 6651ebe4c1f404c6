//! Run verification commands and keep the tail of their output.

use std::path::Path;
use std::time::{Duration, Instant};

use hearth_tools::process::{run_with_timeout, shell_command, tail_lines};
use tracing::{debug, info, warn};

use super::signature::{SPAWN_FAILED, TIMEOUT, failure_signature};

/// Bytes captured per stream before the tail is taken.
const CAPTURE_LIMIT_BYTES: usize = 1024 * 1024;

/// Outcome of running a command sequence.
#[derive(Debug, Clone, PartialEq)]
pub struct ExecutionResult {
    pub success: bool,
    /// Commands actually started, in order
    pub commands_run: Vec<String>,
    pub stdout_tail: String,
    pub stderr_tail: String,
    /// Exit code of the last command; `None` when killed or never started
    pub exit_code: Option<i32>,
    pub failure_signature: Option<String>,
    pub duration: Duration,
}

/// Run `commands` in order in `cwd`, stopping at the first failure.
///
/// Each command gets `timeout`; on expiry it is killed and the signature is
/// `TIMEOUT`. Only the last `tail` lines of stdout and stderr are kept.
pub async fn run_commands(
    commands: &[String],
    cwd: &Path,
    timeout: Duration,
    tail: usize,
) -> ExecutionResult {
    let started = Instant::now();
    let mut result = ExecutionResult {
        success: true,
        commands_run: Vec::new(),
        stdout_tail: String::new(),
        stderr_tail: String::new(),
        exit_code: None,
        failure_signature: None,
        duration: Duration::ZERO,
    };
    let mut stdout = Vec::new();
    let mut stderr = Vec::new();

    for command in commands {
        debug!(command = %command, "Running verification command");
        result.commands_run.push(command.clone());

        let output = match run_with_timeout(shell_command(command, cwd), timeout, CAPTURE_LIMIT_BYTES).await {
            Ok(output) => output,
            Err(e) => {
                warn!(command = %command, error = %e, "Failed to start command");
                result.success = false;
                result.exit_code = None;
                result.failure_signature = Some(SPAWN_FAILED.into());
                stderr.push(format!("Failed to start `{command}`: {e}"));
                break;
            }
        };

        push_tail(&mut stdout, &output.stdout, tail);
        push_tail(&mut stderr, &output.stderr, tail);
        result.exit_code = output.exit_code;

        if output.timed_out {
            warn!(command = %command, timeout_secs = timeout.as_secs(), "Command timed out");
            result.success = false;
            result.failure_signature = Some(TIMEOUT.into());
            stderr.push(format!("Command timed out after {}s: {command}", timeout.as_secs()));
            break;
        }

        if !output.success() {
            let failing = if output.stderr.is_empty() {
                &output.stdout
            } else {
                &output.stderr
            };
            let signature = failure_signature(failing);
            info!(command = %command, exit_code = ?output.exit_code, signature = %signature, "Command failed");
            result.success = false;
            result.failure_signature = Some(signature);
            break;
        }
    }

    result.stdout_tail = tail_lines(&stdout.join("\n"), tail);
    result.stderr_tail = tail_lines(&stderr.join("\n"), tail);
    result.duration = started.elapsed();
    result
}

fn push_tail(lines: &mut Vec<String>, text: &str, tail: usize) {
    if !text.is_empty() {
        lines.push(tail_lines(text, tail));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cmds(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[tokio::test]
    async fn all_pass() {
        let dir = tempfile::tempdir().unwrap();
        let r = run_commands(&cmds(&["echo one", "echo two"]), dir.path(), Duration::from_secs(10), 100).await;
        assert!(r.success);
        assert_eq!(r.exit_code, Some(0));
        assert_eq!(r.commands_run.len(), 2);
        assert_eq!(r.stdout_tail, "one\ntwo");
        assert!(r.failure_signature.is_none());
    }

    #[tokio::test]
    async fn stops_at_first_failure() {
        let dir = tempfile::tempdir().unwrap();
        let r = run_commands(
            &cmds(&["echo 'error: broken' >&2; exit 1", "echo never"]),
            dir.path(),
            Duration::from_secs(10),
            100,
        )
        .await;
        assert!(!r.success);
        assert_eq!(r.exit_code, Some(1));
        assert_eq!(r.commands_run, cmds(&["echo 'error: broken' >&2; exit 1"]));
        assert_eq!(r.failure_signature.as_deref(), Some("ERROR:error: broken"));
        assert!(!r.stdout_tail.contains("never"));
    }

    #[tokio::test]
    async fn signature_falls_back_to_stdout() {
        let dir = tempfile::tempdir().unwrap();
        let r = run_commands(&cmds(&["echo 'FAILED test_a'; exit 3"]), dir.path(), Duration::from_secs(10), 100).await;
        assert_eq!(r.failure_signature.as_deref(), Some("FAILED:FAILED test_a"));
    }

    #[tokio::test]
    async fn output_tail_is_bounded() {
        let dir = tempfile::tempdir().unwrap();
        let r = run_commands(&cmds(&["seq 1 500"]), dir.path(), Duration::from_secs(10), 3).await;
        assert_eq!(r.stdout_tail, "498\n499\n500");
    }

    #[tokio::test]
    async fn timeout_kills_and_signs() {
        let dir = tempfile::tempdir().unwrap();
        let r = run_commands(&cmds(&["exec sleep 30"]), dir.path(), Duration::from_millis(200), 100).await;
        assert!(!r.success);
        assert_eq!(r.failure_signature.as_deref(), Some(TIMEOUT));
        assert!(r.exit_code.is_none());
        assert!(r.stderr_tail.contains("timed out"));
        assert!(r.duration < Duration::from_secs(10));
    }

    #[tokio::test]
    async fn missing_directory_is_spawn_failure() {
        let dir = tempfile::tempdir().unwrap();
        let r = run_commands(
            &cmds(&["echo hi"]),
            &dir.path().join("does-not-exist"),
            Duration::from_secs(10),
            100,
        )
        .await;
        assert!(!r.success);
        assert_eq!(r.failure_signature.as_deref(), Some(SPAWN_FAILED));
    }
}
