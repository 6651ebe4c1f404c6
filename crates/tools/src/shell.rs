//! Shell tool: execute commands in the project root.
//!
//! `shell.exec` is DANGEROUS: the agent loop always asks before running it
//! unless approval is disabled.

use std::path::PathBuf;
use std::time::Duration;

use async_trait::async_trait;
use hearth_core::error::ToolError;
use hearth_core::tool::{RiskLevel, Tool, ToolResult};
use tracing::{debug, warn};

use crate::process::{run_with_timeout, shell_command};
use crate::workspace::resolve_within;

const DEFAULT_TIMEOUT_SECS: u64 = 120;
const OUTPUT_LIMIT_BYTES: usize = 64 * 1024;

pub struct ShellTool {
    root: PathBuf,
}

impl ShellTool {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }
}

#[async_trait]
impl Tool for ShellTool {
    fn name(&self) -> &str {
        "shell.exec"
    }

    fn description(&self) -> &str {
        "Execute a shell command in the project and return exit code, stdout and stderr."
    }

    fn parameters_schema(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "command": { "type": "string", "description": "The shell command to execute" },
                "cwd": { "type": "string", "description": "Working directory relative to the project root" },
                "timeout": { "type": "integer", "description": "Timeout in seconds", "default": DEFAULT_TIMEOUT_SECS }
            },
            "required": ["command"]
        })
    }

    fn risk_level(&self) -> RiskLevel {
        RiskLevel::Dangerous
    }

    async fn execute(&self, arguments: serde_json::Value) -> Result<ToolResult, ToolError> {
        let command = arguments["command"]
            .as_str()
            .filter(|c| !c.trim().is_empty())
            .ok_or_else(|| ToolError::InvalidArguments("Missing 'command' argument".into()))?;
        let timeout_secs = arguments["timeout"].as_u64().unwrap_or(DEFAULT_TIMEOUT_SECS);
        let cwd = match arguments["cwd"].as_str() {
            Some(dir) => resolve_within(&self.root, dir, self.name())?,
            None => self.root.clone(),
        };

        debug!(command = %command, cwd = %cwd.display(), "Executing shell command");

        let output = run_with_timeout(
            shell_command(command, &cwd),
            Duration::from_secs(timeout_secs),
            OUTPUT_LIMIT_BYTES,
        )
        .await
        .map_err(|e| ToolError::ExecutionFailed {
            tool_name: self.name().into(),
            reason: e.to_string(),
        })?;

        if output.timed_out {
            return Err(ToolError::Timeout {
                tool_name: self.name().into(),
                timeout_secs,
            });
        }

        let payload = serde_json::json!({
            "command": command,
            "exit_code": output.exit_code,
            "stdout": output.stdout,
            "stderr": output.stderr,
        });

        if output.success() {
            Ok(ToolResult::ok(payload))
        } else {
            let code = output.exit_code.unwrap_or(-1);
            warn!(command = %command, exit_code = code, "Command failed");
            Ok(ToolResult {
                success: false,
                output: Some(payload),
                error: Some(format!("exit code {code}")),
                skipped: false,
            })
        }
    }
}
