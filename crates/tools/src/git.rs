//! Git tools: read-only `git.status`, `git.diff`, `git.log`, and the
//! mutating `git.add`, `git.commit`.

use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use hearth_core::error::ToolError;
use hearth_core::tool::{RiskLevel, Tool, ToolResult};
use tokio::process::Command;
use tracing::debug;

use crate::process::{CommandOutput, run_with_timeout};

const GIT_TIMEOUT: Duration = Duration::from_secs(30);
const OUTPUT_LIMIT_BYTES: usize = 256 * 1024;

async fn run_git(root: &Path, args: &[&str], tool_name: &str) -> Result<CommandOutput, ToolError> {
    debug!(tool = tool_name, ?args, "Running git");
    let mut cmd = Command::new("git");
    cmd.args(args).current_dir(root);
    let output = run_with_timeout(cmd, GIT_TIMEOUT, OUTPUT_LIMIT_BYTES)
        .await
        .map_err(|e| ToolError::ExecutionFailed {
            tool_name: tool_name.into(),
            reason: format!("failed to run git: {e}"),
        })?;
    if output.timed_out {
        return Err(ToolError::Timeout {
            tool_name: tool_name.into(),
            timeout_secs: GIT_TIMEOUT.as_secs(),
        });
    }
    Ok(output)
}

fn git_failure(output: &CommandOutput, what: &str) -> ToolResult {
    let detail = if output.stderr.trim().is_empty() {
        output.stdout.trim()
    } else {
        output.stderr.trim()
    };
    ToolResult::failure(format!("git {what} failed: {detail}"))
}

/// Parsed `git status --porcelain -b` output.
#[derive(Debug, Default, PartialEq)]
pub struct StatusSummary {
    pub branch: Option<String>,
    pub staged: Vec<(char, String)>,
    pub modified: Vec<String>,
    pub untracked: Vec<String>,
}

impl StatusSummary {
    pub fn is_clean(&self) -> bool {
        self.staged.is_empty() && self.modified.is_empty() && self.untracked.is_empty()
    }
}

pub fn parse_porcelain(stdout: &str) -> StatusSummary {
    let mut summary = StatusSummary::default();
    for line in stdout.lines() {
        if let Some(branch) = line.strip_prefix("## ") {
            let name = branch.split("...").next().unwrap_or(branch);
            summary.branch = Some(name.to_string());
            continue;
        }
        if line.len() < 4 {
            continue;
        }
        let mut codes = line.chars();
        let index = codes.next().unwrap_or(' ');
        let worktree = codes.next().unwrap_or(' ');
        let file = line[3..].to_string();

        if index == '?' && worktree == '?' {
            summary.untracked.push(file);
            continue;
        }
        if "MADRC".contains(index) {
            summary.staged.push((index, file.clone()));
        }
        if worktree == 'M' || worktree == 'D' {
            summary.modified.push(file);
        }
    }
    summary
}

pub struct GitStatusTool {
    root: PathBuf,
}

impl GitStatusTool {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }
}

#[async_trait]
impl Tool for GitStatusTool {
    fn name(&self) -> &str {
        "git.status"
    }

    fn description(&self) -> &str {
        "Show the working tree status: branch, staged, modified and untracked files."
    }

    fn parameters_schema(&self) -> serde_json::Value {
        serde_json::json!({ "type": "object", "properties": {} })
    }

    async fn execute(&self, _arguments: serde_json::Value) -> Result<ToolResult, ToolError> {
        let output = run_git(&self.root, &["status", "--porcelain", "-b"], self.name()).await?;
        if !output.success() {
            return Ok(git_failure(&output, "status"));
        }
        let summary = parse_porcelain(&output.stdout);
        Ok(ToolResult::ok(serde_json::json!({
            "branch": summary.branch,
            "staged": summary.staged.iter().map(|(s, f)| serde_json::json!({"status": s.to_string(), "file": f})).collect::<Vec<_>>(),
            "modified": summary.modified,
            "untracked": summary.untracked,
            "clean": summary.is_clean(),
        })))
    }
}

pub struct GitDiffTool {
    root: PathBuf,
}

impl GitDiffTool {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }
}

#[async_trait]
impl Tool for GitDiffTool {
    fn name(&self) -> &str {
        "git.diff"
    }

    fn description(&self) -> &str {
        "Show changes in the working tree, or staged changes when staged is true."
    }

    fn parameters_schema(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "staged": { "type": "boolean", "description": "Show staged changes", "default": false },
                "path": { "type": "string", "description": "Limit the diff to one file" }
            }
        })
    }

    async fn execute(&self, arguments: serde_json::Value) -> Result<ToolResult, ToolError> {
        let mut args = vec!["diff"];
        if arguments["staged"].as_bool().unwrap_or(false) {
            args.push("--cached");
        }
        if let Some(path) = arguments["path"].as_str() {
            args.push("--");
            args.push(path);
        }
        let output = run_git(&self.root, &args, self.name()).await?;
        if !output.success() {
            return Ok(git_failure(&output, "diff"));
        }
        let files = output
            .stdout
            .lines()
            .filter_map(|l| l.strip_prefix("+++ b/"))
            .map(String::from)
            .collect::<Vec<_>>();
        Ok(ToolResult::ok(serde_json::json!({
            "diff": output.stdout,
            "files": files,
            "empty": output.stdout.trim().is_empty(),
        })))
    }
}

pub struct GitLogTool {
    root: PathBuf,
}

impl GitLogTool {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }
}

#[async_trait]
impl Tool for GitLogTool {
    fn name(&self) -> &str {
        "git.log"
    }

    fn description(&self) -> &str {
        "Show recent commits (hash and subject)."
    }

    fn parameters_schema(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "count": { "type": "integer", "description": "Number of commits", "default": 10 }
            }
        })
    }

    async fn execute(&self, arguments: serde_json::Value) -> Result<ToolResult, ToolError> {
        let count = arguments["count"].as_u64().unwrap_or(10).clamp(1, 200).to_string();
        let output = run_git(
            &self.root,
            &["log", "-n", &count, "--pretty=format:%h%x09%an%x09%s"],
            self.name(),
        )
        .await?;
        if !output.success() {
            return Ok(git_failure(&output, "log"));
        }
        let commits: Vec<serde_json::Value> = output
            .stdout
            .lines()
            .filter_map(|line| {
                let mut parts = line.splitn(3, '\t');
                Some(serde_json::json!({
                    "hash": parts.next()?,
                    "author": parts.next()?,
                    "subject": parts.next().unwrap_or(""),
                }))
            })
            .collect();
        Ok(ToolResult::ok(serde_json::json!({ "commits": commits })))
    }
}

pub struct GitAddTool {
    root: PathBuf,
}

impl GitAddTool {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }
}

#[async_trait]
impl Tool for GitAddTool {
    fn name(&self) -> &str {
        "git.add"
    }

    fn description(&self) -> &str {
        "Stage files for commit."
    }

    fn parameters_schema(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "files": { "type": "array", "items": { "type": "string" }, "description": "Paths to stage" }
            },
            "required": ["files"]
        })
    }

    fn risk_level(&self) -> RiskLevel {
        RiskLevel::Moderate
    }

    async fn execute(&self, arguments: serde_json::Value) -> Result<ToolResult, ToolError> {
        let files: Vec<&str> = arguments["files"]
            .as_array()
            .map(|a| a.iter().filter_map(|f| f.as_str()).collect())
            .unwrap_or_default();
        if files.is_empty() {
            return Err(ToolError::InvalidArguments("'files' must list at least one path".into()));
        }
        let mut args = vec!["add", "--"];
        args.extend(files.iter().copied());
        let output = run_git(&self.root, &args, self.name()).await?;
        if !output.success() {
            return Ok(git_failure(&output, "add"));
        }
        Ok(ToolResult::ok(serde_json::json!({ "staged": files })))
    }
}

pub struct GitCommitTool {
    root: PathBuf,
}

impl GitCommitTool {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }
}

#[async_trait]
impl Tool for GitCommitTool {
    fn name(&self) -> &str {
        "git.commit"
    }

    fn description(&self) -> &str {
        "Create a commit from the staged changes."
    }

    fn parameters_schema(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "message": { "type": "string", "description": "Commit message" }
            },
            "required": ["message"]
        })
    }

    fn risk_level(&self) -> RiskLevel {
        RiskLevel::Moderate
    }

    async fn execute(&self, arguments: serde_json::Value) -> Result<ToolResult, ToolError> {
        let message = arguments["message"]
            .as_str()
            .filter(|m| !m.trim().is_empty())
            .ok_or_else(|| ToolError::InvalidArguments("Missing 'message' argument".into()))?;
        let output = run_git(&self.root, &["commit", "-m", message], self.name()).await?;
        if !output.success() {
            return Ok(git_failure(&output, "commit"));
        }
        let head = run_git(&self.root, &["rev-parse", "--short", "HEAD"], self.name()).await?;
        Ok(ToolResult::ok(serde_json::json!({
            "commit": head.stdout.trim(),
            "summary": output.stdout.lines().next().unwrap_or(""),
        })))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn porcelain_parsing() {
        let out = "## main...origin/main [ahead 1]\nM  src/lib.rs\n M README.md\nA  new.rs\n?? scratch.txt\n D gone.rs\n";
        let s = parse_porcelain(out);
        assert_eq!(s.branch.as_deref(), Some("main"));
        assert_eq!(s.staged, vec![('M', "src/lib.rs".into()), ('A', "new.rs".into())]);
        assert_eq!(s.modified, vec!["README.md".to_string(), "gone.rs".to_string()]);
        assert_eq!(s.untracked, vec!["scratch.txt".to_string()]);
        assert!(!s.is_clean());
    }

    #[test]
    fn clean_repo() {
        let s = parse_porcelain("## main\n");
        assert!(s.is_clean());
        assert_eq!(s.branch.as_deref(), Some("main"));
    }

    #[test]
    fn risk_levels() {
        assert_eq!(GitStatusTool::new(".").risk_level(), RiskLevel::Safe);
        assert_eq!(GitDiffTool::new(".").risk_level(), RiskLevel::Safe);
        assert_eq!(GitLogTool::new(".").risk_level(), RiskLevel::Safe);
        assert_eq!(GitAddTool::new(".").risk_level(), RiskLevel::Moderate);
        assert_eq!(GitCommitTool::new(".").risk_level(), RiskLevel::Moderate);
    }

    #[tokio::test]
    async fn status_outside_repo_is_failure() {
        let dir = tempfile::tempdir().unwrap();
        let result = GitStatusTool::new(dir.path())
            .execute(serde_json::json!({}))
            .await;
        // git missing entirely surfaces as an ExecutionFailed error
        if let Ok(result) = result {
            assert!(!result.success);
            assert!(result.error.unwrap().contains("git status failed"));
        }
    }

    #[tokio::test]
    async fn add_requires_files() {
        let err = GitAddTool::new(".")
            .execute(serde_json::json!({"files": []}))
            .await
            .unwrap_err();
        assert!(matches!(err, ToolError::InvalidArguments(_)));
    }
}
