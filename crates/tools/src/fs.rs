//! File tools: `fs.read`, `fs.list`, `fs.write`, `fs.edit`.
//!
//! All paths are resolved against the project root and may not escape it.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use hearth_core::error::ToolError;
use hearth_core::tool::{FileAccess, RiskLevel, Tool, ToolResult};
use tracing::debug;

use crate::workspace::{atomic_write, resolve_within};

fn required_str<'a>(arguments: &'a serde_json::Value, key: &str) -> Result<&'a str, ToolError> {
    arguments[key]
        .as_str()
        .ok_or_else(|| ToolError::InvalidArguments(format!("Missing '{key}' argument")))
}

async fn write_blocking(path: PathBuf, content: String, tool_name: &str) -> Result<(), ToolError> {
    tokio::task::spawn_blocking(move || atomic_write(&path, &content))
        .await
        .map_err(|e| ToolError::ExecutionFailed {
            tool_name: tool_name.into(),
            reason: e.to_string(),
        })?
        .map_err(|e| ToolError::ExecutionFailed {
            tool_name: tool_name.into(),
            reason: e.to_string(),
        })
}

/// Read a file, optionally a window of lines.
pub struct FsReadTool {
    root: PathBuf,
}

impl FsReadTool {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }
}

#[async_trait]
impl Tool for FsReadTool {
    fn name(&self) -> &str {
        "fs.read"
    }

    fn description(&self) -> &str {
        "Read the contents of a file. Files must be read before they can be modified."
    }

    fn parameters_schema(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "path": { "type": "string", "description": "File path, relative to the project root" },
                "offset": { "type": "integer", "description": "Line number to start from (1-indexed)", "default": 1 },
                "lines": { "type": "integer", "description": "Number of lines to read (0 = all)", "default": 0 }
            },
            "required": ["path"]
        })
    }

    fn file_access(&self) -> FileAccess {
        FileAccess::Read
    }

    async fn execute(&self, arguments: serde_json::Value) -> Result<ToolResult, ToolError> {
        let path = required_str(&arguments, "path")?;
        let offset = arguments["offset"].as_u64().unwrap_or(1).max(1) as usize;
        let limit = arguments["lines"].as_u64().unwrap_or(0) as usize;

        let resolved = resolve_within(&self.root, path, self.name())?;
        if !resolved.exists() {
            return Ok(ToolResult::failure(format!("File not found: {path}")));
        }
        if !resolved.is_file() {
            return Ok(ToolResult::failure(format!("Not a file: {path}")));
        }

        let bytes = match tokio::fs::read(&resolved).await {
            Ok(b) => b,
            Err(e) => return Ok(ToolResult::failure(format!("Failed to read file: {e}"))),
        };
        let text = String::from_utf8_lossy(&bytes);

        let all: Vec<&str> = text.split_inclusive('\n').collect();
        let total = all.len();
        let start = (offset - 1).min(total);
        let end = if limit > 0 { (start + limit).min(total) } else { total };
        let content: String = all[start..end].concat();

        debug!(path = %resolved.display(), total_lines = total, "Read file");

        Ok(ToolResult::ok(serde_json::json!({
            "path": resolved.display().to_string(),
            "total_lines": total,
            "showing": format!("{}-{}", start + 1, end),
            "content": content,
        })))
    }
}

/// List a directory.
pub struct FsListTool {
    root: PathBuf,
}

impl FsListTool {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }
}

#[async_trait]
impl Tool for FsListTool {
    fn name(&self) -> &str {
        "fs.list"
    }

    fn description(&self) -> &str {
        "List the contents of a directory."
    }

    fn parameters_schema(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "path": { "type": "string", "description": "Directory path (default: project root)" },
                "all": { "type": "boolean", "description": "Include hidden files", "default": false }
            }
        })
    }

    async fn execute(&self, arguments: serde_json::Value) -> Result<ToolResult, ToolError> {
        let path = arguments["path"].as_str().unwrap_or(".");
        let show_hidden = arguments["all"].as_bool().unwrap_or(false);

        let resolved = resolve_within(&self.root, path, self.name())?;
        if !resolved.is_dir() {
            return Ok(ToolResult::failure(format!("Not a directory: {path}")));
        }

        let mut read_dir = match tokio::fs::read_dir(&resolved).await {
            Ok(rd) => rd,
            Err(e) => return Ok(ToolResult::failure(format!("Failed to list directory: {e}"))),
        };

        let mut entries = Vec::new();
        while let Ok(Some(entry)) = read_dir.next_entry().await {
            let name = entry.file_name().to_string_lossy().to_string();
            if !show_hidden && name.starts_with('.') {
                continue;
            }
            let meta = entry.metadata().await.ok();
            let is_dir = meta.as_ref().is_some_and(|m| m.is_dir());
            entries.push(serde_json::json!({
                "name": name,
                "type": if is_dir { "dir" } else { "file" },
                "size": if is_dir { 0 } else { meta.map(|m| m.len()).unwrap_or(0) },
            }));
        }
        entries.sort_by(|a, b| a["name"].as_str().cmp(&b["name"].as_str()));

        Ok(ToolResult::ok(serde_json::json!({
            "path": resolved.display().to_string(),
            "count": entries.len(),
            "entries": entries,
        })))
    }
}

/// Create or overwrite a file with full content.
pub struct FsWriteTool {
    root: PathBuf,
}

impl FsWriteTool {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }
}

#[async_trait]
impl Tool for FsWriteTool {
    fn name(&self) -> &str {
        "fs.write"
    }

    fn description(&self) -> &str {
        "Write content to a file. Creates the file if it doesn't exist, overwrites it if it does."
    }

    fn parameters_schema(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "path": { "type": "string", "description": "File path, relative to the project root" },
                "content": { "type": "string", "description": "The complete new file content" }
            },
            "required": ["path", "content"]
        })
    }

    fn risk_level(&self) -> RiskLevel {
        RiskLevel::Moderate
    }

    fn file_access(&self) -> FileAccess {
        FileAccess::Modify
    }

    async fn execute(&self, arguments: serde_json::Value) -> Result<ToolResult, ToolError> {
        let path = required_str(&arguments, "path")?;
        let content = required_str(&arguments, "content")?;

        let resolved = resolve_within(&self.root, path, self.name())?;
        if resolved.is_dir() {
            return Ok(ToolResult::failure(format!("Is a directory: {path}")));
        }
        let created = !resolved.exists();

        write_blocking(resolved.clone(), content.to_string(), self.name()).await?;
        debug!(path = %resolved.display(), bytes = content.len(), created, "Wrote file");

        Ok(ToolResult::ok(serde_json::json!({
            "path": resolved.display().to_string(),
            "bytes": content.len(),
            "created": created,
        })))
    }
}

/// Search-and-replace inside an existing file.
pub struct FsEditTool {
    root: PathBuf,
}

impl FsEditTool {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }
}

/// Apply one search/replace. Returns the new text and the replacement count.
pub fn apply_edit(
    original: &str,
    old_text: &str,
    new_text: &str,
    replace_all: bool,
) -> Result<(String, usize), String> {
    if old_text.is_empty() {
        return Err("old_text must not be empty".into());
    }
    let occurrences = original.matches(old_text).count();
    match occurrences {
        0 => Err("old_text not found in file".into()),
        1 => Ok((original.replacen(old_text, new_text, 1), 1)),
        n if replace_all => Ok((original.replace(old_text, new_text), n)),
        n => Err(format!(
            "old_text appears {n} times; make it unique or set replace_all"
        )),
    }
}

#[async_trait]
impl Tool for FsEditTool {
    fn name(&self) -> &str {
        "fs.edit"
    }

    fn description(&self) -> &str {
        "Edit a file by replacing old_text with new_text. old_text must match exactly once unless replace_all is set."
    }

    fn parameters_schema(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "path": { "type": "string", "description": "File path, relative to the project root" },
                "old_text": { "type": "string", "description": "Exact text to replace" },
                "new_text": { "type": "string", "description": "Replacement text" },
                "replace_all": { "type": "boolean", "description": "Replace every occurrence", "default": false }
            },
            "required": ["path", "old_text", "new_text"]
        })
    }

    fn risk_level(&self) -> RiskLevel {
        RiskLevel::Moderate
    }

    fn file_access(&self) -> FileAccess {
        FileAccess::Modify
    }

    async fn execute(&self, arguments: serde_json::Value) -> Result<ToolResult, ToolError> {
        let path = required_str(&arguments, "path")?;
        let old_text = required_str(&arguments, "old_text")?;
        let new_text = required_str(&arguments, "new_text")?;
        let replace_all = arguments["replace_all"].as_bool().unwrap_or(false);

        let resolved = resolve_within(&self.root, path, self.name())?;
        let original = match tokio::fs::read_to_string(&resolved).await {
            Ok(s) => s,
            Err(e) => return Ok(ToolResult::failure(format!("Failed to read {path}: {e}"))),
        };

        let (updated, replacements) = match apply_edit(&original, old_text, new_text, replace_all) {
            Ok(r) => r,
            Err(reason) => return Ok(ToolResult::failure(reason)),
        };

        write_blocking(resolved.clone(), updated, self.name()).await?;
        debug!(path = %resolved.display(), replacements, "Edited file");

        Ok(ToolResult::ok(serde_json::json!({
            "path": resolved.display().to_string(),
            "replacements": replacements,
        })))
    }
}

/// The project-relative display form of a resolved path.
pub fn display_relative(root: &Path, path: &Path) -> String {
    path.strip_prefix(root)
        .map(|p| p.display().to_string())
        .unwrap_or_else(|_| path.display().to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tool_metadata() {
        let dir = tempfile::tempdir().unwrap();
        let read = FsReadTool::new(dir.path());
        assert_eq!(read.name(), "fs.read");
        assert_eq!(read.risk_level(), RiskLevel::Safe);
        assert_eq!(read.file_access(), FileAccess::Read);
        assert_eq!(read.parameters_schema()["required"], serde_json::json!(["path"]));

        let write = FsWriteTool::new(dir.path());
        assert_eq!(write.risk_level(), RiskLevel::Moderate);
        assert_eq!(write.file_access(), FileAccess::Modify);
        assert_eq!(FsEditTool::new(dir.path()).file_access(), FileAccess::Modify);
        assert_eq!(FsListTool::new(dir.path()).file_access(), FileAccess::None);
    }

    #[tokio::test]
    async fn read_whole_file_and_window() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("a.txt"), "one\ntwo\nthree\n").unwrap();
        let tool = FsReadTool::new(dir.path());

        let result = tool.execute(serde_json::json!({"path": "a.txt"})).await.unwrap();
        assert!(result.success);
        let out = result.output.unwrap();
        assert_eq!(out["content"], "one\ntwo\nthree\n");
        assert_eq!(out["total_lines"], 3);

        let result = tool
            .execute(serde_json::json!({"path": "a.txt", "offset": 2, "lines": 1}))
            .await
            .unwrap();
        let out = result.output.unwrap();
        assert_eq!(out["content"], "two\n");
        assert_eq!(out["showing"], "2-2");
    }

    #[tokio::test]
    async fn read_missing_file_is_failure() {
        let dir = tempfile::tempdir().unwrap();
        let result = FsReadTool::new(dir.path())
            .execute(serde_json::json!({"path": "nope.txt"}))
            .await
            .unwrap();
        assert!(!result.success);
        assert!(result.error.unwrap().contains("File not found"));
    }

    #[tokio::test]
    async fn read_outside_root_denied() {
        let dir = tempfile::tempdir().unwrap();
        let err = FsReadTool::new(dir.path())
            .execute(serde_json::json!({"path": "../../etc/passwd"}))
            .await
            .unwrap_err();
        assert!(matches!(err, ToolError::PermissionDenied { .. }));
    }

    #[tokio::test]
    async fn list_hides_dotfiles_by_default() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("b.rs"), "").unwrap();
        std::fs::write(dir.path().join(".hidden"), "").unwrap();
        std::fs::create_dir(dir.path().join("src")).unwrap();
        let tool = FsListTool::new(dir.path());

        let out = tool.execute(serde_json::json!({})).await.unwrap().output.unwrap();
        assert_eq!(out["count"], 2);
        assert_eq!(out["entries"][0]["name"], "b.rs");
        assert_eq!(out["entries"][1]["type"], "dir");

        let out = tool.execute(serde_json::json!({"all": true})).await.unwrap().output.unwrap();
        assert_eq!(out["count"], 3);
    }

    #[tokio::test]
    async fn write_creates_and_reports() {
        let dir = tempfile::tempdir().unwrap();
        let tool = FsWriteTool::new(dir.path());
        let result = tool
            .execute(serde_json::json!({"path": "src/new.rs", "content": "fn main() {}\n"}))
            .await
            .unwrap();
        assert!(result.success);
        assert_eq!(result.output.unwrap()["created"], true);
        assert_eq!(
            std::fs::read_to_string(dir.path().join("src/new.rs")).unwrap(),
            "fn main() {}\n"
        );
    }

    #[tokio::test]
    async fn write_missing_content_is_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = FsWriteTool::new(dir.path())
            .execute(serde_json::json!({"path": "x"}))
            .await
            .unwrap_err();
        assert!(matches!(err, ToolError::InvalidArguments(_)));
    }

    #[tokio::test]
    async fn edit_replaces_unique_match() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("lib.rs"), "let x = 1;\nlet y = 2;\n").unwrap();
        let tool = FsEditTool::new(dir.path());
        let result = tool
            .execute(serde_json::json!({"path": "lib.rs", "old_text": "x = 1", "new_text": "x = 10"}))
            .await
            .unwrap();
        assert!(result.success);
        assert_eq!(
            std::fs::read_to_string(dir.path().join("lib.rs")).unwrap(),
            "let x = 10;\nlet y = 2;\n"
        );
    }

    #[test]
    fn edit_rules() {
        assert!(apply_edit("a a", "a", "b", false).unwrap_err().contains("2 times"));
        assert_eq!(apply_edit("a a", "a", "b", true).unwrap(), ("b b".into(), 2));
        assert!(apply_edit("abc", "z", "y", false).is_err());
        assert!(apply_edit("abc", "", "y", false).is_err());
    }

    #[test]
    fn relative_display() {
        assert_eq!(
            display_relative(Path::new("/p"), Path::new("/p/src/a.rs")),
            "src/a.rs"
        );
        assert_eq!(display_relative(Path::new("/p"), Path::new("/q/a.rs")), "/q/a.rs");
    }
}
