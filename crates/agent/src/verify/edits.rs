//! Whole-file edits proposed by the model, and applying them safely.
//!
//! Two JSON shapes are accepted, either fenced in a code block or as the
//! outermost `{...}` of the reply:
//!
//! ```json
//! {"edits": [{"path": "src/lib.rs", "action": "modify", "content": "..."}]}
//! {"files": {"src/lib.rs": "...", "old.rs": null}}
//! ```

use std::path::Path;

use hearth_tools::workspace::{atomic_write, resolve_within};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EditAction {
    Create,
    Modify,
    Delete,
}

/// One file edit: full target content, never a diff.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FileEdit {
    pub path: String,
    pub action: EditAction,
    #[serde(default)]
    pub content: Option<String>,
}

/// Places the JSON document may sit in a model reply, most specific first:
/// a fenced block closed by a fence at the start of a line, then the
/// outermost `{...}`.
fn json_candidates(text: &str) -> Vec<&str> {
    let mut candidates = Vec::new();
    if let Some(start) = text.find("```") {
        let after = &text[start + 3..];
        // Skip the info string (`json`, `JSON`, nothing)
        let body_start = after.find('\n').map(|i| i + 1).unwrap_or(0);
        let body = &after[body_start..];
        if let Some(end) = body.find("\n```") {
            let block = body[..end].trim();
            if block.starts_with('{') {
                candidates.push(block);
            }
        }
    }
    if let (Some(open), Some(close)) = (text.find('{'), text.rfind('}'))
        && close > open
    {
        let braces = &text[open..=close];
        if !candidates.contains(&braces) {
            candidates.push(braces);
        }
    }
    candidates
}

/// Parse edits from a model reply. Anything unrecognizable yields no edits.
pub fn parse_edits(text: &str) -> Vec<FileEdit> {
    let candidates = json_candidates(text);
    if candidates.is_empty() {
        debug!("No JSON found in model reply");
        return Vec::new();
    }

    let mut parsed = None;
    for candidate in &candidates {
        match serde_json::from_str::<serde_json::Value>(candidate) {
            Ok(v) => {
                parsed = Some(v);
                break;
            }
            Err(e) => debug!(error = %e, "JSON candidate did not parse"),
        }
    }
    let Some(value) = parsed else {
        warn!(candidates = candidates.len(), "Model reply JSON did not parse");
        return Vec::new();
    };

    let mut edits = Vec::new();

    if let Some(list) = value.get("edits").and_then(|e| e.as_array()) {
        for item in list {
            let Some(path) = item.get("path").and_then(|p| p.as_str()).filter(|p| !p.is_empty()) else {
                warn!("Skipping edit without a path");
                continue;
            };
            let action = match item.get("action").and_then(|a| a.as_str()).unwrap_or("modify") {
                "create" => EditAction::Create,
                "modify" => EditAction::Modify,
                "delete" => EditAction::Delete,
                other => {
                    warn!(path, action = other, "Skipping edit with unknown action");
                    continue;
                }
            };
            edits.push(FileEdit {
                path: path.to_string(),
                action,
                content: item.get("content").and_then(|c| c.as_str()).map(String::from),
            });
        }
    }

    if let Some(files) = value.get("files").and_then(|f| f.as_object()) {
        for (path, content) in files {
            let edit = match content.as_str() {
                Some(text) => FileEdit {
                    path: path.clone(),
                    action: EditAction::Create,
                    content: Some(text.to_string()),
                },
                None => FileEdit {
                    path: path.clone(),
                    action: EditAction::Delete,
                    content: None,
                },
            };
            edits.push(edit);
        }
    }

    edits
}

/// Apply edits under `root`. Returns the paths that changed.
///
/// Writes go through a same-directory temp file and a rename, so a
/// verification command never sees a half-written file. A failing edit is
/// logged and skipped; the rest of the batch still applies.
pub fn apply_edits(edits: &[FileEdit], root: &Path) -> Vec<String> {
    let mut applied = Vec::new();

    for edit in edits {
        let path = match resolve_within(root, &edit.path, "verify") {
            Ok(p) => p,
            Err(e) => {
                warn!(path = %edit.path, error = %e, "Rejected edit");
                continue;
            }
        };

        let outcome = match edit.action {
            EditAction::Delete => {
                if !path.exists() {
                    continue;
                }
                std::fs::remove_file(&path)
            }
            EditAction::Create | EditAction::Modify => {
                let Some(content) = &edit.content else {
                    debug!(path = %edit.path, "Edit has no content, skipping");
                    continue;
                };
                atomic_write(&path, content)
            }
        };

        match outcome {
            Ok(()) => {
                debug!(path = %edit.path, action = ?edit.action, "Applied edit");
                applied.push(edit.path.clone());
            }
            Err(e) => warn!(path = %edit.path, error = %e, "Failed to apply edit"),
        }
    }

    applied
}
