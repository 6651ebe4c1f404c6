//! Built-in tool implementations for Hearth.
//!
//! Tools give the agent the ability to act on a project:
//! read, list, write and edit files, inspect and commit with git, and run
//! shell commands. Every tool is scoped to a project root.

pub mod fs;
pub mod git;
pub mod process;
pub mod shell;
pub mod workspace;

use std::path::Path;

use hearth_core::tool::ToolRegistry;

/// Create a registry with every built-in tool rooted at `root`.
pub fn default_registry(root: &Path) -> ToolRegistry {
    let mut registry = ToolRegistry::new();
    registry.register(Box::new(fs::FsReadTool::new(root)));
    registry.register(Box::new(fs::FsListTool::new(root)));
    registry.register(Box::new(fs::FsWriteTool::new(root)));
    registry.register(Box::new(fs::FsEditTool::new(root)));
    registry.register(Box::new(git::GitStatusTool::new(root)));
    registry.register(Box::new(git::GitDiffTool::new(root)));
    registry.register(Box::new(git::GitLogTool::new(root)));
    registry.register(Box::new(git::GitAddTool::new(root)));
    registry.register(Box::new(git::GitCommitTool::new(root)));
    registry.register(Box::new(shell::ShellTool::new(root)));
    registry
}

#[cfg(test)]
mod tests {
    use super::*;
    use hearth_core::tool::{FileAccess, RiskLevel};

    #[test]
    fn default_registry_contents() {
        let registry = default_registry(Path::new("."));
        assert_eq!(
            registry.names(),
            vec![
                "fs.edit", "fs.list", "fs.read", "fs.write", "git.add", "git.commit",
                "git.diff", "git.log", "git.status", "shell.exec",
            ]
        );
        assert_eq!(
            registry.find_by_access(FileAccess::Read).map(|t| t.name()),
            Some("fs.read")
        );
        assert_eq!(
            registry.get("shell.exec").map(|t| t.risk_level()),
            Some(RiskLevel::Dangerous)
        );
    }
}
