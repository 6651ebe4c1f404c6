//! Tool trait: the abstraction over agent capabilities.
//!
//! Tools are what give the agent the ability to act on a project:
//! read and edit files, inspect git, run shell commands. The core only ever
//! looks at a tool's name, risk level, file-access kind and its
//! `(success, output | error)` result contract.

use std::collections::HashMap;
use std::panic::AssertUnwindSafe;

use async_trait::async_trait;
use futures::FutureExt;
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::ToolError;
use crate::provider::ToolDefinition;

/// How risky a tool is to run without asking the user.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum RiskLevel {
    /// Read-only, never prompts
    Safe,
    /// Mutates the project in a reversible way
    Moderate,
    /// Arbitrary side effects
    Dangerous,
}

impl RiskLevel {
    pub fn requires_approval(self) -> bool {
        !matches!(self, Self::Safe)
    }
}

impl std::fmt::Display for RiskLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Safe => write!(f, "SAFE"),
            Self::Moderate => write!(f, "MODERATE"),
            Self::Dangerous => write!(f, "DANGEROUS"),
        }
    }
}

/// What a tool does to the file named by its `path` argument.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FileAccess {
    None,
    Read,
    Modify,
}

/// A request to execute a tool.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCall {
    /// Unique call ID (matches the model's tool_call.id)
    pub id: String,

    /// Name of the tool to execute
    pub name: String,

    /// Arguments as a JSON value
    pub arguments: serde_json::Value,
}

impl ToolCall {
    /// The `path` argument, if the call has one.
    pub fn path_arg(&self) -> Option<&str> {
        self.arguments.get("path").and_then(|p| p.as_str())
    }
}

/// The result of a tool execution.
///
/// Failure is data: a failed result is serialized and fed back to the model
/// as a tool message, it never aborts the turn.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolResult {
    /// Whether the tool executed successfully
    pub success: bool,

    /// Structured output
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<serde_json::Value>,

    /// Error text when `success` is false
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,

    /// The call was never executed (rejected or over budget)
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub skipped: bool,
}

impl ToolResult {
    pub fn ok(output: serde_json::Value) -> Self {
        Self {
            success: true,
            output: Some(output),
            error: None,
            skipped: false,
        }
    }

    pub fn failure(error: impl Into<String>) -> Self {
        Self {
            success: false,
            output: None,
            error: Some(error.into()),
            skipped: false,
        }
    }

    /// A call that was not executed at all.
    pub fn rejected(error: impl Into<String>) -> Self {
        Self {
            skipped: true,
            ..Self::failure(error)
        }
    }

    /// JSON text used as the tool-role message content.
    pub fn to_message_content(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|e| {
            format!(r#"{{"success":false,"error":"unserializable tool result: {e}"}}"#)
        })
    }
}

/// The core Tool trait.
///
/// Each tool (fs.read, fs.write, git.status, shell.exec, ...) implements
/// this trait. Tools are registered in the ToolRegistry and handed to the
/// agent loop explicitly.
#[async_trait]
pub trait Tool: Send + Sync {
    /// The unique dotted name of this tool (e.g., "fs.write").
    fn name(&self) -> &str;

    /// A description of what this tool does (sent to the model).
    fn description(&self) -> &str;

    /// JSON Schema describing this tool's parameters.
    fn parameters_schema(&self) -> serde_json::Value;

    fn risk_level(&self) -> RiskLevel {
        RiskLevel::Safe
    }

    fn file_access(&self) -> FileAccess {
        FileAccess::None
    }

    /// Execute the tool with the given arguments.
    async fn execute(&self, arguments: serde_json::Value) -> Result<ToolResult, ToolError>;

    /// Convert this tool into a ToolDefinition for sending to the model.
    fn to_definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: self.name().to_string(),
            description: self.description().to_string(),
            parameters: self.parameters_schema(),
        }
    }
}

/// A registry of available tools.
///
/// The agent loop uses this to:
/// 1. Get tool definitions to send to the model
/// 2. Look up risk level and file access before running a call
/// 3. Dispatch calls, with every failure mode folded into a `ToolResult`
pub struct ToolRegistry {
    tools: HashMap<String, Box<dyn Tool>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self {
            tools: HashMap::new(),
        }
    }

    /// Register a tool. Replaces any existing tool with the same name.
    pub fn register(&mut self, tool: Box<dyn Tool>) {
        let name = tool.name().to_string();
        self.tools.insert(name, tool);
    }

    /// Get a tool by name.
    pub fn get(&self, name: &str) -> Option<&dyn Tool> {
        self.tools.get(name).map(|t| t.as_ref())
    }

    /// Get all tool definitions, sorted by name.
    pub fn definitions(&self) -> Vec<ToolDefinition> {
        let mut defs: Vec<ToolDefinition> = self.tools.values().map(|t| t.to_definition()).collect();
        defs.sort_by(|a, b| a.name.cmp(&b.name));
        defs
    }

    /// The first tool (by name) with the given file access kind.
    pub fn find_by_access(&self, access: FileAccess) -> Option<&dyn Tool> {
        let mut matching: Vec<&dyn Tool> = self
            .tools
            .values()
            .map(|t| t.as_ref())
            .filter(|t| t.file_access() == access)
            .collect();
        matching.sort_by(|a, b| a.name().cmp(b.name()));
        matching.into_iter().next()
    }

    /// Execute a tool call and fold every failure into a `ToolResult`.
    ///
    /// Unknown tools, `ToolError`s and panics inside the tool all come back
    /// as `success: false`.
    pub async fn dispatch(&self, call: &ToolCall) -> ToolResult {
        let Some(tool) = self.tools.get(&call.name) else {
            return ToolResult::failure(format!("Unknown tool: {}", call.name));
        };

        match AssertUnwindSafe(tool.execute(call.arguments.clone()))
            .catch_unwind()
            .await
        {
            Ok(Ok(result)) => result,
            Ok(Err(e)) => ToolResult::failure(e.to_string()),
            Err(_) => {
                warn!(tool = %call.name, call_id = %call.id, "Tool panicked during execution");
                ToolResult::failure("tool panicked")
            }
        }
    }

    /// List all registered tool names, sorted.
    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.tools.keys().map(|s| s.as_str()).collect();
        names.sort_unstable();
        names
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }
}

impl Default for ToolRegistry {
    fn default() -> Self {
        Self::new()
    }
}
