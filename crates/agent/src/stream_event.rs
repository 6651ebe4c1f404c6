//! Agent-level streaming events.
//!
//! `AgentStreamEvent` wraps provider-level deltas and tool activity into
//! higher-level events the CLI renders live while a turn runs.

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

/// Where a turn sends its live events.
pub type EventSink = mpsc::UnboundedSender<AgentStreamEvent>;

/// Events emitted by the agent during a turn:
/// - `chunk`      : partial text from the model
/// - `tool_call`  : a tool is about to run
/// - `tool_result`: a tool finished, was rejected or was skipped
/// - `notice`     : a limit or constraint the user should see
/// - `done`       : the turn is over
/// - `error`      : the turn failed
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AgentStreamEvent {
    Chunk { content: String },

    ToolCall {
        id: String,
        name: String,
        input: serde_json::Value,
    },

    ToolResult {
        id: String,
        name: String,
        output: String,
        success: bool,
    },

    Notice { message: String },

    Done {
        stop_reason: String,
        iterations: u32,
        tool_calls_made: u32,
    },

    Error { message: String },
}

impl AgentStreamEvent {
    pub fn event_type(&self) -> &'static str {
        match self {
            Self::Chunk { .. } => "chunk",
            Self::ToolCall { .. } => "tool_call",
            Self::ToolResult { .. } => "tool_result",
            Self::Notice { .. } => "notice",
            Self::Done { .. } => "done",
            Self::Error { .. } => "error",
        }
    }
}

/// Send to an optional sink. A closed receiver is not an error.
pub(crate) fn emit(sink: Option<&EventSink>, event: AgentStreamEvent) {
    if let Some(sink) = sink {
        let _ = sink.send(event);
    }
}
