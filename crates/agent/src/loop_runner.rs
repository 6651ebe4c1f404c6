//! The agent turn state machine.
//!
//! One turn: the user's message is appended, then the loop alternates
//! between asking the model (through the streaming adapter) and running the
//! tool calls it requested, until the model answers without tool calls, the
//! user cancels, or a budget runs out.
//!
//! ```text
//! IDLE → THINKING → EXECUTING_TOOLS → (AWAITING_APPROVAL) → THINKING → … → SUMMARIZING → IDLE
//! ```
//!
//! Tool calls in a batch run strictly in the order the model emitted them;
//! every call id gets exactly one tool-role answer in history, whether the
//! call ran, failed, was rejected or was skipped for budget.

use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use hearth_config::{AgentConfig, AppConfig};
use hearth_core::event::{DomainEvent, EventBus};
use hearth_core::message::{Message, MessageToolCall};
use hearth_core::provider::{Provider, ProviderRequest};
use hearth_core::tool::{FileAccess, RiskLevel, ToolCall, ToolRegistry, ToolResult};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::approval::{ApprovalDecision, Approver};
use crate::context::token::estimate_tools_tokens;
use crate::context::{ChangeAction, ContextStore, FileChange, UndoError};
use crate::stream_event::{AgentStreamEvent, EventSink, emit};
use crate::streaming::{RetryPolicy, StreamAdapter};

pub const DEFAULT_SYSTEM_PROMPT: &str = "You are Hearth, a local-first coding assistant working inside the user's project.

You can read and list files, write and edit files, inspect and commit with git, and run shell commands. Use the provided tools; do not describe a tool call in prose.

Rules:
1. Say briefly what you plan to do before you do it.
2. Read a file before you modify it. Edits to unread files are refused.
3. Paths are relative to the project root.
4. Keep answers short. Ask when the request is ambiguous.
5. If a tool call is rejected, adapt instead of retrying the same call.";

/// Where the active turn is.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TurnState {
    Idle,
    Thinking,
    ExecutingTools,
    AwaitingApproval,
    Summarizing,
}

#[derive(Debug, Clone, PartialEq)]
pub enum TurnStopReason {
    /// The model answered without tool calls
    Completed,
    /// The user cancelled
    Interrupted,
    IterationLimit,
    ToolCallLimit,
    Error(String),
}

impl TurnStopReason {
    pub fn as_str(&self) -> &str {
        match self {
            Self::Completed => "completed",
            Self::Interrupted => "interrupted",
            Self::IterationLimit => "iteration_limit",
            Self::ToolCallLimit => "tool_call_limit",
            Self::Error(_) => "error",
        }
    }

    /// A limit stop the user can resume with `continue_turn`.
    pub fn is_resumable(&self) -> bool {
        matches!(self, Self::IterationLimit | Self::ToolCallLimit)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct TurnOutcome {
    pub content: String,
    pub stop_reason: TurnStopReason,
    /// Model round-trips in this turn
    pub iterations: u32,
    pub tool_calls_executed: u32,
}

/// Everything the loop needs that is not a collaborator.
#[derive(Debug, Clone)]
pub struct AgentSettings {
    pub root: PathBuf,
    pub model: String,
    pub temperature: f32,
    pub system_prompt: String,
    pub agent: AgentConfig,
    pub retry: RetryPolicy,
}

impl AgentSettings {
    pub fn new(root: impl Into<PathBuf>, model: impl Into<String>) -> Self {
        Self {
            root: root.into(),
            model: model.into(),
            temperature: 0.2,
            system_prompt: DEFAULT_SYSTEM_PROMPT.to_string(),
            agent: AgentConfig::default(),
            retry: RetryPolicy::default(),
        }
    }

    pub fn from_config(root: impl Into<PathBuf>, config: &AppConfig) -> Self {
        Self {
            temperature: config.model.temperature,
            agent: config.agent.clone(),
            retry: RetryPolicy::from_config(&config.retry),
            ..Self::new(root, config.model.model.clone())
        }
    }

    pub fn with_agent_config(mut self, agent: AgentConfig) -> Self {
        self.agent = agent;
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_system_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.system_prompt = prompt.into();
        self
    }
}

/// The agent loop: owns the context store, borrows its collaborators.
pub struct AgentLoop {
    adapter: StreamAdapter,
    tools: Arc<ToolRegistry>,
    approver: Arc<dyn Approver>,
    settings: AgentSettings,
    event_bus: Arc<EventBus>,
    context: ContextStore,
    state: TurnState,
    /// "Approve all" answer, cleared by every new user message
    approve_all: bool,
}

impl AgentLoop {
    pub fn new(
        provider: Arc<dyn Provider>,
        tools: Arc<ToolRegistry>,
        approver: Arc<dyn Approver>,
        settings: AgentSettings,
        event_bus: Arc<EventBus>,
    ) -> Self {
        let mut context = ContextStore::new(&settings.root, &settings.agent);
        context.set_system_prompt(settings.system_prompt.clone());
        Self {
            adapter: StreamAdapter::new(provider, settings.retry.clone()),
            tools,
            approver,
            settings,
            event_bus,
            context,
            state: TurnState::Idle,
            approve_all: false,
        }
    }

    pub fn state(&self) -> TurnState {
        self.state
    }

    pub fn context(&self) -> &ContextStore {
        &self.context
    }

    pub fn history(&self) -> &[Message] {
        self.context.history()
    }

    pub fn tool_names(&self) -> Vec<String> {
        self.tools.names().into_iter().map(String::from).collect()
    }

    pub fn context_summary(&self) -> String {
        self.context.context_summary()
    }

    pub fn clear_context(&mut self) {
        self.context.clear();
        info!("Context cleared");
    }

    pub fn undo_last(&mut self) -> Result<FileChange, UndoError> {
        self.context.undo_last()
    }

    /// Run one turn for a new user message.
    pub async fn process(
        &mut self,
        user_input: &str,
        cancel: &CancellationToken,
        sink: Option<&EventSink>,
    ) -> TurnOutcome {
        info!(
            provider = self.adapter.provider_name(),
            messages = self.context.history().len(),
            "Processing user message"
        );
        self.approve_all = false;
        self.context.begin_turn();
        self.context.push(Message::user(user_input));
        self.run_turn(cancel, sink).await
    }

    /// Resume after a limit stop: fresh budgets, same history.
    pub async fn continue_turn(
        &mut self,
        cancel: &CancellationToken,
        sink: Option<&EventSink>,
    ) -> TurnOutcome {
        info!("Continuing turn");
        self.context.continue_turn();
        self.run_turn(cancel, sink).await
    }

    async fn run_turn(&mut self, cancel: &CancellationToken, sink: Option<&EventSink>) -> TurnOutcome {
        let tool_definitions = self.tools.definitions();
        self.context.set_reserved_tokens(estimate_tools_tokens(&tool_definitions));
        let max_iterations = self.settings.agent.max_iterations;
        let mut model_calls = 0u32;
        let mut executed = 0u32;

        let (content, stop_reason) = loop {
            let iteration = self.context.next_iteration();
            if iteration > max_iterations {
                warn!(max_iterations, "Iteration limit reached");
                let message = format!(
                    "Reached the limit of {max_iterations} iterations for this turn. Use /continue to keep going."
                );
                emit(sink, AgentStreamEvent::Notice { message: message.clone() });
                break (message, TurnStopReason::IterationLimit);
            }

            if self.context.needs_compaction() {
                self.state = TurnState::Summarizing;
                if let Some((before, after)) = self.context.compact() {
                    self.event_bus.publish(DomainEvent::ContextCompacted {
                        messages_before: before,
                        messages_after: after,
                        timestamp: Utc::now(),
                    });
                }
            }

            self.state = TurnState::Thinking;
            debug!(iteration, "Agent loop iteration");
            let request = ProviderRequest::new(
                self.settings.model.clone(),
                self.context.history().to_vec(),
            )
            .with_tools(tool_definitions.clone())
            .with_temperature(self.settings.temperature);

            let mut envelope = self.adapter.run(request, cancel, sink).await;
            model_calls += 1;

            if envelope.interrupted {
                if !envelope.content.is_empty() {
                    self.context.push(Message::assistant(envelope.content.clone()));
                }
                info!("Turn interrupted by user");
                break (envelope.content, TurnStopReason::Interrupted);
            }

            if let Some(error) = envelope.error {
                emit(sink, AgentStreamEvent::Error { message: error.clone() });
                self.event_bus.publish(DomainEvent::ErrorOccurred {
                    context: "model stream".into(),
                    error_message: error.clone(),
                    timestamp: Utc::now(),
                });
                break (envelope.content, TurnStopReason::Error(error));
            }

            let mut used_ids = history_call_ids(self.context.history());
            unique_call_ids(&mut envelope.tool_calls, &mut used_ids, iteration);

            let references: Vec<MessageToolCall> = envelope
                .tool_calls
                .iter()
                .map(|c| MessageToolCall {
                    id: c.id.clone(),
                    name: c.name.clone(),
                    arguments: c.arguments.to_string(),
                })
                .collect();
            self.context.push(Message::assistant_with_tool_calls(
                envelope.content.clone(),
                references,
            ));

            if envelope.tool_calls.is_empty() {
                break (envelope.content, TurnStopReason::Completed);
            }

            self.state = TurnState::ExecutingTools;
            debug!(count = envelope.tool_calls.len(), "Executing tool calls");

            let mut budget_exhausted = false;
            for call in &envelope.tool_calls {
                let result = if budget_exhausted || !self.context.try_consume_tool_call() {
                    budget_exhausted = true;
                    self.skip(call, "tool call budget exhausted")
                } else {
                    let result = self.execute_call(call, sink).await;
                    if !result.skipped {
                        executed += 1;
                    }
                    result
                };

                emit(
                    sink,
                    AgentStreamEvent::ToolResult {
                        id: call.id.clone(),
                        name: call.name.clone(),
                        output: result.to_message_content(),
                        success: result.success,
                    },
                );
                self.context
                    .push(Message::tool_result(&call.id, result.to_message_content()));
            }

            if budget_exhausted {
                let message = format!(
                    "Tool call limit reached ({}). Use /continue to keep going.",
                    self.context.max_tool_calls()
                );
                emit(sink, AgentStreamEvent::Notice { message: message.clone() });
                break (message, TurnStopReason::ToolCallLimit);
            }
        };

        self.state = TurnState::Idle;
        info!(
            stop_reason = stop_reason.as_str(),
            iterations = model_calls,
            tool_calls = executed,
            "Turn finished"
        );
        self.event_bus.publish(DomainEvent::TurnCompleted {
            stop_reason: stop_reason.as_str().to_string(),
            iterations: model_calls,
            tool_calls: executed,
            timestamp: Utc::now(),
        });
        emit(
            sink,
            AgentStreamEvent::Done {
                stop_reason: stop_reason.as_str().to_string(),
                iterations: model_calls,
                tool_calls_made: executed,
            },
        );

        TurnOutcome {
            content,
            stop_reason,
            iterations: model_calls,
            tool_calls_executed: executed,
        }
    }

    fn skip(&self, call: &ToolCall, reason: &str) -> ToolResult {
        debug!(tool = %call.name, call_id = %call.id, reason, "Tool call not executed");
        self.event_bus.publish(DomainEvent::ToolRejected {
            tool_name: call.name.clone(),
            call_id: call.id.clone(),
            reason: reason.to_string(),
            timestamp: Utc::now(),
        });
        ToolResult::rejected(reason)
    }

    /// Approval, the modify constraint, dispatch and read-set/undo
    /// bookkeeping for one call.
    async fn execute_call(&mut self, call: &ToolCall, sink: Option<&EventSink>) -> ToolResult {
        emit(
            sink,
            AgentStreamEvent::ToolCall {
                id: call.id.clone(),
                name: call.name.clone(),
                input: call.arguments.clone(),
            },
        );

        let (risk, access) = match self.tools.get(&call.name) {
            Some(tool) => (tool.risk_level(), tool.file_access()),
            None => (RiskLevel::Safe, FileAccess::None),
        };

        if risk.requires_approval() && self.settings.agent.require_approval && !self.approve_all {
            self.state = TurnState::AwaitingApproval;
            let decision = self.approver.decide(call, risk).await;
            self.state = TurnState::ExecutingTools;
            match decision {
                ApprovalDecision::Reject => return self.skip(call, "user rejected"),
                ApprovalDecision::ApproveAll => {
                    info!("Approving all risky calls for this turn");
                    self.approve_all = true;
                }
                ApprovalDecision::Approve => {}
            }
        }

        // Pre-image for undo, captured before the tool runs
        let mut pre_image: Option<(PathBuf, Option<String>)> = None;
        if access == FileAccess::Modify
            && let Some(path) = call.path_arg()
        {
            let (allowed, reason) = self.context.can_modify(path);
            if !allowed {
                if !self.settings.agent.auto_read_on_modify {
                    return ToolResult::failure(format!("Cannot modify: {reason}"));
                }
                if let Err(e) = self.auto_read(path).await {
                    return ToolResult::failure(format!(
                        "Cannot modify: {}. Auto-read failed: {e}",
                        reason.trim_end_matches('.')
                    ));
                }
            }
            let resolved = self.context.resolve(path);
            let old = match tokio::fs::read(&resolved).await {
                Ok(bytes) => Some(String::from_utf8_lossy(&bytes).into_owned()),
                Err(_) => None,
            };
            pre_image = Some((resolved, old));
        }

        let started = Instant::now();
        let result = self.tools.dispatch(call).await;
        let duration_ms = started.elapsed().as_millis() as u64;

        self.event_bus.publish(DomainEvent::ToolExecuted {
            tool_name: call.name.clone(),
            call_id: call.id.clone(),
            success: result.success,
            duration_ms,
            timestamp: Utc::now(),
        });
        if result.success {
            debug!(tool = %call.name, duration_ms, "Tool succeeded");
        } else {
            warn!(tool = %call.name, error = ?result.error, "Tool failed");
        }

        if result.success {
            match access {
                FileAccess::Read => {
                    if let (Some(path), Some(content)) = (call.path_arg(), output_content(&result)) {
                        match partial_total_lines(&result, &content) {
                            Some(total) => self.context.record_partial_read(path, content, total),
                            None => self.context.record_read(path, content),
                        }
                    }
                }
                FileAccess::Modify => {
                    if let Some((path, old)) = pre_image {
                        let new = match tokio::fs::read(&path).await {
                            Ok(bytes) => String::from_utf8_lossy(&bytes).into_owned(),
                            Err(_) => String::new(),
                        };
                        let action = if old.is_some() {
                            ChangeAction::Modified
                        } else {
                            ChangeAction::Created
                        };
                        self.context.record_change(path, old, new, action);
                    }
                }
                FileAccess::None => {}
            }
        }

        result
    }

    /// Read `path` through the registry's read tool and record it.
    async fn auto_read(&mut self, path: &str) -> Result<(), String> {
        let reader = self
            .tools
            .find_by_access(FileAccess::Read)
            .map(|t| t.name().to_string())
            .ok_or_else(|| "no read tool registered".to_string())?;
        debug!(path, tool = %reader, "Auto-reading before modify");

        let call = ToolCall {
            id: format!("auto_read_{path}"),
            name: reader,
            arguments: serde_json::json!({ "path": path }),
        };
        let result = self.tools.dispatch(&call).await;
        if !result.success {
            return Err(result.error.unwrap_or_else(|| "unknown error".into()));
        }
        let content = output_content(&result).unwrap_or_default();
        self.context.record_read(path, content);
        Ok(())
    }
}

fn output_content(result: &ToolResult) -> Option<String> {
    result
        .output
        .as_ref()
        .and_then(|o| o.get("content"))
        .and_then(|c| c.as_str())
        .map(String::from)
}

/// Ids of every tool call the history already answers or requests.
fn history_call_ids(history: &[Message]) -> HashSet<String> {
    history
        .iter()
        .flat_map(|m| m.tool_calls.iter().map(|c| c.id.clone()))
        .collect()
}

/// Rename calls whose id is already taken. Backends that omit ids get
/// `call_<index>` from the accumulator, which repeats every iteration.
fn unique_call_ids(calls: &mut [ToolCall], used: &mut HashSet<String>, iteration: u32) {
    for call in calls {
        if used.insert(call.id.clone()) {
            continue;
        }
        let base = format!("{}_{iteration}", call.id);
        let mut candidate = base.clone();
        let mut n = 1;
        while !used.insert(candidate.clone()) {
            candidate = format!("{base}_{n}");
            n += 1;
        }
        debug!(from = %call.id, to = %candidate, "Renamed duplicate tool call id");
        call.id = candidate;
    }
}

/// The file's line count when a read result shows fewer lines than the
/// file has.
fn partial_total_lines(result: &ToolResult, content: &str) -> Option<usize> {
    let total = result.output.as_ref()?.get("total_lines")?.as_u64()? as usize;
    (content.split_inclusive('\n').count() < total).then_some(total)
}
