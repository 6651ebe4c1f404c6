//! Wiring shared by the interactive commands: config, provider, approval
//! prompt, live event printing and Ctrl-C handling.

use std::io::{IsTerminal, Write};
use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use hearth_agent::{AgentLoop, AgentSettings, AgentStreamEvent, ApprovalDecision, Approver, EventSink};
use hearth_config::AppConfig;
use hearth_core::error::{Error, Result};
use hearth_core::event::EventBus;
use hearth_core::tool::{RiskLevel, ToolCall};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

pub fn load_config() -> Result<AppConfig> {
    AppConfig::load().map_err(|e| Error::Config { message: e.to_string() })
}

/// Asks on the terminal before a risky tool runs. Without a terminal every
/// risky call is rejected.
pub struct StdinApprover;

#[async_trait]
impl Approver for StdinApprover {
    async fn decide(&self, call: &ToolCall, risk: RiskLevel) -> ApprovalDecision {
        if !std::io::stdin().is_terminal() {
            tracing::warn!(tool = %call.name, "No terminal to ask for approval, rejecting");
            return ApprovalDecision::Reject;
        }

        let args = serde_json::to_string(&call.arguments)
            .unwrap_or_else(|_| "<unserializable args>".to_string());
        let question = format!(
            "\n  [{risk}] {} {args}\n  Approve? [y]es / [N]o / [a]ll this turn: ",
            call.name
        );

        let answer = tokio::task::spawn_blocking(move || {
            let mut stderr = std::io::stderr();
            let _ = write!(stderr, "{question}");
            let _ = stderr.flush();
            let mut input = String::new();
            std::io::stdin().read_line(&mut input).map(|_| input)
        })
        .await;

        match answer {
            Ok(Ok(input)) => ApprovalDecision::from_answer(&input),
            _ => ApprovalDecision::Reject,
        }
    }
}

/// Build an agent for `root` from the loaded config.
pub fn build_agent(root: &Path, config: &AppConfig) -> Result<AgentLoop> {
    let provider = hearth_providers::build_from_config(config)?;
    let tools = Arc::new(hearth_tools::default_registry(root));
    let settings = AgentSettings::from_config(root, config);
    Ok(AgentLoop::new(
        provider,
        tools,
        Arc::new(StdinApprover),
        settings,
        Arc::new(EventBus::default()),
    ))
}

/// How an event shows up on the terminal.
pub fn render_event(event: &AgentStreamEvent) -> String {
    match event {
        AgentStreamEvent::Chunk { content } => content.clone(),
        AgentStreamEvent::ToolCall { name, input, .. } => format!("\n  → {name} {input}\n"),
        AgentStreamEvent::ToolResult { name, success, .. } => {
            let mark = if *success { "✓" } else { "✗" };
            format!("  {mark} {name}\n")
        }
        AgentStreamEvent::Notice { message } => format!("\n  {message}\n"),
        AgentStreamEvent::Error { message } => format!("\n  [Error] {message}\n"),
        AgentStreamEvent::Done { .. } => "\n".to_string(),
    }
}

/// Print agent events as they arrive. The task ends when every sender is gone.
pub fn spawn_printer() -> (EventSink, JoinHandle<()>) {
    let (tx, mut rx) = mpsc::unbounded_channel();
    let handle = tokio::spawn(async move {
        let mut stdout = std::io::stdout();
        while let Some(event) = rx.recv().await {
            let _ = write!(stdout, "{}", render_event(&event));
            let _ = stdout.flush();
        }
    });
    (tx, handle)
}

/// A token that Ctrl-C cancels, for the duration of one turn.
pub struct TurnGuard {
    pub cancel: CancellationToken,
    watcher: JoinHandle<()>,
}

impl TurnGuard {
    pub fn new() -> Self {
        let cancel = CancellationToken::new();
        let token = cancel.clone();
        let watcher = tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                token.cancel();
            }
        });
        Self { cancel, watcher }
    }
}

impl Drop for TurnGuard {
    fn drop(&mut self) {
        self.watcher.abort();
    }
}
