//! Streaming tool-call adapter.
//!
//! Turns the raw delta stream of a [`Provider`] into a growing text buffer
//! (forwarded live to an optional sink) and a list of finished
//! [`ToolCall`]s. Tool calls arrive as fragments addressed by index; the
//! [`ToolCallAccumulator`] merges them append-only and parses the arguments
//! once the stream ends.
//!
//! The adapter polls a [`CancellationToken`] between chunk reads. On cancel
//! it stops at once, keeps the text seen so far and drops every tool call,
//! finished or not.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use hearth_config::RetryConfig;
use hearth_core::error::ProviderError;
use hearth_core::provider::{ChunkStream, Provider, ProviderRequest, ToolCallDelta, Usage};
use hearth_core::tool::ToolCall;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::stream_event::{AgentStreamEvent, EventSink, emit};

/// One tool call under construction.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PartialCall {
    pub id: Option<String>,
    pub name: String,
    pub arguments: String,
}

impl PartialCall {
    /// Append-only merge: name and arguments concatenate, the first
    /// non-empty id sticks.
    fn merge(&mut self, delta: &ToolCallDelta) {
        if self.id.is_none()
            && let Some(id) = delta.id.as_deref().filter(|id| !id.is_empty())
        {
            self.id = Some(id.to_string());
        }
        if let Some(name) = &delta.name {
            self.name.push_str(name);
        }
        if let Some(arguments) = &delta.arguments {
            self.arguments.push_str(arguments);
        }
    }
}

/// Index-addressed tool-call fragments.
#[derive(Debug, Default)]
pub struct ToolCallAccumulator {
    calls: BTreeMap<u32, PartialCall>,
}

impl ToolCallAccumulator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, delta: &ToolCallDelta) {
        self.calls.entry(delta.index).or_default().merge(delta);
    }

    pub fn len(&self) -> usize {
        self.calls.len()
    }

    pub fn is_empty(&self) -> bool {
        self.calls.is_empty()
    }

    pub fn get(&self, index: u32) -> Option<&PartialCall> {
        self.calls.get(&index)
    }

    /// Finalize in index order. Arguments that are empty, malformed or not a
    /// JSON object become `{}`; a missing id becomes `call_<index>`.
    pub fn finish(self) -> Vec<ToolCall> {
        self.calls
            .into_iter()
            .map(|(index, partial)| ToolCall {
                id: partial.id.unwrap_or_else(|| format!("call_{index}")),
                arguments: parse_arguments(&partial.name, &partial.arguments),
                name: partial.name,
            })
            .collect()
    }
}

fn parse_arguments(name: &str, raw: &str) -> serde_json::Value {
    let empty = || serde_json::Value::Object(serde_json::Map::new());
    if raw.trim().is_empty() {
        return empty();
    }
    match serde_json::from_str::<serde_json::Value>(raw) {
        Ok(value) if value.is_object() => value,
        Ok(_) => {
            warn!(tool = %name, "Tool arguments are not a JSON object, using {{}}");
            empty()
        }
        Err(e) => {
            warn!(tool = %name, error = %e, "Malformed tool arguments, using {{}}");
            empty()
        }
    }
}

/// Exponential back-off for opening a stream.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Total attempts, including the first
    pub max_attempts: u32,
    pub initial_delay: Duration,
    pub multiplier: f64,
}

impl RetryPolicy {
    pub fn from_config(config: &RetryConfig) -> Self {
        Self {
            max_attempts: config.max_attempts.max(1),
            initial_delay: config.initial_delay(),
            multiplier: config.multiplier,
        }
    }

    /// A single attempt, no retries.
    pub fn none() -> Self {
        Self {
            max_attempts: 1,
            ..Self::default()
        }
    }

    /// Delay before retry number `retry` (1-based).
    pub fn delay_for(&self, retry: u32) -> Duration {
        let factor = self.multiplier.max(1.0).powi(retry.saturating_sub(1) as i32);
        self.initial_delay.mul_f64(factor)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from_config(&RetryConfig::default())
    }
}

/// What one model response produced.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ResponseEnvelope {
    pub content: String,
    pub tool_calls: Vec<ToolCall>,
    /// The backend sent its end-of-response marker
    pub done: bool,
    pub error: Option<String>,
    pub interrupted: bool,
    pub usage: Option<Usage>,
}

impl ResponseEnvelope {
    fn failed(error: &ProviderError) -> Self {
        Self {
            error: Some(error.to_string()),
            ..Self::default()
        }
    }

    fn interrupted() -> Self {
        Self {
            interrupted: true,
            ..Self::default()
        }
    }
}

enum OpenFailure {
    Cancelled,
    Failed(ProviderError),
}

pub struct StreamAdapter {
    provider: Arc<dyn Provider>,
    retry: RetryPolicy,
}

impl StreamAdapter {
    pub fn new(provider: Arc<dyn Provider>, retry: RetryPolicy) -> Self {
        Self { provider, retry }
    }

    pub fn provider_name(&self) -> &str {
        self.provider.name()
    }

    /// Stream one model response to completion, cancellation or failure.
    pub async fn run(
        &self,
        request: ProviderRequest,
        cancel: &CancellationToken,
        sink: Option<&EventSink>,
    ) -> ResponseEnvelope {
        let mut rx = match self.open(&request, cancel).await {
            Ok(rx) => rx,
            Err(OpenFailure::Cancelled) => return ResponseEnvelope::interrupted(),
            Err(OpenFailure::Failed(e)) => {
                warn!(provider = self.provider.name(), error = %e, "Failed to open model stream");
                return ResponseEnvelope::failed(&e);
            }
        };

        let mut envelope = ResponseEnvelope::default();
        let mut calls = ToolCallAccumulator::new();

        loop {
            let next = tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    debug!(
                        chars = envelope.content.len(),
                        partial_calls = calls.len(),
                        "Stream cancelled, discarding tool calls"
                    );
                    envelope.interrupted = true;
                    return envelope;
                }
                next = rx.recv() => next,
            };

            match next {
                None => break,
                Some(Err(e)) => {
                    warn!(error = %e, "Model stream failed mid-response");
                    envelope.error = Some(e.to_string());
                    return envelope;
                }
                Some(Ok(chunk)) => {
                    if let Some(text) = chunk.content.filter(|t| !t.is_empty()) {
                        emit(sink, AgentStreamEvent::Chunk { content: text.clone() });
                        envelope.content.push_str(&text);
                    }
                    for delta in &chunk.tool_calls {
                        calls.push(delta);
                    }
                    if chunk.usage.is_some() {
                        envelope.usage = chunk.usage;
                    }
                    if chunk.done {
                        envelope.done = true;
                        break;
                    }
                }
            }
        }

        envelope.tool_calls = calls.finish();
        debug!(
            chars = envelope.content.len(),
            tool_calls = envelope.tool_calls.len(),
            "Model response complete"
        );
        envelope
    }

    /// Open the stream, retrying transient failures with back-off.
    async fn open(
        &self,
        request: &ProviderRequest,
        cancel: &CancellationToken,
    ) -> Result<ChunkStream, OpenFailure> {
        let mut attempt = 1;
        loop {
            let opened = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(OpenFailure::Cancelled),
                opened = self.provider.stream(request.clone()) => opened,
            };

            let error = match opened {
                Ok(rx) => return Ok(rx),
                Err(e) => e,
            };
            if !error.is_transient() || attempt >= self.retry.max_attempts {
                return Err(OpenFailure::Failed(error));
            }

            let delay = self.retry.delay_for(attempt);
            warn!(
                attempt,
                max_attempts = self.retry.max_attempts,
                delay_ms = delay.as_millis() as u64,
                error = %error,
                "Transient provider error, retrying"
            );
            tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(OpenFailure::Cancelled),
                _ = tokio::time::sleep(delay) => {}
            }
            attempt += 1;
        }
    }
}
