//! Shared test doubles: a scripted provider and a scripted approver.

use std::collections::VecDeque;
use std::sync::Mutex;

use hearth_core::error::ProviderError;
use hearth_core::provider::{ChunkStream, Provider, ProviderRequest, StreamChunk, ToolCallDelta};
use hearth_core::tool::{RiskLevel, ToolCall};
use tokio::sync::mpsc;

use crate::approval::{ApprovalDecision, Approver};

/// One scripted model response.
pub enum Script {
    Chunks(Vec<Result<StreamChunk, ProviderError>>),
    OpenError(ProviderError),
}

impl Script {
    /// A text-only response, delivered in two content chunks.
    pub fn text(text: &str) -> Self {
        let mid = text
            .char_indices()
            .map(|(i, _)| i)
            .nth(text.chars().count() / 2)
            .unwrap_or(text.len());
        Self::Chunks(vec![
            Ok(StreamChunk::text(&text[..mid])),
            Ok(StreamChunk::text(&text[mid..])),
            Ok(StreamChunk::done()),
        ])
    }

    /// A response that requests `calls`, each split over several deltas.
    /// Ids are `call_<index>` as sent by the backend.
    pub fn tool_calls(text: &str, calls: &[(&str, serde_json::Value)]) -> Self {
        let mut chunks = Vec::new();
        if !text.is_empty() {
            chunks.push(Ok(StreamChunk::text(text)));
        }
        for (i, (name, args)) in calls.iter().enumerate() {
            let index = i as u32;
            let args = args.to_string();
            let mut cut = args.len() / 2;
            while !args.is_char_boundary(cut) {
                cut -= 1;
            }
            let pieces = [
                ToolCallDelta {
                    index,
                    id: Some(format!("call_{index}")),
                    name: Some((*name).to_string()),
                    arguments: None,
                },
                ToolCallDelta {
                    index,
                    arguments: Some(args[..cut].to_string()),
                    ..ToolCallDelta::default()
                },
                ToolCallDelta {
                    index,
                    arguments: Some(args[cut..].to_string()),
                    ..ToolCallDelta::default()
                },
            ];
            for piece in pieces {
                chunks.push(Ok(StreamChunk {
                    tool_calls: vec![piece],
                    ..StreamChunk::default()
                }));
            }
        }
        chunks.push(Ok(StreamChunk::done()));
        Self::Chunks(chunks)
    }
}

/// A provider that plays back a queue of scripted responses.
///
/// Panics if more calls are made than scripts provided.
pub struct ScriptedProvider {
    scripts: Mutex<VecDeque<Script>>,
    requests: Mutex<Vec<ProviderRequest>>,
}

impl ScriptedProvider {
    pub fn new(scripts: Vec<Script>) -> Self {
        Self {
            scripts: Mutex::new(scripts.into()),
            requests: Mutex::new(Vec::new()),
        }
    }

    pub fn call_count(&self) -> usize {
        self.requests.lock().unwrap().len()
    }

    pub fn requests(&self) -> Vec<ProviderRequest> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait::async_trait]
impl Provider for ScriptedProvider {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn stream(&self, request: ProviderRequest) -> Result<ChunkStream, ProviderError> {
        let call = {
            let mut requests = self.requests.lock().unwrap();
            requests.push(request);
            requests.len()
        };
        let script = self
            .scripts
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| panic!("ScriptedProvider: no script for call #{call}"));

        match script {
            Script::OpenError(e) => Err(e),
            Script::Chunks(chunks) => {
                let (tx, rx) = mpsc::channel(chunks.len().max(1));
                for chunk in chunks {
                    tx.send(chunk).await.unwrap();
                }
                Ok(rx)
            }
        }
    }
}

/// An approver that answers from a queue, defaulting to `Reject`, and
/// records what it was asked.
pub struct ScriptedApprover {
    decisions: Mutex<VecDeque<ApprovalDecision>>,
    asked: Mutex<Vec<(String, RiskLevel)>>,
}

impl ScriptedApprover {
    pub fn new(decisions: Vec<ApprovalDecision>) -> Self {
        Self {
            decisions: Mutex::new(decisions.into()),
            asked: Mutex::new(Vec::new()),
        }
    }

    pub fn asked(&self) -> Vec<(String, RiskLevel)> {
        self.asked.lock().unwrap().clone()
    }
}

#[async_trait::async_trait]
impl Approver for ScriptedApprover {
    async fn decide(&self, call: &ToolCall, risk: RiskLevel) -> ApprovalDecision {
        self.asked.lock().unwrap().push((call.name.clone(), risk));
        self.decisions
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or(ApprovalDecision::Reject)
    }
}
