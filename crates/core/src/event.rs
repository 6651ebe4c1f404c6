//! Domain event system: decoupled observation of the agent.
//!
//! Events are published when something interesting happens in a turn or a
//! verification run. The CLI and tests subscribe without the loop knowing
//! who is listening.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::broadcast;

/// All domain events in the system.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum DomainEvent {
    /// A tool was executed
    ToolExecuted {
        tool_name: String,
        call_id: String,
        success: bool,
        duration_ms: u64,
        timestamp: DateTime<Utc>,
    },

    /// A tool call was not executed (user rejection or budget)
    ToolRejected {
        tool_name: String,
        call_id: String,
        reason: String,
        timestamp: DateTime<Utc>,
    },

    /// History was condensed to stay under the token budget
    ContextCompacted {
        messages_before: usize,
        messages_after: usize,
        timestamp: DateTime<Utc>,
    },

    /// A turn finished
    TurnCompleted {
        stop_reason: String,
        iterations: u32,
        tool_calls: u32,
        timestamp: DateTime<Utc>,
    },

    /// One verification cycle finished
    VerificationIteration {
        iteration: u32,
        success: bool,
        signature: Option<String>,
        timestamp: DateTime<Utc>,
    },

    /// An error occurred
    ErrorOccurred {
        context: String,
        error_message: String,
        timestamp: DateTime<Utc>,
    },
}

/// A broadcast-based event bus for domain events.
///
/// Uses `tokio::sync::broadcast` for multi-consumer pub/sub.
pub struct EventBus {
    sender: broadcast::Sender<Arc<DomainEvent>>,
}

impl EventBus {
    /// Create a new event bus with the given capacity.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Publish an event to all subscribers.
    pub fn publish(&self, event: DomainEvent) {
        // No subscribers is fine
        let _ = self.sender.send(Arc::new(event));
    }

    /// Subscribe to receive events.
    pub fn subscribe(&self) -> broadcast::Receiver<Arc<DomainEvent>> {
        self.sender.subscribe()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(256)
    }
}
