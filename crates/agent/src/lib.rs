//! The core of Hearth: a bounded, approval-gated tool-calling loop.
//!
//! A turn follows **Think → Act → Observe**:
//!
//! 1. **Route** the request through the [`intent`] router
//! 2. **Stream** a model response, assembling tool calls from deltas
//! 3. **Gate** each call: read-before-modify, per-turn budget, approval
//! 4. **Execute** approved calls and feed the results back
//! 5. **Repeat** until the model answers in text, the user cancels, or a
//!    budget runs out
//!
//! Code-writing work can additionally go through the [`verify`] loop, which
//! applies edits and runs build/test commands until they pass or stall.

pub mod approval;
pub mod context;
pub mod intent;
pub mod loop_runner;
pub mod stream_event;
pub mod streaming;
pub mod verify;

#[cfg(test)]
mod test_helpers;

pub use approval::{ApprovalDecision, Approver, AutoApprove};
pub use context::{ChangeAction, ContextStore, FileChange, FileContext, UndoError};
pub use intent::{Intent, IntentDecision, classify};
pub use loop_runner::{AgentLoop, AgentSettings, TurnOutcome, TurnState, TurnStopReason};
pub use stream_event::{AgentStreamEvent, EventSink};
pub use streaming::{ResponseEnvelope, RetryPolicy, StreamAdapter, ToolCallAccumulator};
pub use verify::{
    VerificationJob, VerificationResult, VerificationStatus, format_verification_result,
    verification_loop,
};
