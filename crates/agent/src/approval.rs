//! The approval seam between the agent loop and the human.
//!
//! The loop asks an [`Approver`] before running any non-SAFE tool. The CLI
//! supplies a stdin prompt; tests supply scripted answers.

use async_trait::async_trait;
use hearth_core::tool::{RiskLevel, ToolCall};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ApprovalDecision {
    Approve,
    Reject,
    /// Approve this call and every other risky call until the next user message
    ApproveAll,
}

impl ApprovalDecision {
    pub fn is_approved(self) -> bool {
        !matches!(self, Self::Reject)
    }

    /// Parse a prompt answer: `y`/`yes`, `a`/`all`, anything else rejects.
    pub fn from_answer(answer: &str) -> Self {
        match answer.trim().to_ascii_lowercase().as_str() {
            "y" | "yes" => Self::Approve,
            "a" | "all" => Self::ApproveAll,
            _ => Self::Reject,
        }
    }
}

#[async_trait]
pub trait Approver: Send + Sync {
    async fn decide(&self, call: &ToolCall, risk: RiskLevel) -> ApprovalDecision;
}

/// Approves everything. Used when approval is disabled.
pub struct AutoApprove;

#[async_trait]
impl Approver for AutoApprove {
    async fn decide(&self, _call: &ToolCall, _risk: RiskLevel) -> ApprovalDecision {
        ApprovalDecision::Approve
    }
}
