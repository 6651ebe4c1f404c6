//! # Hearth Core
//!
//! Domain types, traits, and error definitions for the Hearth local-first
//! coding agent. This crate has **no framework dependencies**: it defines the
//! domain model that the provider, tool and agent crates implement against.
//!
//! ## Design Philosophy
//!
//! Every collaborator of the agent loop is a trait here. Implementations live
//! in their respective crates. This enables:
//! - Swapping model backends via configuration
//! - Testing the loop with scripted providers and fake tool registries
//! - Clean dependency graph (all crates depend inward on core)

pub mod error;
pub mod event;
pub mod message;
pub mod provider;
pub mod tool;

// Re-export key types at crate root for ergonomics
pub use error::{Error, ProviderError, Result, ToolError};
pub use event::{DomainEvent, EventBus};
pub use message::{Message, MessageToolCall, Role};
pub use provider::{Provider, ProviderRequest, StreamChunk, ToolCallDelta, ToolDefinition};
pub use tool::{FileAccess, RiskLevel, Tool, ToolCall, ToolRegistry, ToolResult};
