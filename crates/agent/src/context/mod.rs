//! Conversation context and the constraints that guard tool execution.
//!
//! | Piece | Role |
//! |-------|------|
//! | History | Ordered messages, compacted when over the token budget |
//! | Read-set | Files the agent has seen; gates modification of existing files |
//! | Counters | Tool calls and iterations for the active turn |
//! | Undo stack | Bounded LIFO of file changes |

pub mod store;
pub mod token;

pub use store::{ChangeAction, ContextStore, FileChange, FileContext, UndoError};
