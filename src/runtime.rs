//! Conversation runtime
//!
//! One control task drives the conversation. Each inference spawns a single
//! consumer task for the response stream, raced against cancellation and
//! session shutdown.

mod dispatch;
mod executor;
mod inference;
pub mod traits;

#[cfg(test)]
pub mod testing;

pub use executor::ConversationRuntime;
pub use traits::StdinInput;

use crate::events::SinkClosed;
use crate::llm::LlmError;
use crate::state_machine::TransitionError;
use thiserror::Error;

/// Errors that end a conversation run
#[derive(Debug, Error)]
pub enum RuntimeError {
    #[error("inference failed: {0}")]
    Inference(#[from] LlmError),
    #[error(transparent)]
    Transition(#[from] TransitionError),
    #[error("reading input failed: {0}")]
    Input(#[from] std::io::Error),
    #[error(transparent)]
    SinkClosed(#[from] SinkClosed),
}

impl RuntimeError {
    /// Cancellation or shutdown rather than a real failure
    pub fn is_interruption(&self) -> bool {
        match self {
            RuntimeError::Inference(e) => e.kind.is_interruption(),
            RuntimeError::SinkClosed(_) => true,
            _ => false,
        }
    }
}
