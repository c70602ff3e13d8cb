//! Pure state transition function

use super::{ConvState, Event, PendingTool};
use thiserror::Error;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TransitionError {
    #[error("conversation is closed")]
    Closed,
    #[error("tool results {got:?} do not answer pending tool uses {expected:?}")]
    ResultMismatch {
        expected: Vec<String>,
        got: Vec<String>,
    },
    #[error("invalid transition: {event} while {state}")]
    InvalidTransition { state: String, event: &'static str },
}

/// Compute the next state. Pure: no I/O, same input gives the same output.
pub fn transition(state: &ConvState, event: Event) -> Result<ConvState, TransitionError> {
    match (state, event) {
        // Shutdown is accepted from anywhere, including Closed
        (_, Event::Shutdown) => Ok(ConvState::Closed),
        (ConvState::Closed, _) => Err(TransitionError::Closed),

        (ConvState::AwaitingModel, Event::ModelResponded { tool_uses }) => {
            if tool_uses.is_empty() {
                Ok(ConvState::AwaitingUser)
            } else {
                Ok(ConvState::ToolChaining { pending: tool_uses })
            }
        }

        (ConvState::ToolChaining { pending }, Event::ToolsDispatched { results }) => {
            if answers_in_order(pending, &results) {
                Ok(ConvState::AwaitingModel)
            } else {
                Err(TransitionError::ResultMismatch {
                    expected: pending.iter().map(|p| p.id.clone()).collect(),
                    got: results,
                })
            }
        }

        (ConvState::AwaitingUser, Event::UserMessage) => Ok(ConvState::AwaitingModel),
        (ConvState::AwaitingUser, Event::EndOfInput) => Ok(ConvState::Closed),

        (state, event) => Err(TransitionError::InvalidTransition {
            state: state.to_string(),
            event: event.name(),
        }),
    }
}

fn answers_in_order(pending: &[PendingTool], results: &[String]) -> bool {
    pending.len() == results.len() && pending.iter().zip(results).all(|(p, id)| p.id == *id)
}
