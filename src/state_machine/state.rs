//! Conversation states

use std::fmt;

/// A tool use the model requested and that still needs a result
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingTool {
    pub id: String,
    pub name: String,
}

impl PendingTool {
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
        }
    }
}

/// Where the conversation is
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum ConvState {
    /// An inference is due on the current history
    #[default]
    AwaitingModel,

    /// The last response requested tools; their results go back to the
    /// model before the operator is asked for anything
    ToolChaining { pending: Vec<PendingTool> },

    /// Waiting for the operator's next line
    AwaitingUser,

    /// Terminal
    Closed,
}

impl ConvState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, ConvState::Closed)
    }
}

impl fmt::Display for ConvState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConvState::AwaitingModel => write!(f, "awaiting_model"),
            ConvState::ToolChaining { pending } => {
                write!(f, "tool_chaining({} pending)", pending.len())
            }
            ConvState::AwaitingUser => write!(f, "awaiting_user"),
            ConvState::Closed => write!(f, "closed"),
        }
    }
}
