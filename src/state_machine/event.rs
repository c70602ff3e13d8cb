//! Events that drive the conversation state machine

use super::PendingTool;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    /// An inference completed; `tool_uses` lists its `tool_use` blocks in
    /// response order
    ModelResponded { tool_uses: Vec<PendingTool> },

    /// Results were produced, identified by the tool use ids they answer
    ToolsDispatched { results: Vec<String> },

    /// The operator entered a non-blank line
    UserMessage,

    /// The input source is exhausted
    EndOfInput,

    /// The session is shutting down
    Shutdown,
}

impl Event {
    pub fn name(&self) -> &'static str {
        match self {
            Event::ModelResponded { .. } => "model_responded",
            Event::ToolsDispatched { .. } => "tools_dispatched",
            Event::UserMessage => "user_message",
            Event::EndOfInput => "end_of_input",
            Event::Shutdown => "shutdown",
        }
    }
}
