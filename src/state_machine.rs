//! Conversation state machine
//!
//! The runtime performs all I/O; this module only decides which state the
//! conversation is in next.

mod event;
mod state;
mod transition;

#[cfg(test)]
mod proptests;

pub use event::Event;
pub use state::{ConvState, PendingTool};
pub use transition::{transition, TransitionError};
