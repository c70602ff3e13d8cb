//! Terminal presentation of output events

use crate::events::{EventReceiver, OutputEvent};
use std::io::{self, Write};

const ASSISTANT_COLOR: &str = "\x1b[93m";
const USER_COLOR: &str = "\x1b[94m";
const RESET: &str = "\x1b[0m";

/// Renders events to a writer, in the order received.
///
/// Raw fragments are ignored; their text already arrives as `Content`.
pub struct ConsoleRenderer<W: Write> {
    out: W,
}

impl ConsoleRenderer<io::Stdout> {
    pub fn stdout() -> Self {
        Self::new(io::stdout())
    }
}

impl<W: Write> ConsoleRenderer<W> {
    pub fn new(out: W) -> Self {
        Self { out }
    }

    pub fn render(&mut self, event: &OutputEvent) -> io::Result<()> {
        match event {
            OutputEvent::AssistantTurnBegin { label } => {
                write!(self.out, "{ASSISTANT_COLOR}{label}{RESET}")?;
            }
            OutputEvent::UserTurnBegin { label } => {
                write!(self.out, "{USER_COLOR}{label}{RESET}")?;
            }
            OutputEvent::Content(text) => self.out.write_all(text.as_bytes())?,
            OutputEvent::LineBreak => writeln!(self.out)?,
            OutputEvent::Raw(_) => return Ok(()),
        }
        self.out.flush()
    }

    /// Render until the sink is closed and drained. Returns the writer.
    pub async fn run(mut self, mut rx: EventReceiver) -> io::Result<W> {
        while let Some(event) = rx.recv().await {
            if let Err(e) = self.render(&event) {
                tracing::warn!(error = %e, "Console write failed");
                return Err(e);
            }
        }
        Ok(self.out)
    }
}
