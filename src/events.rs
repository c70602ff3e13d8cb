//! Output events and the bounded sink that carries them to presentation
//!
//! The runtime and its stream consumer produce events; one presentation task
//! consumes them in emission order. The queue is bounded, so a slow consumer
//! throttles fragment processing.

use crate::llm::StreamFragment;
use crate::signal::CloseOnce;
use std::sync::{Arc, Mutex, PoisonError};
use thiserror::Error;
use tokio::sync::mpsc;

pub const DEFAULT_CAPACITY: usize = 100;

/// Something the presentation layer should show
#[derive(Debug, Clone, PartialEq)]
pub enum OutputEvent {
    /// The model is about to speak
    AssistantTurnBegin { label: String },
    /// The operator is expected to type
    UserTurnBegin { label: String },
    /// Text to render as-is (streamed tokens, tool progress notes)
    Content(String),
    LineBreak,
    /// Every endpoint fragment, for consumers that want the full detail
    Raw(StreamFragment),
}

#[derive(Debug, Error, PartialEq, Eq)]
#[error("event sink is closed")]
pub struct SinkClosed;

/// Producer side of the event queue. Cheap to clone.
#[derive(Debug, Clone)]
pub struct EventSink {
    shared: Arc<SinkShared>,
}

#[derive(Debug)]
struct SinkShared {
    tx: Mutex<Option<mpsc::Sender<OutputEvent>>>,
    closed: CloseOnce,
}

/// Consumer side of the event queue
#[derive(Debug)]
pub struct EventReceiver {
    rx: mpsc::Receiver<OutputEvent>,
}

impl EventReceiver {
    /// Next event, or `None` once the sink is closed and drained
    pub async fn recv(&mut self) -> Option<OutputEvent> {
        self.rx.recv().await
    }
}

impl EventSink {
    pub fn channel(capacity: usize) -> (Self, EventReceiver) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        let sink = Self {
            shared: Arc::new(SinkShared {
                tx: Mutex::new(Some(tx)),
                closed: CloseOnce::new(),
            }),
        };
        (sink, EventReceiver { rx })
    }

    /// Deliver an event, waiting for queue space. An emit still waiting
    /// when the sink is closed fails instead of delivering.
    pub async fn emit(&self, event: OutputEvent) -> Result<(), SinkClosed> {
        let tx = self
            .shared
            .tx
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
            .ok_or(SinkClosed)?;

        let permit = tokio::select! {
            biased;
            () = self.shared.closed.closed() => return Err(SinkClosed),
            permit = tx.reserve() => permit.map_err(|_| SinkClosed)?,
        };
        if self.shared.closed.is_closed() {
            return Err(SinkClosed);
        }
        permit.send(event);
        Ok(())
    }

    /// Close the sink. Events already queued are still delivered; later
    /// emits fail. Returns `true` for the call that actually closed it.
    pub fn close(&self) -> bool {
        if !self.shared.closed.close() {
            return false;
        }
        self.shared
            .tx
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        tracing::debug!("Event sink closed");
        true
    }
}
