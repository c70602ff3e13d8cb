//! Mock implementations for testing
//!
//! These mocks enable runtime tests without a network or a terminal.

use super::traits::InputSource;
use crate::events::{EventReceiver, OutputEvent};
use crate::llm::stream::{
    BlockDelta, BlockStart, MessageDeltaInfo, MessageStartInfo, StreamHandle, UsageDelta,
};
use crate::llm::{LlmError, LlmRequest, LlmService, ResponseStream, StreamFragment};
use crate::tools::{Tool, ToolOutput};
use async_trait::async_trait;
use futures::stream::{self, StreamExt};
use serde_json::{json, Value};
use std::collections::VecDeque;
use std::io;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

// ============================================================================
// Scripted responses
// ============================================================================

fn message_start() -> StreamFragment {
    StreamFragment::MessageStart {
        message: MessageStartInfo {
            id: "msg_test".to_string(),
            usage: Some(UsageDelta {
                input_tokens: Some(12),
                output_tokens: Some(1),
            }),
        },
    }
}

fn message_end(stop_reason: &str) -> [StreamFragment; 2] {
    [
        StreamFragment::MessageDelta {
            delta: MessageDeltaInfo {
                stop_reason: Some(stop_reason.to_string()),
            },
            usage: Some(UsageDelta {
                input_tokens: None,
                output_tokens: Some(7),
            }),
        },
        StreamFragment::MessageStop,
    ]
}

/// Fragments of a response holding one text block, streamed in two deltas
pub fn text_response(text: &str) -> Vec<StreamFragment> {
    let split = text
        .char_indices()
        .nth(text.chars().count() / 2)
        .map_or(text.len(), |(i, _)| i);
    let (head, tail) = text.split_at(split);

    let mut fragments = vec![
        message_start(),
        StreamFragment::ContentBlockStart {
            index: 0,
            content_block: BlockStart::Text {
                text: String::new(),
            },
        },
        StreamFragment::ContentBlockDelta {
            index: 0,
            delta: BlockDelta::TextDelta {
                text: head.to_string(),
            },
        },
        StreamFragment::ContentBlockDelta {
            index: 0,
            delta: BlockDelta::TextDelta {
                text: tail.to_string(),
            },
        },
        StreamFragment::ContentBlockStop { index: 0 },
    ];
    fragments.extend(message_end("end_turn"));
    fragments
}

/// Fragments of a response with a short text block followed by tool uses.
/// Each entry is `(id, name, input_json)`.
pub fn tool_uses_response(calls: &[(&str, &str, &str)]) -> Vec<StreamFragment> {
    let mut fragments = vec![
        message_start(),
        StreamFragment::ContentBlockStart {
            index: 0,
            content_block: BlockStart::Text {
                text: String::new(),
            },
        },
        StreamFragment::ContentBlockDelta {
            index: 0,
            delta: BlockDelta::TextDelta {
                text: "Let me check.".to_string(),
            },
        },
        StreamFragment::ContentBlockStop { index: 0 },
    ];

    for (i, (id, name, input)) in calls.iter().enumerate() {
        let index = i + 1;
        fragments.push(StreamFragment::ContentBlockStart {
            index,
            content_block: BlockStart::ToolUse {
                id: (*id).to_string(),
                name: (*name).to_string(),
                input: json!({}),
            },
        });
        // Split the JSON to exercise incremental accumulation
        let (head, tail) = input.split_at(input.len() / 2);
        for part in [head, tail] {
            fragments.push(StreamFragment::ContentBlockDelta {
                index,
                delta: BlockDelta::InputJsonDelta {
                    partial_json: part.to_string(),
                },
            });
        }
        fragments.push(StreamFragment::ContentBlockStop { index });
    }

    fragments.extend(message_end("tool_use"));
    fragments
}

pub fn tool_use_response(id: &str, name: &str, input_json: &str) -> Vec<StreamFragment> {
    tool_uses_response(&[(id, name, input_json)])
}

/// Collect every event until the sink is closed
pub async fn drain_events(rx: &mut EventReceiver) -> Vec<OutputEvent> {
    let mut events = Vec::new();
    while let Some(event) = rx.recv().await {
        events.push(event);
    }
    events
}

// ============================================================================
// Scripted LLM
// ============================================================================

enum Script {
    Fragments {
        items: Vec<Result<StreamFragment, LlmError>>,
        stall: bool,
    },
    OpenError(LlmError),
}

/// LLM service that replays queued fragment scripts
#[derive(Default)]
pub struct ScriptedLlm {
    scripts: Mutex<VecDeque<Script>>,
    requests: Mutex<Vec<LlmRequest>>,
    handles: Mutex<Vec<StreamHandle>>,
}

impl ScriptedLlm {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a stream that yields `fragments` and ends
    pub fn queue_stream(&self, fragments: Vec<StreamFragment>) {
        self.queue_fallible_stream(fragments.into_iter().map(Ok).collect());
    }

    pub fn queue_fallible_stream(&self, items: Vec<Result<StreamFragment, LlmError>>) {
        self.scripts.lock().unwrap().push_back(Script::Fragments {
            items,
            stall: false,
        });
    }

    /// Queue a stream that yields `fragments` and then never produces
    /// anything again
    pub fn queue_stream_then_stall(&self, fragments: Vec<StreamFragment>) {
        self.scripts.lock().unwrap().push_back(Script::Fragments {
            items: fragments.into_iter().map(Ok).collect(),
            stall: true,
        });
    }

    /// Queue a failure to open the stream
    pub fn queue_open_error(&self, error: LlmError) {
        self.scripts
            .lock()
            .unwrap()
            .push_back(Script::OpenError(error));
    }

    pub fn recorded_requests(&self) -> Vec<LlmRequest> {
        self.requests.lock().unwrap().clone()
    }

    /// Handles of every stream opened so far
    pub fn opened_handles(&self) -> Vec<StreamHandle> {
        self.handles.lock().unwrap().clone()
    }
}

#[async_trait]
impl LlmService for ScriptedLlm {
    async fn open_stream(&self, request: &LlmRequest) -> Result<ResponseStream, LlmError> {
        self.requests.lock().unwrap().push(request.clone());
        let script = self.scripts.lock().unwrap().pop_front();

        let stream = match script {
            Some(Script::Fragments { items, stall }) => {
                let fragments = stream::iter(items);
                if stall {
                    ResponseStream::new(fragments.chain(stream::pending()).boxed())
                } else {
                    ResponseStream::new(fragments.boxed())
                }
            }
            Some(Script::OpenError(error)) => return Err(error),
            None => return Err(LlmError::network("No scripted response queued")),
        };

        self.handles.lock().unwrap().push(stream.handle());
        Ok(stream)
    }

    fn model_id(&self) -> &str {
        "scripted-model"
    }
}

// ============================================================================
// Scripted input
// ============================================================================

/// Input source that replays queued lines, then reports end of input
#[derive(Clone, Default)]
pub struct ScriptedInput {
    lines: Arc<Mutex<VecDeque<String>>>,
    calls: Arc<AtomicUsize>,
}

impl ScriptedInput {
    pub fn new<I, S>(lines: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            lines: Arc::new(Mutex::new(lines.into_iter().map(Into::into).collect())),
            calls: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Number of times input was requested
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl InputSource for ScriptedInput {
    async fn next_message(&mut self) -> io::Result<Option<String>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.lines.lock().unwrap().pop_front())
    }
}

/// Input source that never answers
pub struct PendingInput;

#[async_trait]
impl InputSource for PendingInput {
    async fn next_message(&mut self) -> io::Result<Option<String>> {
        std::future::pending().await
    }
}

// ============================================================================
// Recording tool
// ============================================================================

/// Tool returning a fixed output and recording every input it receives
pub struct RecordingTool {
    name: String,
    output: ToolOutput,
    calls: Mutex<Vec<Value>>,
}

impl RecordingTool {
    pub fn new(name: impl Into<String>, output: ToolOutput) -> Self {
        Self {
            name: name.into(),
            output,
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn calls(&self) -> Vec<Value> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl Tool for RecordingTool {
    fn name(&self) -> &str {
        &self.name
    }

    fn description(&self) -> String {
        format!("Mock {}", self.name)
    }

    fn input_schema(&self) -> Value {
        json!({ "type": "object", "properties": {}, "additionalProperties": true })
    }

    async fn run(&self, input: Value) -> ToolOutput {
        self.calls.lock().unwrap().push(input);
        self.output.clone()
    }
}
