//! Streaming response fragments and their accumulation
//!
//! The endpoint delivers a response as a sequence of fragments: a block
//! opens, receives incremental deltas, closes, and a final message stop ends
//! the response. `MessageAccumulator` folds that sequence into one
//! `LlmResponse`, rejecting anything that arrives out of order.

use super::types::{ContentBlock, LlmResponse, Usage};
use super::LlmError;
use crate::signal::CloseOnce;
use futures::stream::BoxStream;
use futures::StreamExt;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use thiserror::Error;

// ============================================================================
// Wire fragments
// ============================================================================

/// One incremental piece of a streamed response
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StreamFragment {
    MessageStart {
        message: MessageStartInfo,
    },
    ContentBlockStart {
        index: usize,
        content_block: BlockStart,
    },
    ContentBlockDelta {
        index: usize,
        delta: BlockDelta,
    },
    ContentBlockStop {
        index: usize,
    },
    MessageDelta {
        delta: MessageDeltaInfo,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        usage: Option<UsageDelta>,
    },
    MessageStop,
    Ping,
}

impl StreamFragment {
    /// The incremental text carried by this fragment, if any
    pub fn text_delta(&self) -> Option<&str> {
        match self {
            StreamFragment::ContentBlockDelta {
                delta: BlockDelta::TextDelta { text },
                ..
            } => Some(text),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MessageStartInfo {
    #[serde(default)]
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub usage: Option<UsageDelta>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MessageDeltaInfo {
    #[serde(default)]
    pub stop_reason: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UsageDelta {
    #[serde(default)]
    pub input_tokens: Option<u64>,
    #[serde(default)]
    pub output_tokens: Option<u64>,
}

/// Header of a newly opened content block
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum BlockStart {
    Text {
        #[serde(default)]
        text: String,
    },
    ToolUse {
        id: String,
        name: String,
        #[serde(default)]
        input: Value,
    },
    ServerToolUse {
        id: String,
        name: String,
        #[serde(default)]
        input: Value,
    },
    WebSearchToolResult {
        tool_use_id: String,
        content: Value,
    },
    /// Block kinds we do not keep (e.g. thinking)
    #[serde(other)]
    Unsupported,
}

/// Incremental update to the open block
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum BlockDelta {
    TextDelta {
        text: String,
    },
    InputJsonDelta {
        partial_json: String,
    },
    #[serde(other)]
    Unsupported,
}

// ============================================================================
// Live stream resource
// ============================================================================

pub type FragmentStream = BoxStream<'static, Result<StreamFragment, LlmError>>;

/// Shared release switch for a live response stream.
///
/// Releasing is idempotent: only the first call returns `true`.
#[derive(Debug, Clone, Default)]
pub struct StreamHandle {
    latch: Arc<CloseOnce>,
}

impl StreamHandle {
    pub fn release(&self) -> bool {
        let first = self.latch.close();
        if first {
            tracing::debug!("Response stream released");
        }
        first
    }

    pub fn is_released(&self) -> bool {
        self.latch.is_closed()
    }

    pub async fn released(&self) {
        self.latch.closed().await;
    }
}

/// A live fragment sequence from the endpoint.
///
/// Once released (through `release` or any `StreamHandle` clone) the
/// underlying connection is dropped and `next` reports cancellation.
pub struct ResponseStream {
    fragments: Option<FragmentStream>,
    handle: StreamHandle,
}

impl ResponseStream {
    pub fn new(fragments: FragmentStream) -> Self {
        Self {
            fragments: Some(fragments),
            handle: StreamHandle::default(),
        }
    }

    pub fn handle(&self) -> StreamHandle {
        self.handle.clone()
    }

    /// Next fragment, `None` at end of stream.
    pub async fn next(&mut self) -> Option<Result<StreamFragment, LlmError>> {
        if self.handle.is_released() {
            self.fragments = None;
            return Some(Err(LlmError::cancelled("response stream released")));
        }
        let handle = self.handle.clone();
        let fragments = self.fragments.as_mut()?;
        let item = tokio::select! {
            biased;
            () = handle.released() => None,
            item = fragments.next() => Some(item),
        };
        match item {
            Some(item) => item,
            None => {
                self.fragments = None;
                Some(Err(LlmError::cancelled("response stream released")))
            }
        }
    }

    /// Release the stream and drop the connection.
    pub fn release(&mut self) -> bool {
        self.fragments = None;
        self.handle.release()
    }
}

// ============================================================================
// Accumulation
// ============================================================================

/// Stream protocol violations
#[derive(Debug, Error)]
pub enum AccumulateError {
    #[error("content block {index} started out of order (expected index {expected})")]
    UnexpectedBlockStart { index: usize, expected: usize },
    #[error("content block {index} is still open")]
    BlockStillOpen { index: usize },
    #[error("fragment for content block {index}, which is not open")]
    NoOpenBlock { index: usize },
    #[error("{delta} delta does not apply to content block {index}")]
    DeltaMismatch { index: usize, delta: &'static str },
    #[error("invalid tool input JSON in content block {index}: {source}")]
    InvalidToolInput {
        index: usize,
        source: serde_json::Error,
    },
    #[error("fragment received after message stop")]
    AfterMessageStop,
    #[error("stream ended before message stop")]
    Incomplete,
    #[error("response contained no content blocks")]
    EmptyResponse,
}

impl From<AccumulateError> for LlmError {
    fn from(err: AccumulateError) -> Self {
        LlmError::protocol(format!("error accumulating event: {err}"))
    }
}

#[derive(Debug)]
enum PartialBlock {
    Text(String),
    ToolUse {
        id: String,
        name: String,
        server: bool,
        initial: Value,
        json: String,
    },
    Done(ContentBlock),
    Skipped,
}

/// Folds stream fragments into a single response
#[derive(Debug, Default)]
pub struct MessageAccumulator {
    blocks: Vec<PartialBlock>,
    open: Option<usize>,
    stop_reason: Option<String>,
    usage: Usage,
    stopped: bool,
}

impl MessageAccumulator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn apply(&mut self, fragment: &StreamFragment) -> Result<(), AccumulateError> {
        if self.stopped {
            return Err(AccumulateError::AfterMessageStop);
        }

        match fragment {
            StreamFragment::MessageStart { message } => {
                if let Some(usage) = &message.usage {
                    self.record_usage(usage);
                }
            }
            StreamFragment::ContentBlockStart {
                index,
                content_block,
            } => self.start_block(*index, content_block)?,
            StreamFragment::ContentBlockDelta { index, delta } => {
                self.apply_delta(*index, delta)?;
            }
            StreamFragment::ContentBlockStop { index } => self.stop_block(*index)?,
            StreamFragment::MessageDelta { delta, usage } => {
                if delta.stop_reason.is_some() {
                    self.stop_reason.clone_from(&delta.stop_reason);
                }
                if let Some(usage) = usage {
                    self.record_usage(usage);
                }
            }
            StreamFragment::MessageStop => {
                if let Some(index) = self.open {
                    return Err(AccumulateError::BlockStillOpen { index });
                }
                self.stopped = true;
            }
            StreamFragment::Ping => {}
        }
        Ok(())
    }

    /// Complete the response. Requires a message stop and at least one block.
    pub fn finish(self) -> Result<LlmResponse, AccumulateError> {
        if !self.stopped {
            return Err(AccumulateError::Incomplete);
        }

        let content: Vec<ContentBlock> = self
            .blocks
            .into_iter()
            .filter_map(|block| match block {
                PartialBlock::Done(block) => Some(block),
                _ => None,
            })
            .collect();

        if content.is_empty() {
            return Err(AccumulateError::EmptyResponse);
        }

        Ok(LlmResponse {
            content,
            stop_reason: self.stop_reason,
            usage: self.usage,
        })
    }

    fn record_usage(&mut self, usage: &UsageDelta) {
        if let Some(input) = usage.input_tokens {
            self.usage.input_tokens = input;
        }
        if let Some(output) = usage.output_tokens {
            self.usage.output_tokens = output;
        }
    }

    fn start_block(&mut self, index: usize, start: &BlockStart) -> Result<(), AccumulateError> {
        if let Some(open) = self.open {
            return Err(AccumulateError::BlockStillOpen { index: open });
        }
        let expected = self.blocks.len();
        if index != expected {
            return Err(AccumulateError::UnexpectedBlockStart { index, expected });
        }

        let block = match start {
            BlockStart::Text { text } => PartialBlock::Text(text.clone()),
            BlockStart::ToolUse { id, name, input } => PartialBlock::ToolUse {
                id: id.clone(),
                name: name.clone(),
                server: false,
                initial: input.clone(),
                json: String::new(),
            },
            BlockStart::ServerToolUse { id, name, input } => PartialBlock::ToolUse {
                id: id.clone(),
                name: name.clone(),
                server: true,
                initial: input.clone(),
                json: String::new(),
            },
            BlockStart::WebSearchToolResult {
                tool_use_id,
                content,
            } => PartialBlock::Done(ContentBlock::WebSearchToolResult {
                tool_use_id: tool_use_id.clone(),
                content: content.clone(),
            }),
            BlockStart::Unsupported => {
                tracing::debug!(index, "Skipping unsupported content block");
                PartialBlock::Skipped
            }
        };

        self.blocks.push(block);
        self.open = Some(index);
        Ok(())
    }

    fn open_block(&mut self, index: usize) -> Result<&mut PartialBlock, AccumulateError> {
        if self.open != Some(index) {
            return Err(AccumulateError::NoOpenBlock { index });
        }
        self.blocks
            .get_mut(index)
            .ok_or(AccumulateError::NoOpenBlock { index })
    }

    fn apply_delta(&mut self, index: usize, delta: &BlockDelta) -> Result<(), AccumulateError> {
        let block = self.open_block(index)?;
        match (block, delta) {
            (PartialBlock::Text(text), BlockDelta::TextDelta { text: more }) => {
                text.push_str(more);
            }
            (PartialBlock::ToolUse { json, .. }, BlockDelta::InputJsonDelta { partial_json }) => {
                json.push_str(partial_json);
            }
            (PartialBlock::Skipped, _) | (_, BlockDelta::Unsupported) => {}
            (_, BlockDelta::TextDelta { .. }) => {
                return Err(AccumulateError::DeltaMismatch {
                    index,
                    delta: "text",
                });
            }
            (_, BlockDelta::InputJsonDelta { .. }) => {
                return Err(AccumulateError::DeltaMismatch {
                    index,
                    delta: "input_json",
                });
            }
        }
        Ok(())
    }

    fn stop_block(&mut self, index: usize) -> Result<(), AccumulateError> {
        let block = self.open_block(index)?;
        let finished = match std::mem::replace(block, PartialBlock::Skipped) {
            PartialBlock::Text(text) => PartialBlock::Done(ContentBlock::text(text)),
            PartialBlock::ToolUse {
                id,
                name,
                server,
                initial,
                json,
            } => {
                let input = parse_tool_input(index, initial, &json)?;
                if server {
                    PartialBlock::Done(ContentBlock::ServerToolUse { id, name, input })
                } else {
                    PartialBlock::Done(ContentBlock::tool_use(id, name, input))
                }
            }
            other => other,
        };
        *block = finished;
        self.open = None;
        Ok(())
    }
}

/// Tool input arrives as JSON text split across deltas. With no deltas the
/// input given at block start is used; an empty input is an empty object.
fn parse_tool_input(index: usize, initial: Value, json: &str) -> Result<Value, AccumulateError> {
    if json.trim().is_empty() {
        return Ok(match initial {
            Value::Null => Value::Object(serde_json::Map::new()),
            other => other,
        });
    }
    serde_json::from_str(json).map_err(|source| AccumulateError::InvalidToolInput { index, source })
}
