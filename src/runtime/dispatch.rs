//! Tool dispatch
//!
//! Every requested tool use produces exactly one `ToolResult`. Lookup misses
//! and tool failures become error-flagged results for the model to react to;
//! the only hard failure is a closed event sink.

use crate::events::{EventSink, OutputEvent, SinkClosed};
use crate::llm::ContentBlock;
use crate::tools::{RegisteredTool, ToolRegistry};
use serde_json::Value;
use std::sync::Arc;
use std::time::Instant;

pub const TOOL_NOT_FOUND: &str = "tool not found";

pub struct ToolDispatcher {
    registry: Arc<ToolRegistry>,
    sink: EventSink,
}

impl ToolDispatcher {
    pub fn new(registry: Arc<ToolRegistry>, sink: EventSink) -> Self {
        Self { registry, sink }
    }

    /// Run the named tool and build the result block answering `tool_use_id`.
    pub async fn dispatch(
        &self,
        tool_use_id: &str,
        name: &str,
        input: Value,
    ) -> Result<ContentBlock, SinkClosed> {
        let tool = match self.registry.lookup(name) {
            Some(RegisteredTool::Local(tool)) => Arc::clone(tool),
            Some(RegisteredTool::Server(_)) => {
                tracing::warn!(tool = %name, "Model asked for a server tool to run locally");
                return Ok(ContentBlock::tool_result(
                    tool_use_id,
                    format!("{name} is executed by the model provider and cannot be run locally"),
                    true,
                ));
            }
            None => {
                tracing::warn!(tool = %name, "Unknown tool requested");
                return Ok(ContentBlock::tool_result(tool_use_id, TOOL_NOT_FOUND, true));
            }
        };

        self.sink
            .emit(OutputEvent::Content(format!("Using tool: {name}\n")))
            .await?;

        let start = Instant::now();
        let output = tool.run(input).await;
        tracing::info!(
            tool = %name,
            tool_use_id = %tool_use_id,
            success = output.success,
            duration_ms = %start.elapsed().as_millis(),
            "Tool executed"
        );

        Ok(ContentBlock::tool_result(
            tool_use_id,
            output.output,
            !output.success,
        ))
    }
}
