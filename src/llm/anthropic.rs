//! Anthropic Messages API provider (streaming)

use super::stream::{ResponseStream, StreamFragment};
use super::types::{ContentBlock, LlmMessage, LlmRequest, ToolDefinition};
use super::{LlmError, LlmService};
use async_trait::async_trait;
use eventsource_stream::Eventsource;
use futures::StreamExt;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::Duration;

pub const DEFAULT_BASE_URL: &str = "https://api.anthropic.com";
const API_VERSION: &str = "2023-06-01";
const DEFAULT_MAX_TOKENS: u32 = 1024;

/// SSE event types that carry a `StreamFragment` payload
const FRAGMENT_EVENTS: &[&str] = &[
    "message_start",
    "content_block_start",
    "content_block_delta",
    "content_block_stop",
    "message_delta",
    "message_stop",
    "ping",
];

/// Anthropic service implementation
pub struct AnthropicService {
    client: Client,
    api_key: String,
    model: String,
    messages_url: String,
}

impl AnthropicService {
    pub fn new(api_key: String, model: String, base_url: Option<&str>) -> Result<Self, LlmError> {
        let base = base_url.unwrap_or(DEFAULT_BASE_URL).trim_end_matches('/');
        let messages_url = format!("{base}/v1/messages");

        // No overall timeout: a stream stays open for as long as the model talks.
        let client = Client::builder()
            .connect_timeout(Duration::from_secs(30))
            .build()
            .map_err(|e| LlmError::unknown(format!("Failed to create HTTP client: {e}")))?;

        Ok(Self {
            client,
            api_key,
            model,
            messages_url,
        })
    }

    fn translate_request(&self, request: &LlmRequest) -> AnthropicRequest {
        let system: Vec<AnthropicSystemBlock> = request
            .system
            .iter()
            .map(|s| AnthropicSystemBlock {
                r#type: "text".to_string(),
                text: s.text.clone(),
                cache_control: if s.cache {
                    Some(CacheControl {
                        r#type: "ephemeral".to_string(),
                    })
                } else {
                    None
                },
            })
            .collect();

        let messages: Vec<AnthropicMessage> =
            request.messages.iter().map(translate_message).collect();

        let tools: Vec<AnthropicTool> = request.tools.iter().map(translate_tool).collect();

        AnthropicRequest {
            model: self.model.clone(),
            max_tokens: request.max_tokens.unwrap_or(DEFAULT_MAX_TOKENS),
            system,
            messages,
            tools: if tools.is_empty() { None } else { Some(tools) },
            stream: true,
        }
    }
}

fn translate_message(msg: &LlmMessage) -> AnthropicMessage {
    AnthropicMessage {
        role: msg.role.as_str().to_string(),
        content: msg.content.clone(),
    }
}

fn translate_tool(tool: &ToolDefinition) -> AnthropicTool {
    match tool {
        ToolDefinition::Function {
            name,
            description,
            input_schema,
        } => AnthropicTool::Custom {
            name: name.clone(),
            description: description.clone(),
            input_schema: input_schema.clone(),
        },
        ToolDefinition::Server {
            name,
            tool_type,
            max_uses,
        } => AnthropicTool::Server {
            r#type: tool_type.clone(),
            name: name.clone(),
            max_uses: *max_uses,
        },
    }
}

fn classify_error(status: reqwest::StatusCode, body: &str) -> LlmError {
    let message = serde_json::from_str::<AnthropicErrorEnvelope>(body)
        .map_or_else(|_| body.to_string(), |env| env.error.message);
    match status.as_u16() {
        401 | 403 => LlmError::auth(format!("Authentication failed: {message}")),
        429 => LlmError::rate_limit(format!("Rate limited: {message}")),
        400 => LlmError::invalid_request(format!("Invalid request: {message}")),
        500..=599 => LlmError::server_error(format!("Server error: {message}")),
        _ => LlmError::unknown(format!("HTTP {status}: {message}")),
    }
}

/// Decode one SSE event into a fragment.
///
/// Unknown event types are skipped; `error` events end the stream with an error.
pub fn parse_sse_event(event_type: &str, data: &str) -> Result<Option<StreamFragment>, LlmError> {
    if event_type == "error" {
        let message = serde_json::from_str::<AnthropicErrorEnvelope>(data).map_or_else(
            |_| data.to_string(),
            |env| format!("{}: {}", env.error.error_type, env.error.message),
        );
        return Err(LlmError::server_error(format!("stream error: {message}")));
    }

    if !FRAGMENT_EVENTS.contains(&event_type) {
        tracing::trace!(event = %event_type, "Ignoring unknown SSE event");
        return Ok(None);
    }

    serde_json::from_str::<StreamFragment>(data)
        .map(Some)
        .map_err(|e| LlmError::protocol(format!("Malformed {event_type} event: {e} - data: {data}")))
}

#[async_trait]
impl LlmService for AnthropicService {
    async fn open_stream(&self, request: &LlmRequest) -> Result<ResponseStream, LlmError> {
        let anthropic_request = self.translate_request(request);

        let response = self
            .client
            .post(&self.messages_url)
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", API_VERSION)
            .header("content-type", "application/json")
            .json(&anthropic_request)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    LlmError::network(format!("Request timeout: {e}"))
                } else if e.is_connect() {
                    LlmError::network(format!("Connection failed: {e}"))
                } else {
                    LlmError::unknown(format!("Request failed: {e}"))
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response
                .text()
                .await
                .map_err(|e| LlmError::network(format!("Failed to read response: {e}")))?;
            return Err(classify_error(status, &body));
        }

        let fragments = response
            .bytes_stream()
            .eventsource()
            .filter_map(|event| async move {
                match event {
                    Ok(event) => parse_sse_event(&event.event, &event.data).transpose(),
                    Err(e) => Some(Err(LlmError::network(format!("SSE error: {e}")))),
                }
            })
            .boxed();

        Ok(ResponseStream::new(fragments))
    }

    fn model_id(&self) -> &str {
        &self.model
    }
}

// Anthropic API types

#[derive(Debug, Serialize)]
struct AnthropicRequest {
    model: String,
    max_tokens: u32,
    system: Vec<AnthropicSystemBlock>,
    messages: Vec<AnthropicMessage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tools: Option<Vec<AnthropicTool>>,
    stream: bool,
}

#[derive(Debug, Serialize)]
struct AnthropicSystemBlock {
    r#type: String,
    text: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    cache_control: Option<CacheControl>,
}

#[derive(Debug, Serialize)]
struct CacheControl {
    r#type: String,
}

/// Our `ContentBlock` already matches the wire shape
#[derive(Debug, Serialize)]
struct AnthropicMessage {
    role: String,
    content: Vec<ContentBlock>,
}

#[derive(Debug, Serialize)]
#[serde(untagged)]
enum AnthropicTool {
    Custom {
        name: String,
        description: String,
        input_schema: Value,
    },
    Server {
        r#type: String,
        name: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        max_uses: Option<u32>,
    },
}

#[derive(Debug, Deserialize)]
struct AnthropicErrorEnvelope {
    error: AnthropicErrorDetails,
}

#[derive(Debug, Deserialize)]
struct AnthropicErrorDetails {
    #[serde(rename = "type")]
    error_type: String,
    message: String,
}
