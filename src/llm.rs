//! LLM provider abstraction
//!
//! Providers open a live fragment stream; accumulation and cancellation are
//! handled by the runtime.

mod anthropic;
mod error;
pub mod stream;
mod types;

pub use anthropic::AnthropicService;
pub use error::*;
pub use stream::{MessageAccumulator, ResponseStream, StreamFragment};
pub use types::*;

use async_trait::async_trait;
use std::sync::Arc;

/// Common interface for streaming LLM providers
#[async_trait]
pub trait LlmService: Send + Sync {
    /// Open a streaming completion. Fails before any fragment is produced
    /// if the request cannot be started.
    async fn open_stream(&self, request: &LlmRequest) -> Result<ResponseStream, LlmError>;

    /// Get the model ID
    fn model_id(&self) -> &str;
}

#[async_trait]
impl<T: LlmService + ?Sized> LlmService for Arc<T> {
    async fn open_stream(&self, request: &LlmRequest) -> Result<ResponseStream, LlmError> {
        (**self).open_stream(request).await
    }

    fn model_id(&self) -> &str {
        (**self).model_id()
    }
}

/// Logging wrapper for LLM services
pub struct LoggingService {
    inner: Arc<dyn LlmService>,
    model_id: String,
}

impl LoggingService {
    pub fn new(inner: Arc<dyn LlmService>) -> Self {
        let model_id = inner.model_id().to_string();
        Self { inner, model_id }
    }
}

#[async_trait]
impl LlmService for LoggingService {
    async fn open_stream(&self, request: &LlmRequest) -> Result<ResponseStream, LlmError> {
        let start = std::time::Instant::now();
        let result = self.inner.open_stream(request).await;
        let duration = start.elapsed();

        match &result {
            Ok(_) => {
                tracing::info!(
                    model = %self.model_id,
                    duration_ms = %duration.as_millis(),
                    messages = request.messages.len(),
                    "LLM stream opened"
                );
            }
            Err(e) => {
                tracing::error!(
                    model = %self.model_id,
                    duration_ms = %duration.as_millis(),
                    error = %e.message,
                    retryable = e.kind.is_retryable(),
                    "LLM stream failed to open"
                );
            }
        }

        result
    }

    fn model_id(&self) -> &str {
        &self.model_id
    }
}
