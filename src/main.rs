//! Research agent - a terminal conversation with Claude and local file tools
//!
//! The model streams its replies, may call tools to read, list and edit files
//! in the working directory, and keeps going until it stops asking for tools.

mod config;
mod console;
mod events;
mod llm;
mod runtime;
mod signal;
mod state_machine;
mod system_prompt;
mod tools;

use config::AgentConfig;
use console::ConsoleRenderer;
use events::EventSink;
use llm::{AnthropicService, LlmService, LoggingService};
use runtime::{ConversationRuntime, StdinInput};
use signal::Shutdown;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tools::ToolRegistry;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

fn init_logging(json: bool) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| "research_agent=warn".into());
    let registry = tracing_subscriber::registry().with(filter);

    // stdout belongs to the console renderer
    if json {
        registry
            .with(
                tracing_subscriber::fmt::layer()
                    .json()
                    .with_current_span(false)
                    .with_span_list(false)
                    .with_writer(std::io::stderr),
            )
            .init();
    } else {
        registry
            .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
            .init();
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let config = AgentConfig::from_env()?;
    init_logging(config.log_json);

    let session_id = uuid::Uuid::new_v4().to_string();
    tracing::info!(
        session_id = %session_id,
        model = %config.model,
        working_dir = %config.working_dir.display(),
        web_search = config.web_search,
        "Starting research agent"
    );

    let prompt =
        system_prompt::build_system_prompt(&config.working_dir, config.system_prompt.as_deref())?;
    let registry = Arc::new(ToolRegistry::standard(
        &config.working_dir,
        config.web_search,
    )?);
    tracing::debug!(tools = registry.definitions().len(), "Tool registry built");

    let anthropic = AnthropicService::new(
        config.api_key.clone(),
        config.model.clone(),
        config.base_url.as_deref(),
    )?;
    let service: Arc<dyn LlmService> = Arc::new(anthropic);
    let llm = LoggingService::new(service);

    let (sink, receiver) = EventSink::channel(config.event_buffer);
    let renderer = tokio::spawn(ConsoleRenderer::stdout().run(receiver));

    let shutdown = Shutdown::new();
    let ctrl_c = shutdown.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            ctrl_c.trigger();
        }
    });

    let mut runtime = ConversationRuntime::new(
        llm,
        registry,
        sink.clone(),
        shutdown.clone(),
        StdinInput::spawn()?,
        system_prompt::system_blocks(&prompt),
    )
    .with_session_id(session_id)
    .with_max_tokens(config.max_tokens);

    let result = runtime.run(CancellationToken::new()).await;
    tracing::debug!(
        state = %runtime.state(),
        messages = runtime.history().len(),
        "Conversation finished"
    );

    shutdown.trigger();
    sink.close();
    match renderer.await {
        Ok(Ok(_)) => {}
        Ok(Err(e)) => tracing::warn!(error = %e, "Console renderer stopped early"),
        Err(e) => tracing::warn!(error = %e, "Console renderer task failed"),
    }

    match result {
        Ok(()) => Ok(()),
        Err(e) if e.is_interruption() => {
            tracing::info!(error = %e, "Conversation interrupted");
            Ok(())
        }
        Err(e) => Err(e.into()),
    }
}
