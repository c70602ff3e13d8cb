//! Conversation runtime executor

use super::dispatch::ToolDispatcher;
use super::inference::run_inference;
use super::traits::InputSource;
use super::RuntimeError;
use crate::events::{EventSink, OutputEvent};
use crate::llm::{ContentBlock, LlmMessage, LlmRequest, LlmService, SystemContent};
use crate::signal::Shutdown;
use crate::state_machine::{transition, ConvState, Event, PendingTool};
use crate::tools::ToolRegistry;
use serde_json::Value;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

pub const ASSISTANT_LABEL: &str = "Claude: ";
pub const USER_LABEL: &str = "You: ";

/// Synthetic first user message so the model speaks first
const OPENING_MESSAGE: &str = "Start the conversation";

/// Drives one conversation from the opening turn until input ends or the
/// session shuts down.
pub struct ConversationRuntime<L, I>
where
    L: LlmService,
    I: InputSource,
{
    session_id: String,
    state: ConvState,
    history: Vec<LlmMessage>,
    llm: L,
    registry: Arc<ToolRegistry>,
    dispatcher: ToolDispatcher,
    sink: EventSink,
    shutdown: Shutdown,
    input: I,
    system: Vec<SystemContent>,
    max_tokens: Option<u32>,
}

impl<L, I> ConversationRuntime<L, I>
where
    L: LlmService,
    I: InputSource,
{
    pub fn new(
        llm: L,
        registry: Arc<ToolRegistry>,
        sink: EventSink,
        shutdown: Shutdown,
        input: I,
        system: Vec<SystemContent>,
    ) -> Self {
        Self {
            session_id: uuid::Uuid::new_v4().to_string(),
            state: ConvState::AwaitingModel,
            history: vec![LlmMessage::user_text(OPENING_MESSAGE)],
            llm,
            dispatcher: ToolDispatcher::new(Arc::clone(&registry), sink.clone()),
            registry,
            sink,
            shutdown,
            input,
            system,
            max_tokens: None,
        }
    }

    pub fn with_session_id(mut self, session_id: impl Into<String>) -> Self {
        self.session_id = session_id.into();
        self
    }

    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = Some(max_tokens);
        self
    }

    pub fn history(&self) -> &[LlmMessage] {
        &self.history
    }

    pub fn state(&self) -> &ConvState {
        &self.state
    }

    /// Run until the conversation closes.
    ///
    /// `cancel` interrupts an in-flight inference (which then fails the run
    /// with a cancellation error) or ends the wait for input.
    pub async fn run(&mut self, cancel: CancellationToken) -> Result<(), RuntimeError> {
        tracing::info!(session_id = %self.session_id, model = %self.llm.model_id(), "Starting conversation");

        let result = self.drive(&cancel).await;
        if result.is_err() {
            self.state = ConvState::Closed;
        }

        match &result {
            Ok(()) => tracing::info!(
                session_id = %self.session_id,
                messages = self.history.len(),
                "Conversation closed"
            ),
            Err(e) if e.is_interruption() => tracing::info!(
                session_id = %self.session_id,
                error = %e,
                "Conversation interrupted"
            ),
            Err(e) => tracing::error!(
                session_id = %self.session_id,
                error = %e,
                "Conversation failed"
            ),
        }
        result
    }

    async fn drive(&mut self, cancel: &CancellationToken) -> Result<(), RuntimeError> {
        loop {
            if self.shutdown.is_triggered() && !self.state.is_terminal() {
                self.apply(Event::Shutdown)?;
            }

            match &self.state {
                ConvState::Closed => return Ok(()),
                ConvState::AwaitingModel => self.request_model(cancel).await?,
                ConvState::ToolChaining { pending } => {
                    let pending = pending.clone();
                    self.dispatch_tools(pending).await?;
                }
                ConvState::AwaitingUser => self.await_user(cancel).await?,
            }
        }
    }

    fn apply(&mut self, event: Event) -> Result<(), RuntimeError> {
        let event_name = event.name();
        let next = transition(&self.state, event)?;
        tracing::debug!(
            session_id = %self.session_id,
            from = %self.state,
            to = %next,
            event = event_name,
            "State transition"
        );
        self.state = next;
        Ok(())
    }

    async fn request_model(&mut self, cancel: &CancellationToken) -> Result<(), RuntimeError> {
        self.sink
            .emit(OutputEvent::AssistantTurnBegin {
                label: ASSISTANT_LABEL.to_string(),
            })
            .await?;

        let request = LlmRequest {
            system: self.system.clone(),
            messages: self.history.clone(),
            tools: self.registry.definitions(),
            max_tokens: self.max_tokens,
        };

        let response =
            run_inference(&self.llm, &request, &self.sink, cancel, &self.shutdown).await?;
        self.sink.emit(OutputEvent::LineBreak).await?;

        let tool_uses: Vec<PendingTool> = response
            .tool_uses()
            .into_iter()
            .map(|(id, name, _)| PendingTool::new(id, name))
            .collect();
        tracing::debug!(
            session_id = %self.session_id,
            tool_uses = tool_uses.len(),
            stop_reason = ?response.stop_reason,
            "Model responded"
        );

        self.apply(Event::ModelResponded { tool_uses })?;
        self.history.push(response.into_message());
        Ok(())
    }

    async fn dispatch_tools(&mut self, pending: Vec<PendingTool>) -> Result<(), RuntimeError> {
        let inputs = self.pending_inputs();

        let mut results = Vec::with_capacity(pending.len());
        for tool in &pending {
            let input = inputs
                .iter()
                .find(|(id, _)| *id == tool.id)
                .map_or(Value::Null, |(_, input)| input.clone());
            results.push(self.dispatcher.dispatch(&tool.id, &tool.name, input).await?);
        }

        let answered = pending.iter().map(|p| p.id.clone()).collect();
        self.apply(Event::ToolsDispatched { results: answered })?;
        self.history.push(LlmMessage::tool_results(results));
        Ok(())
    }

    /// Inputs of the tool uses in the latest assistant message
    fn pending_inputs(&self) -> Vec<(String, Value)> {
        self.history
            .last()
            .map(|message| {
                message
                    .content
                    .iter()
                    .filter_map(|block| match block {
                        ContentBlock::ToolUse { id, input, .. } => {
                            Some((id.clone(), input.clone()))
                        }
                        _ => None,
                    })
                    .collect()
            })
            .unwrap_or_default()
    }

    async fn await_user(&mut self, cancel: &CancellationToken) -> Result<(), RuntimeError> {
        loop {
            self.sink
                .emit(OutputEvent::UserTurnBegin {
                    label: USER_LABEL.to_string(),
                })
                .await?;

            let line = tokio::select! {
                biased;
                () = self.shutdown.wait() => None,
                () = cancel.cancelled() => None,
                line = self.input.next_message() => Some(line?),
            };

            let Some(line) = line else {
                tracing::info!(session_id = %self.session_id, "Input wait interrupted");
                return self.apply(Event::Shutdown);
            };
            let Some(line) = line else {
                return self.apply(Event::EndOfInput);
            };
            if line.trim().is_empty() {
                continue;
            }

            self.apply(Event::UserMessage)?;
            self.history.push(LlmMessage::user_text(line));
            return Ok(());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::EventReceiver;
    use crate::llm::{LlmError, LlmErrorKind, MessageRole};
    use crate::runtime::testing::{
        drain_events, text_response, tool_use_response, tool_uses_response, PendingInput,
        RecordingTool, ScriptedInput, ScriptedLlm,
    };
    use crate::tools::{ServerTool, Tool, ToolOutput};
    use serde_json::json;
    use std::time::Duration;

    struct Harness {
        llm: Arc<ScriptedLlm>,
        tool: Arc<RecordingTool>,
        sink: EventSink,
        rx: EventReceiver,
        shutdown: Shutdown,
    }

    impl Harness {
        fn new() -> Self {
            let (sink, rx) = EventSink::channel(256);
            Self {
                llm: Arc::new(ScriptedLlm::new()),
                tool: Arc::new(RecordingTool::new("read_file", ToolOutput::success("contents"))),
                sink,
                rx,
                shutdown: Shutdown::new(),
            }
        }

        fn runtime<I: InputSource>(&self, input: I) -> ConversationRuntime<Arc<ScriptedLlm>, I> {
            let local: Vec<Arc<dyn Tool>> = vec![self.tool.clone()];
            let registry = ToolRegistry::new(local, vec![ServerTool::web_search()]).unwrap();
            ConversationRuntime::new(
                Arc::clone(&self.llm),
                Arc::new(registry),
                self.sink.clone(),
                self.shutdown.clone(),
                input,
                vec![SystemContent::cached("be helpful")],
            )
            .with_session_id("test-session")
            .with_max_tokens(256)
        }

        async fn events(mut self) -> Vec<OutputEvent> {
            self.sink.close();
            drain_events(&mut self.rx).await
        }
    }

    fn without_raw(events: Vec<OutputEvent>) -> Vec<OutputEvent> {
        events
            .into_iter()
            .filter(|e| !matches!(e, OutputEvent::Raw(_)))
            .collect()
    }

    fn assistant() -> OutputEvent {
        OutputEvent::AssistantTurnBegin {
            label: ASSISTANT_LABEL.into(),
        }
    }

    fn user() -> OutputEvent {
        OutputEvent::UserTurnBegin {
            label: USER_LABEL.into(),
        }
    }

    #[tokio::test]
    async fn test_text_reply_then_end_of_input_closes() {
        let h = Harness::new();
        h.llm.queue_stream(text_response("Hi!"));
        let input = ScriptedInput::new(Vec::<String>::new());
        let mut rt = h.runtime(input.clone());

        rt.run(CancellationToken::new()).await.unwrap();
        assert_eq!(rt.state(), &ConvState::Closed);
        assert_eq!(input.calls(), 1);

        let history = rt.history();
        assert_eq!(history.len(), 2);
        assert_eq!(history[0], LlmMessage::user_text("Start the conversation"));
        assert_eq!(history[1].role, MessageRole::Assistant);
        assert_eq!(history[1].content, vec![ContentBlock::text("Hi!")]);

        let events = without_raw(h.events().await);
        assert_eq!(
            events,
            vec![
                assistant(),
                OutputEvent::Content("H".into()),
                OutputEvent::Content("i!".into()),
                OutputEvent::LineBreak,
                user(),
            ]
        );
    }

    #[tokio::test]
    async fn test_request_carries_catalog_and_settings() {
        let h = Harness::new();
        h.llm.queue_stream(text_response("Hi"));
        let mut rt = h.runtime(ScriptedInput::new(Vec::<String>::new()));
        rt.run(CancellationToken::new()).await.unwrap();

        let requests = h.llm.recorded_requests();
        assert_eq!(requests.len(), 1);
        let names: Vec<_> = requests[0].tools.iter().map(|t| t.name()).collect();
        assert_eq!(names, vec!["read_file", "web_search"]);
        assert_eq!(requests[0].max_tokens, Some(256));
        assert_eq!(requests[0].system[0].text, "be helpful");
    }

    #[tokio::test]
    async fn test_tool_chaining_skips_user_input() {
        let h = Harness::new();
        h.llm
            .queue_stream(tool_use_response("toolu_1", "read_file", r#"{"path":"notes.md"}"#));
        h.llm.queue_stream(text_response("Read it."));
        let input = ScriptedInput::new(Vec::<String>::new());
        let mut rt = h.runtime(input.clone());

        rt.run(CancellationToken::new()).await.unwrap();

        // Only the final text reply asks for input
        assert_eq!(input.calls(), 1);
        assert_eq!(h.tool.calls(), vec![json!({"path": "notes.md"})]);

        let history = rt.history();
        assert_eq!(history.len(), 4);
        assert!(matches!(
            &history[1].content[1],
            ContentBlock::ToolUse { id, .. } if id == "toolu_1"
        ));
        assert_eq!(
            history[2],
            LlmMessage::tool_results(vec![ContentBlock::tool_result(
                "toolu_1", "contents", false
            )])
        );

        // The second inference saw the tool result
        let requests = h.llm.recorded_requests();
        assert_eq!(requests.len(), 2);
        assert_eq!(requests[1].messages.len(), 3);
        assert_eq!(requests[1].messages[2], history[2]);
    }

    #[tokio::test]
    async fn test_every_tool_use_answered_in_order() {
        let h = Harness::new();
        h.llm.queue_stream(tool_uses_response(&[
            ("toolu_a", "read_file", r#"{"path":"a"}"#),
            ("toolu_b", "missing_tool", "{}"),
            ("toolu_c", "read_file", r#"{"path":"c"}"#),
        ]));
        h.llm.queue_stream(text_response("Done"));
        let mut rt = h.runtime(ScriptedInput::new(Vec::<String>::new()));

        rt.run(CancellationToken::new()).await.unwrap();

        let ContentBlock::ToolResult { .. } = &rt.history()[2].content[0] else {
            panic!("expected tool results");
        };
        let results: Vec<_> = rt.history()[2]
            .content
            .iter()
            .map(|b| match b {
                ContentBlock::ToolResult {
                    tool_use_id,
                    is_error,
                    ..
                } => (tool_use_id.as_str(), *is_error),
                other => panic!("unexpected block {other:?}"),
            })
            .collect();
        assert_eq!(
            results,
            vec![("toolu_a", false), ("toolu_b", true), ("toolu_c", false)]
        );
        assert_eq!(h.tool.calls().len(), 2);
    }

    #[tokio::test]
    async fn test_unknown_tool_does_not_abort() {
        let h = Harness::new();
        h.llm.queue_stream(tool_use_response("toolu_x", "nope", "{}"));
        h.llm.queue_stream(text_response("Sorry"));
        let mut rt = h.runtime(ScriptedInput::new(Vec::<String>::new()));

        rt.run(CancellationToken::new()).await.unwrap();
        assert_eq!(
            rt.history()[2].content,
            vec![ContentBlock::tool_result("toolu_x", "tool not found", true)]
        );
    }

    #[tokio::test]
    async fn test_user_message_appended_and_blank_lines_skipped() {
        let h = Harness::new();
        h.llm.queue_stream(text_response("Hello"));
        h.llm.queue_stream(text_response("Sure"));
        let input = ScriptedInput::new(["", "   ", "summarize the paper"]);
        let mut rt = h.runtime(input.clone());

        rt.run(CancellationToken::new()).await.unwrap();

        // three lines consumed for the first prompt, then end of input
        assert_eq!(input.calls(), 4);
        let history = rt.history();
        assert_eq!(history.len(), 4);
        assert_eq!(history[2], LlmMessage::user_text("summarize the paper"));

        let events = without_raw(h.events().await);
        let prompts = events.iter().filter(|e| **e == user()).count();
        assert_eq!(prompts, 4);
    }

    #[tokio::test]
    async fn test_inference_error_aborts_run() {
        let h = Harness::new();
        h.llm.queue_open_error(LlmError::server_error("overloaded"));
        let input = ScriptedInput::new(["never read"]);
        let mut rt = h.runtime(input.clone());

        let err = rt.run(CancellationToken::new()).await.unwrap_err();
        let RuntimeError::Inference(e) = err else {
            panic!("expected inference error, got {err:?}");
        };
        assert_eq!(e.kind, LlmErrorKind::ServerError);
        assert_eq!(input.calls(), 0);
        assert_eq!(rt.history().len(), 1);
        assert_eq!(rt.state(), &ConvState::Closed);
    }

    #[tokio::test]
    async fn test_history_untouched_by_failed_inference() {
        let h = Harness::new();
        h.llm.queue_stream(text_response("First"));
        let mut broken = text_response("Second");
        broken.pop(); // no message stop
        h.llm.queue_stream(broken);
        let mut rt = h.runtime(ScriptedInput::new(["next"]));

        let err = rt.run(CancellationToken::new()).await.unwrap_err();
        assert!(matches!(
            err,
            RuntimeError::Inference(ref e) if e.kind == LlmErrorKind::Protocol
        ));
        // opening message, first reply, user line; no partial second reply
        assert_eq!(rt.history().len(), 3);
    }

    #[tokio::test]
    async fn test_shutdown_while_awaiting_input_closes() {
        let h = Harness::new();
        h.llm.queue_stream(text_response("Hi"));
        let mut rt = h.runtime(PendingInput);

        let shutdown = h.shutdown.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            shutdown.trigger();
        });

        rt.run(CancellationToken::new()).await.unwrap();
        assert_eq!(rt.state(), &ConvState::Closed);
    }

    #[tokio::test]
    async fn test_shutdown_during_inference_is_interruption() {
        let h = Harness::new();
        h.llm.queue_stream_then_stall(vec![]);
        let mut rt = h.runtime(ScriptedInput::new(Vec::<String>::new()));

        let shutdown = h.shutdown.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            shutdown.trigger();
        });

        let err = rt.run(CancellationToken::new()).await.unwrap_err();
        assert!(err.is_interruption());
        assert!(h.llm.opened_handles()[0].is_released());
    }

    #[tokio::test]
    async fn test_already_shut_down_never_calls_model() {
        let h = Harness::new();
        h.shutdown.trigger();
        let mut rt = h.runtime(ScriptedInput::new(Vec::<String>::new()));

        rt.run(CancellationToken::new()).await.unwrap();
        assert!(h.llm.recorded_requests().is_empty());
    }
}
