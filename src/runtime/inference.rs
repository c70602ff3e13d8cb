//! One streaming inference, raced against cancellation and shutdown

use crate::events::{EventSink, OutputEvent};
use crate::llm::{
    LlmError, LlmRequest, LlmResponse, LlmService, MessageAccumulator, ResponseStream,
};
use crate::signal::Shutdown;
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;

/// How the wait in `run_inference` ended
enum Outcome {
    Done(Result<LlmResponse, oneshot::error::RecvError>),
    Failed(Result<LlmError, oneshot::error::RecvError>),
    Cancelled,
    ShuttingDown,
}

/// Run one inference over `request` and return the complete response.
///
/// The stream is opened here; an open failure returns immediately without
/// spawning anything. Fragments are then consumed on their own task while
/// this call waits for the first of: completion, a stream or accumulation
/// error, `cancel`, or `shutdown`. The losing signals are ignored. On cancel
/// and shutdown the stream is released here and the consumer stops at its
/// next fragment boundary.
pub async fn run_inference(
    llm: &dyn LlmService,
    request: &LlmRequest,
    sink: &EventSink,
    cancel: &CancellationToken,
    shutdown: &Shutdown,
) -> Result<LlmResponse, LlmError> {
    let stream = llm.open_stream(request).await?;
    let handle = stream.handle();

    let (done_tx, mut done_rx) = oneshot::channel();
    let (err_tx, mut err_rx) = oneshot::channel();
    tokio::spawn(consume(stream, sink.clone(), done_tx, err_tx));

    let outcome = tokio::select! {
        biased;
        result = &mut done_rx => Outcome::Done(result),
        result = &mut err_rx => Outcome::Failed(result),
        () = cancel.cancelled() => Outcome::Cancelled,
        () = shutdown.wait() => Outcome::ShuttingDown,
    };

    // The consumer sends on one channel and drops the other, so a closed
    // receiver means the outcome is waiting on its sibling.
    match outcome {
        Outcome::Done(Ok(response)) => Ok(response),
        Outcome::Failed(Ok(error)) => Err(error),
        Outcome::Done(Err(_)) => match err_rx.await {
            Ok(error) => Err(error),
            Err(_) => Err(consumer_vanished()),
        },
        Outcome::Failed(Err(_)) => match done_rx.await {
            Ok(response) => Ok(response),
            Err(_) => Err(consumer_vanished()),
        },
        Outcome::Cancelled => {
            let released = handle.release();
            tracing::info!(released, "Inference cancelled");
            Err(LlmError::cancelled("operation cancelled"))
        }
        Outcome::ShuttingDown => {
            let released = handle.release();
            tracing::info!(released, "Inference interrupted by shutdown");
            Err(LlmError::shutting_down())
        }
    }
}

fn consumer_vanished() -> LlmError {
    LlmError::unknown("stream consumer exited without reporting an outcome")
}

/// Consumer task: drain the stream, release it, report exactly one outcome.
async fn consume(
    mut stream: ResponseStream,
    sink: EventSink,
    done_tx: oneshot::Sender<LlmResponse>,
    err_tx: oneshot::Sender<LlmError>,
) {
    let result = accumulate(&mut stream, &sink).await;
    stream.release();

    match result {
        Ok(response) => {
            let _ = done_tx.send(response);
        }
        Err(e) => {
            tracing::debug!(error = %e, "Stream consumer stopped");
            let _ = err_tx.send(e);
        }
    }
}

async fn accumulate(stream: &mut ResponseStream, sink: &EventSink) -> Result<LlmResponse, LlmError> {
    let mut accumulator = MessageAccumulator::new();
    let mut fragments = 0usize;

    while let Some(item) = stream.next().await {
        let fragment = item?;
        fragments += 1;

        // Raw sees every fragment, including one that breaks the protocol;
        // Content only follows once the fragment has been applied.
        let text = fragment.text_delta().map(str::to_string);
        emit(sink, OutputEvent::Raw(fragment.clone())).await?;
        accumulator.apply(&fragment)?;
        if let Some(text) = text {
            emit(sink, OutputEvent::Content(text)).await?;
        }
    }

    let response = accumulator.finish()?;
    tracing::debug!(
        fragments,
        blocks = response.content.len(),
        stop_reason = ?response.stop_reason,
        input_tokens = response.usage.input_tokens,
        output_tokens = response.usage.output_tokens,
        "Response accumulated"
    );
    Ok(response)
}

async fn emit(sink: &EventSink, event: OutputEvent) -> Result<(), LlmError> {
    sink.emit(event).await.map_err(|_| LlmError::shutting_down())
}
