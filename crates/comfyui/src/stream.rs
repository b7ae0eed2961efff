//! Waiting for one prompt to finish on its event stream.
//!
//! Reads frames until the service reports a terminal state for the
//! watched prompt, logging everything else at debug level.

use futures::{Stream, StreamExt};
use tokio_tungstenite::tungstenite::{Error as WsError, Message};
use tokio_util::sync::CancellationToken;

use crate::client::ComfyUIClientError;
use crate::messages::{parse_message, ComfyUIMessage, ErrorData};

/// How the wait for a prompt ended.
#[derive(Debug, Clone)]
pub enum StreamOutcome {
    /// `executing` with a null node arrived for the prompt.
    Completed,
    /// `execution_error` arrived for the prompt.
    Failed(ErrorData),
    /// `execution_interrupted` arrived for the prompt.
    Interrupted,
    /// The cancellation token fired first.
    Cancelled,
}

/// Consume `stream` until `prompt_id` reaches a terminal state.
///
/// Messages about other prompts, unparseable frames, and binary preview
/// frames are ignored. Returns an error if the stream ends or fails
/// before a terminal message arrives.
pub async fn await_completion<S>(
    stream: &mut S,
    prompt_id: &str,
    cancel: &CancellationToken,
) -> Result<StreamOutcome, ComfyUIClientError>
where
    S: Stream<Item = Result<Message, WsError>> + Unpin,
{
    loop {
        let frame = tokio::select! {
            _ = cancel.cancelled() => {
                tracing::info!(prompt_id, "Stopped waiting for prompt (cancelled)");
                return Ok(StreamOutcome::Cancelled);
            }
            frame = stream.next() => frame,
        };

        match frame {
            Some(Ok(Message::Text(text))) => {
                if let Some(outcome) = handle_text(&text, prompt_id) {
                    return Ok(outcome);
                }
            }
            Some(Ok(Message::Binary(_))) => {
                tracing::trace!(prompt_id, "Ignoring binary frame (preview image)");
            }
            Some(Ok(Message::Close(frame))) => {
                return Err(ComfyUIClientError::Protocol(format!(
                    "Event stream closed before prompt {prompt_id} finished ({frame:?})"
                )));
            }
            Some(Ok(_)) => {
                // Ping / Pong / raw frames are handled by tungstenite.
            }
            Some(Err(e)) => {
                return Err(ComfyUIClientError::Protocol(format!(
                    "Event stream receive error while waiting for prompt {prompt_id}: {e}"
                )));
            }
            None => {
                return Err(ComfyUIClientError::Protocol(format!(
                    "Event stream ended before prompt {prompt_id} finished"
                )));
            }
        }
    }
}

/// Interpret one text frame. Returns `Some` when it is terminal for `prompt_id`.
fn handle_text(text: &str, prompt_id: &str) -> Option<StreamOutcome> {
    let msg = match parse_message(text) {
        Ok(msg) => msg,
        Err(e) => {
            tracing::debug!(error = %e, raw_message = %text, "Skipping unrecognised event");
            return None;
        }
    };

    if msg.prompt_id().is_some_and(|id| id != prompt_id) {
        return None;
    }

    match msg {
        ComfyUIMessage::Executing(data) => {
            if data.is_completion_of(prompt_id) {
                tracing::info!(prompt_id, "Execution finished");
                return Some(StreamOutcome::Completed);
            }
            if let Some(node) = &data.node {
                tracing::debug!(prompt_id, node = %node, "Executing node");
            }
            None
        }
        ComfyUIMessage::ExecutionError(data) => {
            tracing::error!(
                prompt_id,
                node_id = ?data.node_id,
                error_type = %data.exception_type,
                error_message = %data.exception_message,
                "Execution error",
            );
            Some(StreamOutcome::Failed(data))
        }
        ComfyUIMessage::ExecutionInterrupted(_) => {
            tracing::warn!(prompt_id, "Execution interrupted");
            Some(StreamOutcome::Interrupted)
        }
        ComfyUIMessage::Progress(data) => {
            tracing::debug!(prompt_id, percent = data.percent(), "Render progress");
            None
        }
        ComfyUIMessage::Status(data) => {
            tracing::debug!(
                queue_remaining = data.status.exec_info.queue_remaining,
                "Queue status",
            );
            None
        }
        other => {
            tracing::debug!(prompt_id, message = ?other, "Event");
            None
        }
    }
}
