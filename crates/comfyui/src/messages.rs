//! Event-stream message types and parser.
//!
//! The render service pushes JSON text frames of the shape
//! `{"type": "<kind>", "data": {...}}`. This module deserializes them
//! into a strongly-typed [`ComfyUIMessage`] enum. Only `executing` and
//! `execution_error` decide a job's fate; the rest are informational.

use serde::Deserialize;

/// Known event-stream message kinds.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum ComfyUIMessage {
    /// Queue depth broadcast.
    #[serde(rename = "status")]
    Status(StatusData),

    /// A prompt left the queue and started running.
    #[serde(rename = "execution_start")]
    ExecutionStart(PromptRef),

    /// Nodes whose outputs were served from cache.
    #[serde(rename = "execution_cached")]
    ExecutionCached(CachedData),

    /// A node started executing. `node == None` means the prompt is done.
    #[serde(rename = "executing")]
    Executing(ExecutingData),

    /// Step progress inside a long-running node.
    #[serde(rename = "progress")]
    Progress(ProgressData),

    /// A node finished and produced output.
    #[serde(rename = "executed")]
    Executed(ExecutedData),

    /// Newer servers announce success explicitly, before the final `executing`.
    #[serde(rename = "execution_success")]
    ExecutionSuccess(PromptRef),

    /// The prompt was interrupted from outside.
    #[serde(rename = "execution_interrupted")]
    ExecutionInterrupted(PromptRef),

    /// The prompt failed.
    #[serde(rename = "execution_error")]
    ExecutionError(ErrorData),
}

impl ComfyUIMessage {
    /// Prompt id the message refers to, when it carries one.
    pub fn prompt_id(&self) -> Option<&str> {
        match self {
            ComfyUIMessage::Status(_) => None,
            ComfyUIMessage::ExecutionStart(d)
            | ComfyUIMessage::ExecutionSuccess(d)
            | ComfyUIMessage::ExecutionInterrupted(d) => Some(d.prompt_id.as_str()),
            ComfyUIMessage::ExecutionCached(d) => Some(d.prompt_id.as_str()),
            ComfyUIMessage::Executing(d) => d.prompt_id.as_deref(),
            ComfyUIMessage::Progress(d) => d.prompt_id.as_deref(),
            ComfyUIMessage::Executed(d) => Some(d.prompt_id.as_str()),
            ComfyUIMessage::ExecutionError(d) => d.prompt_id.as_deref(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct StatusData {
    pub status: QueueStatus,
}

#[derive(Debug, Clone, Deserialize)]
pub struct QueueStatus {
    pub exec_info: ExecInfo,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ExecInfo {
    pub queue_remaining: i32,
}

/// Payload that only names a prompt.
#[derive(Debug, Clone, Deserialize)]
pub struct PromptRef {
    pub prompt_id: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CachedData {
    pub prompt_id: String,
    #[serde(default)]
    pub nodes: Vec<String>,
}

/// Payload for `executing`.
///
/// Older servers omit `prompt_id` on the idle broadcast that follows
/// queue drain, hence the `Option`.
#[derive(Debug, Clone, Deserialize)]
pub struct ExecutingData {
    pub node: Option<String>,
    #[serde(default)]
    pub prompt_id: Option<String>,
}

impl ExecutingData {
    /// Whether this message reports that `prompt_id` has finished.
    pub fn is_completion_of(&self, prompt_id: &str) -> bool {
        self.node.is_none() && self.prompt_id.as_deref() == Some(prompt_id)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ProgressData {
    pub value: i64,
    pub max: i64,
    #[serde(default)]
    pub prompt_id: Option<String>,
    #[serde(default)]
    pub node: Option<String>,
}

impl ProgressData {
    /// Completion percentage (0-100); 0 when `max` is not positive.
    pub fn percent(&self) -> i16 {
        if self.max > 0 {
            ((self.value as f64 / self.max as f64) * 100.0).clamp(0.0, 100.0) as i16
        } else {
            0
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ExecutedData {
    pub node: String,
    pub output: serde_json::Value,
    pub prompt_id: String,
}

/// Payload for `execution_error`.
///
/// Every field varies by server version. An error without a `prompt_id`
/// applies to whichever prompt the listener is watching.
#[derive(Debug, Clone, Deserialize)]
pub struct ErrorData {
    #[serde(default)]
    pub prompt_id: Option<String>,
    #[serde(default)]
    pub node_id: Option<String>,
    #[serde(default)]
    pub node_type: Option<String>,
    #[serde(default)]
    pub exception_message: String,
    #[serde(default)]
    pub exception_type: String,
}

/// Parse an event-stream text frame.
///
/// Returns `Err` for malformed JSON or unknown `type` values; callers
/// log and continue.
pub fn parse_message(text: &str) -> Result<ComfyUIMessage, serde_json::Error> {
    serde_json::from_str(text)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn executing_with_null_node_completes_matching_prompt() {
        let msg = parse_message(r#"{"type":"executing","data":{"node":null,"prompt_id":"p-1"}}"#)
            .unwrap();
        match msg {
            ComfyUIMessage::Executing(data) => {
                assert!(data.is_completion_of("p-1"));
                assert!(!data.is_completion_of("p-2"));
            }
            other => panic!("Expected Executing, got {other:?}"),
        }
    }

    #[test]
    fn executing_with_node_is_not_completion() {
        let msg = parse_message(r#"{"type":"executing","data":{"node":"13","prompt_id":"p-1"}}"#)
            .unwrap();
        match msg {
            ComfyUIMessage::Executing(data) => {
                assert_eq!(data.node.as_deref(), Some("13"));
                assert!(!data.is_completion_of("p-1"));
            }
            other => panic!("Expected Executing, got {other:?}"),
        }
    }

    #[test]
    fn idle_executing_without_prompt_id_parses() {
        let msg = parse_message(r#"{"type":"executing","data":{"node":null}}"#).unwrap();
        assert!(msg.prompt_id().is_none());
    }

    #[test]
    fn execution_error_with_partial_fields() {
        let msg = parse_message(
            r#"{"type":"execution_error","data":{"prompt_id":"p-1","node_id":"12","exception_message":"image not found"}}"#,
        )
        .unwrap();
        match msg {
            ComfyUIMessage::ExecutionError(data) => {
                assert_eq!(data.prompt_id.as_deref(), Some("p-1"));
                assert_eq!(data.node_id.as_deref(), Some("12"));
                assert_eq!(data.exception_message, "image not found");
                assert!(data.exception_type.is_empty());
            }
            other => panic!("Expected ExecutionError, got {other:?}"),
        }
    }

    #[test]
    fn execution_error_without_prompt_id_parses() {
        let msg = parse_message(
            r#"{"type":"execution_error","data":{"exception_message":"out of memory"}}"#,
        )
        .unwrap();
        assert!(msg.prompt_id().is_none());
        match msg {
            ComfyUIMessage::ExecutionError(data) => {
                assert_eq!(data.exception_message, "out of memory");
                assert!(data.node_id.is_none());
            }
            other => panic!("Expected ExecutionError, got {other:?}"),
        }
    }

    #[test]
    fn informational_messages_expose_prompt_id() {
        let cases = [
            (r#"{"type":"execution_start","data":{"prompt_id":"a"}}"#, Some("a")),
            (r#"{"type":"execution_cached","data":{"prompt_id":"b"}}"#, Some("b")),
            (r#"{"type":"execution_success","data":{"prompt_id":"c"}}"#, Some("c")),
            (r#"{"type":"executed","data":{"node":"9","output":{},"prompt_id":"d"}}"#, Some("d")),
            (r#"{"type":"progress","data":{"value":1,"max":4}}"#, None),
            (
                r#"{"type":"status","data":{"status":{"exec_info":{"queue_remaining":2}}}}"#,
                None,
            ),
        ];
        for (json, expected) in cases {
            let msg = parse_message(json).unwrap();
            assert_eq!(msg.prompt_id(), expected, "{json}");
        }
    }

    #[test]
    fn progress_percent_is_clamped() {
        let p = ProgressData {
            value: 5,
            max: 20,
            prompt_id: None,
            node: None,
        };
        assert_eq!(p.percent(), 25);
        let zero = ProgressData { max: 0, ..p.clone() };
        assert_eq!(zero.percent(), 0);
        let over = ProgressData { value: 30, ..p };
        assert_eq!(over.percent(), 100);
    }

    #[test]
    fn unknown_type_and_garbage_are_errors() {
        assert!(parse_message(r#"{"type":"crystools.monitor","data":{}}"#).is_err());
        assert!(parse_message("not json").is_err());
    }
}
