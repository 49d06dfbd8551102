//! Typed stream events and the record decoder

use serde::{Deserialize, Serialize};

/// Prefix that marks a record carrying an event payload
pub const EVENT_MARKER: &str = "data: ";

/// Step id used for error events that do not name a step
pub const ERROR_STEP_ID: i64 = 999;

/// Step an error event is attached to; an absent or zero id means [`ERROR_STEP_ID`]
pub fn error_step_id(step_id: Option<i64>) -> i64 {
    match step_id {
        Some(id) if id != 0 => id,
        _ => ERROR_STEP_ID,
    }
}

/// Tool arguments as sent on the wire
pub type Args = serde_json::Map<String, serde_json::Value>;

/// Processing status of a step
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepStatus {
    #[default]
    Processing,
    Completed,
    Error,
}

impl StepStatus {
    /// Whether the step has stopped making progress
    pub fn is_terminal(&self) -> bool {
        !matches!(self, StepStatus::Processing)
    }

    /// Wire name of the status
    pub fn as_str(&self) -> &'static str {
        match self {
            StepStatus::Processing => "processing",
            StepStatus::Completed => "completed",
            StepStatus::Error => "error",
        }
    }
}

impl std::fmt::Display for StepStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Events decoded from the stream, with all wire defaults applied
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum DecodedEvent {
    /// Session opened on the server
    Start {
        session_id: Option<String>,
        query: Option<String>,
    },
    /// A processing step was announced or changed
    Step {
        step_id: i64,
        step_name: String,
        description: Option<String>,
        status: StepStatus,
        tool_name: Option<String>,
        args: Option<Args>,
    },
    /// A fragment of the reply text
    Content { step_id: i64, content: String },
    /// A tool finished running
    ToolExecution {
        step_id: i64,
        tool_name: String,
        args: Args,
        result: String,
        status: Option<StepStatus>,
        formatted_result: Option<String>,
    },
    /// In-band error reported by the server
    Error { step_id: Option<i64>, message: String },
    /// Session closed on the server
    End,
}

impl DecodedEvent {
    /// Wire name of the event kind
    pub fn kind(&self) -> &'static str {
        match self {
            DecodedEvent::Start { .. } => "start",
            DecodedEvent::Step { .. } => "step",
            DecodedEvent::Content { .. } => "content",
            DecodedEvent::ToolExecution { .. } => "tool_execution",
            DecodedEvent::Error { .. } => "error",
            DecodedEvent::End => "end",
        }
    }

    /// Step id the event refers to, if it refers to one
    pub fn step_id(&self) -> Option<i64> {
        match self {
            DecodedEvent::Step { step_id, .. }
            | DecodedEvent::Content { step_id, .. }
            | DecodedEvent::ToolExecution { step_id, .. } => Some(*step_id),
            DecodedEvent::Error { step_id, .. } => *step_id,
            DecodedEvent::Start { .. } | DecodedEvent::End => None,
        }
    }

    /// Check if this is the end-of-session event
    pub fn is_end(&self) -> bool {
        matches!(self, DecodedEvent::End)
    }
}

/// Payload shape as it appears on the wire; every field is optional.
#[derive(Debug, Default, Deserialize)]
struct WireEvent {
    #[serde(rename = "type")]
    kind: Option<String>,
    session_id: Option<String>,
    query: Option<String>,
    step_id: Option<i64>,
    step_name: Option<String>,
    description: Option<String>,
    status: Option<StepStatus>,
    tool_name: Option<String>,
    args: Option<Args>,
    result: Option<String>,
    formatted_result: Option<String>,
    content: Option<String>,
    message: Option<String>,
}

/// Decode one record into an event.
///
/// Records without the event marker, with an unknown or missing `type`, or
/// with a payload that does not parse are skipped. Nothing here is fatal.
pub fn decode(record: &str) -> Option<DecodedEvent> {
    let Some(payload) = record.strip_prefix(EVENT_MARKER) else {
        tracing::debug!(record, "Skipping record without event marker");
        return None;
    };

    if payload.trim() == "[DONE]" {
        tracing::debug!("Skipping stream sentinel");
        return None;
    }

    let wire: WireEvent = match serde_json::from_str(payload) {
        Ok(wire) => wire,
        Err(e) => {
            tracing::warn!(error = %e, payload, "Discarding malformed event");
            return None;
        }
    };

    let Some(kind) = wire.kind.as_deref() else {
        tracing::debug!(payload, "Skipping event without type");
        return None;
    };

    let event = match kind {
        "start" => DecodedEvent::Start {
            session_id: wire.session_id,
            query: wire.query,
        },
        "step" => DecodedEvent::Step {
            step_id: wire.step_id.unwrap_or(0),
            step_name: wire.step_name.unwrap_or_else(|| "unknown".to_string()),
            description: wire.description,
            status: wire.status.unwrap_or_default(),
            tool_name: wire.tool_name,
            args: wire.args,
        },
        "content" => DecodedEvent::Content {
            step_id: wire.step_id.unwrap_or(0),
            content: wire.content.unwrap_or_default(),
        },
        "tool_execution" => DecodedEvent::ToolExecution {
            step_id: wire.step_id.unwrap_or(0),
            tool_name: wire.tool_name.unwrap_or_default(),
            args: wire.args.unwrap_or_default(),
            result: wire.result.unwrap_or_default(),
            status: wire.status,
            formatted_result: wire.formatted_result,
        },
        "error" => DecodedEvent::Error {
            step_id: wire.step_id,
            message: wire.message.unwrap_or_else(|| "Unknown error".to_string()),
        },
        "end" => DecodedEvent::End,
        other => {
            tracing::debug!(kind = other, "Skipping unknown event type");
            return None;
        }
    };

    Some(event)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_decode_start() {
        let event = decode(r#"data: {"type":"start","session_id":"s1","query":"10 km"}"#);
        assert_eq!(
            event,
            Some(DecodedEvent::Start {
                session_id: Some("s1".into()),
                query: Some("10 km".into()),
            })
        );
    }

    #[test]
    fn test_decode_step_full() {
        let event = decode(
            r#"data: {"type":"step","step_id":2,"step_name":"tool_selection","description":"Selected tool: currency","tool_name":"currency","args":{"from":"USD"},"status":"completed"}"#,
        )
        .unwrap();

        match event {
            DecodedEvent::Step {
                step_id,
                step_name,
                description,
                status,
                tool_name,
                args,
            } => {
                assert_eq!(step_id, 2);
                assert_eq!(step_name, "tool_selection");
                assert_eq!(description.as_deref(), Some("Selected tool: currency"));
                assert_eq!(status, StepStatus::Completed);
                assert_eq!(tool_name.as_deref(), Some("currency"));
                assert_eq!(args.unwrap().get("from"), Some(&json!("USD")));
            }
            other => panic!("expected Step, got {:?}", other),
        }
    }

    #[test]
    fn test_decode_step_defaults() {
        let event = decode(r#"data: {"type":"step"}"#).unwrap();
        assert_eq!(
            event,
            DecodedEvent::Step {
                step_id: 0,
                step_name: "unknown".into(),
                description: None,
                status: StepStatus::Processing,
                tool_name: None,
                args: None,
            }
        );
    }

    #[test]
    fn test_decode_content_defaults() {
        assert_eq!(
            decode(r#"data: {"type":"content"}"#),
            Some(DecodedEvent::Content {
                step_id: 0,
                content: String::new(),
            })
        );
    }

    #[test]
    fn test_decode_tool_execution_defaults_args() {
        let event = decode(r#"data: {"type":"tool_execution","step_id":4,"tool_name":"convert_distance","result":"6.21"}"#)
            .unwrap();
        match event {
            DecodedEvent::ToolExecution {
                step_id,
                args,
                result,
                status,
                ..
            } => {
                assert_eq!(step_id, 4);
                assert!(args.is_empty());
                assert_eq!(result, "6.21");
                assert_eq!(status, None);
            }
            other => panic!("expected ToolExecution, got {:?}", other),
        }
    }

    #[test]
    fn test_decode_error_keeps_missing_step_id() {
        assert_eq!(
            decode(r#"data: {"type":"error","message":"boom"}"#),
            Some(DecodedEvent::Error {
                step_id: None,
                message: "boom".into(),
            })
        );
    }

    #[test]
    fn test_decode_end_ignores_extra_fields() {
        assert_eq!(
            decode(r#"data: {"type":"end","session_id":"s1","timestamp":"x"}"#),
            Some(DecodedEvent::End)
        );
    }

    #[test]
    fn test_unknown_type_is_skipped() {
        assert_eq!(decode(r#"data: {"type":"heartbeat"}"#), None);
    }

    #[test]
    fn test_missing_type_is_skipped() {
        assert_eq!(decode(r#"data: {"content":"orphan"}"#), None);
    }

    #[test]
    fn test_malformed_payload_is_skipped() {
        assert_eq!(decode("data: {not json"), None);
    }

    #[test]
    fn test_wrong_field_type_is_malformed() {
        assert_eq!(decode(r#"data: {"type":"step","step_id":"one"}"#), None);
        assert_eq!(decode(r#"data: {"type":"step","status":"paused"}"#), None);
    }

    #[test]
    fn test_record_without_marker_is_skipped() {
        assert_eq!(decode(r#"{"type":"end"}"#), None);
        assert_eq!(decode(r#"event: {"type":"end"}"#), None);
        assert_eq!(decode(": keep-alive"), None);
    }

    #[test]
    fn test_done_sentinel_is_skipped() {
        assert_eq!(decode("data: [DONE]"), None);
    }

    #[test]
    fn test_event_accessors() {
        let content = DecodedEvent::Content {
            step_id: 3,
            content: "x".into(),
        };
        assert_eq!(content.kind(), "content");
        assert_eq!(content.step_id(), Some(3));
        assert!(DecodedEvent::End.is_end());
        assert_eq!(DecodedEvent::End.step_id(), None);
    }

    #[test]
    fn test_error_step_id_fallback() {
        assert_eq!(error_step_id(None), ERROR_STEP_ID);
        assert_eq!(error_step_id(Some(0)), ERROR_STEP_ID);
        assert_eq!(error_step_id(Some(3)), 3);
        assert_eq!(error_step_id(Some(-1)), -1);
    }

    #[test]
    fn test_status_terminal() {
        assert!(!StepStatus::Processing.is_terminal());
        assert!(StepStatus::Completed.is_terminal());
        assert!(StepStatus::Error.is_terminal());
        assert_eq!(StepStatus::Completed.to_string(), "completed");
    }
}
