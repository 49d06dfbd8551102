//! Session projector: folds the event stream into one evolving reply message

use serde::{Deserialize, Serialize};
use stepwise_wire::{error_step_id, Args, DecodedEvent, StepStatus};

use crate::registry::{error_description, CONTENT_STEP_NAME, ERROR_STEP_NAME, TOOL_RESULT_STEP_NAME};

/// Content shown when the stream itself could not be read
pub const TRANSPORT_FAILURE_MESSAGE: &str = "❌ Sorry, I encountered an error while processing your request. Please make sure the backend server is running.";

/// Format the reply content that replaces everything after an in-band error
pub fn error_content(message: &str) -> String {
    format!("❌ Error: {}", message)
}

/// Author of a message
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    #[default]
    Assistant,
}

/// Kind of a raw step log entry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogKind {
    Step,
    Content,
    ToolExecution,
}

impl LogKind {
    fn prefix(&self) -> &'static str {
        match self {
            LogKind::Step => "step",
            LogKind::Content => "content",
            LogKind::ToolExecution => "tool",
        }
    }
}

/// A finished tool invocation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolExecution {
    pub name: String,
    pub args: Args,
    pub result: String,
    pub step_id: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub formatted_result: Option<String>,
}

/// One record of the raw step log; never coalesced or dropped
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogEntry {
    /// `<kind>-<step_id>-<position>`, unique within a message
    pub id: String,
    pub step_id: i64,
    pub step_name: String,
    pub kind: LogKind,
    pub status: StepStatus,
    pub description: Option<String>,
    pub content: Option<String>,
    pub tool_name: Option<String>,
    pub args: Option<Args>,
    pub tool_execution: Option<ToolExecution>,
}

impl LogEntry {
    fn new(kind: LogKind, position: usize, step_id: i64, step_name: &str, status: StepStatus) -> Self {
        Self {
            id: format!("{}-{}-{}", kind.prefix(), step_id, position),
            step_id,
            step_name: step_name.to_string(),
            kind,
            status,
            description: None,
            content: None,
            tool_name: None,
            args: None,
            tool_execution: None,
        }
    }
}

/// A conversation message; for assistant replies, the projection of one stream
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SessionMessage {
    pub id: String,
    pub role: Role,
    /// Grows by appending; replaced wholesale on error
    pub content: String,
    pub session_id: Option<String>,
    /// Once set, stays set
    pub is_error: bool,
    /// Times `content` was replaced instead of appended to
    #[serde(default)]
    pub rewrites: u32,
    /// Raw log of every step-bearing event, in arrival order
    pub steps: Vec<LogEntry>,
    pub tool_executions: Vec<ToolExecution>,
    /// Creation time in unix millis
    pub created_at: i64,
}

impl SessionMessage {
    /// Create a user message carrying the query text
    pub fn user(text: impl Into<String>) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            role: Role::User,
            content: text.into(),
            created_at: chrono::Utc::now().timestamp_millis(),
            ..Default::default()
        }
    }

    /// Create an empty assistant message awaiting a stream
    pub fn assistant() -> Self {
        Self::assistant_with_content(String::new())
    }

    /// Create an assistant message with fixed content (e.g. a greeting)
    pub fn assistant_with_content(content: impl Into<String>) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            role: Role::Assistant,
            content: content.into(),
            created_at: chrono::Utc::now().timestamp_millis(),
            ..Default::default()
        }
    }

    /// Replay an event sequence onto a message
    pub fn fold<'a>(self, events: impl IntoIterator<Item = &'a DecodedEvent>) -> Self {
        events
            .into_iter()
            .fold(self, |message, event| message.apply(event))
    }

    /// Apply one event and return the resulting message
    pub fn apply(mut self, event: &DecodedEvent) -> Self {
        let position = self.steps.len();

        match event {
            DecodedEvent::Start { session_id, .. } => {
                self.session_id = session_id.clone();
            }
            DecodedEvent::Step {
                step_id,
                step_name,
                description,
                status,
                tool_name,
                args,
            } => {
                let mut entry = LogEntry::new(LogKind::Step, position, *step_id, step_name, *status);
                entry.description = description.clone();
                entry.tool_name = tool_name.clone();
                entry.args = args.clone();
                self.steps.push(entry);
            }
            DecodedEvent::Content { step_id, content } => {
                self.content.push_str(content);

                let mut entry = LogEntry::new(
                    LogKind::Content,
                    position,
                    *step_id,
                    CONTENT_STEP_NAME,
                    StepStatus::Completed,
                );
                entry.content = Some(content.clone());
                self.steps.push(entry);
            }
            DecodedEvent::ToolExecution {
                step_id,
                tool_name,
                args,
                result,
                status,
                formatted_result,
            } => {
                let execution = ToolExecution {
                    name: tool_name.clone(),
                    args: args.clone(),
                    result: result.clone(),
                    step_id: *step_id,
                    formatted_result: formatted_result.clone(),
                };

                let mut entry = LogEntry::new(
                    LogKind::ToolExecution,
                    position,
                    *step_id,
                    TOOL_RESULT_STEP_NAME,
                    status.unwrap_or(StepStatus::Completed),
                );
                entry.tool_execution = Some(execution.clone());
                self.tool_executions.push(execution);
                self.steps.push(entry);
            }
            DecodedEvent::Error { step_id, message } => {
                self.is_error = true;
                self.content = error_content(message);
                self.rewrites += 1;

                let step_id = error_step_id(*step_id);
                let mut entry =
                    LogEntry::new(LogKind::Step, position, step_id, ERROR_STEP_NAME, StepStatus::Error);
                entry.description = Some(error_description(message));
                self.steps.push(entry);
            }
            DecodedEvent::End => {
                for entry in &mut self.steps {
                    if entry.status == StepStatus::Processing {
                        entry.status = StepStatus::Completed;
                    }
                }
            }
        }

        self
    }

    /// Replace the content with the terminal transport failure message
    pub fn fail(mut self) -> Self {
        self.is_error = true;
        self.content = TRANSPORT_FAILURE_MESSAGE.to_string();
        self.rewrites += 1;
        self
    }

    /// Whether this message was written by the assistant
    pub fn is_assistant(&self) -> bool {
        self.role == Role::Assistant
    }
}
