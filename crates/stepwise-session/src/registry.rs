//! Step registry: the coalesced, display-oriented view of processing steps

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use stepwise_wire::{error_step_id, Args, DecodedEvent, StepStatus};

/// Step name the server uses for reply text generation
pub const CONTENT_STEP_NAME: &str = "content_generation";
/// Step name the server uses for the closing step
pub const COMPLETE_STEP_NAME: &str = "complete";
/// Step name given to entries first seen through a tool result
pub const TOOL_RESULT_STEP_NAME: &str = "tool_execution_result";
/// Step name given to entries first seen through an error event
pub const ERROR_STEP_NAME: &str = "error";

/// Whether a step name belongs to the reply stream rather than the step view
pub fn is_content_only(step_name: &str) -> bool {
    step_name == CONTENT_STEP_NAME || step_name == COMPLETE_STEP_NAME
}

/// Format the description shown for an error step
pub fn error_description(message: &str) -> String {
    format!("Error: {}", message)
}

/// One entry of the step registry
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Step {
    /// Caller-assigned identity; not an arrival order
    pub step_id: i64,
    /// Fixed when the entry is created
    pub step_name: String,
    pub status: StepStatus,
    pub description: Option<String>,
    pub tool_name: Option<String>,
    pub args: Option<Args>,
    pub tool_result: Option<String>,
    /// Arrival index of the last event that touched this entry
    pub last_updated: u64,
    /// Set once a tool result is attached
    pub auto_expand: bool,
}

impl Step {
    fn new(step_id: i64, step_name: impl Into<String>, seq: u64) -> Self {
        Self {
            step_id,
            step_name: step_name.into(),
            status: StepStatus::Processing,
            description: None,
            tool_name: None,
            args: None,
            tool_result: None,
            last_updated: seq,
            auto_expand: false,
        }
    }

    /// Human-readable step name (`tool_selection` -> `Tool selection`)
    pub fn title(&self) -> String {
        let spaced = self.step_name.replace('_', " ");
        let mut chars = spaced.chars();
        match chars.next() {
            Some(first) => first.to_uppercase().chain(chars).collect(),
            None => "Processing".to_string(),
        }
    }
}

/// De-duplicated steps keyed by step id, iterated in ascending id order.
///
/// The registry is a reducer: [`StepRegistry::apply`] takes the previous
/// registry by value and returns the next one.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StepRegistry {
    steps: BTreeMap<i64, Step>,
    applied: u64,
}

impl StepRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Replay an event sequence from an empty registry
    pub fn fold<'a>(events: impl IntoIterator<Item = &'a DecodedEvent>) -> Self {
        events
            .into_iter()
            .fold(Self::new(), |registry, event| registry.apply(event))
    }

    /// Apply one event and return the resulting registry
    pub fn apply(mut self, event: &DecodedEvent) -> Self {
        self.applied += 1;
        let seq = self.applied;

        match event {
            DecodedEvent::Start { .. } | DecodedEvent::Content { .. } => {}
            DecodedEvent::Step { step_name, .. } if is_content_only(step_name) => {}
            DecodedEvent::Step {
                step_id,
                step_name,
                description,
                status,
                tool_name,
                args,
            } => {
                let step = self
                    .steps
                    .entry(*step_id)
                    .or_insert_with(|| Step::new(*step_id, step_name.as_str(), seq));
                step.status = *status;
                step.description = description.clone();
                if let Some(tool_name) = tool_name {
                    step.tool_name = Some(tool_name.clone());
                }
                if let Some(args) = args {
                    step.args = Some(args.clone());
                }
                step.last_updated = seq;
            }
            DecodedEvent::ToolExecution {
                step_id,
                tool_name,
                args,
                result,
                ..
            } => {
                let step = self
                    .steps
                    .entry(*step_id)
                    .or_insert_with(|| Step::new(*step_id, TOOL_RESULT_STEP_NAME, seq));
                if step.tool_name.is_none() && !tool_name.is_empty() {
                    step.tool_name = Some(tool_name.clone());
                }
                step.tool_result = Some(result.clone());
                step.args = Some(args.clone());
                step.status = StepStatus::Completed;
                step.auto_expand = true;
                step.last_updated = seq;
            }
            DecodedEvent::Error { step_id, message } => {
                let step_id = error_step_id(*step_id);
                let step = self
                    .steps
                    .entry(step_id)
                    .or_insert_with(|| Step::new(step_id, ERROR_STEP_NAME, seq));
                step.status = StepStatus::Error;
                step.description = Some(error_description(message));
                step.last_updated = seq;
            }
            DecodedEvent::End => {
                for step in self.steps.values_mut() {
                    if step.status == StepStatus::Processing {
                        step.status = StepStatus::Completed;
                        step.last_updated = seq;
                    }
                }
            }
        }

        self
    }

    /// Steps in ascending id order
    pub fn steps(&self) -> impl Iterator<Item = &Step> {
        self.steps.values()
    }

    /// Owned copy of the steps in ascending id order
    pub fn snapshot(&self) -> Vec<Step> {
        self.steps.values().cloned().collect()
    }

    /// Look up a step by id
    pub fn get(&self, step_id: i64) -> Option<&Step> {
        self.steps.get(&step_id)
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    /// Whether any step is still running
    pub fn has_processing(&self) -> bool {
        self.steps
            .values()
            .any(|s| s.status == StepStatus::Processing)
    }

    /// Number of events applied so far, including excluded ones
    pub fn applied(&self) -> u64 {
        self.applied
    }
}
