//! Session event types

use serde::{Deserialize, Serialize};
use stepwise_wire::DecodedEvent;

/// How a session run ended
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SessionOutcome {
    /// The transport signalled completion
    Completed,
    /// The caller cancelled; applied state is kept as-is
    Cancelled,
    /// The transport failed; the reply carries the failure message
    Failed { message: String },
}

impl SessionOutcome {
    pub fn is_failed(&self) -> bool {
        matches!(self, SessionOutcome::Failed { .. })
    }
}

/// Events emitted while a session consumes its stream
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SessionEvent {
    /// An event was merged into both views
    Applied { event: DecodedEvent },

    /// The transport failed and the reply was overridden
    Failed { message: String },

    /// The run is over
    Finished { outcome: SessionOutcome },
}

impl SessionEvent {
    /// Check if this is the last event of a run
    pub fn is_terminal(&self) -> bool {
        matches!(self, SessionEvent::Finished { .. })
    }
}
