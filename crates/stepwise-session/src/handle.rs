//! A cloneable handle for observing or cancelling a session from another task.

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::sync::{
    Arc,
    atomic::{AtomicBool, Ordering},
};
use tokio_util::sync::CancellationToken;

use crate::projector::SessionMessage;
use crate::registry::Step;

/// Fully merged state of both views at one point between events
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SessionSnapshot {
    pub message: SessionMessage,
    pub steps: Vec<Step>,
}

/// A cloneable handle onto a running session.
///
/// All fields are `Arc`-wrapped, so cloning is cheap.
#[derive(Clone)]
pub struct SessionHandle {
    pub(crate) cancel: CancellationToken,
    pub(crate) snapshot: Arc<Mutex<SessionSnapshot>>,
    pub(crate) is_running: Arc<AtomicBool>,
}

impl SessionHandle {
    pub(crate) fn new(cancel: CancellationToken) -> Self {
        Self {
            cancel,
            snapshot: Arc::new(Mutex::new(SessionSnapshot::default())),
            is_running: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Stop consuming the stream; state applied so far is kept.
    pub fn abort(&self) {
        self.cancel.cancel();
    }

    /// Get the cancellation token
    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Latest published state
    pub fn snapshot(&self) -> SessionSnapshot {
        self.snapshot.lock().clone()
    }

    pub(crate) fn publish(&self, snapshot: SessionSnapshot) {
        *self.snapshot.lock() = snapshot;
    }

    /// Whether the session is currently pulling from its transport
    pub fn is_running(&self) -> bool {
        self.is_running.load(Ordering::Acquire)
    }

    pub(crate) fn set_running(&self, running: bool) {
        self.is_running.store(running, Ordering::Release);
    }
}
