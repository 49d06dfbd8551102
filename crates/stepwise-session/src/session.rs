//! Session driver: pulls fragments and folds decoded events into both views

use futures::StreamExt;
use serde::{Deserialize, Serialize};
use stepwise_wire::{DecodedEvent, FragmentStream, LineReassembler};
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;

use crate::events::{SessionEvent, SessionOutcome};
use crate::handle::{SessionHandle, SessionSnapshot};
use crate::projector::SessionMessage;
use crate::registry::StepRegistry;

/// Counters describing what a session has consumed
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionStats {
    /// Raw body fragments pulled from the transport
    pub fragments: u64,
    /// Complete non-blank records produced by the reassembler
    pub records: u64,
    /// Records that decoded into an event and were applied
    pub applied: u64,
    /// Records skipped by the decoder
    pub discarded: u64,
}

/// One query's stream, and the two views derived from it.
///
/// Every decoded event is appended to a canonical log and then folded into
/// the step registry and the reply message, synchronously and in arrival
/// order. The only suspension point is waiting for the next fragment.
pub struct Session {
    query: String,
    events: Vec<DecodedEvent>,
    registry: StepRegistry,
    message: SessionMessage,
    reassembler: LineReassembler,
    stats: SessionStats,
    event_tx: broadcast::Sender<SessionEvent>,
    handle: SessionHandle,
}

impl Session {
    /// Create a session for a query with a fresh assistant message
    pub fn new(query: impl Into<String>) -> Self {
        let (event_tx, _) = broadcast::channel(256);
        let message = SessionMessage::assistant();
        let handle = SessionHandle::new(CancellationToken::new());
        handle.publish(SessionSnapshot {
            message: message.clone(),
            steps: Vec::new(),
        });

        Self {
            query: query.into(),
            events: Vec::new(),
            registry: StepRegistry::new(),
            message,
            reassembler: LineReassembler::new(),
            stats: SessionStats::default(),
            event_tx,
            handle,
        }
    }

    /// Project into an existing assistant message (e.g. a conversation placeholder)
    pub fn with_message(mut self, message: SessionMessage) -> Self {
        self.message = message;
        self.publish();
        self
    }

    /// Publish snapshots through an existing handle, e.g. one shared by a chat
    pub fn with_handle(mut self, handle: SessionHandle) -> Self {
        let cancel = self.handle.cancel_token();
        self.handle = handle;
        self.handle.cancel = cancel;
        self.publish();
        self
    }

    /// Use an external cancellation token
    pub fn with_cancel(mut self, cancel: CancellationToken) -> Self {
        self.handle.cancel = cancel;
        self
    }

    /// Emit session events on a shared channel
    pub fn with_event_sender(mut self, event_tx: broadcast::Sender<SessionEvent>) -> Self {
        self.event_tx = event_tx;
        self
    }

    /// Subscribe to session events
    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.event_tx.subscribe()
    }

    /// Get a handle for observing or cancelling from another task
    pub fn handle(&self) -> SessionHandle {
        self.handle.clone()
    }

    /// Query text this session answers
    pub fn query(&self) -> &str {
        &self.query
    }

    /// Current reply message
    pub fn message(&self) -> &SessionMessage {
        &self.message
    }

    /// Current step registry
    pub fn registry(&self) -> &StepRegistry {
        &self.registry
    }

    /// Canonical event log, in arrival order
    pub fn events(&self) -> &[DecodedEvent] {
        &self.events
    }

    pub fn stats(&self) -> SessionStats {
        self.stats
    }

    /// Consume the session, keeping the final reply and steps
    pub fn into_parts(self) -> (SessionMessage, StepRegistry) {
        (self.message, self.registry)
    }

    /// Append one event to the log and fold it into both views
    pub fn apply(&mut self, event: DecodedEvent) {
        self.apply_event(event);
        self.publish();
    }

    /// Run one fragment through reassembly, decoding and both folds.
    ///
    /// Returns the number of events applied.
    pub fn ingest(&mut self, fragment: &[u8]) -> usize {
        self.stats.fragments += 1;
        let records = self.reassembler.feed(fragment);
        let applied = self.apply_records(records);
        if applied > 0 {
            self.publish();
        }
        applied
    }

    /// Flush the trailing partial record once the transport has completed
    pub fn finish(&mut self) -> usize {
        let tail = self.reassembler.finish();
        let applied = self.apply_records(tail);
        if applied > 0 {
            self.publish();
        }
        applied
    }

    /// Terminate the session after a transport failure.
    ///
    /// Steps merged so far stay visible; the reply content is overridden.
    pub fn fail(&mut self, reason: &str) {
        tracing::warn!(query = %self.query, reason, "Session transport failed");
        self.message = std::mem::take(&mut self.message).fail();
        self.publish();
        let _ = self.event_tx.send(SessionEvent::Failed {
            message: reason.to_string(),
        });
    }

    /// Rebuild both views from the canonical log
    pub fn replay(&self, base: SessionMessage) -> (SessionMessage, StepRegistry) {
        (base.fold(&self.events), StepRegistry::fold(&self.events))
    }

    /// Pull fragments until the transport completes, fails, or the session is cancelled.
    pub async fn run(&mut self, mut fragments: FragmentStream) -> SessionOutcome {
        let cancel = self.handle.cancel_token();
        self.handle.set_running(true);

        let outcome = loop {
            let next = tokio::select! {
                biased;
                _ = cancel.cancelled() => None,
                next = fragments.next() => Some(next),
            };

            match next {
                None => {
                    tracing::debug!(query = %self.query, "Session cancelled");
                    break SessionOutcome::Cancelled;
                }
                Some(Some(Ok(fragment))) => {
                    self.ingest(&fragment);
                }
                Some(Some(Err(e))) => {
                    let message = e.to_string();
                    self.fail(&message);
                    break SessionOutcome::Failed { message };
                }
                Some(None) => {
                    self.finish();
                    break SessionOutcome::Completed;
                }
            }
        };

        tracing::debug!(
            query = %self.query,
            fragments = self.stats.fragments,
            applied = self.stats.applied,
            discarded = self.stats.discarded,
            "Session finished"
        );

        self.handle.set_running(false);
        let _ = self.event_tx.send(SessionEvent::Finished {
            outcome: outcome.clone(),
        });
        outcome
    }

    fn apply_records(&mut self, records: impl IntoIterator<Item = String>) -> usize {
        let mut applied = 0;
        for record in records {
            self.stats.records += 1;
            match stepwise_wire::decode(&record) {
                Some(event) => {
                    self.apply_event(event);
                    applied += 1;
                }
                None => self.stats.discarded += 1,
            }
        }
        applied
    }

    fn apply_event(&mut self, event: DecodedEvent) {
        self.stats.applied += 1;
        self.registry = std::mem::take(&mut self.registry).apply(&event);
        self.message = std::mem::take(&mut self.message).apply(&event);
        self.events.push(event.clone());
        let _ = self.event_tx.send(SessionEvent::Applied { event });
    }

    fn publish(&self) {
        self.handle.publish(SessionSnapshot {
            message: self.message.clone(),
            steps: self.registry.snapshot(),
        });
    }
}
