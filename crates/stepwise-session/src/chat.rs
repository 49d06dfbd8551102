//! Chat: drives one session per query and keeps the conversation history

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;

use crate::conversation::Conversation;
use crate::events::{SessionEvent, SessionOutcome};
use crate::handle::SessionHandle;
use crate::projector::SessionMessage;
use crate::registry::Step;
use crate::session::{Session, SessionStats};
use crate::transport::Transport;

/// Final state of one answered query
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatReply {
    pub outcome: SessionOutcome,
    pub message: SessionMessage,
    pub steps: Vec<Step>,
    pub stats: SessionStats,
}

/// Sends queries over a transport and records the projected replies
pub struct Chat {
    transport: Arc<dyn Transport>,
    conversation: Conversation,
    event_tx: broadcast::Sender<SessionEvent>,
    handle: SessionHandle,
}

impl Chat {
    /// Create a chat over a transport
    pub fn new(transport: Arc<dyn Transport>) -> Self {
        let (event_tx, _) = broadcast::channel(256);
        Self {
            transport,
            conversation: Conversation::new(),
            event_tx,
            handle: SessionHandle::new(CancellationToken::new()),
        }
    }

    /// Start from an existing conversation
    pub fn with_conversation(mut self, conversation: Conversation) -> Self {
        self.conversation = conversation;
        self
    }

    /// Subscribe to events of every session this chat runs
    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.event_tx.subscribe()
    }

    /// Snapshot view of the session currently (or most recently) running.
    ///
    /// Unlike the event feed, snapshots are always fully merged, so a slow
    /// reader can skip ahead without losing anything.
    /// Cancel through the token passed to [`Chat::ask`], not this handle.
    pub fn handle(&self) -> SessionHandle {
        self.handle.clone()
    }

    pub fn conversation(&self) -> &Conversation {
        &self.conversation
    }

    /// Ask one query and consume its stream to the end.
    ///
    /// Failing to open the stream is a transport failure: the reply carries
    /// the failure message. Cancelling keeps whatever was already applied.
    pub async fn ask(&mut self, query: &str, cancel: CancellationToken) -> ChatReply {
        let placeholder = self.conversation.submit(query);
        let mut session = Session::new(query)
            .with_handle(self.handle.clone())
            .with_message(placeholder)
            .with_cancel(cancel.clone())
            .with_event_sender(self.event_tx.clone());

        let opened = tokio::select! {
            biased;
            _ = cancel.cancelled() => None,
            opened = self.transport.open(query) => Some(opened),
        };

        let outcome = match opened {
            Some(Ok(fragments)) => session.run(fragments).await,
            Some(Err(e)) => {
                let message = e.to_string();
                session.fail(&message);
                self.finished(SessionOutcome::Failed { message })
            }
            None => self.finished(SessionOutcome::Cancelled),
        };

        let stats = session.stats();
        let (message, registry) = session.into_parts();
        self.conversation.complete(message.clone());

        ChatReply {
            outcome,
            message,
            steps: registry.snapshot(),
            stats,
        }
    }

    fn finished(&self, outcome: SessionOutcome) -> SessionOutcome {
        let _ = self.event_tx.send(SessionEvent::Finished {
            outcome: outcome.clone(),
        });
        outcome
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{Error, Result};
    use crate::projector::{Role, TRANSPORT_FAILURE_MESSAGE};
    use async_trait::async_trait;
    use futures::stream;
    use parking_lot::Mutex;
    use stepwise_wire::{FragmentStream, StepStatus};

    /// Replays canned fragments and records the queries it was asked
    struct ScriptedTransport {
        fragments: Vec<&'static str>,
        queries: Mutex<Vec<String>>,
    }

    impl ScriptedTransport {
        fn new(fragments: Vec<&'static str>) -> Self {
            Self {
                fragments,
                queries: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl Transport for ScriptedTransport {
        async fn open(&self, query: &str) -> Result<FragmentStream> {
            self.queries.lock().push(query.to_string());
            let chunks: Vec<stepwise_wire::Result<Vec<u8>>> = self
                .fragments
                .iter()
                .map(|f| Ok(f.as_bytes().to_vec()))
                .collect();
            Ok(Box::pin(stream::iter(chunks)))
        }
    }

    struct RefusingTransport;

    #[async_trait]
    impl Transport for RefusingTransport {
        async fn open(&self, _query: &str) -> Result<FragmentStream> {
            Err(Error::Wire(stepwise_wire::Error::status(
                500,
                "Internal Server Error",
            )))
        }
    }

    #[tokio::test]
    async fn test_ask_records_reply() {
        let transport = Arc::new(ScriptedTransport::new(vec![
            "data: {\"type\":\"start\",\"session_id\":\"abc\"}\n\ndata: {\"type\":\"step\",\"step_id\":1,",
            "\"step_name\":\"analyze_query\",\"status\":\"processing\"}\n\ndata: {\"type\":\"content\",\"content\":\"10 km is 6.21 miles\"}\n\n",
            "data: {\"type\":\"end\"}\n\n",
        ]));
        let mut chat = Chat::new(transport.clone());

        let reply = chat.ask("convert 10 km to miles", CancellationToken::new()).await;

        assert_eq!(reply.outcome, SessionOutcome::Completed);
        assert_eq!(reply.message.content, "10 km is 6.21 miles");
        assert_eq!(reply.message.session_id.as_deref(), Some("abc"));
        assert_eq!(reply.steps.len(), 1);
        assert_eq!(reply.steps[0].status, StepStatus::Completed);

        assert_eq!(transport.queries.lock().as_slice(), ["convert 10 km to miles"]);

        let messages = chat.conversation().messages();
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0].role, Role::User);
        assert_eq!(messages[1], reply.message);
    }

    #[tokio::test]
    async fn test_open_failure_is_transport_failure() {
        let mut chat = Chat::new(Arc::new(RefusingTransport));
        let mut rx = chat.subscribe();

        let reply = chat.ask("q", CancellationToken::new()).await;

        assert!(reply.outcome.is_failed());
        assert!(reply.message.is_error);
        assert_eq!(reply.message.content, TRANSPORT_FAILURE_MESSAGE);
        assert!(reply.steps.is_empty());
        assert_eq!(chat.conversation().last_reply().unwrap(), &reply.message);

        let mut terminal = 0;
        while let Ok(event) = rx.try_recv() {
            if event.is_terminal() {
                terminal += 1;
            }
        }
        assert_eq!(terminal, 1);
    }

    #[tokio::test]
    async fn test_cancelled_before_open() {
        let transport = Arc::new(ScriptedTransport::new(vec!["data: {\"type\":\"end\"}\n"]));
        let mut chat = Chat::new(transport.clone());
        let cancel = CancellationToken::new();
        cancel.cancel();

        let reply = chat.ask("q", cancel).await;
        assert_eq!(reply.outcome, SessionOutcome::Cancelled);
        assert!(!reply.message.is_error);
        assert!(transport.queries.lock().is_empty());
    }

    #[tokio::test]
    async fn test_handle_survives_lagging_subscriber() {
        let mut body = String::new();
        for i in 0..400 {
            body.push_str(&format!("data: {{\"type\":\"content\",\"content\":\"w{} \"}}\n", i));
        }
        body.push_str("data: {\"type\":\"end\"}\n");
        let body: &'static str = Box::leak(body.into_boxed_str());

        let mut chat = Chat::new(Arc::new(ScriptedTransport::new(vec![body])));
        let mut rx = chat.subscribe();
        let handle = chat.handle();

        let reply = chat.ask("q", CancellationToken::new()).await;

        assert!(matches!(
            rx.recv().await,
            Err(broadcast::error::RecvError::Lagged(_))
        ));
        let snapshot = handle.snapshot();
        assert_eq!(snapshot.message, reply.message);
        assert!(snapshot.message.content.ends_with("w399 "));
    }

    #[tokio::test]
    async fn test_consecutive_queries_are_independent() {
        let transport = Arc::new(ScriptedTransport::new(vec![
            "data: {\"type\":\"step\",\"step_id\":1,\"step_name\":\"analyze_query\"}\n",
            "data: {\"type\":\"content\",\"content\":\"answer\"}\n",
        ]));
        let mut chat = Chat::new(transport);

        let first = chat.ask("one", CancellationToken::new()).await;
        let second = chat.ask("two", CancellationToken::new()).await;

        assert_ne!(first.message.id, second.message.id);
        assert_eq!(second.message.content, "answer");
        assert_eq!(second.steps.len(), 1);
        assert_eq!(chat.conversation().len(), 4);
    }
}
