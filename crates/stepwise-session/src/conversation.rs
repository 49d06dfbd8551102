//! Conversation history: user queries and the replies projected for them.

use crate::projector::SessionMessage;

/// Ordered message history for one chat
#[derive(Debug, Clone, Default)]
pub struct Conversation {
    messages: Vec<SessionMessage>,
}

impl Conversation {
    /// Create an empty conversation
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a conversation opened by an assistant greeting
    pub fn with_greeting(text: impl Into<String>) -> Self {
        Self {
            messages: vec![SessionMessage::assistant_with_content(text)],
        }
    }

    /// Record a user query and return the empty reply placeholder for it
    pub fn submit(&mut self, query: impl Into<String>) -> SessionMessage {
        self.messages.push(SessionMessage::user(query));
        let reply = SessionMessage::assistant();
        self.messages.push(reply.clone());
        reply
    }

    /// Store the projected reply, superseding the placeholder with the same id.
    ///
    /// Returns `false` if no message with that id exists.
    pub fn complete(&mut self, reply: SessionMessage) -> bool {
        match self.messages.iter_mut().find(|m| m.id == reply.id) {
            Some(slot) => {
                *slot = reply;
                true
            }
            None => false,
        }
    }

    pub fn messages(&self) -> &[SessionMessage] {
        &self.messages
    }

    /// Most recent assistant message
    pub fn last_reply(&self) -> Option<&SessionMessage> {
        self.messages.iter().rev().find(|m| m.is_assistant())
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    /// Drop all messages
    pub fn clear(&mut self) {
        self.messages.clear();
    }
}
