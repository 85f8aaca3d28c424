//! Conversation state threaded through the control loop

use crate::agent::types::{Message, Role};
use chrono::{DateTime, Utc};
use uuid::Uuid;

/// The ordered message history of one control-loop run.
///
/// The first message is always the original user question and is never
/// mutated after creation; every state transition appends, nothing
/// truncates. The whole conversation is discarded when the run completes.
#[derive(Debug, Clone)]
pub struct Conversation {
    /// Unique run ID
    pub id: Uuid,
    /// Messages in causal order
    pub messages: Vec<Message>,
    /// When the run started
    pub created_at: DateTime<Utc>,
}

impl Conversation {
    /// Start a conversation from the original user question
    pub fn new(question: impl Into<String>) -> Self {
        Conversation {
            id: Uuid::new_v4(),
            messages: vec![Message::user(question)],
            created_at: Utc::now(),
        }
    }

    /// The original question (first message, invariant under rewrites)
    pub fn question(&self) -> &str {
        &self.messages[0].content
    }

    /// Append a message
    pub fn push(&mut self, message: Message) {
        self.messages.push(message);
    }

    /// Content of the most recent user-turn message (original or rewritten)
    pub fn latest_question(&self) -> &str {
        self.messages
            .iter()
            .rev()
            .find(|m| m.role == Role::User)
            .map(|m| m.content.as_str())
            .unwrap_or_else(|| self.question())
    }

    /// Content of the most recent tool message, if retrieval has run
    pub fn latest_tool_content(&self) -> Option<&str> {
        self.messages
            .iter()
            .rev()
            .find(|m| m.role == Role::Tool)
            .map(|m| m.content.as_str())
    }

    /// Get message count
    pub fn message_count(&self) -> usize {
        self.messages.len()
    }
}
