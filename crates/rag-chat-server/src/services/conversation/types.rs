use serde::{Deserialize, Serialize};
use crate::models::chat::{ExchangeRecord, SessionId};
use super::history::HistoryBuffer;

/// Speaker of a turn
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Model,
}

/// One message of the conversation. Immutable once appended.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Turn {
    pub role: Role,
    pub text: String,
}

impl Turn {
    pub fn user(text: impl Into<String>) -> Self {
        Self { role: Role::User, text: text.into() }
    }

    pub fn model(text: impl Into<String>) -> Self {
        Self { role: Role::Model, text: text.into() }
    }
}

/// Everything a session owns
#[derive(Debug, Clone)]
pub struct ConversationState {
    pub session_id: SessionId,

    /// Turns sent to the LLM on every call
    pub buffer: HistoryBuffer,

    /// (query, answer) pairs exposed through the history endpoint
    pub exchanges: Vec<ExchangeRecord>,
}

impl ConversationState {
    pub fn new(session_id: SessionId) -> Self {
        Self {
            session_id,
            buffer: HistoryBuffer::new(),
            exchanges: Vec::new(),
        }
    }

    /// Record a completed exchange and adopt the buffer it was produced with
    pub fn commit(&mut self, buffer: HistoryBuffer, query: &str, answer: &str) {
        self.buffer = buffer;
        self.exchanges.push(ExchangeRecord {
            user_query: query.to_string(),
            rag_response: answer.to_string(),
        });
    }
}
