//! Conversation memory management module
//!
//! Provides per-session conversation state with:
//! - Thread-safe session store (DashMap) with idle expiry and capacity eviction
//! - History buffers compressed by summarization past a threshold
//! - Typed prompt templates for answering

mod answerer;
mod cache;
mod context_builder;
pub mod error;
pub mod history;
pub mod manager;
pub mod providers;
mod summarizer;
pub mod types;

pub use answerer::Answerer;
pub use cache::{Activation, CacheStats, ConversationCache, SessionHandle, SessionLease};
pub use context_builder::ContextBuilder;
pub use error::ConversationError;
pub use history::{HistoryBuffer, SUMMARY_LEAD_IN};
pub use manager::ConversationManager;
pub use providers::{
    CompletionProvider, EmbeddingProvider, RetrievalProvider, ScoredSnippet, VectorIndex,
};
pub use summarizer::Summarizer;
pub use types::{ConversationState, Role, Turn};

pub use crate::models::chat::SessionId;
