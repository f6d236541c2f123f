use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum ConversationError {
    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Retrieval error: {0}")]
    Retrieval(String),

    #[error("Completion error: {0}")]
    Completion(String),

    #[error("Session not found: {0}")]
    SessionNotFound(String),

    #[error("Capacity error: {0}")]
    Capacity(String),
}

impl ConversationError {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Validation(_) => "validation",
            Self::Retrieval(_) => "retrieval",
            Self::Completion(_) => "completion",
            Self::SessionNotFound(_) => "session_not_found",
            Self::Capacity(_) => "capacity",
        }
    }
}
