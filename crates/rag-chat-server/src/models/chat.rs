use serde::{Deserialize, Serialize};

pub type SessionId = String;

// ===== REQUEST MODELS =====

#[derive(Debug, Deserialize)]
pub struct QueryRequest {
    pub user_query: String,
}

/// `?session_id=` on both endpoints
#[derive(Debug, Deserialize)]
pub struct SessionParams {
    #[serde(default)]
    pub session_id: String,
}

// ===== RESPONSE MODELS =====

#[derive(Debug, Serialize, Deserialize)]
pub struct QueryResponse {
    pub rag_response: String,
}

/// One answered query as exposed by `GET /history`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExchangeRecord {
    pub user_query: String,
    pub rag_response: String,
}
