use axum::extract::rejection::JsonRejection;
use axum::extract::{Query, State};
use axum::Json;
use std::sync::Arc;
use tracing::info;

use crate::models::chat::{QueryRequest, QueryResponse, SessionParams};
use crate::services::conversation::ConversationManager;
use crate::utils::error::ApiError;

/// `POST /query?session_id=<id>`
pub async fn query_handler(
    State(manager): State<Arc<ConversationManager>>,
    Query(params): Query<SessionParams>,
    payload: Result<Json<QueryRequest>, JsonRejection>,
) -> Result<Json<QueryResponse>, ApiError> {
    let Json(request) = payload.map_err(|e| ApiError::BadRequest(e.body_text()))?;

    info!(
        "Query for session {} ({} chars)",
        params.session_id,
        request.user_query.len()
    );

    let rag_response = manager
        .handle_query(&params.session_id, &request.user_query)
        .await?;

    Ok(Json(QueryResponse { rag_response }))
}
