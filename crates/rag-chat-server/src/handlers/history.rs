use axum::extract::{Query, State};
use axum::Json;
use std::sync::Arc;

use crate::models::chat::{ExchangeRecord, SessionParams};
use crate::services::conversation::ConversationManager;
use crate::utils::error::ApiError;

/// `GET /history?session_id=<id>`
pub async fn history_handler(
    State(manager): State<Arc<ConversationManager>>,
    Query(params): Query<SessionParams>,
) -> Result<Json<Vec<ExchangeRecord>>, ApiError> {
    if params.session_id.trim().is_empty() {
        return Err(ApiError::BadRequest("session_id must not be empty".to_string()));
    }

    let history = manager.history(&params.session_id).await?;
    Ok(Json(history))
}
