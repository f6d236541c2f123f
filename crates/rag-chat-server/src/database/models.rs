use serde::Serialize;
use sqlx::FromRow;

use crate::services::conversation::ScoredSnippet;

/// Row returned by the similarity query
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct ChunkMatch {
    pub chunk_id: i64,
    pub content: String,
    pub score: f32,
}

impl From<ChunkMatch> for ScoredSnippet {
    fn from(row: ChunkMatch) -> Self {
        Self {
            text: row.content,
            score: row.score,
        }
    }
}
