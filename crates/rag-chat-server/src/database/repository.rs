use super::{ChunkMatch, DbPool};
use crate::services::conversation::{ScoredSnippet, VectorIndex};
use crate::utils::limiters::Limiters;
use anyhow::{Context, Result};
use pgvector::Vector;
use tracing::{debug, info};

pub const CHUNKS_TABLE: &str = "rag_chunks";

const SIMILARITY_SQL: &str = r#"SELECT
        id AS chunk_id,
        content,
        (1 - (embedding <=> $1))::real AS score
       FROM rag_chunks
       WHERE 1 - (embedding <=> $1) > $2
       ORDER BY embedding <=> $1
       LIMIT $3"#;

/// DDL run by [`Repository::ensure_schema`]. The dimension is part of the
/// column type, so it cannot be bound as a parameter.
pub fn schema_statements(dimension: usize) -> Vec<String> {
    vec![
        "CREATE EXTENSION IF NOT EXISTS vector".to_string(),
        format!(
            "CREATE TABLE IF NOT EXISTS {CHUNKS_TABLE} (
                id BIGSERIAL PRIMARY KEY,
                source TEXT,
                content TEXT NOT NULL,
                embedding vector({dimension}) NOT NULL,
                created_at TIMESTAMPTZ NOT NULL DEFAULT now()
            )"
        ),
        format!(
            "CREATE INDEX IF NOT EXISTS {CHUNKS_TABLE}_embedding_hnsw
                ON {CHUNKS_TABLE} USING hnsw (embedding vector_cosine_ops)"
        ),
    ]
}

/// pgvector-backed passage store
pub struct Repository {
    pool: DbPool,
    limiters: Limiters,
}

impl Repository {
    pub fn new(pool: DbPool, limiters: Limiters) -> Self {
        Self { pool, limiters }
    }

    /// Create the extension, table and index when missing, and refuse to run
    /// against a table built for another embedding dimension.
    pub async fn ensure_schema(&self, dimension: usize) -> Result<()> {
        for statement in schema_statements(dimension) {
            sqlx::query(&statement)
                .execute(self.pool.get_pool())
                .await
                .with_context(|| format!("Schema statement failed: {}", statement))?;
        }

        // atttypmod of a vector column is its dimension
        let existing = sqlx::query_scalar::<_, i32>(
            r#"SELECT atttypmod FROM pg_attribute
               WHERE attrelid = $1::regclass AND attname = 'embedding'"#,
        )
        .bind(CHUNKS_TABLE)
        .fetch_one(self.pool.get_pool())
        .await
        .context("Failed to read embedding column dimension")?;

        if existing > 0 && existing as usize != dimension {
            anyhow::bail!(
                "{} stores {}-dimensional embeddings but the embedding model produces {}",
                CHUNKS_TABLE,
                existing,
                dimension
            );
        }

        info!("Vector index ready: table={}, dimension={}", CHUNKS_TABLE, dimension);
        Ok(())
    }

    /// Top `k` chunks by cosine similarity, strictly above `score_threshold`
    pub async fn search_chunks(
        &self,
        query_embedding: Vector,
        k: i64,
        score_threshold: f32,
    ) -> Result<Vec<ChunkMatch>> {
        let (_permit, waited) = Limiters::acquire_timed(
            self.limiters.db_search.clone(),
            self.limiters.acquire_timeout,
            "db_search",
        )
        .await?;

        let chunks = sqlx::query_as::<_, ChunkMatch>(SIMILARITY_SQL)
            .bind(query_embedding)
            .bind(score_threshold as f64)
            .bind(k)
            .fetch_all(self.pool.get_pool())
            .await?;

        debug!("Found {} relevant chunks (limiter wait {:?})", chunks.len(), waited);

        Ok(chunks)
    }

    pub async fn ping(&self) -> Result<()> {
        sqlx::query("SELECT 1")
            .execute(self.pool.get_pool())
            .await?;
        Ok(())
    }
}

#[async_trait::async_trait]
impl VectorIndex for Repository {
    async fn similarity_search(
        &self,
        embedding: &[f32],
        k: usize,
        score_threshold: f32,
    ) -> Result<Vec<ScoredSnippet>> {
        let rows = self
            .search_chunks(Vector::from(embedding.to_vec()), k as i64, score_threshold)
            .await?;
        Ok(rows.into_iter().map(ScoredSnippet::from).collect())
    }

    async fn health_check(&self) -> Result<()> {
        self.ping().await
    }
}
