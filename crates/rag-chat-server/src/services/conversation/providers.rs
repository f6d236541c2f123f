use anyhow::Result;

use super::types::Turn;

/// Passage returned by the vector index
#[derive(Debug, Clone, PartialEq)]
pub struct ScoredSnippet {
    pub text: String,
    pub score: f32,
}

/// Trait for embedding service
#[cfg_attr(test, mockall::automock)]
#[async_trait::async_trait]
pub trait EmbeddingProvider: Send + Sync {
    async fn embed(&self, text: &str) -> Result<Vec<f32>>;
}

/// Trait for the vector index
#[cfg_attr(test, mockall::automock)]
#[async_trait::async_trait]
pub trait VectorIndex: Send + Sync {
    async fn similarity_search(
        &self,
        embedding: &[f32],
        k: usize,
        score_threshold: f32,
    ) -> Result<Vec<ScoredSnippet>>;

    async fn health_check(&self) -> Result<()>;
}

/// Trait for LLM completion. The same shape serves summaries and answers.
#[cfg_attr(test, mockall::automock)]
#[async_trait::async_trait]
pub trait CompletionProvider: Send + Sync {
    async fn complete(&self, system_instruction: &str, conversation: &[Turn]) -> Result<String>;
}

/// Trait for the retriever adapter used by the orchestrator
#[cfg_attr(test, mockall::automock)]
#[async_trait::async_trait]
pub trait RetrievalProvider: Send + Sync {
    async fn retrieve(&self, query: &str) -> Result<Vec<String>>;
}
