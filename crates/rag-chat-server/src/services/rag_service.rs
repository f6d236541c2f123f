use crate::config::RagConfig;
use crate::services::conversation::{EmbeddingProvider, RetrievalProvider, ScoredSnippet, VectorIndex};
use crate::utils::retry_once;
use anyhow::Result;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

/// Turns a query into the most relevant passages of the vector index
#[derive(Clone)]
pub struct RagService {
    pub embedding: Arc<dyn EmbeddingProvider>,
    pub index: Arc<dyn VectorIndex>,
    pub config: RagConfig,
}

impl RagService {
    pub fn new(
        embedding: Arc<dyn EmbeddingProvider>,
        index: Arc<dyn VectorIndex>,
        config: RagConfig,
    ) -> Self {
        Self {
            embedding,
            index,
            config,
        }
    }

    /// Scored passages, best first: at most `retrieval_top_k`, each strictly
    /// above `score_threshold`
    pub async fn retrieve_scored(&self, query: &str) -> Result<Vec<ScoredSnippet>> {
        if query.trim().is_empty() {
            anyhow::bail!("Query must not be empty");
        }

        let backoff = Duration::from_millis(self.config.retry_backoff_ms);
        let this = self;
        let snippets = retry_once("retrieve", backoff, move || this.search_once(query)).await?;

        let snippets = self.select(snippets);
        info!("Retrieved {} snippets", snippets.len());
        Ok(snippets)
    }

    async fn search_once(&self, query: &str) -> Result<Vec<ScoredSnippet>> {
        let embedding = self.embedding.embed(query).await?;
        self.index
            .similarity_search(&embedding, self.config.retrieval_top_k, self.config.score_threshold)
            .await
    }

    /// Enforce the threshold and cap regardless of what the index returned
    fn select(&self, mut snippets: Vec<ScoredSnippet>) -> Vec<ScoredSnippet> {
        let before = snippets.len();
        snippets.retain(|s| s.score > self.config.score_threshold);
        snippets.sort_by(|a, b| b.score.total_cmp(&a.score));
        snippets.truncate(self.config.retrieval_top_k);

        if snippets.len() != before {
            debug!("Dropped {} snippets past threshold or cap", before - snippets.len());
        }
        snippets
    }
}

#[async_trait::async_trait]
impl RetrievalProvider for RagService {
    async fn retrieve(&self, query: &str) -> Result<Vec<String>> {
        Ok(self
            .retrieve_scored(query)
            .await?
            .into_iter()
            .map(|s| s.text)
            .collect())
    }
}
