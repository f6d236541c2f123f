use anyhow::Result;
use axum::extract::FromRef;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

use crate::config::Settings;
use crate::database::{DbPool, Repository};
use crate::logging::{ActivityLogger, LoggerConfig};
use crate::services::conversation::{
    Answerer, CompletionProvider, ContextBuilder, ConversationCache, ConversationManager,
    RetrievalProvider, Summarizer, VectorIndex,
};
use crate::services::{EmbeddingService, LlmService, RagService};
use crate::utils::limiters::Limiters;

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    pub conversation_manager: Arc<ConversationManager>,
    pub vector_index: Arc<dyn VectorIndex>,
    pub settings: Arc<Settings>,
}

impl AppState {
    pub fn new(
        conversation_manager: Arc<ConversationManager>,
        vector_index: Arc<dyn VectorIndex>,
        settings: Arc<Settings>,
    ) -> Self {
        Self {
            conversation_manager,
            vector_index,
            settings,
        }
    }

    /// Connect to the external services and wire the conversation core
    pub async fn from_settings(settings: Settings) -> Result<Self> {
        let limiters = Limiters::new(&settings.limits);

        let db_pool = DbPool::new(&settings.database).await?;
        info!("✅ Database connection established");

        let repository = Arc::new(Repository::new(db_pool, limiters.clone()));
        if settings.database.ensure_schema {
            repository.ensure_schema(settings.embedding.dimension).await?;
        }

        let embedding_service = Arc::new(EmbeddingService::new(
            settings.embedding.clone(),
            limiters.clone(),
        )?);

        let rag_service = Arc::new(RagService::new(
            embedding_service,
            repository.clone(),
            settings.rag.clone(),
        ));

        let answer_llm = Arc::new(LlmService::new(
            settings.llm.clone(),
            settings.llm.answer_model.clone(),
            limiters.clone(),
        )?);
        let summary_llm = Arc::new(LlmService::new(
            settings.llm.clone(),
            settings.llm.summary_model.clone(),
            limiters,
        )?);
        info!(
            "✅ LLM clients ready (answer: {}, summary: {})",
            answer_llm.model(),
            summary_llm.model()
        );

        let logger = ActivityLogger::new(LoggerConfig::from(&settings.activity_log));
        let manager = build_conversation_manager(&settings, rag_service, summary_llm, answer_llm, logger);

        Ok(Self::new(Arc::new(manager), repository, Arc::new(settings)))
    }
}

/// Assemble the orchestrator from its collaborators
pub fn build_conversation_manager(
    settings: &Settings,
    retriever: Arc<dyn RetrievalProvider>,
    summary_llm: Arc<dyn CompletionProvider>,
    answer_llm: Arc<dyn CompletionProvider>,
    logger: ActivityLogger,
) -> ConversationManager {
    let conversation = &settings.conversation;
    let backoff = Duration::from_millis(conversation.retry_backoff_ms);
    let context_builder = ContextBuilder::new(&settings.prompts);
    let summary_instruction = context_builder.summary_instruction().to_string();

    ConversationManager::new(
        ConversationCache::from_config(conversation),
        retriever,
        Summarizer::new(summary_llm, summary_instruction, backoff),
        Answerer::new(answer_llm, context_builder, backoff),
        logger,
        conversation.summarize_threshold,
    )
}

impl FromRef<AppState> for Arc<ConversationManager> {
    fn from_ref(state: &AppState) -> Self {
        state.conversation_manager.clone()
    }
}

impl FromRef<AppState> for Arc<dyn VectorIndex> {
    fn from_ref(state: &AppState) -> Self {
        state.vector_index.clone()
    }
}
