use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::logging::{ActivityLog, ActivityLogger, ActivityStatus, ActivityType};
use crate::models::chat::ExchangeRecord;

use super::answerer::Answerer;
use super::cache::{CacheStats, ConversationCache, SessionLease};
use super::error::ConversationError;
use super::providers::RetrievalProvider;
use super::summarizer::Summarizer;

/// Runs one query through retrieval, optional summarization and answering
pub struct ConversationManager {
    cache: ConversationCache,
    retriever: Arc<dyn RetrievalProvider>,
    summarizer: Summarizer,
    answerer: Answerer,
    logger: ActivityLogger,
    summarize_threshold: usize,
}

impl ConversationManager {
    pub fn new(
        cache: ConversationCache,
        retriever: Arc<dyn RetrievalProvider>,
        summarizer: Summarizer,
        answerer: Answerer,
        logger: ActivityLogger,
        summarize_threshold: usize,
    ) -> Self {
        Self {
            cache,
            retriever,
            summarizer,
            answerer,
            logger,
            summarize_threshold,
        }
    }

    /// Answer `query` within `session_id`, creating the session on first use.
    ///
    /// The session is only written once the answer exists. An error, or the
    /// future being dropped midway, leaves buffer and history as they were,
    /// and a session whose first query fails is never created.
    pub async fn handle_query(&self, session_id: &str, query: &str) -> Result<String, ConversationError> {
        let session_id = session_id.trim();
        if session_id.is_empty() {
            return Err(ConversationError::Validation("session_id must not be empty".to_string()));
        }
        if query.trim().is_empty() {
            return Err(ConversationError::Validation("user_query must not be empty".to_string()));
        }

        let request_id = Uuid::new_v4().to_string();
        let started = Instant::now();

        self.logger.log(
            ActivityLog::builder(session_id, &request_id, ActivityType::QueryReceived)
                .message(query)
                .status(ActivityStatus::Info)
                .build(),
        );

        // Best effort: answer without context rather than fail the query
        let retrieval_start = Instant::now();
        let context = match self.retriever.retrieve(query).await {
            Ok(snippets) => {
                self.logger.log(
                    ActivityLog::builder(session_id, &request_id, ActivityType::RetrievalExecuted)
                        .snippet_count(snippets.len())
                        .retrieval_duration(retrieval_start.elapsed().as_millis() as u64)
                        .build(),
                );
                snippets
            }
            Err(e) => {
                let err = ConversationError::Retrieval(e.to_string());
                warn!("Retrieval failed for session {}, continuing without context: {}", session_id, err);
                self.logger.log(
                    ActivityLog::builder(session_id, &request_id, ActivityType::RetrievalError)
                        .error(err.to_string(), err.kind())
                        .retrieval_duration(retrieval_start.elapsed().as_millis() as u64)
                        .build(),
                );
                Vec::new()
            }
        };

        let lease = self.cache.lease(session_id).map_err(|e| {
            self.logger.log(
                ActivityLog::builder(session_id, &request_id, ActivityType::SessionRejected)
                    .error(e.to_string(), e.kind())
                    .build(),
            );
            e
        })?;

        let outcome = self
            .answer_in_session(&lease, session_id, &request_id, query, &context)
            .await;
        let (answer, buffer_size, llm_duration) = match outcome {
            Ok(done) => done,
            Err(e) => {
                self.cache.release(session_id, lease);
                return Err(e);
            }
        };

        self.logger.log(
            ActivityLog::builder(session_id, &request_id, ActivityType::AnswerGenerated)
                .response(&answer)
                .snippet_count(context.len())
                .buffer_size(buffer_size)
                .llm_duration(llm_duration)
                .processing_time(started.elapsed().as_millis() as u64)
                .build(),
        );

        Ok(answer)
    }

    /// Summarize and answer under the session lock, committing on success.
    /// Returns the answer, the committed buffer size and the answer call time.
    async fn answer_in_session(
        &self,
        lease: &SessionLease,
        session_id: &str,
        request_id: &str,
        query: &str,
        context: &[String],
    ) -> Result<(String, usize, u64), ConversationError> {
        let mut state = lease.handle().lock().await;
        let mut working = state.buffer.clone();

        if working.size() > self.summarize_threshold {
            debug!(
                "Buffer of session {} holds {} turns (threshold {}), summarizing",
                session_id,
                working.size(),
                self.summarize_threshold
            );
            self.logger.log(
                ActivityLog::builder(session_id, request_id, ActivityType::SummarizationTriggered)
                    .buffer_size(working.size())
                    .status(ActivityStatus::Info)
                    .build(),
            );

            let llm_start = Instant::now();
            if let Err(e) = self.summarizer.summarize(&mut working).await {
                self.logger.log(
                    ActivityLog::builder(session_id, request_id, ActivityType::SummarizationError)
                        .error(e.to_string(), e.kind())
                        .llm_duration(llm_start.elapsed().as_millis() as u64)
                        .build(),
                );
                return Err(e);
            }
        }

        let llm_start = Instant::now();
        let answer = match self.answerer.answer(context, query, &mut working).await {
            Ok(answer) => answer,
            Err(e) => {
                self.logger.log(
                    ActivityLog::builder(session_id, request_id, ActivityType::LlmError)
                        .error(e.to_string(), e.kind())
                        .llm_duration(llm_start.elapsed().as_millis() as u64)
                        .build(),
                );
                return Err(e);
            }
        };
        let llm_duration = llm_start.elapsed().as_millis() as u64;

        let buffer_size = working.size();
        state.commit(working, query, &answer);

        let activation = self.cache.activate(session_id, lease);
        if let Some(evicted) = &activation.evicted {
            self.logger.log(
                ActivityLog::builder(evicted.as_str(), request_id, ActivityType::SessionEvicted)
                    .status(ActivityStatus::Warning)
                    .build(),
            );
        }
        if activation.created {
            info!("New session: {}", session_id);
            self.logger.log(
                ActivityLog::builder(session_id, request_id, ActivityType::SessionCreated)
                    .status(ActivityStatus::Info)
                    .build(),
            );
        }

        Ok((answer, buffer_size, llm_duration))
    }

    /// Exchanges recorded for `session_id`, oldest first
    pub async fn history(&self, session_id: &str) -> Result<Vec<ExchangeRecord>, ConversationError> {
        let handle = self
            .cache
            .get(session_id.trim())
            .ok_or_else(|| ConversationError::SessionNotFound(session_id.to_string()))?;

        let state = handle.lock().await;
        Ok(state.exchanges.clone())
    }

    /// Cleanup expired sessions (call periodically)
    pub fn cleanup_expired_sessions(&self) -> usize {
        let removed = self.cache.cleanup_expired();
        if removed > 0 {
            self.logger.log(
                ActivityLog::builder("*", Uuid::new_v4().to_string(), ActivityType::SessionExpired)
                    .message(format!("{} idle sessions removed", removed))
                    .status(ActivityStatus::Info)
                    .build(),
            );
        }
        removed
    }

    pub fn cache_stats(&self) -> CacheStats {
        self.cache.stats()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::Result;
    use parking_lot::Mutex;
    use std::time::Duration;
    use crate::logging::LoggerConfig;
    use crate::services::conversation::context_builder::ContextBuilder;
    use crate::services::conversation::history::SUMMARY_LEAD_IN;
    use crate::services::conversation::providers::{
        CompletionProvider, MockCompletionProvider, MockRetrievalProvider,
    };
    use crate::services::conversation::types::{Role, Turn};

    const BACKOFF: Duration = Duration::from_millis(1);

    fn logger() -> ActivityLogger {
        ActivityLogger::new(LoggerConfig {
            worker_count: 0,
            ..LoggerConfig::default()
        })
    }

    fn retriever_with(snippets: usize) -> MockRetrievalProvider {
        let mut retriever = MockRetrievalProvider::new();
        retriever
            .expect_retrieve()
            .returning(move |_| Ok((0..snippets).map(|i| format!("snippet {}", i)).collect()));
        retriever
    }

    fn manager(
        cache: ConversationCache,
        retriever: MockRetrievalProvider,
        summary_llm: MockCompletionProvider,
        answer_llm: MockCompletionProvider,
    ) -> ConversationManager {
        ConversationManager::new(
            cache,
            Arc::new(retriever),
            Summarizer::new(Arc::new(summary_llm), "summarize".to_string(), BACKOFF),
            Answerer::new(Arc::new(answer_llm), ContextBuilder::default(), BACKOFF),
            logger(),
            10,
        )
    }

    fn cache() -> ConversationCache {
        ConversationCache::new(Duration::from_secs(60), 100, 100.0)
    }

    /// Give the session `turns` turns of prior history
    async fn seed(cache: &ConversationCache, session_id: &str, turns: usize) {
        let lease = cache.lease(session_id).unwrap();
        {
            let mut state = lease.handle().lock().await;
            for i in 0..turns {
                if i % 2 == 0 {
                    state.buffer.append(Turn::user(format!("q{}", i)));
                } else {
                    state.buffer.append(Turn::model(format!("a{}", i)));
                }
            }
        }
        cache.activate(session_id, &lease);
    }

    /// Answers after `delay` and records the conversation length of each call
    struct SlowLlm {
        delay: Duration,
        seen: Mutex<Vec<usize>>,
    }

    #[async_trait::async_trait]
    impl CompletionProvider for SlowLlm {
        async fn complete(&self, _instruction: &str, conversation: &[Turn]) -> Result<String> {
            self.seen.lock().push(conversation.len());
            tokio::time::sleep(self.delay).await;
            let last = conversation.last().map(|turn| turn.text.clone()).unwrap_or_default();
            Ok(format!("re: {}", last))
        }
    }

    /// Never answers
    struct StalledLlm;

    #[async_trait::async_trait]
    impl CompletionProvider for StalledLlm {
        async fn complete(&self, _instruction: &str, _conversation: &[Turn]) -> Result<String> {
            std::future::pending().await
        }
    }

    fn manager_with_llm(cache: ConversationCache, answer_llm: Arc<dyn CompletionProvider>) -> ConversationManager {
        ConversationManager::new(
            cache,
            Arc::new(retriever_with(1)),
            Summarizer::new(Arc::new(MockCompletionProvider::new()), "summarize".to_string(), BACKOFF),
            Answerer::new(answer_llm, ContextBuilder::default(), BACKOFF),
            logger(),
            10,
        )
    }

    async fn buffer_size(cache: &ConversationCache, session_id: &str) -> usize {
        cache.get(session_id).unwrap().lock().await.buffer.size()
    }

    #[tokio::test]
    async fn test_first_query_creates_session_and_records_exchange() {
        let mut answer_llm = MockCompletionProvider::new();
        answer_llm
            .expect_complete()
            .times(1)
            .returning(|_, _| Ok("Overfitting is memorizing noise.".to_string()));
        let mut summary_llm = MockCompletionProvider::new();
        summary_llm.expect_complete().never();

        let cache = cache();
        let manager = manager(cache.clone(), retriever_with(3), summary_llm, answer_llm);

        let answer = manager.handle_query("s1", "What is overfitting?").await.unwrap();

        assert_eq!(answer, "Overfitting is memorizing noise.");
        assert_eq!(buffer_size(&cache, "s1").await, 2);

        let history = manager.history("s1").await.unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].user_query, "What is overfitting?");
        assert_eq!(history[0].rag_response, "Overfitting is memorizing noise.");
    }

    #[tokio::test]
    async fn test_buffer_over_threshold_is_summarized_before_answer() {
        let mut summary_llm = MockCompletionProvider::new();
        summary_llm
            .expect_complete()
            .withf(|_: &str, conversation: &[Turn]| conversation.len() == 11)
            .times(1)
            .returning(|_, _| Ok("We covered regularization.".to_string()));

        let mut answer_llm = MockCompletionProvider::new();
        answer_llm
            .expect_complete()
            .withf(|_: &str, conversation: &[Turn]| {
                conversation.len() == 2 && conversation[0].text.starts_with(SUMMARY_LEAD_IN)
            })
            .times(1)
            .returning(|_, _| Ok("L2 shrinks weights.".to_string()));

        let cache = cache();
        seed(&cache, "s1", 11).await;
        let manager = manager(cache.clone(), retriever_with(2), summary_llm, answer_llm);

        manager.handle_query("s1", "And L2?").await.unwrap();

        let handle = cache.get("s1").unwrap();
        let state = handle.lock().await;
        assert_eq!(state.buffer.size(), 3);
        assert_eq!(state.buffer.turns()[0].role, Role::User);
        assert!(state.buffer.turns()[0].text.starts_with(SUMMARY_LEAD_IN));
    }

    #[tokio::test]
    async fn test_buffer_at_threshold_is_not_summarized() {
        let mut summary_llm = MockCompletionProvider::new();
        summary_llm.expect_complete().never();
        let mut answer_llm = MockCompletionProvider::new();
        answer_llm
            .expect_complete()
            .times(1)
            .returning(|_, _| Ok("ok".to_string()));

        let cache = cache();
        seed(&cache, "s1", 10).await;
        let manager = manager(cache.clone(), retriever_with(1), summary_llm, answer_llm);

        manager.handle_query("s1", "next").await.unwrap();
        assert_eq!(buffer_size(&cache, "s1").await, 12);
    }

    #[tokio::test]
    async fn test_retrieval_failure_answers_without_context() {
        let mut retriever = MockRetrievalProvider::new();
        retriever
            .expect_retrieve()
            .returning(|_| Err(anyhow::anyhow!("index unreachable")));

        let mut answer_llm = MockCompletionProvider::new();
        answer_llm
            .expect_complete()
            .withf(|instruction: &str, _: &[Turn]| instruction.contains("no relevant context was found"))
            .times(1)
            .returning(|_, _| Ok("Sorry! I could not find the answer.".to_string()));

        let cache = cache();
        let manager = manager(cache.clone(), retriever, MockCompletionProvider::new(), answer_llm);

        let answer = manager.handle_query("s1", "What is a transformer?").await.unwrap();
        assert_eq!(answer, "Sorry! I could not find the answer.");
        assert_eq!(buffer_size(&cache, "s1").await, 2);
    }

    #[tokio::test]
    async fn test_answer_failure_leaves_session_unchanged() {
        let mut answer_llm = MockCompletionProvider::new();
        answer_llm
            .expect_complete()
            .returning(|_, _| Err(anyhow::anyhow!("upstream 503")));

        let cache = cache();
        seed(&cache, "s1", 4).await;
        let manager = manager(cache.clone(), retriever_with(2), MockCompletionProvider::new(), answer_llm);

        let err = manager.handle_query("s1", "q").await.unwrap_err();

        assert!(matches!(err, ConversationError::Completion(_)));
        assert_eq!(buffer_size(&cache, "s1").await, 4);
        assert!(manager.history("s1").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_summary_failure_leaves_session_unchanged() {
        let mut summary_llm = MockCompletionProvider::new();
        summary_llm
            .expect_complete()
            .returning(|_, _| Err(anyhow::anyhow!("timeout")));
        let mut answer_llm = MockCompletionProvider::new();
        answer_llm.expect_complete().never();

        let cache = cache();
        seed(&cache, "s1", 12).await;
        let manager = manager(cache.clone(), retriever_with(2), summary_llm, answer_llm);

        let err = manager.handle_query("s1", "q").await.unwrap_err();

        assert!(matches!(err, ConversationError::Completion(_)));
        assert_eq!(buffer_size(&cache, "s1").await, 12);
    }

    #[tokio::test]
    async fn test_history_of_unknown_session_is_not_found() {
        let manager = manager(
            cache(),
            MockRetrievalProvider::new(),
            MockCompletionProvider::new(),
            MockCompletionProvider::new(),
        );

        let err = manager.history("never-seen").await.unwrap_err();
        assert!(matches!(err, ConversationError::SessionNotFound(_)));
    }

    #[tokio::test]
    async fn test_blank_input_is_rejected_before_retrieval() {
        let mut retriever = MockRetrievalProvider::new();
        retriever.expect_retrieve().never();

        let cache = cache();
        let manager = manager(
            cache.clone(),
            retriever,
            MockCompletionProvider::new(),
            MockCompletionProvider::new(),
        );

        assert!(matches!(
            manager.handle_query("s1", "  ").await,
            Err(ConversationError::Validation(_))
        ));
        assert!(matches!(
            manager.handle_query("", "hello").await,
            Err(ConversationError::Validation(_))
        ));
        assert!(cache.is_empty());
    }

    #[tokio::test]
    async fn test_sessions_do_not_share_history() {
        let mut answer_llm = MockCompletionProvider::new();
        answer_llm
            .expect_complete()
            .withf(|_: &str, conversation: &[Turn]| conversation.len() == 1)
            .times(2)
            .returning(|_, conversation| Ok(format!("re: {}", conversation[0].text)));

        let cache = cache();
        let manager = manager(cache.clone(), retriever_with(1), MockCompletionProvider::new(), answer_llm);

        manager.handle_query("a", "from a").await.unwrap();
        manager.handle_query("b", "from b").await.unwrap();

        assert_eq!(manager.history("a").await.unwrap()[0].rag_response, "re: from a");
        assert_eq!(manager.history("b").await.unwrap()[0].rag_response, "re: from b");
    }

    #[tokio::test]
    async fn test_failed_first_query_creates_no_session() {
        let mut answer_llm = MockCompletionProvider::new();
        answer_llm
            .expect_complete()
            .returning(|_, conversation| match conversation[0].text.as_str() {
                "hello" => Ok("hi".to_string()),
                _ => Err(anyhow::anyhow!("upstream 503")),
            });

        let cache = ConversationCache::new(Duration::from_secs(60), 2, 100.0);
        let manager = manager(cache.clone(), retriever_with(1), MockCompletionProvider::new(), answer_llm);

        manager.handle_query("alice", "hello").await.unwrap();
        assert!(manager.handle_query("x1", "boom").await.is_err());
        assert!(manager.handle_query("x2", "boom").await.is_err());

        assert!(matches!(
            manager.history("x1").await,
            Err(ConversationError::SessionNotFound(_))
        ));
        assert_eq!(manager.history("alice").await.unwrap().len(), 1);
        assert_eq!(cache.len(), 1);
        assert_eq!(manager.cache_stats().pending_sessions, 0);
    }

    #[tokio::test]
    async fn test_same_session_queries_run_one_at_a_time() {
        let llm = Arc::new(SlowLlm {
            delay: Duration::from_millis(20),
            seen: Mutex::new(Vec::new()),
        });
        let cache = cache();
        let manager = manager_with_llm(cache.clone(), llm.clone());

        let (first, second) = tokio::join!(
            manager.handle_query("s1", "first"),
            manager.handle_query("s1", "second"),
        );
        assert_eq!(first.unwrap(), "re: first");
        assert_eq!(second.unwrap(), "re: second");

        // The second call saw the first exchange already committed
        assert_eq!(*llm.seen.lock(), vec![1, 3]);
        assert_eq!(buffer_size(&cache, "s1").await, 4);

        let history = manager.history("s1").await.unwrap();
        let queries: Vec<_> = history.iter().map(|e| e.user_query.as_str()).collect();
        assert_eq!(queries, vec!["first", "second"]);
    }

    #[tokio::test]
    async fn test_dropped_query_leaves_session_unchanged() {
        let cache = cache();
        seed(&cache, "s1", 2).await;
        let manager = manager_with_llm(cache.clone(), Arc::new(StalledLlm));

        let timed_out = tokio::time::timeout(
            Duration::from_millis(20),
            manager.handle_query("s1", "never answered"),
        )
        .await;
        assert!(timed_out.is_err());

        // Lock released and nothing committed
        assert_eq!(buffer_size(&cache, "s1").await, 2);
        assert!(manager.history("s1").await.unwrap().is_empty());

        let timed_out = tokio::time::timeout(
            Duration::from_millis(20),
            manager.handle_query("fresh", "never answered"),
        )
        .await;
        assert!(timed_out.is_err());
        assert!(matches!(
            manager.history("fresh").await,
            Err(ConversationError::SessionNotFound(_))
        ));
    }
}
