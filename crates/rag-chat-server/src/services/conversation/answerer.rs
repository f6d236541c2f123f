use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

use crate::utils::retry_once;
use super::context_builder::ContextBuilder;
use super::error::ConversationError;
use super::history::HistoryBuffer;
use super::providers::CompletionProvider;
use super::types::Turn;

/// Answers a query from retrieved context plus conversation history
pub struct Answerer {
    llm: Arc<dyn CompletionProvider>,
    context_builder: ContextBuilder,
    retry_backoff: Duration,
}

impl Answerer {
    pub fn new(
        llm: Arc<dyn CompletionProvider>,
        context_builder: ContextBuilder,
        retry_backoff: Duration,
    ) -> Self {
        Self {
            llm,
            context_builder,
            retry_backoff,
        }
    }

    /// Generate the answer and commit the user/model pair to `buffer`.
    ///
    /// The user turn is staged on a copy; the buffer changes only after the
    /// LLM call succeeds, and then by exactly two turns.
    pub async fn answer(
        &self,
        context: &[String],
        query: &str,
        buffer: &mut HistoryBuffer,
    ) -> Result<String, ConversationError> {
        if query.trim().is_empty() {
            return Err(ConversationError::Validation("Query must not be empty".to_string()));
        }

        let instruction = self.context_builder.build_answer_instruction(context);
        let user_turn = Turn::user(query);

        let mut staged = buffer.snapshot();
        staged.push(user_turn.clone());
        debug!(
            "Answering with {} snippets and {} turns",
            context.len(),
            staged.len()
        );

        let this = self;
        let instruction = instruction.as_str();
        let conversation = staged.as_slice();
        let answer = retry_once("answer", self.retry_backoff, move || {
            this.request_answer(instruction, conversation)
        })
        .await
        .map_err(|e| ConversationError::Completion(format!("Answer generation failed: {}", e)))?;

        buffer.commit_exchange(user_turn, Turn::model(answer.clone()));
        Ok(answer)
    }

    async fn request_answer(&self, instruction: &str, conversation: &[Turn]) -> anyhow::Result<String> {
        let text = self.llm.complete(instruction, conversation).await?;

        if text.trim().is_empty() {
            anyhow::bail!("LLM returned an empty answer");
        }

        Ok(text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::conversation::providers::MockCompletionProvider;
    use crate::services::conversation::types::Role;

    const FALLBACK: &str = "Sorry! I could not find the answer.";

    fn answerer(mock: MockCompletionProvider) -> Answerer {
        Answerer::new(Arc::new(mock), ContextBuilder::default(), Duration::from_millis(1))
    }

    fn snippets(n: usize) -> Vec<String> {
        (0..n).map(|i| format!("snippet {}", i)).collect()
    }

    #[tokio::test]
    async fn test_first_question_appends_one_pair() {
        let mut mock = MockCompletionProvider::new();
        mock.expect_complete()
            .withf(|instruction: &str, conversation: &[Turn]| {
                instruction.contains("[3] snippet 2")
                    && conversation.len() == 1
                    && conversation[0] == Turn::user("What is overfitting?")
            })
            .times(1)
            .returning(|_, _| Ok("Overfitting is memorizing noise.".to_string()));

        let mut buffer = HistoryBuffer::new();
        let answer = answerer(mock)
            .answer(&snippets(3), "What is overfitting?", &mut buffer)
            .await
            .unwrap();

        assert_eq!(answer, "Overfitting is memorizing noise.");
        assert_eq!(buffer.size(), 2);
        assert_eq!(buffer.turns()[0].role, Role::User);
        assert_eq!(buffer.turns()[1], Turn::model("Overfitting is memorizing noise."));
    }

    #[tokio::test]
    async fn test_history_is_sent_before_new_question() {
        let mut mock = MockCompletionProvider::new();
        mock.expect_complete()
            .withf(|_: &str, conversation: &[Turn]| {
                conversation.len() == 3
                    && conversation[0].text == "earlier"
                    && conversation[2].text == "follow up"
            })
            .times(1)
            .returning(|_, _| Ok("ok".to_string()));

        let mut buffer = HistoryBuffer::new();
        buffer.commit_exchange(Turn::user("earlier"), Turn::model("reply"));

        answerer(mock)
            .answer(&snippets(1), "follow up", &mut buffer)
            .await
            .unwrap();
        assert_eq!(buffer.size(), 4);
        assert_eq!(buffer.size() % 2, 0);
    }

    #[tokio::test]
    async fn test_no_context_still_returns_text() {
        let mut mock = MockCompletionProvider::new();
        mock.expect_complete()
            .withf(|instruction: &str, _: &[Turn]| {
                instruction.contains("no relevant context was found")
            })
            .times(1)
            .returning(|_, _| Ok(FALLBACK.to_string()));

        let mut buffer = HistoryBuffer::new();
        let answer = answerer(mock)
            .answer(&[], "What is a transformer?", &mut buffer)
            .await
            .unwrap();

        assert_eq!(answer, FALLBACK);
        assert_eq!(buffer.size(), 2);
    }

    #[tokio::test]
    async fn test_failure_appends_nothing() {
        let mut mock = MockCompletionProvider::new();
        mock.expect_complete()
            .times(2)
            .returning(|_, _| Err(anyhow::anyhow!("timeout")));

        let mut buffer = HistoryBuffer::new();
        buffer.commit_exchange(Turn::user("q"), Turn::model("a"));

        let err = answerer(mock)
            .answer(&snippets(2), "next", &mut buffer)
            .await
            .unwrap_err();

        assert!(matches!(err, ConversationError::Completion(_)));
        assert_eq!(buffer.size(), 2);
        assert_eq!(buffer.turns()[1], Turn::model("a"));
    }

    #[tokio::test]
    async fn test_empty_answer_is_retried() {
        let mut mock = MockCompletionProvider::new();
        let mut calls = 0;
        mock.expect_complete().times(2).returning(move |_, _| {
            calls += 1;
            if calls == 1 {
                Ok(String::new())
            } else {
                Ok("recovered".to_string())
            }
        });

        let mut buffer = HistoryBuffer::new();
        let answer = answerer(mock)
            .answer(&snippets(1), "q", &mut buffer)
            .await
            .unwrap();
        assert_eq!(answer, "recovered");
        assert_eq!(buffer.size(), 2);
    }

    #[tokio::test]
    async fn test_blank_query_is_rejected_without_llm_call() {
        let mut mock = MockCompletionProvider::new();
        mock.expect_complete().never();

        let mut buffer = HistoryBuffer::new();
        let err = answerer(mock)
            .answer(&snippets(1), "   ", &mut buffer)
            .await
            .unwrap_err();
        assert!(matches!(err, ConversationError::Validation(_)));
        assert!(buffer.is_empty());
    }
}
