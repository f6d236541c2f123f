use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

use crate::utils::retry_once;
use super::error::ConversationError;
use super::history::HistoryBuffer;
use super::providers::CompletionProvider;
use super::types::Turn;

/// Collapses a history buffer into one standalone summary turn
pub struct Summarizer {
    llm: Arc<dyn CompletionProvider>,
    instruction: String,
    retry_backoff: Duration,
}

impl Summarizer {
    pub fn new(llm: Arc<dyn CompletionProvider>, instruction: String, retry_backoff: Duration) -> Self {
        Self {
            llm,
            instruction,
            retry_backoff,
        }
    }

    /// Replace the buffer with its summary.
    ///
    /// The buffer is only touched once a non-empty summary is in hand.
    pub async fn summarize(&self, buffer: &mut HistoryBuffer) -> Result<(), ConversationError> {
        let conversation = buffer.snapshot();
        debug!("Summarizing {} turns", conversation.len());

        let this = self;
        let turns = conversation.as_slice();
        let summary = retry_once("summarize", self.retry_backoff, move || this.request_summary(turns))
            .await
            .map_err(|e| ConversationError::Completion(format!("Summarization failed: {}", e)))?;

        buffer.reset(&summary);
        info!(
            "History compressed from {} turns into a {} char summary",
            conversation.len(),
            summary.len()
        );
        Ok(())
    }

    async fn request_summary(&self, conversation: &[Turn]) -> anyhow::Result<String> {
        let text = self.llm.complete(&self.instruction, conversation).await?;
        let summary = text.trim();

        if summary.is_empty() {
            anyhow::bail!("LLM returned an empty summary");
        }

        Ok(summary.to_string())
    }
}
