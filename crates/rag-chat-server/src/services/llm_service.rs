use crate::config::LlmConfig;
use crate::services::conversation::{CompletionProvider, Role, Turn};
use crate::utils::limiters::Limiters;
use anyhow::{Context, Result};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::debug;

#[derive(Debug, Serialize, PartialEq)]
pub struct ChatMessage {
    pub role: &'static str,
    pub content: String,
}

#[derive(Debug, Serialize)]
pub struct ChatCompletionRequest<'a> {
    pub model: &'a str,
    pub messages: Vec<ChatMessage>,
    pub max_tokens: usize,
    pub temperature: f32,
    pub stream: bool,
}

#[derive(Debug, Deserialize)]
struct ChatCompletionResponse {
    choices: Vec<Choice>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: Message,
}

#[derive(Debug, Deserialize)]
struct Message {
    #[serde(default)]
    content: Option<String>,
}

/// OpenAI-compatible `/chat/completions` client bound to one model
#[derive(Clone)]
pub struct LlmService {
    client: Client,
    config: LlmConfig,
    model: String,
    limiters: Limiters,
}

impl LlmService {
    pub fn new(config: LlmConfig, model: impl Into<String>, limiters: Limiters) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_seconds))
            .build()
            .context("Failed to build LLM HTTP client")?;

        Ok(Self {
            client,
            config,
            model: model.into(),
            limiters,
        })
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    /// Generate completion without streaming (wait for full response)
    pub async fn generate_chat(&self, messages: Vec<ChatMessage>) -> Result<String> {
        debug!("Starting chat generation with {} messages on {}", messages.len(), self.model);

        let (_permit, waited) = Limiters::acquire_timed(
            self.limiters.llm_generate.clone(),
            self.limiters.acquire_timeout,
            "llm_generate",
        )
        .await?;
        if waited > Duration::from_millis(100) {
            debug!("LLM limiter wait: {:?}", waited);
        }

        let request = ChatCompletionRequest {
            model: &self.model,
            messages,
            max_tokens: self.config.max_tokens,
            temperature: self.config.temperature,
            stream: false,
        };

        let url = format!("{}/chat/completions", self.config.base_url.trim_end_matches('/'));
        let mut builder = self.client.post(&url).json(&request);
        if !self.config.api_key.is_empty() {
            builder = builder.bearer_auth(&self.config.api_key);
        }

        let response = builder.send().await.context("Failed to call LLM API")?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            anyhow::bail!("LLM API error: {} - {}", status, body);
        }

        let chat_response: ChatCompletionResponse = response
            .json()
            .await
            .context("Failed to parse LLM response")?;

        let content = chat_response
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .ok_or_else(|| anyhow::anyhow!("No choices returned from LLM"))?;

        if content.trim().is_empty() {
            anyhow::bail!("LLM returned empty content");
        }

        Ok(content)
    }
}

/// System instruction first, then the turns in order. `model` turns go out
/// as `assistant`.
pub fn build_messages(system_instruction: &str, conversation: &[Turn]) -> Vec<ChatMessage> {
    let mut messages = Vec::with_capacity(conversation.len() + 1);
    messages.push(ChatMessage {
        role: "system",
        content: system_instruction.to_string(),
    });
    messages.extend(conversation.iter().map(|turn| ChatMessage {
        role: match turn.role {
            Role::User => "user",
            Role::Model => "assistant",
        },
        content: turn.text.clone(),
    }));
    messages
}

#[async_trait::async_trait]
impl CompletionProvider for LlmService {
    async fn complete(&self, system_instruction: &str, conversation: &[Turn]) -> Result<String> {
        self.generate_chat(build_messages(system_instruction, conversation))
            .await
    }
}
