use crate::config::EmbeddingConfig;
use crate::services::conversation::EmbeddingProvider;
use crate::utils::limiters::Limiters;
use anyhow::{Context, Result};
use reqwest::Client;
use serde::Serialize;
use serde_json::Value;
use std::time::Duration;
use tracing::debug;

#[derive(Debug, Serialize)]
struct EmbeddingRequest<'a> {
    model: &'a str,
    input: &'a str,
    // llama.cpp reads `content`
    content: &'a str,
}

#[derive(Clone)]
pub struct EmbeddingService {
    client: Client,
    base_url: String,
    model: String,
    api_key: String,
    dimension: usize,
    limiters: Limiters,
}

impl EmbeddingService {
    pub fn new(config: EmbeddingConfig, limiters: Limiters) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_seconds))
            .build()
            .context("Failed to build embedding HTTP client")?;

        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            model: config.model,
            api_key: config.api_key,
            dimension: config.dimension,
            limiters,
        })
    }

    async fn embed_internal(&self, text: &str) -> Result<Vec<f32>> {
        debug!("Generating embedding for {} chars", text.len());

        let (_permit, waited) = Limiters::acquire_timed(
            self.limiters.embedding.clone(),
            self.limiters.acquire_timeout,
            "embedding",
        )
        .await?;
        if waited > Duration::from_millis(100) {
            debug!("Embedding limiter wait: {:?}", waited);
        }

        let request = EmbeddingRequest {
            model: &self.model,
            input: text,
            content: text,
        };

        let url = format!("{}/embeddings", self.base_url);
        let mut builder = self.client.post(&url).json(&request);
        if !self.api_key.is_empty() {
            builder = builder.bearer_auth(&self.api_key);
        }

        let response = builder
            .send()
            .await
            .context("Failed to connect to embedding server")?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            anyhow::bail!("Embedding API error ({}): {}", status, body);
        }

        let json_value: Value = response
            .json()
            .await
            .context("Failed to parse embedding response as JSON")?;

        let embedding = parse_embedding(&json_value)?;

        if embedding.len() != self.dimension {
            anyhow::bail!(
                "Embedding dimension mismatch: expected {}, got {}",
                self.dimension,
                embedding.len()
            );
        }

        Ok(embedding)
    }
}

fn floats(values: &[Value]) -> Vec<f32> {
    values
        .iter()
        .filter_map(|v| v.as_f64().map(|f| f as f32))
        .collect()
}

/// Accepts `{"data":[{"embedding":[..]}]}`, `{"embedding":[..]}`,
/// `[{"embedding":[..]}]` and a bare `[..]`.
fn parse_embedding(json_value: &Value) -> Result<Vec<f32>> {
    let embedding = if let Some(arr) = json_value.as_array() {
        match arr.first() {
            None => anyhow::bail!("Empty array returned from embedding server"),
            Some(first) => match first.get("embedding").and_then(Value::as_array) {
                Some(inner) => floats(inner),
                None => floats(arr),
            },
        }
    } else if let Some(inner) = json_value.get("embedding").and_then(Value::as_array) {
        floats(inner)
    } else if let Some(inner) = json_value
        .get("data")
        .and_then(Value::as_array)
        .and_then(|data| data.first())
        .and_then(|first| first.get("embedding"))
        .and_then(Value::as_array)
    {
        floats(inner)
    } else {
        anyhow::bail!("Unrecognized embedding response format: {}", json_value);
    };

    if embedding.is_empty() {
        anyhow::bail!("Generated embedding is empty");
    }

    Ok(embedding)
}

#[async_trait::async_trait]
impl EmbeddingProvider for EmbeddingService {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        self.embed_internal(text).await
    }
}
