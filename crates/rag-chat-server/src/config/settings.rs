use anyhow::Result;
use config::{Config, Environment, File};
use serde::{Deserialize, Serialize};

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct Settings {
    pub server: ServerConfig,
    #[serde(default)]
    pub cors: CorsConfig,
    pub database: DatabaseConfig,
    pub embedding: EmbeddingConfig,
    pub llm: LlmConfig,
    #[serde(default)]
    pub rag: RagConfig,
    #[serde(default)]
    pub conversation: ConversationConfig,
    #[serde(default)]
    pub limits: LimitsConfig,
    #[serde(default)]
    pub prompts: PromptsConfig,
    #[serde(default)]
    pub activity_log: ActivityLogConfig,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    #[serde(default = "default_body_limit")]
    pub body_limit_bytes: usize,
}

fn default_body_limit() -> usize {
    64 * 1024
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct CorsConfig {
    /// Exact origins, or a single "*" for a permissive policy
    pub allowed_origins: Vec<String>,
}

impl Default for CorsConfig {
    fn default() -> Self {
        Self {
            allowed_origins: vec!["http://localhost:8080".to_string()],
        }
    }
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct DatabaseConfig {
    pub url: String,
    pub pool_max_size: u32,
    pub pool_timeout_seconds: u64,
    /// Create the pgvector extension, table and index on startup when missing
    #[serde(default = "default_true")]
    pub ensure_schema: bool,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct EmbeddingConfig {
    pub base_url: String,
    pub model: String,
    pub dimension: usize,
    #[serde(default)]
    pub api_key: String,
    #[serde(default = "default_timeout")]
    pub timeout_seconds: u64,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct LlmConfig {
    pub base_url: String,
    #[serde(default)]
    pub api_key: String,
    pub answer_model: String,
    pub summary_model: String,
    #[serde(default = "default_timeout")]
    pub timeout_seconds: u64,
    pub max_tokens: usize,
    #[serde(default = "default_temperature")]
    pub temperature: f32,
}

fn default_timeout() -> u64 {
    60
}

fn default_temperature() -> f32 {
    0.7
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct RagConfig {
    pub retrieval_top_k: usize,
    pub score_threshold: f32,
    pub retry_backoff_ms: u64,
}

impl Default for RagConfig {
    fn default() -> Self {
        Self {
            retrieval_top_k: 10,
            score_threshold: 0.4,
            retry_backoff_ms: 500,
        }
    }
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct ConversationConfig {
    /// Summarize before answering once the buffer holds more turns than this
    pub summarize_threshold: usize,
    pub session_ttl_seconds: u64,
    pub max_sessions: usize,
    pub max_memory_usage_percent: f64,
    pub cleanup_interval_seconds: u64,
    pub retry_backoff_ms: u64,
}

impl Default for ConversationConfig {
    fn default() -> Self {
        Self {
            summarize_threshold: 10,
            session_ttl_seconds: 6 * 60 * 60,
            max_sessions: 10_000,
            max_memory_usage_percent: 90.0,
            cleanup_interval_seconds: 300,
            retry_backoff_ms: 500,
        }
    }
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct LimitsConfig {
    pub embedding_concurrency: usize,
    pub db_search_concurrency: usize,
    pub llm_concurrency: usize,
    pub acquire_timeout_ms: u64,
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            embedding_concurrency: 16,
            db_search_concurrency: 16,
            llm_concurrency: 8,
            acquire_timeout_ms: 10_000,
        }
    }
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct PromptsConfig {
    /// Must contain `{{CONTEXT}}`; `{{FALLBACK}}` is replaced by `fallback_answer`
    pub answer_system_prompt: String,
    pub summary_system_prompt: String,
    pub fallback_answer: String,
}

impl Default for PromptsConfig {
    fn default() -> Self {
        Self {
            answer_system_prompt: DEFAULT_ANSWER_PROMPT.to_string(),
            summary_system_prompt: DEFAULT_SUMMARY_PROMPT.to_string(),
            fallback_answer: "Sorry! I could not find the answer.".to_string(),
        }
    }
}

const DEFAULT_ANSWER_PROMPT: &str = "You are a machine learning tutor specialized in machine learning. \
You will be given with a context of relevant information based on the user query. \
Your task is to answer the user's question based ONLY on the provided context. \
If the answer is not in the context, you must say, '{{FALLBACK}}'. \
Keep your answer clear, concise and educational.\n\n{{CONTEXT}}";

const DEFAULT_SUMMARY_PROMPT: &str = "You are a summary writing expert. \
Based on the provided chat history, write the summary of the chat history using decent words possible. \
Also rephrase the 'Follow Up User Query' into a complete, standalone query and merge it to the summary so that it makes sense. \
Only output the rewritten summary and nothing else.";

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct ActivityLogConfig {
    pub queue_capacity: usize,
    pub batch_size: usize,
    pub batch_timeout_ms: u64,
    pub worker_count: usize,
}

impl Default for ActivityLogConfig {
    fn default() -> Self {
        Self {
            queue_capacity: 10_000,
            batch_size: 100,
            batch_timeout_ms: 1000,
            worker_count: 1,
        }
    }
}

/// `APP__SECTION__KEY` overrides; list keys take comma-separated values
fn environment() -> Environment {
    Environment::with_prefix("APP")
        .separator("__")
        .try_parsing(true)
        .list_separator(",")
        .with_list_parse_key("cors.allowed_origins")
}

impl Settings {
    /// Load `<path>.toml` (extension optional) layered with `APP__*` env vars
    pub fn load(path: &str) -> Result<Self> {
        dotenvy::dotenv().ok();

        let config = Config::builder()
            .add_source(File::with_name(path).required(true))
            .add_source(environment())
            .build()?;

        let mut settings: Settings = config.try_deserialize()?;
        settings.apply_key_fallback();
        Ok(settings)
    }

    /// Google keys are commonly exported as GOOGLE_API_KEY
    fn apply_key_fallback(&mut self) {
        if let Ok(key) = std::env::var("GOOGLE_API_KEY") {
            if self.llm.api_key.is_empty() {
                self.llm.api_key = key.clone();
            }
            if self.embedding.api_key.is_empty() {
                self.embedding.api_key = key;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_section_defaults() {
        let rag = RagConfig::default();
        assert_eq!(rag.retrieval_top_k, 10);
        assert!((rag.score_threshold - 0.4).abs() < f32::EPSILON);

        let conversation = ConversationConfig::default();
        assert_eq!(conversation.summarize_threshold, 10);

        let prompts = PromptsConfig::default();
        assert!(prompts.answer_system_prompt.contains("{{CONTEXT}}"));
        assert!(prompts.answer_system_prompt.contains("{{FALLBACK}}"));
        assert_eq!(prompts.fallback_answer, "Sorry! I could not find the answer.");
    }

    #[test]
    fn test_optional_sections_deserialize_from_minimal_toml() {
        let raw = r#"
            [server]
            host = "127.0.0.1"
            port = 8000

            [database]
            url = "postgres://localhost/rag"
            pool_max_size = 5
            pool_timeout_seconds = 5

            [embedding]
            base_url = "http://localhost:8081/v1"
            model = "text-embedding-004"
            dimension = 768

            [llm]
            base_url = "http://localhost:8082/v1"
            answer_model = "gemini-2.5-flash"
            summary_model = "gemini-2.5-flash-lite"
            max_tokens = 1024
        "#;

        let settings: Settings = Config::builder()
            .add_source(File::from_str(raw, config::FileFormat::Toml))
            .build()
            .unwrap()
            .try_deserialize()
            .unwrap();

        assert_eq!(settings.server.port, 8000);
        assert_eq!(settings.server.body_limit_bytes, 64 * 1024);
        assert!(settings.database.ensure_schema);
        assert_eq!(settings.cors.allowed_origins, vec!["http://localhost:8080"]);
        assert_eq!(settings.conversation.summarize_threshold, 10);
        assert_eq!(settings.llm.timeout_seconds, 60);
        assert_eq!(settings.activity_log.worker_count, 1);
    }

    #[test]
    fn test_env_overrides_origin_list() {
        let raw = r#"
            [cors]
            allowed_origins = ["http://localhost:8080"]
        "#;
        let vars = config::Map::from([(
            "APP__CORS__ALLOWED_ORIGINS".to_string(),
            "https://a.example,https://b.example".to_string(),
        )]);

        let cors: CorsConfig = Config::builder()
            .add_source(File::from_str(raw, config::FileFormat::Toml))
            .add_source(environment().source(Some(vars)))
            .build()
            .unwrap()
            .get("cors")
            .unwrap();

        assert_eq!(cors.allowed_origins, vec!["https://a.example", "https://b.example"]);
    }
}
