pub mod settings;

pub use settings::{
    ActivityLogConfig, ConversationConfig, CorsConfig, DatabaseConfig, EmbeddingConfig,
    LimitsConfig, LlmConfig, PromptsConfig, RagConfig, ServerConfig, Settings,
};
