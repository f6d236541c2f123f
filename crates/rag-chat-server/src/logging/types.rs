use chrono::{DateTime, Utc};
use serde::Serialize;

/// Activity type categories
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ActivityType {
    QueryReceived,
    RetrievalExecuted,
    RetrievalError,
    SummarizationTriggered,
    SummarizationError,
    AnswerGenerated,
    LlmError,
    SessionCreated,
    SessionRejected,
    SessionExpired,
    SessionEvicted,
}

/// Activity status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ActivityStatus {
    Success,
    Error,
    Warning,
    Info,
}

/// Complete activity log entry
#[derive(Debug, Clone, Serialize)]
pub struct ActivityLog {
    // Session & request
    pub session_id: String,
    pub request_id: String,

    // Activity
    pub activity_type: ActivityType,
    pub activity_status: ActivityStatus,

    // Context
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message_content: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub response_content: Option<String>,

    // Metrics
    #[serde(skip_serializing_if = "Option::is_none")]
    pub snippet_count: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub buffer_size: Option<usize>,

    // Performance
    #[serde(skip_serializing_if = "Option::is_none")]
    pub processing_time_ms: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub llm_call_duration_ms: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retrieval_duration_ms: Option<u64>,

    // Error
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_type: Option<String>,

    pub created_at: DateTime<Utc>,
}

impl ActivityLog {
    /// Create builder for fluent API
    pub fn builder(
        session_id: impl Into<String>,
        request_id: impl Into<String>,
        activity_type: ActivityType,
    ) -> ActivityLogBuilder {
        ActivityLogBuilder::new(session_id.into(), request_id.into(), activity_type)
    }
}

/// Builder pattern for ActivityLog
pub struct ActivityLogBuilder {
    log: ActivityLog,
}

impl ActivityLogBuilder {
    pub fn new(session_id: String, request_id: String, activity_type: ActivityType) -> Self {
        Self {
            log: ActivityLog {
                session_id,
                request_id,
                activity_type,
                activity_status: ActivityStatus::Success,
                message_content: None,
                response_content: None,
                snippet_count: None,
                buffer_size: None,
                processing_time_ms: None,
                llm_call_duration_ms: None,
                retrieval_duration_ms: None,
                error_message: None,
                error_type: None,
                created_at: Utc::now(),
            },
        }
    }

    pub fn status(mut self, status: ActivityStatus) -> Self {
        self.log.activity_status = status;
        self
    }

    pub fn message(mut self, content: impl Into<String>) -> Self {
        self.log.message_content = Some(content.into());
        self
    }

    pub fn response(mut self, content: impl Into<String>) -> Self {
        self.log.response_content = Some(content.into());
        self
    }

    pub fn snippet_count(mut self, count: usize) -> Self {
        self.log.snippet_count = Some(count);
        self
    }

    pub fn buffer_size(mut self, size: usize) -> Self {
        self.log.buffer_size = Some(size);
        self
    }

    pub fn processing_time(mut self, ms: u64) -> Self {
        self.log.processing_time_ms = Some(ms);
        self
    }

    pub fn llm_duration(mut self, ms: u64) -> Self {
        self.log.llm_call_duration_ms = Some(ms);
        self
    }

    pub fn retrieval_duration(mut self, ms: u64) -> Self {
        self.log.retrieval_duration_ms = Some(ms);
        self
    }

    pub fn error(mut self, message: impl Into<String>, error_type: impl Into<String>) -> Self {
        self.log.error_message = Some(message.into());
        self.log.error_type = Some(error_type.into());
        self.log.activity_status = ActivityStatus::Error;
        self
    }

    pub fn build(self) -> ActivityLog {
        self.log
    }
}
