//! Language-model client for SQL generation
//!
//! The agent talks to a chat-completions endpoint through one narrow seam:
//! a system/user prompt pair in, a JSON object out. Which backend serves it
//! is an explicit configuration value injected at construction — never
//! process-wide state.

pub mod client;
pub mod mock;
pub mod prompt;

use async_trait::async_trait;

pub use client::ChatModelClient;
pub use mock::ScriptedModel;
pub use prompt::{generation_prompt, repair_prompt, Prompt};

// ============================================================================
// Errors
// ============================================================================

#[derive(Debug, thiserror::Error)]
pub enum LlmError {
    #[error("API error: {0}")]
    Api(String),
    #[error("Rate limited, retry after {retry_after_ms}ms")]
    RateLimited { retry_after_ms: u64 },
    #[error("Invalid response: {0}")]
    InvalidResponse(String),
    #[error("Network error: {0}")]
    Network(String),
    #[error("Model call timed out after {0}s")]
    Timeout(u64),
}

// ============================================================================
// Configuration
// ============================================================================

/// Which OpenAI-compatible backend serves completions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Provider {
    OpenAi,
    Cerebras,
    Groq,
}

impl Provider {
    pub fn default_base_url(&self) -> &'static str {
        match self {
            Provider::OpenAi => "https://api.openai.com/v1",
            Provider::Cerebras => "https://api.cerebras.ai/v1",
            Provider::Groq => "https://api.groq.com/openai/v1",
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Provider::OpenAi => "openai",
            Provider::Cerebras => "cerebras",
            Provider::Groq => "groq",
        }
    }
}

#[derive(Debug, Clone)]
pub struct LlmConfig {
    pub provider: Provider,
    pub api_key: String,
    pub model: String,
    /// Overrides the provider default; useful for proxies and test servers.
    pub base_url: Option<String>,
    pub timeout_secs: u64,
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error(
        "No model provider configured. Set OPENAI_API_KEY, CEREBRAS_API_KEY, or GROQ_API_KEY"
    )]
    NoProviderConfigured,
}

impl LlmConfig {
    pub fn openai(api_key: &str, model: &str) -> Self {
        Self::for_provider(Provider::OpenAi, api_key, model)
    }

    pub fn cerebras(api_key: &str, model: &str) -> Self {
        Self::for_provider(Provider::Cerebras, api_key, model)
    }

    pub fn groq(api_key: &str, model: &str) -> Self {
        Self::for_provider(Provider::Groq, api_key, model)
    }

    fn for_provider(provider: Provider, api_key: &str, model: &str) -> Self {
        Self {
            provider,
            api_key: api_key.to_string(),
            model: model.to_string(),
            base_url: None,
            timeout_secs: 60,
        }
    }

    pub fn with_base_url(mut self, url: &str) -> Self {
        self.base_url = Some(url.to_string());
        self
    }

    /// Pick a backend from the environment, first key wins.
    pub fn from_env() -> Result<Self, ConfigError> {
        if let Ok(key) = std::env::var("OPENAI_API_KEY") {
            let model =
                std::env::var("OPENAI_MODEL").unwrap_or_else(|_| "gpt-4o-mini".to_string());
            return Ok(Self::openai(&key, &model));
        }
        if let Ok(key) = std::env::var("CEREBRAS_API_KEY") {
            let model =
                std::env::var("CEREBRAS_MODEL").unwrap_or_else(|_| "llama-3.3-70b".to_string());
            return Ok(Self::cerebras(&key, &model));
        }
        if let Ok(key) = std::env::var("GROQ_API_KEY") {
            let model = std::env::var("GROQ_MODEL")
                .unwrap_or_else(|_| "llama-3.3-70b-versatile".to_string());
            return Ok(Self::groq(&key, &model));
        }
        Err(ConfigError::NoProviderConfigured)
    }
}

// ============================================================================
// Client seam
// ============================================================================

/// A model that answers a prompt pair with a JSON object.
///
/// Implementations must be safe to call concurrently; one request maps to
/// one completion call with no retained state.
#[async_trait]
pub trait LanguageModel: Send + Sync {
    async fn complete_json(
        &self,
        system_prompt: &str,
        user_prompt: &str,
    ) -> Result<serde_json::Value, LlmError>;

    /// Provider/model pair recorded in the audit log.
    fn identity(&self) -> (String, String);
}

// ============================================================================
// Candidate payload
// ============================================================================

/// The structured payload the prompts ask the model to return.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SqlCandidate {
    pub sql: String,
    /// The model's own rationale; kept for the audit log.
    pub reason: Option<String>,
}

/// Pull `{"sql": …, "reason": …}` out of a completion payload.
///
/// Returns `None` when there is no usable SQL — the controller treats that
/// as a failed attempt, never as something to paper over.
pub fn parse_sql_candidate(payload: &serde_json::Value) -> Option<SqlCandidate> {
    let sql = payload.get("sql")?.as_str()?.trim().to_string();
    if sql.is_empty() {
        return None;
    }
    let reason = payload
        .get("reason")
        .and_then(|v| v.as_str())
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty());
    Some(SqlCandidate { sql, reason })
}

/// Isolate the first JSON object in free text. Models occasionally wrap the
/// payload in code fences or prose despite the output contract.
pub fn extract_json_block(text: &str) -> &str {
    let trimmed = text.trim();
    if trimmed.starts_with('{') && trimmed.ends_with('}') {
        return trimmed;
    }
    match (trimmed.find('{'), trimmed.rfind('}')) {
        (Some(start), Some(end)) if end > start => &trimmed[start..=end],
        _ => trimmed,
    }
}
