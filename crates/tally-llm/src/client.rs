//! Chat-completions HTTP client
//!
//! One client covers every supported backend: OpenAI, Cerebras, and Groq all
//! speak the same chat-completions wire format, differing only in base URL
//! and credentials.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use tracing::debug;

use crate::{extract_json_block, LanguageModel, LlmConfig, LlmError};

pub struct ChatModelClient {
    client: Client,
    config: LlmConfig,
}

impl ChatModelClient {
    pub fn new(config: LlmConfig) -> Result<Self, LlmError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| LlmError::Network(e.to_string()))?;
        Ok(Self { client, config })
    }

    fn completions_url(&self) -> String {
        let base = self
            .config
            .base_url
            .as_deref()
            .unwrap_or_else(|| self.config.provider.default_base_url());
        format!("{}/chat/completions", base.trim_end_matches('/'))
    }
}

#[async_trait]
impl LanguageModel for ChatModelClient {
    async fn complete_json(
        &self,
        system_prompt: &str,
        user_prompt: &str,
    ) -> Result<serde_json::Value, LlmError> {
        let body = serde_json::json!({
            "model": self.config.model,
            "temperature": 0,
            "response_format": {"type": "json_object"},
            "messages": [
                {"role": "system", "content": system_prompt},
                {"role": "user", "content": user_prompt},
            ],
        });

        let response = self
            .client
            .post(self.completions_url())
            .header("Authorization", format!("Bearer {}", self.config.api_key))
            .header("Content-Type", "application/json")
            .json(&body)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    LlmError::Timeout(self.config.timeout_secs)
                } else {
                    LlmError::Network(e.to_string())
                }
            })?;

        if response.status() == 429 {
            let retry_after = response
                .headers()
                .get("retry-after")
                .and_then(|v| v.to_str().ok())
                .and_then(|s| s.parse::<u64>().ok())
                .unwrap_or(60);
            return Err(LlmError::RateLimited {
                retry_after_ms: retry_after * 1000,
            });
        }
        if !response.status().is_success() {
            let status = response.status();
            let error_text = response.text().await.unwrap_or_default();
            return Err(LlmError::Api(format!("{status}: {error_text}")));
        }

        let data: serde_json::Value = response
            .json()
            .await
            .map_err(|e| LlmError::InvalidResponse(e.to_string()))?;
        let content = data["choices"][0]["message"]["content"]
            .as_str()
            .ok_or_else(|| LlmError::InvalidResponse("missing message content".to_string()))?;
        debug!(
            provider = self.config.provider.as_str(),
            bytes = content.len(),
            "model completion received"
        );

        serde_json::from_str(extract_json_block(content))
            .map_err(|e| LlmError::InvalidResponse(format!("content is not JSON: {e}")))
    }

    fn identity(&self) -> (String, String) {
        (
            self.config.provider.as_str().to_string(),
            self.config.model.clone(),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Provider;

    #[test]
    fn url_joins_without_double_slash() {
        let config = LlmConfig::cerebras("key", "llama-3.3-70b").with_base_url("http://host/v1/");
        let client = ChatModelClient::new(config).unwrap();
        assert_eq!(client.completions_url(), "http://host/v1/chat/completions");
    }

    #[test]
    fn default_url_per_provider() {
        let client = ChatModelClient::new(LlmConfig::groq("key", "m")).unwrap();
        assert_eq!(
            client.completions_url(),
            "https://api.groq.com/openai/v1/chat/completions"
        );
        assert_eq!(client.identity().0, Provider::Groq.as_str());
    }
}
