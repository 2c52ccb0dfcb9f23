//! Anthropic Messages API provider.
//!
//! Sends one user turn per call and returns the reply text. Reply extraction
//! is tolerant of gateway/proxy response shapes: first `text` content block,
//! else `output_text`, else `completion`, else the raw body.

use async_trait::async_trait;
use reqwest::Client;
use serde_json::{json, Value};
use std::time::Duration;
use tracing::debug;

use crate::error::{Result, StockdeskError};

use super::{describe_status, GenerateOptions, ModelProvider, ProviderConfig};

/// Public Messages API base.
pub const DEFAULT_BASE_URL: &str = "https://api.anthropic.com";

/// Default model when none is configured.
pub const DEFAULT_MODEL: &str = "claude-3-5-haiku-latest";

const API_VERSION: &str = "2023-06-01";

// ── Provider ──────────────────────────────────────────────────────────────────

pub struct AnthropicProvider {
    api_key: String,
    model: String,
    base_url: String,
    client: Client,
}

impl std::fmt::Debug for AnthropicProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AnthropicProvider")
            .field("api_key", &"[REDACTED]")
            .field("model", &self.model)
            .field("base_url", &self.base_url)
            .finish()
    }
}

impl AnthropicProvider {
    pub fn new(api_key: &str, model: &str) -> Self {
        Self {
            api_key: api_key.to_string(),
            model: model.to_string(),
            base_url: DEFAULT_BASE_URL.to_string(),
            client: Self::build_client(Duration::from_secs(120)),
        }
    }

    /// Build from config. Returns `None` when no API key is available.
    pub fn from_config(config: &ProviderConfig) -> Option<Self> {
        let api_key = config.api_key.as_deref().filter(|k| !k.trim().is_empty())?;
        Some(Self {
            api_key: api_key.to_string(),
            model: config.model.clone(),
            base_url: config.base_url.trim_end_matches('/').to_string(),
            client: Self::build_client(Duration::from_secs(config.timeout_secs.max(1))),
        })
    }

    pub fn with_base_url(mut self, base_url: &str) -> Self {
        self.base_url = base_url.trim_end_matches('/').to_string();
        self
    }

    fn build_client(timeout: Duration) -> Client {
        Client::builder()
            .timeout(timeout)
            .build()
            .unwrap_or_else(|_| Client::new())
    }

    fn api_url(&self) -> String {
        format!("{}/v1/messages", self.base_url)
    }

    /// Build a Messages request body for a single user turn.
    pub fn build_request_body(&self, prompt: &str, options: &GenerateOptions) -> Value {
        let mut body = json!({
            "model": self.model,
            "max_tokens": options.max_tokens,
            "temperature": options.temperature,
            "messages": [{
                "role": "user",
                "content": [{ "type": "text", "text": prompt }]
            }]
        });
        if let Some(ref system) = options.system {
            body["system"] = json!(system);
        }
        body
    }

    /// Extract reply text from a parsed response body.
    pub fn extract_text(response: &Value) -> Option<String> {
        let block = response["content"].as_array().and_then(|blocks| {
            blocks
                .iter()
                .find(|b| b["type"].as_str() == Some("text"))
                .and_then(|b| b["text"].as_str())
        });
        block
            .or_else(|| response["output_text"].as_str())
            .or_else(|| response["completion"].as_str())
            .map(String::from)
    }

    /// Extract reply text from a raw body, falling back to the body itself.
    pub fn extract_text_from_body(body: &str) -> String {
        serde_json::from_str::<Value>(body)
            .ok()
            .and_then(|v| Self::extract_text(&v))
            .unwrap_or_else(|| body.to_string())
    }
}

#[async_trait]
impl ModelProvider for AnthropicProvider {
    fn name(&self) -> &str {
        "anthropic"
    }

    fn default_model(&self) -> &str {
        &self.model
    }

    async fn generate(&self, prompt: &str, options: GenerateOptions) -> Result<String> {
        let body = self.build_request_body(prompt, &options);

        debug!(
            model = %self.model,
            max_tokens = options.max_tokens,
            prompt_len = prompt.len(),
            "Anthropic request"
        );

        let response = self
            .client
            .post(self.api_url())
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", API_VERSION)
            .header("Content-Type", "application/json")
            .json(&body)
            .send()
            .await
            .map_err(|e| StockdeskError::ModelUnavailable(format!("request failed: {}", e)))?;

        let status = response.status();
        let text = response.text().await.map_err(|e| {
            StockdeskError::ModelUnavailable(format!("failed to read response: {}", e))
        })?;

        if status.is_success() {
            return Ok(Self::extract_text_from_body(&text));
        }

        let body_msg = serde_json::from_str::<Value>(&text)
            .ok()
            .and_then(|v| v["error"]["message"].as_str().map(String::from))
            .unwrap_or(text);

        Err(StockdeskError::ModelUnavailable(describe_status(
            status.as_u16(),
            &body_msg,
        )))
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extract_first_text_block() {
        let response = json!({
            "content": [
                { "type": "tool_use", "id": "t1" },
                { "type": "text", "text": "{\"a\":1}" },
                { "type": "text", "text": "ignored" }
            ]
        });
        assert_eq!(
            AnthropicProvider::extract_text(&response).as_deref(),
            Some("{\"a\":1}")
        );
    }

    #[test]
    fn test_extract_falls_back_to_output_text_then_completion() {
        let output_text = json!({ "output_text": "from output_text" });
        assert_eq!(
            AnthropicProvider::extract_text(&output_text).as_deref(),
            Some("from output_text")
        );

        let completion = json!({ "content": [], "completion": "legacy" });
        assert_eq!(
            AnthropicProvider::extract_text(&completion).as_deref(),
            Some("legacy")
        );
    }

    #[test]
    fn test_extract_from_body_falls_back_to_raw() {
        assert_eq!(
            AnthropicProvider::extract_text_from_body("plain text reply"),
            "plain text reply"
        );
        assert_eq!(
            AnthropicProvider::extract_text_from_body(r#"{"unrelated": true}"#),
            r#"{"unrelated": true}"#
        );
    }

    #[test]
    fn test_build_request_body() {
        let provider = AnthropicProvider::new("key", "claude-test");
        let body = provider.build_request_body("Hi", &GenerateOptions::new(256, 0.0));
        assert_eq!(body["model"], "claude-test");
        assert_eq!(body["max_tokens"], 256);
        assert_eq!(body["messages"][0]["role"], "user");
        assert_eq!(body["messages"][0]["content"][0]["text"], "Hi");
        assert!(body.get("system").is_none());
    }

    #[test]
    fn test_build_request_body_includes_system() {
        let provider = AnthropicProvider::new("key", "claude-test");
        let opts = GenerateOptions::default().with_system("Reply in JSON");
        let body = provider.build_request_body("Hi", &opts);
        assert_eq!(body["system"], "Reply in JSON");
    }

    #[test]
    fn test_from_config_requires_key() {
        assert!(AnthropicProvider::from_config(&ProviderConfig::default()).is_none());
        let cfg = ProviderConfig {
            api_key: Some("sk-test".into()),
            base_url: "http://localhost:9999/".into(),
            ..Default::default()
        };
        let provider = AnthropicProvider::from_config(&cfg).unwrap();
        assert_eq!(provider.api_url(), "http://localhost:9999/v1/messages");
        assert_eq!(provider.name(), "anthropic");
    }

    #[test]
    fn test_debug_redacts_key() {
        let provider = AnthropicProvider::new("sk-secret", "claude-test");
        let debug = format!("{:?}", provider);
        assert!(!debug.contains("sk-secret"));
        assert!(debug.contains("[REDACTED]"));
    }

    #[tokio::test]
    async fn test_unreachable_endpoint_is_model_unavailable() {
        let provider = AnthropicProvider::new("key", "claude-test").with_base_url("http://127.0.0.1:1");
        let err = provider
            .generate("hi", GenerateOptions::default())
            .await
            .unwrap_err();
        assert!(matches!(err, StockdeskError::ModelUnavailable(_)));
    }
}
