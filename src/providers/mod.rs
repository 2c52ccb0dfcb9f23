//! Hosted text-generation providers.
//!
//! The gateway only needs "prompt in, raw text out". [`ModelProvider`] is that
//! seam; [`anthropic::AnthropicProvider`] is the HTTP implementation used in
//! production and tests substitute scripted mocks.

pub mod anthropic;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::Result;

pub use anthropic::AnthropicProvider;

/// Default upper bound on generated tokens when the caller does not set one.
pub const DEFAULT_MAX_TOKENS: u32 = 1200;

/// Hard ceiling on generated tokens for any caller-supplied value.
pub const MAX_TOKENS_CEILING: u32 = 2000;

/// Per-call generation options.
#[derive(Debug, Clone, PartialEq)]
pub struct GenerateOptions {
    pub max_tokens: u32,
    /// Sampling temperature in `[0, 1]`.
    pub temperature: f64,
    /// Optional system instruction.
    pub system: Option<String>,
}

impl Default for GenerateOptions {
    fn default() -> Self {
        Self {
            max_tokens: DEFAULT_MAX_TOKENS,
            temperature: 0.0,
            system: None,
        }
    }
}

impl GenerateOptions {
    pub fn new(max_tokens: u32, temperature: f64) -> Self {
        Self {
            max_tokens,
            temperature,
            system: None,
        }
    }

    pub fn with_system(mut self, system: impl Into<String>) -> Self {
        self.system = Some(system.into());
        self
    }
}

/// A hosted model that turns one prompt into raw text.
#[async_trait]
pub trait ModelProvider: Send + Sync {
    /// Short provider identifier for logs.
    fn name(&self) -> &str;

    /// Model used for every call.
    fn default_model(&self) -> &str;

    /// Run a single completion. Transport and provider failures surface as
    /// [`StockdeskError::ModelUnavailable`](crate::error::StockdeskError::ModelUnavailable).
    async fn generate(&self, prompt: &str, options: GenerateOptions) -> Result<String>;
}

/// Provider section of the config file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProviderConfig {
    /// API key. `ANTHROPIC_API_KEY` overrides it.
    pub api_key: Option<String>,
    pub model: String,
    /// Messages API base URL, without the trailing `/v1/messages`.
    pub base_url: String,
    pub timeout_secs: u64,
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            model: anthropic::DEFAULT_MODEL.to_string(),
            base_url: anthropic::DEFAULT_BASE_URL.to_string(),
            timeout_secs: 120,
        }
    }
}

/// Human-readable error for a non-success provider status.
pub(crate) fn describe_status(status: u16, body_msg: &str) -> String {
    let reason = match status {
        400 => "bad request",
        401 | 403 => "authentication failed",
        404 => "model not found",
        408 | 504 => "timed out",
        429 => "provider rate limit",
        500..=599 => "provider error",
        _ => "unexpected status",
    };
    format!("{} ({}): {}", reason, status, body_msg)
}
