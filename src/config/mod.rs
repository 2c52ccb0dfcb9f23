//! Configuration for stockdesk.
//!
//! Loaded from `~/.stockdesk/config.json` (or `--config <path>`). Every
//! section is optional and falls back to its defaults. Environment variables
//! are applied on top after `.env` has been loaded:
//!
//! | variable                | field                    |
//! |-------------------------|--------------------------|
//! | `STOCKDESK_FAMILY_CODE` | `gateway.family_code`    |
//! | `ANTHROPIC_API_KEY`     | `provider.api_key`       |
//! | `STOCKDESK_MODEL`       | `provider.model`         |
//! | `STOCKDESK_BIND`        | `server.bind`            |
//! | `STOCKDESK_PORT`        | `server.port`            |

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::cache::CacheConfig;
use crate::error::{Result, StockdeskError};
use crate::gateway::GatewayConfig;
use crate::providers::ProviderConfig;
use crate::ratelimit::RateLimitConfig;
use crate::store::StoreConfig;

const CONFIG_DIR: &str = ".stockdesk";
const CONFIG_FILE: &str = "config.json";

/// HTTP server section.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Bind address (default: 127.0.0.1).
    pub bind: String,
    pub port: u16,
    /// Origins allowed by CORS. Empty allows any origin.
    pub cors_origins: Vec<String>,
    /// Maximum request body size in bytes.
    pub body_limit_bytes: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: "127.0.0.1".to_string(),
            port: 8787,
            cors_origins: Vec::new(),
            body_limit_bytes: 1024 * 1024,
        }
    }
}

/// Top-level configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub server: ServerConfig,
    pub gateway: GatewayConfig,
    pub rate_limit: RateLimitConfig,
    pub cache: CacheConfig,
    pub store: StoreConfig,
    pub provider: ProviderConfig,
}

impl Config {
    /// `~/.stockdesk`, or `./.stockdesk` when there is no home directory.
    pub fn dir() -> PathBuf {
        dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(CONFIG_DIR)
    }

    /// Default config file path.
    pub fn path() -> PathBuf {
        Self::dir().join(CONFIG_FILE)
    }

    /// Load from `path` (or the default path) and apply env overrides.
    ///
    /// A missing file is not an error; a malformed one is.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let path = path.map(Path::to_path_buf).unwrap_or_else(Self::path);
        let mut config = if path.exists() {
            Self::load_from_path(&path)?
        } else {
            debug!(path = %path.display(), "No config file, using defaults");
            Self::default()
        };
        config.apply_env_overrides(|name| std::env::var(name).ok());
        Ok(config)
    }

    /// Parse a config file without env overrides.
    pub fn load_from_path(path: &Path) -> Result<Self> {
        let data = std::fs::read_to_string(path)
            .map_err(|e| StockdeskError::Config(format!("{}: {}", path.display(), e)))?;
        serde_json::from_str(&data)
            .map_err(|e| StockdeskError::Config(format!("{}: {}", path.display(), e)))
    }

    /// Apply environment overrides using `lookup` to read variables.
    pub fn apply_env_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());

        if let Some(code) = get("STOCKDESK_FAMILY_CODE") {
            self.gateway.family_code = Some(code);
        }
        if let Some(key) = get("ANTHROPIC_API_KEY") {
            self.provider.api_key = Some(key);
        }
        if let Some(model) = get("STOCKDESK_MODEL") {
            self.provider.model = model;
        }
        if let Some(bind) = get("STOCKDESK_BIND") {
            self.server.bind = bind;
        }
        if let Some(port) = get("STOCKDESK_PORT") {
            match port.trim().parse::<u16>() {
                Ok(p) => self.server.port = p,
                Err(_) => warn!("Ignoring invalid STOCKDESK_PORT '{}'", port),
            }
        }
    }

    /// Problems that would make the server misbehave. Empty means healthy.
    pub fn validate(&self) -> Vec<String> {
        let mut problems = Vec::new();
        if self.provider.api_key.as_deref().map_or(true, |k| k.trim().is_empty()) {
            problems.push("provider.api_key is not set (or ANTHROPIC_API_KEY)".to_string());
        }
        if self.gateway.max_attempts == 0 {
            problems.push("gateway.max_attempts must be at least 1".to_string());
        }
        if self.gateway.cache_ttl_secs == 0 {
            problems.push("gateway.cache_ttl_secs is 0; nothing will be cached".to_string());
        }
        if self.store.page_size == 0 {
            problems.push("store.page_size must be at least 1".to_string());
        }
        if !self.gateway.prompts_dir.exists() {
            problems.push(format!(
                "gateway.prompts_dir {} does not exist",
                self.gateway.prompts_dir.display()
            ));
        }
        problems
    }

    /// Copy safe to print: secrets are masked.
    pub fn redacted(&self) -> Self {
        let mut copy = self.clone();
        if copy.provider.api_key.is_some() {
            copy.provider.api_key = Some("[REDACTED]".to_string());
        }
        if copy.gateway.family_code.is_some() {
            copy.gateway.family_code = Some("[REDACTED]".to_string());
        }
        copy
    }
}
