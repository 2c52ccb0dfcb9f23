//! Error types for stockdesk.
//!
//! A single crate-wide error enum covers both the invocation gateway and the
//! versioned record store. The HTTP layer maps each variant to a status code
//! via [`StockdeskError::kind`] (see `api::errors`).

use thiserror::Error;

/// Crate-wide error type.
#[derive(Debug, Error)]
pub enum StockdeskError {
    /// Required request fields are missing or malformed.
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// The shared secret was absent or did not match.
    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    /// The caller exhausted its daily invocation quota.
    #[error("Rate limited: {0}")]
    RateLimited(String),

    /// Transport or provider failure while calling the model.
    #[error("Model unavailable: {0}")]
    ModelUnavailable(String),

    /// The model never produced valid structured output within the attempt budget.
    #[error("AI response invalid JSON after {attempts} attempts")]
    AiResponseInvalid { attempts: u32 },

    /// No record resolves at the requested version.
    #[error("Not found: {0}")]
    NotFound(String),

    /// Persistence backend failure.
    #[error("Storage error: {0}")]
    Storage(String),

    /// Configuration could not be loaded or is inconsistent.
    #[error("Config error: {0}")]
    Config(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

impl StockdeskError {
    /// Stable machine-readable category, used in structured error bodies and logs.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::InvalidRequest(_) => "invalid_request",
            Self::Unauthorized(_) => "unauthorized",
            Self::RateLimited(_) => "rate_limited",
            Self::ModelUnavailable(_) => "model_unavailable",
            Self::AiResponseInvalid { .. } => "ai_response_invalid",
            Self::NotFound(_) => "not_found",
            Self::Storage(_) | Self::Io(_) | Self::Json(_) => "storage",
            Self::Config(_) => "config",
        }
    }
}

/// Result alias used throughout the crate.
pub type Result<T> = std::result::Result<T, StockdeskError>;
