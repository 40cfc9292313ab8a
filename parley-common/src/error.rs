//! Error types for the Parley conversation backend.
//!
//! Storage and registry failures are handled locally and converted to
//! result values; only the coordinator surfaces errors to the caller,
//! each with a stable category and HTTP status code.

use thiserror::Error;

/// Result type alias using the Parley error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Unified error type for Parley services.
#[derive(Error, Debug)]
pub enum Error {
    /// Configuration error (missing key, unreadable prompt file, ...)
    #[error("Configuration error: {0}")]
    Config(String),

    /// Conversation identifier absent from the session store
    #[error("Conversation not found: {0}")]
    NotFound(String),

    /// Invalid or missing request field
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Storage backend failure (serialization, connectivity)
    #[error("Storage backend error: {0}")]
    Backend(String),

    /// Model provider reported an error
    #[error("Provider error: {0}")]
    Provider(String),

    /// External (non-provider) service failure
    #[error("External service error: {0}")]
    Service(String),

    /// Coordinator deadline elapsed before the worker signalled
    #[error("Generation timed out: {0}")]
    Timeout(String),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl Error {
    /// Check if this is a timeout error.
    pub const fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout(_))
    }

    /// Check if this is a not-found error.
    pub const fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_))
    }

    /// Stable category string reported to callers.
    pub const fn category(&self) -> &'static str {
        match self {
            Self::Config(_) => "CONFIG_ERROR",
            Self::NotFound(_) => "NOT_FOUND",
            Self::InvalidInput(_) => "INVALID_INPUT",
            Self::Backend(_) => "STORAGE_ERROR",
            Self::Provider(_) => "API_ERROR",
            Self::Service(_) => "SERVICE_ERROR",
            Self::Timeout(_) => "TIMEOUT_ERROR",
            Self::Internal(_) | Self::Io(_) | Self::Json(_) => "UNKNOWN_ERROR",
        }
    }

    /// Get HTTP status code for this error.
    pub const fn status_code(&self) -> u16 {
        match self {
            Self::NotFound(_) => 404,
            Self::InvalidInput(_) => 400,
            Self::Timeout(_) => 408,
            Self::Provider(_) => 502,
            Self::Service(_) => 503,
            _ => 500,
        }
    }

    /// Classify an error message recorded by a worker into a stable category.
    ///
    /// Workers write free-form error text into the session record; this maps
    /// that text onto the caller-facing taxonomy by keyword. Match order
    /// matters: provider keywords win over the generic "timeout"/"missing"
    /// buckets.
    pub fn categorize(message: &str) -> Self {
        let lower = message.to_lowercase();

        const PROVIDER_KEYWORDS: &[&str] = &[
            "api error",
            "anthropic",
            "openai",
            "gemini",
            "deepseek",
            "rate limit",
            "quota",
            "unauthorized",
            "forbidden",
        ];
        const SERVICE_KEYWORDS: &[&str] = &[
            "webhook",
            "service unavailable",
            "connection refused",
            "external service",
        ];
        const CONFIG_KEYWORDS: &[&str] = &["api key", "configuration", "not configured", "missing"];
        const TIMEOUT_KEYWORDS: &[&str] = &["timeout", "timed out", "deadline", "expired"];

        if PROVIDER_KEYWORDS.iter().any(|k| lower.contains(k)) {
            Self::Provider(message.to_string())
        } else if SERVICE_KEYWORDS.iter().any(|k| lower.contains(k)) {
            Self::Service(message.to_string())
        } else if CONFIG_KEYWORDS.iter().any(|k| lower.contains(k)) {
            Self::Config(message.to_string())
        } else if TIMEOUT_KEYWORDS.iter().any(|k| lower.contains(k)) {
            Self::Timeout(message.to_string())
        } else {
            Self::Internal(message.to_string())
        }
    }
}
