//! Error types shared by the bot handlers and stores

use thiserror::Error;

/// Errors surfaced by stores, API clients and command handlers
#[derive(Debug, Error)]
pub enum BotError {
    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("API error ({status}): {message}")]
    Api { status: u16, message: String },

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Rate limited: retry after {retry_after}s")]
    RateLimit { retry_after: u64 },

    #[error("Authentication failed: {0}")]
    Authentication(String),

    #[error("{0}")]
    Validation(String),

    #[error("Not found: {0}")]
    NotFound(String),
}

/// Result alias used throughout the crate
pub type BotResult<T> = Result<T, BotError>;

impl BotError {
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::NotFound(msg.into())
    }

    /// Whether a retry with backoff has a chance of succeeding
    pub fn is_transient(&self) -> bool {
        match self {
            Self::RateLimit { .. } | Self::Http(_) => true,
            Self::Api { status, .. } => *status >= 500,
            _ => false,
        }
    }

    /// Text safe to show in chat. Internal details stay in the logs.
    pub fn user_message(&self) -> String {
        match self {
            Self::Validation(msg) => format!("❌ {}", msg),
            Self::NotFound(what) => format!("❌ Not found: {}", what),
            Self::RateLimit { retry_after } => format!(
                "⏳ Too many requests right now. Please try again in {}s.",
                retry_after
            ),
            Self::Authentication(_) => {
                "🔑 The AI service rejected our credentials. An admin has been notified.".to_string()
            }
            Self::Http(_) => {
                "🌐 Could not reach the service. Please try again shortly.".to_string()
            }
            Self::Configuration(_) => "⚙️ This feature is not configured on this bot.".to_string(),
            Self::Api { .. } | Self::Json(_) => {
                "⚠️ The service returned an unexpected response. Please try again.".to_string()
            }
            Self::Database(_) => "⚠️ Something went wrong. Please try again.".to_string(),
        }
    }
}
