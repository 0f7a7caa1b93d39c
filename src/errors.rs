use thiserror::Error;

use crate::models::TOPUP_LIMIT;

#[derive(Error, Debug)]
pub enum EngineError {
    #[error("invalid input: {0}")]
    Validation(String),

    /// Provider answered `success: false`; code and message are the
    /// provider's own, passed through verbatim. Never retried at this level.
    #[error("provider error [{}]: {message}", .code.as_deref().unwrap_or("-"))]
    Provider {
        code: Option<String>,
        message: String,
    },

    #[error("persistence error: {0}")]
    Persistence(#[from] mongodb::error::Error),

    #[error("HTTP request error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("order not found")]
    NotFound,

    #[error("top-up limit reached: {used} of {TOPUP_LIMIT}")]
    LimitExceeded { used: i64 },

    #[error("action not allowed in current state: {0}")]
    State(String),

    #[error("config error: {0}")]
    Config(String),
}

impl EngineError {
    pub fn provider(code: Option<String>, message: impl Into<String>) -> Self {
        Self::Provider {
            code,
            message: message.into(),
        }
    }
}

pub type EngineResult<T> = Result<T, EngineError>;
