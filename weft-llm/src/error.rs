//! Model capability error types.

use thiserror::Error;

/// Errors raised by a language model backend.
///
/// Every variant is a backend execution failure: the orchestration layer
/// treats them uniformly and only `ChainExecutor` retries them.
#[derive(Debug, Clone, Error)]
pub enum LlmError {
    /// HTTP request failed.
    #[error("LLM request failed: {0}")]
    RequestFailed(String),

    /// Backend response could not be decoded.
    #[error("Failed to parse LLM response: {0}")]
    ParseError(String),

    /// Request timed out.
    #[error("LLM request timed out after {0}ms")]
    Timeout(u64),

    /// LLM provider is unavailable.
    #[error("LLM provider unavailable: {0}")]
    Unavailable(String),

    /// The backend reported a failure of its own.
    #[error("LLM backend error: {0}")]
    Backend(String),

    /// Configuration error.
    #[error("LLM configuration error: {0}")]
    ConfigError(String),
}

impl From<reqwest::Error> for LlmError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            LlmError::Timeout(0)
        } else if err.is_connect() {
            LlmError::Unavailable(err.to_string())
        } else if err.is_decode() {
            LlmError::ParseError(err.to_string())
        } else {
            LlmError::RequestFailed(err.to_string())
        }
    }
}

/// Errors raised while loading or rendering prompt templates.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PromptError {
    /// The template references a variable the caller did not supply.
    #[error("missing template variable: {0}")]
    MissingVariable(String),

    /// A placeholder was opened but never closed.
    #[error("unterminated placeholder at byte {0}")]
    Unterminated(usize),

    /// No template is registered under this id.
    #[error("prompt template '{0}' not loaded")]
    NotLoaded(String),

    /// A template file could not be read or parsed.
    #[error("failed to load prompt templates: {0}")]
    Load(String),
}
