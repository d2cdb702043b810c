//! Error types for the weft orchestration core.

use thiserror::Error;
use weft_llm::{LlmError, PromptError};

/// Top-level error type for all weft operations.
///
/// Guardrail blocks are not errors: they come back as a refusal inside a
/// successful [`ChainOutput`](crate::types::ChainOutput).
#[derive(Error, Debug)]
pub enum WeftError {
    /// A prompt template could not be rendered (e.g. a missing variable).
    #[error("Template error: {0}")]
    Template(#[from] PromptError),

    /// A sequential chain was built with no stages.
    #[error("no chains configured")]
    EmptySequence,

    /// A conditional chain routed to a key with no branch and no default.
    #[error("no branch for key: {key}")]
    NoBranch {
        /// The router's output.
        key: String,
    },

    /// The agent asked for a tool or chain that is not configured.
    #[error("unknown action: {name}")]
    UnknownAction {
        /// The requested action name.
        name: String,
    },

    /// Invalid configuration value.
    #[error("Configuration error: {0}")]
    Config(String),

    /// The model backend failed.
    #[error("Execution failed: {0}")]
    Execution(#[from] LlmError),

    /// A tool failed while running.
    #[error("Tool '{tool}' failed: {message}")]
    Tool {
        /// Tool id.
        tool: String,
        /// What went wrong.
        message: String,
    },

    /// A typed `run` call was refused by a guardrail.
    ///
    /// `invoke` reports the same situation as a refusal output instead.
    #[error("Refused by guardrail '{guardrail}': {reason}")]
    Refused {
        /// The blocking guardrail.
        guardrail: String,
        /// Its reason.
        reason: String,
    },

    /// Generic I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl WeftError {
    /// Whether this is a configuration mistake rather than a runtime failure.
    ///
    /// Configuration errors are surfaced immediately and never retried.
    #[must_use]
    pub fn is_configuration(&self) -> bool {
        matches!(
            self,
            Self::Template(_)
                | Self::EmptySequence
                | Self::NoBranch { .. }
                | Self::UnknownAction { .. }
                | Self::Config(_)
        )
    }

    /// Whether a retry could plausibly succeed.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        !self.is_configuration() && !matches!(self, Self::Refused { .. })
    }
}

/// Convenience Result type alias.
pub type Result<T> = std::result::Result<T, WeftError>;
