//! Configuration for the weft orchestration layer.
//!
//! Maps directly to `weft.toml`. Every field has a default, so an empty
//! file is a valid configuration.

use serde::{Deserialize, Serialize};
use weft_llm::{GenerationConfig, GenerationPreset};

/// Top-level weft configuration, loadable from TOML.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct WeftConfig {
    /// Logging settings.
    #[serde(default)]
    pub general: GeneralConfig,
    /// Default sampling options for chains.
    #[serde(default)]
    pub generation: GenerationSettings,
    /// Conversation memory sizing.
    #[serde(default)]
    pub memory: MemorySettings,
    /// Retry policy.
    #[serde(default)]
    pub executor: ExecutorSettings,
    /// Agent loop settings.
    #[serde(default)]
    pub agent: AgentSettings,
    /// Input guardrails.
    #[serde(default)]
    pub guardrails: GuardrailConfig,
}

impl WeftConfig {
    /// Load configuration from a TOML string.
    ///
    /// # Errors
    /// Returns `WeftError::Config` if the TOML is invalid.
    pub fn from_toml(toml_str: &str) -> crate::error::Result<Self> {
        let config: Self =
            toml::from_str(toml_str).map_err(|e| crate::WeftError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a TOML file.
    ///
    /// # Errors
    /// Returns an error if the file cannot be read or parsed.
    pub fn from_file(path: &std::path::Path) -> crate::error::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml(&content)
    }

    /// Reject values that would make components unusable.
    ///
    /// # Errors
    /// Returns `WeftError::Config` describing the first bad value.
    pub fn validate(&self) -> crate::error::Result<()> {
        if self.memory.buffer_max_entries == 0 {
            return Err(crate::WeftError::Config(
                "memory.buffer_max_entries must be at least 1".into(),
            ));
        }
        if self.agent.max_steps == 0 {
            return Err(crate::WeftError::Config("agent.max_steps must be at least 1".into()));
        }
        if self.guardrails.max_input_characters == Some(0) {
            return Err(crate::WeftError::Config(
                "guardrails.max_input_characters must be at least 1".into(),
            ));
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Sub-configs
// ---------------------------------------------------------------------------

/// Log output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// Human-readable lines.
    #[default]
    Text,
    /// One JSON object per event.
    Json,
}

/// General settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeneralConfig {
    /// Log level: trace, debug, info, warn, error. `RUST_LOG` overrides it.
    #[serde(default = "default_log_level")]
    pub log_level: String,
    /// Log output format.
    #[serde(default)]
    pub log_format: LogFormat,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            log_format: LogFormat::Text,
        }
    }
}

/// Default sampling options: a preset plus optional overrides.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GenerationSettings {
    /// Named preset the overrides are applied on top of.
    #[serde(default)]
    pub preset: GenerationPreset,
    /// Fields that replace the preset's values.
    #[serde(flatten)]
    pub overrides: GenerationConfig,
}

impl GenerationSettings {
    /// The effective sampling options.
    #[must_use]
    pub fn resolve(&self) -> GenerationConfig {
        self.overrides.merged_over(&self.preset.config())
    }
}

/// Conversation memory sizing.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemorySettings {
    /// User/assistant pairs kept by buffer memory.
    #[serde(default = "default_10")]
    pub buffer_max_entries: usize,
    /// Verbatim turns kept by summarizing memory.
    #[serde(default = "default_4")]
    pub summary_recent_turns: usize,
}

impl Default for MemorySettings {
    fn default() -> Self {
        Self {
            buffer_max_entries: 10,
            summary_recent_turns: 4,
        }
    }
}

/// Retry policy for the chain executor.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutorSettings {
    /// Retries after the first attempt.
    #[serde(default = "default_2_u32")]
    pub max_retries: u32,
    /// Fixed pause between attempts in milliseconds (0 = immediate).
    #[serde(default)]
    pub backoff_ms: u64,
}

impl Default for ExecutorSettings {
    fn default() -> Self {
        Self {
            max_retries: 2,
            backoff_ms: 0,
        }
    }
}

/// Agent loop settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentSettings {
    /// Step budget per run.
    #[serde(default = "default_5")]
    pub max_steps: usize,
    /// Persona and rules placed at the top of every reasoning prompt.
    #[serde(default = "default_system_prompt")]
    pub system_prompt: String,
}

impl Default for AgentSettings {
    fn default() -> Self {
        Self {
            max_steps: 5,
            system_prompt: default_system_prompt(),
        }
    }
}

/// Input guardrail settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GuardrailConfig {
    /// Character cap on input text. `None` disables the length check.
    #[serde(default)]
    pub max_input_characters: Option<usize>,
    /// Truncate over-long input instead of refusing it.
    #[serde(default = "default_true")]
    pub truncate: bool,
    /// Case-insensitive substrings that block an invocation.
    #[serde(default)]
    pub blocked_patterns: Vec<String>,
    /// Case-insensitive substrings that get masked.
    #[serde(default)]
    pub redact_patterns: Vec<String>,
    /// Mask written in place of redacted text.
    #[serde(default = "default_redaction")]
    pub redaction: String,
}

impl Default for GuardrailConfig {
    fn default() -> Self {
        Self {
            max_input_characters: None,
            truncate: true,
            blocked_patterns: Vec::new(),
            redact_patterns: Vec::new(),
            redaction: default_redaction(),
        }
    }
}

// ---------------------------------------------------------------------------
// Serde default helpers
// ---------------------------------------------------------------------------

fn default_true() -> bool { true }
fn default_log_level() -> String { "info".to_string() }
fn default_redaction() -> String { "[redacted]".to_string() }
fn default_system_prompt() -> String {
    "You are a careful assistant that answers questions by reasoning step by step and using the available actions.".to_string()
}
fn default_2_u32() -> u32 { 2 }
fn default_4() -> usize { 4 }
fn default_5() -> usize { 5 }
fn default_10() -> usize { 10 }
