//! Core types shared across all weft components.

use std::any::Any;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

/// Free-form auxiliary state carried alongside chain text.
pub type Metadata = BTreeMap<String, String>;

/// Metadata key set to `"true"` on a guardrail refusal.
pub const META_BLOCKED: &str = "guardrail.blocked";
/// Metadata key naming the guardrail that blocked.
pub const META_GUARDRAIL: &str = "guardrail.name";
/// Template variable that receives the input text.
pub const INPUT_VAR: &str = "input";

// ---------------------------------------------------------------------------
// ChainInput
// ---------------------------------------------------------------------------

/// The envelope every chain consumes.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChainInput {
    /// The text to process.
    pub text: String,
    /// Auxiliary state such as a conversation id.
    #[serde(default)]
    pub metadata: Metadata,
}

impl ChainInput {
    /// Input with no metadata.
    #[must_use]
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            metadata: Metadata::new(),
        }
    }

    /// Add one metadata entry.
    #[must_use]
    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    /// Same metadata, different text.
    #[must_use]
    pub fn with_text(&self, text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            metadata: self.metadata.clone(),
        }
    }

    /// Template variables: every metadata entry plus `input` = text.
    ///
    /// The text wins over a metadata entry named `input`.
    #[must_use]
    pub fn variables(&self) -> BTreeMap<String, String> {
        let mut vars = self.metadata.clone();
        vars.insert(INPUT_VAR.to_string(), self.text.clone());
        vars
    }
}

impl From<&str> for ChainInput {
    fn from(text: &str) -> Self {
        Self::new(text)
    }
}

impl From<String> for ChainInput {
    fn from(text: String) -> Self {
        Self::new(text)
    }
}

// ---------------------------------------------------------------------------
// ChainOutput
// ---------------------------------------------------------------------------

/// Why a guardrail stopped an invocation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Refusal {
    /// Name of the guardrail that blocked.
    pub guardrail: String,
    /// Human-readable reason.
    pub reason: String,
}

/// The envelope every chain produces.
///
/// `value` holds the typed domain result; `text` is its flattened form and
/// is what the next stage of a pipeline receives.
#[derive(Clone)]
pub struct ChainOutput {
    value: Arc<dyn Any + Send + Sync>,
    /// Flattened textual result.
    pub text: String,
    /// Auxiliary state, propagated to the next stage.
    pub metadata: Metadata,
    /// How long the invocation took, when measured.
    pub processing_time_ms: Option<u64>,
}

impl ChainOutput {
    /// Output carrying a typed value alongside its text form.
    #[must_use]
    pub fn new<T: Any + Send + Sync>(value: T, text: impl Into<String>) -> Self {
        Self {
            value: Arc::new(value),
            text: text.into(),
            metadata: Metadata::new(),
            processing_time_ms: None,
        }
    }

    /// Output whose value is the text itself (`String`).
    #[must_use]
    pub fn from_text(text: impl Into<String>) -> Self {
        let text = text.into();
        Self::new(text.clone(), text)
    }

    /// A guardrail refusal. Not an error: the invocation simply stops here.
    #[must_use]
    pub fn blocked(refusal: Refusal) -> Self {
        let text = refusal.reason.clone();
        let guardrail = refusal.guardrail.clone();
        Self::new(refusal, text)
            .with_metadata(META_BLOCKED, "true")
            .with_metadata(META_GUARDRAIL, guardrail)
    }

    /// The typed value, if it is a `T`.
    ///
    /// A mismatched type yields `None` rather than an error.
    #[must_use]
    pub fn value_as<T: Any>(&self) -> Option<&T> {
        self.value.downcast_ref::<T>()
    }

    /// Whether a guardrail blocked this invocation.
    #[must_use]
    pub fn is_blocked(&self) -> bool {
        self.refusal().is_some()
    }

    /// The refusal, when blocked.
    #[must_use]
    pub fn refusal(&self) -> Option<&Refusal> {
        self.value_as::<Refusal>()
    }

    /// Add one metadata entry.
    #[must_use]
    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    /// Replace all metadata.
    #[must_use]
    pub fn with_metadata_map(mut self, metadata: Metadata) -> Self {
        self.metadata = metadata;
        self
    }

    /// Record the processing time.
    #[must_use]
    pub fn with_processing_time(mut self, ms: u64) -> Self {
        self.processing_time_ms = Some(ms);
        self
    }

    /// The input for the next stage of a pipeline: this text and metadata.
    #[must_use]
    pub fn to_input(&self) -> ChainInput {
        ChainInput {
            text: self.text.clone(),
            metadata: self.metadata.clone(),
        }
    }
}

impl fmt::Debug for ChainOutput {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChainOutput")
            .field("text", &self.text)
            .field("metadata", &self.metadata)
            .field("processing_time_ms", &self.processing_time_ms)
            .finish_non_exhaustive()
    }
}

// ---------------------------------------------------------------------------
// Memory entries
// ---------------------------------------------------------------------------

/// Who produced a remembered message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// The caller's side of a turn.
    User,
    /// The model's side of a turn.
    Assistant,
    /// Synthesized context such as a running summary.
    System,
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::User => write!(f, "user"),
            Self::Assistant => write!(f, "assistant"),
            Self::System => write!(f, "system"),
        }
    }
}

/// One remembered message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MemoryEntry {
    /// Who said it.
    pub role: Role,
    /// What was said.
    pub content: String,
}

impl MemoryEntry {
    /// A user message.
    #[must_use]
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }

    /// An assistant message.
    #[must_use]
    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
        }
    }

    /// A synthesized system entry.
    #[must_use]
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: content.into(),
        }
    }
}

/// Render entries as `User: …` / `Assistant: …` / `Summary: …` lines.
#[must_use]
pub fn format_history(entries: &[MemoryEntry]) -> String {
    entries
        .iter()
        .map(|entry| {
            let speaker = match entry.role {
                Role::User => "User",
                Role::Assistant => "Assistant",
                Role::System => "Summary",
            };
            format!("{speaker}: {}", entry.content)
        })
        .collect::<Vec<_>>()
        .join("\n")
}

// ---------------------------------------------------------------------------
// Guardrail results
// ---------------------------------------------------------------------------

/// Outcome of one guardrail check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GuardrailResult {
    /// Proceed with the original text.
    Passed,
    /// Proceed with this replacement text.
    Modified(String),
    /// Abort the invocation.
    Blocked(String),
}

impl GuardrailResult {
    /// Whether this result stops the invocation.
    #[must_use]
    pub fn is_blocked(&self) -> bool {
        matches!(self, Self::Blocked(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, PartialEq)]
    struct Sentiment(f32);

    #[test]
    fn typed_value_access() {
        let output = ChainOutput::new(Sentiment(0.5), "positive");
        assert_eq!(output.value_as::<Sentiment>(), Some(&Sentiment(0.5)));
        assert!(output.value_as::<String>().is_none());
        assert!(!output.is_blocked());
    }

    #[test]
    fn from_text_value_is_string() {
        let output = ChainOutput::from_text("hello");
        assert_eq!(output.value_as::<String>().map(String::as_str), Some("hello"));
    }

    #[test]
    fn blocked_output_shape() {
        let output = ChainOutput::blocked(Refusal {
            guardrail: "content_filter".into(),
            reason: "matched 'password'".into(),
        });
        assert!(output.is_blocked());
        assert_eq!(output.text, "matched 'password'");
        assert_eq!(output.metadata.get(META_BLOCKED).map(String::as_str), Some("true"));
        assert_eq!(
            output.metadata.get(META_GUARDRAIL).map(String::as_str),
            Some("content_filter")
        );
    }

    #[test]
    fn input_variables_merge_text_over_metadata() {
        let input = ChainInput::new("body")
            .with_metadata("input", "shadowed")
            .with_metadata("language", "French");
        let vars = input.variables();
        assert_eq!(vars.get("input").map(String::as_str), Some("body"));
        assert_eq!(vars.get("language").map(String::as_str), Some("French"));
    }

    #[test]
    fn output_threads_into_next_input() {
        let output = ChainOutput::from_text("stage one").with_metadata("k", "v");
        let next = output.to_input();
        assert_eq!(next.text, "stage one");
        assert_eq!(next.metadata.get("k").map(String::as_str), Some("v"));
    }

    #[test]
    fn history_formatting() {
        let entries = vec![
            MemoryEntry::system("talked about cats"),
            MemoryEntry::user("and dogs?"),
            MemoryEntry::assistant("dogs too"),
        ];
        assert_eq!(
            format_history(&entries),
            "Summary: talked about cats\nUser: and dogs?\nAssistant: dogs too"
        );
    }
}
