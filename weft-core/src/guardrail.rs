//! Guardrails: pre- and post-model text checks.
//!
//! A chain holds an ordered list of guardrails:
//!   - Each check sees the text as rewritten by the checks before it
//!   - `Modified` replaces the text and evaluation continues
//!   - The first `Blocked` stops evaluation; the chain returns a refusal
//!     without calling the model

use std::sync::Arc;

use tracing::warn;

use crate::config::GuardrailConfig;
use crate::types::GuardrailResult;

/// A text check that may pass, rewrite or block.
pub trait Guardrail: Send + Sync {
    /// Name used in refusals and logs.
    fn name(&self) -> &str;

    /// Inspect text before it reaches the model.
    fn check_input(&self, text: &str) -> GuardrailResult;

    /// Inspect text the model produced. Passes by default.
    fn check_output(&self, _text: &str) -> GuardrailResult {
        GuardrailResult::Passed
    }
}

/// Which side of the model call is being checked.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    /// Before the model call.
    Input,
    /// After the model call.
    Output,
}

/// Final outcome of running a guardrail list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GuardrailOutcome {
    /// Nothing changed.
    Passed,
    /// At least one guardrail rewrote the text; this is the final text.
    Modified(String),
    /// A guardrail blocked.
    Blocked {
        /// The blocking guardrail.
        guardrail: String,
        /// Its reason.
        reason: String,
    },
}

/// Run `guardrails` in order over `text`.
#[must_use]
pub fn evaluate(guardrails: &[Arc<dyn Guardrail>], text: &str, stage: Stage) -> GuardrailOutcome {
    let mut current: Option<String> = None;

    for guardrail in guardrails {
        let seen = current.as_deref().unwrap_or(text);
        let result = match stage {
            Stage::Input => guardrail.check_input(seen),
            Stage::Output => guardrail.check_output(seen),
        };
        match result {
            GuardrailResult::Passed => {}
            GuardrailResult::Modified(new_text) => current = Some(new_text),
            GuardrailResult::Blocked(reason) => {
                warn!(guardrail = guardrail.name(), ?stage, %reason, "guardrail blocked");
                return GuardrailOutcome::Blocked {
                    guardrail: guardrail.name().to_string(),
                    reason,
                };
            }
        }
    }

    match current {
        Some(text) => GuardrailOutcome::Modified(text),
        None => GuardrailOutcome::Passed,
    }
}

// ---------------------------------------------------------------------------
// Built-in guardrails
// ---------------------------------------------------------------------------

/// Caps input length, by truncation or by refusal.
///
/// Length is measured in characters, not bytes.
#[derive(Debug, Clone)]
pub struct InputLengthGuardrail {
    max_characters: usize,
    truncate: bool,
}

impl InputLengthGuardrail {
    /// Create a length guardrail.
    #[must_use]
    pub fn new(max_characters: usize, truncate: bool) -> Self {
        Self {
            max_characters,
            truncate,
        }
    }
}

impl Guardrail for InputLengthGuardrail {
    fn name(&self) -> &str {
        "input_length"
    }

    fn check_input(&self, text: &str) -> GuardrailResult {
        let length = text.chars().count();
        if length <= self.max_characters {
            return GuardrailResult::Passed;
        }
        if self.truncate {
            GuardrailResult::Modified(text.chars().take(self.max_characters).collect())
        } else {
            GuardrailResult::Blocked(format!(
                "Input too long: {length} characters (max: {})",
                self.max_characters
            ))
        }
    }
}

/// Blocks text containing any of a list of patterns (case-insensitive).
#[derive(Debug, Clone)]
pub struct ContentFilterGuardrail {
    patterns: Vec<String>,
    lowered: Vec<String>,
    check_output: bool,
}

impl ContentFilterGuardrail {
    /// Create a filter over `blocked_patterns`. Empty patterns are ignored.
    #[must_use]
    pub fn new<I, S>(blocked_patterns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let patterns: Vec<String> = blocked_patterns
            .into_iter()
            .map(Into::into)
            .filter(|p: &String| !p.is_empty())
            .collect();
        let lowered = patterns.iter().map(|p| p.to_lowercase()).collect();
        Self {
            patterns,
            lowered,
            check_output: false,
        }
    }

    /// Also apply the filter to model output.
    #[must_use]
    pub fn on_output(mut self) -> Self {
        self.check_output = true;
        self
    }

    fn scan(&self, text: &str) -> GuardrailResult {
        let lower = text.to_lowercase();
        for (pattern, needle) in self.patterns.iter().zip(&self.lowered) {
            if lower.contains(needle.as_str()) {
                return GuardrailResult::Blocked(format!("Content matched blocked pattern: '{pattern}'"));
            }
        }
        GuardrailResult::Passed
    }
}

impl Guardrail for ContentFilterGuardrail {
    fn name(&self) -> &str {
        "content_filter"
    }

    fn check_input(&self, text: &str) -> GuardrailResult {
        self.scan(text)
    }

    fn check_output(&self, text: &str) -> GuardrailResult {
        if self.check_output {
            self.scan(text)
        } else {
            GuardrailResult::Passed
        }
    }
}

/// Replaces occurrences of patterns (case-insensitive) with a mask.
///
/// Applies to both input and model output.
#[derive(Debug, Clone)]
pub struct PatternRedactionGuardrail {
    patterns: Vec<String>,
    replacement: String,
}

impl PatternRedactionGuardrail {
    /// Redact `patterns`, writing `replacement` in their place.
    #[must_use]
    pub fn new<I, S>(patterns: I, replacement: impl Into<String>) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            patterns: patterns
                .into_iter()
                .map(Into::into)
                .filter(|p: &String| !p.is_empty())
                .collect(),
            replacement: replacement.into(),
        }
    }

    fn redact(&self, text: &str) -> GuardrailResult {
        let mut out = text.to_string();
        let mut changed = false;
        for pattern in &self.patterns {
            if let Some(replaced) = replace_case_insensitive(&out, pattern, &self.replacement) {
                out = replaced;
                changed = true;
            }
        }
        if changed {
            GuardrailResult::Modified(out)
        } else {
            GuardrailResult::Passed
        }
    }
}

/// Replace every case-insensitive occurrence of `needle`.
///
/// Returns `None` when there was nothing to replace. Matching is done on
/// char boundaries, so multi-byte text is handled safely.
fn replace_case_insensitive(haystack: &str, needle: &str, replacement: &str) -> Option<String> {
    let needle: Vec<char> = needle.chars().flat_map(char::to_lowercase).collect();
    if needle.is_empty() {
        return None;
    }
    let chars: Vec<(usize, char)> = haystack.char_indices().collect();
    let mut out = String::with_capacity(haystack.len());
    let mut i = 0;
    let mut replaced = false;

    while i < chars.len() {
        let mut matched = 0;
        let mut j = i;
        while j < chars.len() && matched < needle.len() {
            let lowered: Vec<char> = chars[j].1.to_lowercase().collect();
            if lowered.len() != 1 || lowered[0] != needle[matched] {
                break;
            }
            matched += 1;
            j += 1;
        }
        if matched == needle.len() {
            out.push_str(replacement);
            replaced = true;
            i = j;
        } else {
            out.push(chars[i].1);
            i += 1;
        }
    }

    replaced.then_some(out)
}

impl Guardrail for PatternRedactionGuardrail {
    fn name(&self) -> &str {
        "pattern_redaction"
    }

    fn check_input(&self, text: &str) -> GuardrailResult {
        self.redact(text)
    }

    fn check_output(&self, text: &str) -> GuardrailResult {
        self.redact(text)
    }
}

/// Build the input guardrails described by configuration.
///
/// Length comes first so the content filter sees the truncated text.
#[must_use]
pub fn guardrails_from_config(config: &GuardrailConfig) -> Vec<Arc<dyn Guardrail>> {
    let mut guardrails: Vec<Arc<dyn Guardrail>> = Vec::new();
    if let Some(max) = config.max_input_characters {
        guardrails.push(Arc::new(InputLengthGuardrail::new(max, config.truncate)));
    }
    if !config.blocked_patterns.is_empty() {
        guardrails.push(Arc::new(ContentFilterGuardrail::new(
            config.blocked_patterns.iter().cloned(),
        )));
    }
    if !config.redact_patterns.is_empty() {
        guardrails.push(Arc::new(PatternRedactionGuardrail::new(
            config.redact_patterns.iter().cloned(),
            config.redaction.clone(),
        )));
    }
    guardrails
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn length_truncates() {
        let guard = InputLengthGuardrail::new(5, true);
        assert_eq!(
            guard.check_input("longer text"),
            GuardrailResult::Modified("longe".to_string())
        );
    }

    #[test]
    fn length_blocks_without_truncate() {
        let guard = InputLengthGuardrail::new(5, false);
        assert!(guard.check_input("longer text").is_blocked());
        assert_eq!(guard.check_input("short"), GuardrailResult::Passed);
    }

    #[test]
    fn length_counts_characters() {
        let guard = InputLengthGuardrail::new(3, true);
        assert_eq!(guard.check_input("héllo"), GuardrailResult::Modified("hél".to_string()));
        assert_eq!(guard.check_input("日本語"), GuardrailResult::Passed);
    }

    #[test]
    fn content_filter_blocks_case_insensitive() {
        let guard = ContentFilterGuardrail::new(["password"]);
        match guard.check_input("my PassWord is 123") {
            GuardrailResult::Blocked(reason) => assert!(reason.contains("password")),
            other => panic!("expected block, got {other:?}"),
        }
        assert_eq!(guard.check_input("hello world"), GuardrailResult::Passed);
    }

    #[test]
    fn content_filter_ignores_output_unless_enabled() {
        let guard = ContentFilterGuardrail::new(["secret"]);
        assert_eq!(guard.check_output("a secret"), GuardrailResult::Passed);
        assert!(guard.on_output().check_output("a secret").is_blocked());
    }

    #[test]
    fn redaction_replaces_all_occurrences() {
        let guard = PatternRedactionGuardrail::new(["acme"], "[redacted]");
        assert_eq!(
            guard.check_input("ACME sells to Acme Corp"),
            GuardrailResult::Modified("[redacted] sells to [redacted] Corp".to_string())
        );
        assert_eq!(guard.check_input("nothing here"), GuardrailResult::Passed);
    }

    #[test]
    fn pipeline_threads_modified_text() {
        let guardrails: Vec<Arc<dyn Guardrail>> = vec![
            Arc::new(InputLengthGuardrail::new(11, true)),
            Arc::new(ContentFilterGuardrail::new(["secret"])),
        ];
        // Truncation removes the blocked word before the filter sees it.
        assert_eq!(
            evaluate(&guardrails, "hello world secret", Stage::Input),
            GuardrailOutcome::Modified("hello world".to_string())
        );
    }

    #[test]
    fn pipeline_stops_at_first_block() {
        let guardrails: Vec<Arc<dyn Guardrail>> = vec![
            Arc::new(ContentFilterGuardrail::new(["password"])),
            Arc::new(InputLengthGuardrail::new(1, false)),
        ];
        match evaluate(&guardrails, "password", Stage::Input) {
            GuardrailOutcome::Blocked { guardrail, .. } => assert_eq!(guardrail, "content_filter"),
            other => panic!("expected block, got {other:?}"),
        }
    }

    #[test]
    fn empty_pipeline_passes() {
        assert_eq!(evaluate(&[], "anything", Stage::Input), GuardrailOutcome::Passed);
    }

    #[test]
    fn config_builds_ordered_guardrails() {
        let config = GuardrailConfig {
            max_input_characters: Some(100),
            truncate: true,
            blocked_patterns: vec!["ssn".into()],
            redact_patterns: vec![],
            redaction: "***".into(),
        };
        let guardrails = guardrails_from_config(&config);
        let names: Vec<&str> = guardrails.iter().map(|g| g.name()).collect();
        assert_eq!(names, vec!["input_length", "content_filter"]);
    }
}
