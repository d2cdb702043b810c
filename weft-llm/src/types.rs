//! Core types for generation requests and responses.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Sampling options understood by every backend.
///
/// Unset fields leave the backend's own default in place.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GenerationConfig {
    /// Sampling randomness (0.0 = deterministic).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,
    /// Keep only the `k` most likely candidate tokens.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub top_k: Option<u32>,
    /// Nucleus sampling mass.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub top_p: Option<f32>,
    /// Maximum tokens to generate.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
    /// Generation halts when any of these is emitted.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub stop_sequences: Vec<String>,
}

impl GenerationConfig {
    /// Low temperature, narrow candidate set. For output that gets parsed.
    #[must_use]
    pub fn structured() -> Self {
        Self {
            temperature: Some(0.1),
            top_k: Some(10),
            ..Self::default()
        }
    }

    /// High temperature for open-ended writing.
    #[must_use]
    pub fn creative() -> Self {
        Self {
            temperature: Some(0.9),
            top_p: Some(0.95),
            ..Self::default()
        }
    }

    /// Balanced settings for multi-turn chat.
    #[must_use]
    pub fn conversational() -> Self {
        Self {
            temperature: Some(0.7),
            top_p: Some(0.9),
            ..Self::default()
        }
    }

    /// Middle-of-the-road default.
    #[must_use]
    pub fn balanced() -> Self {
        Self {
            temperature: Some(0.5),
            ..Self::default()
        }
    }

    /// Set the temperature.
    #[must_use]
    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = Some(temperature);
        self
    }

    /// Set top-k truncation.
    #[must_use]
    pub fn with_top_k(mut self, top_k: u32) -> Self {
        self.top_k = Some(top_k);
        self
    }

    /// Set top-p truncation.
    #[must_use]
    pub fn with_top_p(mut self, top_p: f32) -> Self {
        self.top_p = Some(top_p);
        self
    }

    /// Set the generation cap.
    #[must_use]
    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = Some(max_tokens);
        self
    }

    /// Add a stop sequence.
    #[must_use]
    pub fn with_stop_sequence(mut self, stop: impl Into<String>) -> Self {
        self.stop_sequences.push(stop.into());
        self
    }

    /// Overlay the fields set on `self` on top of `base`.
    ///
    /// Stop sequences are concatenated, `base` first.
    #[must_use]
    pub fn merged_over(&self, base: &GenerationConfig) -> GenerationConfig {
        let mut stop_sequences = base.stop_sequences.clone();
        for stop in &self.stop_sequences {
            if !stop_sequences.contains(stop) {
                stop_sequences.push(stop.clone());
            }
        }
        GenerationConfig {
            temperature: self.temperature.or(base.temperature),
            top_k: self.top_k.or(base.top_k),
            top_p: self.top_p.or(base.top_p),
            max_tokens: self.max_tokens.or(base.max_tokens),
            stop_sequences,
        }
    }
}

/// Named generation presets, selectable from configuration files.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GenerationPreset {
    /// See [`GenerationConfig::structured`].
    Structured,
    /// See [`GenerationConfig::creative`].
    Creative,
    /// See [`GenerationConfig::conversational`].
    Conversational,
    /// See [`GenerationConfig::balanced`].
    #[default]
    Balanced,
}

impl GenerationPreset {
    /// The sampling options this preset stands for.
    #[must_use]
    pub fn config(self) -> GenerationConfig {
        match self {
            Self::Structured => GenerationConfig::structured(),
            Self::Creative => GenerationConfig::creative(),
            Self::Conversational => GenerationConfig::conversational(),
            Self::Balanced => GenerationConfig::balanced(),
        }
    }
}

impl fmt::Display for GenerationPreset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Structured => "structured",
            Self::Creative => "creative",
            Self::Conversational => "conversational",
            Self::Balanced => "balanced",
        };
        write!(f, "{name}")
    }
}

impl FromStr for GenerationPreset {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "structured" => Ok(Self::Structured),
            "creative" => Ok(Self::Creative),
            "conversational" => Ok(Self::Conversational),
            "balanced" => Ok(Self::Balanced),
            _ => Err(format!("unknown generation preset: '{s}'")),
        }
    }
}

/// Token accounting reported by a backend.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenUsage {
    /// Tokens consumed by the prompt.
    pub prompt_tokens: u32,
    /// Tokens produced by the model.
    pub completion_tokens: u32,
    /// Sum of the two.
    pub total_tokens: u32,
}

impl TokenUsage {
    /// Build usage from prompt and completion counts.
    #[must_use]
    pub fn new(prompt_tokens: u32, completion_tokens: u32) -> Self {
        Self {
            prompt_tokens,
            completion_tokens,
            total_tokens: prompt_tokens.saturating_add(completion_tokens),
        }
    }
}

/// A completed, non-streaming generation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GenerateResponse {
    /// The generated text.
    pub text: String,
    /// Wall-clock latency in milliseconds.
    pub processing_time_ms: u64,
    /// Token accounting, when the backend reports it.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token_usage: Option<TokenUsage>,
}

impl GenerateResponse {
    /// A response with only text and latency.
    #[must_use]
    pub fn new(text: impl Into<String>, processing_time_ms: u64) -> Self {
        Self {
            text: text.into(),
            processing_time_ms,
            token_usage: None,
        }
    }

    /// Attach token usage.
    #[must_use]
    pub fn with_usage(mut self, usage: TokenUsage) -> Self {
        self.token_usage = Some(usage);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn presets_differ_in_temperature() {
        let structured = GenerationConfig::structured().temperature.unwrap_or_default();
        let creative = GenerationConfig::creative().temperature.unwrap_or_default();
        assert!(structured < creative);
    }

    #[test]
    fn merge_prefers_overlay_fields() {
        let base = GenerationConfig::conversational().with_stop_sequence("\n\n");
        let overlay = GenerationConfig::default()
            .with_temperature(0.0)
            .with_stop_sequence("Observation:");
        let merged = overlay.merged_over(&base);
        assert_eq!(merged.temperature, Some(0.0));
        assert_eq!(merged.top_p, Some(0.9));
        assert_eq!(merged.stop_sequences, vec!["\n\n".to_string(), "Observation:".to_string()]);
    }

    #[test]
    fn preset_names_parse() {
        for preset in [
            GenerationPreset::Structured,
            GenerationPreset::Creative,
            GenerationPreset::Conversational,
            GenerationPreset::Balanced,
        ] {
            let parsed: GenerationPreset = preset.to_string().parse().expect("should parse");
            assert_eq!(parsed, preset);
        }
        assert!("spicy".parse::<GenerationPreset>().is_err());
    }

    #[test]
    fn token_usage_totals() {
        let usage = TokenUsage::new(12, 30);
        assert_eq!(usage.total_tokens, 42);
    }
}
