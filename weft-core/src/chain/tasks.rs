//! Typed task chains: summarize, classify, translate, chat.
//!
//! Each is a thin wrapper over a [`ModelChain`] with a built-in template and
//! a typed `value`. `invoke` keeps the uniform chain contract; `run(text)`
//! returns the typed result directly.

use std::any::Any;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use weft_llm::{GenerationConfig, LanguageModel, PromptId, PromptLibrary};

use super::{Chain, ModelChain};
use crate::error::{Result, WeftError};
use crate::memory::Memory;
use crate::types::{ChainInput, ChainOutput};

/// Template variable holding the comma-separated label list.
pub const LABELS_VAR: &str = "labels";
/// Template variable holding the translation target.
pub const TARGET_LANGUAGE_VAR: &str = "target_language";

fn base_chain(
    name: &str,
    model: Arc<dyn LanguageModel>,
    prompts: &PromptLibrary,
    id: PromptId,
) -> Result<ModelChain> {
    let entry = prompts
        .get(id)
        .ok_or_else(|| WeftError::Template(weft_llm::PromptError::NotLoaded(id.to_string())))?;
    Ok(ModelChain::new(name, model)
        .with_template(entry.template.clone())
        .with_generation(entry.preset.config()))
}

/// Extract the typed value, turning a refusal into [`WeftError::Refused`].
fn typed<T: Any + Clone>(output: &ChainOutput) -> Result<T> {
    if let Some(refusal) = output.refusal() {
        return Err(WeftError::Refused {
            guardrail: refusal.guardrail.clone(),
            reason: refusal.reason.clone(),
        });
    }
    output
        .value_as::<T>()
        .cloned()
        .ok_or_else(|| WeftError::Config("chain produced an unexpected value type".into()))
}

fn word_count(text: &str) -> usize {
    text.split_whitespace().count()
}

// ---------------------------------------------------------------------------
// Summarize
// ---------------------------------------------------------------------------

/// Result of [`SummarizeChain`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Summary {
    /// The summary text.
    pub text: String,
    /// Words in the source text.
    pub source_words: usize,
    /// Words in the summary.
    pub summary_words: usize,
}

impl Summary {
    /// Summary length relative to the source (0 when the source is empty).
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn compression_ratio(&self) -> f64 {
        if self.source_words == 0 {
            0.0
        } else {
            self.summary_words as f64 / self.source_words as f64
        }
    }
}

/// Condenses text. Uses the structured preset.
pub struct SummarizeChain {
    inner: ModelChain,
}

impl SummarizeChain {
    /// Summarizer using the built-in prompt.
    ///
    /// # Errors
    /// The built-in prompt failed to load.
    pub fn new(model: Arc<dyn LanguageModel>) -> Result<Self> {
        Self::with_prompts(model, &PromptLibrary::builtin())
    }

    /// Summarizer using the prompt from `prompts`.
    ///
    /// # Errors
    /// `prompts` has no summarize template.
    pub fn with_prompts(model: Arc<dyn LanguageModel>, prompts: &PromptLibrary) -> Result<Self> {
        Ok(Self {
            inner: base_chain("summarize", model, prompts, PromptId::Summarize)?,
        })
    }

    /// Adjust the underlying model chain (memory, guardrails, sampling).
    #[must_use]
    pub fn configure(mut self, f: impl FnOnce(ModelChain) -> ModelChain) -> Self {
        self.inner = f(self.inner);
        self
    }

    /// Summarize `text`.
    ///
    /// # Errors
    /// Backend failures, or [`WeftError::Refused`] when a guardrail blocks.
    pub async fn run(&self, text: &str) -> Result<Summary> {
        typed(&self.invoke(ChainInput::new(text)).await?)
    }
}

#[async_trait]
impl Chain for SummarizeChain {
    fn name(&self) -> &str {
        self.inner.name()
    }

    async fn invoke(&self, input: ChainInput) -> Result<ChainOutput> {
        let source_words = word_count(&input.text);
        let output = self.inner.invoke(input).await?;
        if output.is_blocked() {
            return Ok(output);
        }
        let text = output.text.trim().to_string();
        let summary = Summary {
            summary_words: word_count(&text),
            source_words,
            text: text.clone(),
        };
        Ok(rewrap(&output, summary, text))
    }
}

/// Replace the value and text of `output`, keeping metadata and timing.
fn rewrap<T: Any + Send + Sync>(output: &ChainOutput, value: T, text: String) -> ChainOutput {
    let mut wrapped = ChainOutput::new(value, text).with_metadata_map(output.metadata.clone());
    wrapped.processing_time_ms = output.processing_time_ms;
    wrapped
}

// ---------------------------------------------------------------------------
// Classify
// ---------------------------------------------------------------------------

/// Result of [`ClassifyChain`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Classification {
    /// The configured label the model named, if any.
    pub label: Option<String>,
    /// The model's reply as given.
    pub raw: String,
}

/// Picks one of a fixed set of labels. Uses the structured preset.
///
/// The label is the first configured label mentioned in the reply,
/// compared case-insensitively. A reply naming none of them yields
/// `label: None`, which is not an error.
pub struct ClassifyChain {
    inner: ModelChain,
    labels: Vec<String>,
}

impl ClassifyChain {
    /// Classifier over `labels` using the built-in prompt.
    ///
    /// # Errors
    /// `labels` is empty.
    pub fn new<I, S>(model: Arc<dyn LanguageModel>, labels: I) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::with_prompts(model, labels, &PromptLibrary::builtin())
    }

    /// Classifier using the prompt from `prompts`.
    ///
    /// # Errors
    /// `labels` is empty or `prompts` has no classify template.
    pub fn with_prompts<I, S>(
        model: Arc<dyn LanguageModel>,
        labels: I,
        prompts: &PromptLibrary,
    ) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let labels: Vec<String> = labels.into_iter().map(Into::into).collect();
        if labels.is_empty() {
            return Err(WeftError::Config("classifier needs at least one label".into()));
        }
        Ok(Self {
            inner: base_chain("classify", model, prompts, PromptId::Classify)?,
            labels,
        })
    }

    /// Adjust the underlying model chain (memory, guardrails, sampling).
    #[must_use]
    pub fn configure(mut self, f: impl FnOnce(ModelChain) -> ModelChain) -> Self {
        self.inner = f(self.inner);
        self
    }

    /// The configured labels, in order.
    #[must_use]
    pub fn labels(&self) -> &[String] {
        &self.labels
    }

    /// Classify `text`.
    ///
    /// # Errors
    /// Backend failures, or [`WeftError::Refused`] when a guardrail blocks.
    pub async fn run(&self, text: &str) -> Result<Classification> {
        typed(&self.invoke(ChainInput::new(text)).await?)
    }

    fn match_label(&self, reply: &str) -> Option<String> {
        let reply = reply.to_lowercase();
        self.labels
            .iter()
            .find(|label| reply.contains(&label.to_lowercase()))
            .cloned()
    }
}

#[async_trait]
impl Chain for ClassifyChain {
    fn name(&self) -> &str {
        self.inner.name()
    }

    async fn invoke(&self, input: ChainInput) -> Result<ChainOutput> {
        let input = input.with_metadata(LABELS_VAR, self.labels.join(", "));
        let output = self.inner.invoke(input).await?;
        if output.is_blocked() {
            return Ok(output);
        }
        let raw = output.text.trim().to_string();
        let label = self.match_label(&raw);
        let text = label.clone().unwrap_or_else(|| raw.clone());
        Ok(rewrap(&output, Classification { label, raw }, text))
    }
}

// ---------------------------------------------------------------------------
// Translate
// ---------------------------------------------------------------------------

/// Result of [`TranslateChain`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Translation {
    /// The translated text.
    pub text: String,
    /// Language it was translated into.
    pub target_language: String,
}

/// Translates into a fixed target language. Uses the structured preset.
pub struct TranslateChain {
    inner: ModelChain,
    target_language: String,
}

impl TranslateChain {
    /// Translator into `target_language` using the built-in prompt.
    ///
    /// # Errors
    /// The built-in prompt failed to load.
    pub fn new(model: Arc<dyn LanguageModel>, target_language: impl Into<String>) -> Result<Self> {
        Self::with_prompts(model, target_language, &PromptLibrary::builtin())
    }

    /// Translator using the prompt from `prompts`.
    ///
    /// # Errors
    /// `prompts` has no translate template.
    pub fn with_prompts(
        model: Arc<dyn LanguageModel>,
        target_language: impl Into<String>,
        prompts: &PromptLibrary,
    ) -> Result<Self> {
        Ok(Self {
            inner: base_chain("translate", model, prompts, PromptId::Translate)?,
            target_language: target_language.into(),
        })
    }

    /// Adjust the underlying model chain (memory, guardrails, sampling).
    #[must_use]
    pub fn configure(mut self, f: impl FnOnce(ModelChain) -> ModelChain) -> Self {
        self.inner = f(self.inner);
        self
    }

    /// Translate `text`.
    ///
    /// # Errors
    /// Backend failures, or [`WeftError::Refused`] when a guardrail blocks.
    pub async fn run(&self, text: &str) -> Result<Translation> {
        typed(&self.invoke(ChainInput::new(text)).await?)
    }
}

#[async_trait]
impl Chain for TranslateChain {
    fn name(&self) -> &str {
        self.inner.name()
    }

    async fn invoke(&self, input: ChainInput) -> Result<ChainOutput> {
        let input = input.with_metadata(TARGET_LANGUAGE_VAR, self.target_language.clone());
        let output = self.inner.invoke(input).await?;
        if output.is_blocked() {
            return Ok(output);
        }
        let text = output.text.trim().to_string();
        let translation = Translation {
            text: text.clone(),
            target_language: self.target_language.clone(),
        };
        Ok(rewrap(&output, translation, text))
    }
}

// ---------------------------------------------------------------------------
// Chat
// ---------------------------------------------------------------------------

/// Conversational turn-taking over a memory. Uses the conversational preset.
pub struct ChatChain {
    inner: ModelChain,
}

impl ChatChain {
    /// Chat over `memory` using the built-in prompt.
    ///
    /// # Errors
    /// The built-in prompt failed to load.
    pub fn new(model: Arc<dyn LanguageModel>, memory: Arc<dyn Memory>) -> Result<Self> {
        Self::with_prompts(model, memory, &PromptLibrary::builtin())
    }

    /// Chat using the prompt from `prompts`.
    ///
    /// # Errors
    /// `prompts` has no chat template.
    pub fn with_prompts(
        model: Arc<dyn LanguageModel>,
        memory: Arc<dyn Memory>,
        prompts: &PromptLibrary,
    ) -> Result<Self> {
        Ok(Self {
            inner: base_chain("chat", model, prompts, PromptId::Chat)?.with_memory(memory),
        })
    }

    /// Adjust the underlying model chain (memory, guardrails, sampling).
    #[must_use]
    pub fn configure(mut self, f: impl FnOnce(ModelChain) -> ModelChain) -> Self {
        self.inner = f(self.inner);
        self
    }

    /// Override sampling options.
    #[must_use]
    pub fn with_generation(self, config: GenerationConfig) -> Self {
        self.configure(|inner| inner.with_generation(config))
    }

    /// Send one user message and get the reply.
    ///
    /// # Errors
    /// Backend or memory failures, or [`WeftError::Refused`].
    pub async fn run(&self, text: &str) -> Result<String> {
        typed(&self.invoke(ChainInput::new(text)).await?)
    }

    /// Stream the reply to one user message.
    ///
    /// # Errors
    /// Memory, template and backend failures while opening the stream.
    pub async fn stream(&self, text: &str) -> Result<super::ChainStream> {
        self.inner.stream(ChainInput::new(text)).await
    }
}

#[async_trait]
impl Chain for ChatChain {
    fn name(&self) -> &str {
        self.inner.name()
    }

    async fn invoke(&self, input: ChainInput) -> Result<ChainOutput> {
        self.inner.invoke(input).await
    }
}
