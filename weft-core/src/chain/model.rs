//! Single model call with template, memory and guardrails.
//!
//! Invocation order:
//!   1. Load memory (if any)
//!   2. Input guardrails (a block returns a refusal, the model is not called)
//!   3. Render the template over the input variables and `{history}`
//!   4. Generate
//!   5. Output guardrails
//!   6. Save the turn to memory

use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use futures::StreamExt;
use tracing::debug;
use weft_llm::{GenerateResponse, GenerationConfig, LanguageModel, PromptTemplate, TextStream};

use super::Chain;
use crate::error::Result;
use crate::guardrail::{Guardrail, GuardrailOutcome, Stage, evaluate};
use crate::memory::Memory;
use crate::types::{ChainInput, ChainOutput, MemoryEntry, Metadata, Refusal, format_history};

/// Template variable that receives the formatted conversation history.
pub const HISTORY_VAR: &str = "history";
/// Output metadata key naming the model that answered.
pub const META_MODEL: &str = "model";
/// Output metadata key carrying total token usage, when reported.
pub const META_TOTAL_TOKENS: &str = "usage.total_tokens";

/// Wraps one model call.
///
/// The reply text becomes both `value` (a `String`) and `text` of the output.
pub struct ModelChain {
    name: String,
    model: Arc<dyn LanguageModel>,
    template: Option<PromptTemplate>,
    generation: Option<GenerationConfig>,
    memory: Option<Arc<dyn Memory>>,
    input_guardrails: Vec<Arc<dyn Guardrail>>,
    output_guardrails: Vec<Arc<dyn Guardrail>>,
}

/// Input that made it through the guardrails, ready for the model.
struct Prepared {
    input: ChainInput,
    prompt: String,
}

enum Preparation {
    Ready(Prepared),
    Blocked(ChainOutput),
}

impl ModelChain {
    /// A chain that sends the input text to `model` verbatim.
    #[must_use]
    pub fn new(name: impl Into<String>, model: Arc<dyn LanguageModel>) -> Self {
        Self {
            name: name.into(),
            model,
            template: None,
            generation: None,
            memory: None,
            input_guardrails: Vec::new(),
            output_guardrails: Vec::new(),
        }
    }

    /// Render prompts through `template`.
    #[must_use]
    pub fn with_template(mut self, template: PromptTemplate) -> Self {
        self.template = Some(template);
        self
    }

    /// Sampling options passed to every call.
    #[must_use]
    pub fn with_generation(mut self, config: GenerationConfig) -> Self {
        self.generation = Some(config);
        self
    }

    /// Consult and update `memory` on every call.
    #[must_use]
    pub fn with_memory(mut self, memory: Arc<dyn Memory>) -> Self {
        self.memory = Some(memory);
        self
    }

    /// Append an input guardrail.
    #[must_use]
    pub fn with_guardrail(mut self, guardrail: Arc<dyn Guardrail>) -> Self {
        self.input_guardrails.push(guardrail);
        self
    }

    /// Append several input guardrails, in order.
    #[must_use]
    pub fn with_guardrails(mut self, guardrails: impl IntoIterator<Item = Arc<dyn Guardrail>>) -> Self {
        self.input_guardrails.extend(guardrails);
        self
    }

    /// Append an output guardrail.
    #[must_use]
    pub fn with_output_guardrail(mut self, guardrail: Arc<dyn Guardrail>) -> Self {
        self.output_guardrails.push(guardrail);
        self
    }

    /// The model this chain calls.
    #[must_use]
    pub fn model(&self) -> &Arc<dyn LanguageModel> {
        &self.model
    }

    /// The configured memory, if any.
    #[must_use]
    pub fn memory(&self) -> Option<&Arc<dyn Memory>> {
        self.memory.as_ref()
    }

    fn render(&self, input: &ChainInput, history: &[MemoryEntry]) -> Result<String> {
        let Some(template) = &self.template else {
            if history.is_empty() {
                return Ok(input.text.clone());
            }
            return Ok(format!("{}\nUser: {}", format_history(history), input.text));
        };

        let mut vars = input.variables();
        if self.memory.is_some() {
            vars.insert(HISTORY_VAR.to_string(), format_history(history));
        } else {
            vars.entry(HISTORY_VAR.to_string()).or_default();
        }
        Ok(template.render(&vars)?)
    }

    async fn prepare(&self, input: ChainInput) -> Result<Preparation> {
        let history = match &self.memory {
            Some(memory) => memory.load(&input).await?,
            None => Vec::new(),
        };

        let input = match evaluate(&self.input_guardrails, &input.text, Stage::Input) {
            GuardrailOutcome::Passed => input,
            GuardrailOutcome::Modified(text) => {
                debug!(chain = %self.name, "input rewritten by guardrail");
                input.with_text(text)
            }
            GuardrailOutcome::Blocked { guardrail, reason } => {
                return Ok(Preparation::Blocked(ChainOutput::blocked(Refusal {
                    guardrail,
                    reason,
                })));
            }
        };

        let prompt = self.render(&input, &history)?;
        debug!(
            chain = %self.name,
            history = history.len(),
            prompt_chars = prompt.len(),
            "prompt assembled"
        );
        Ok(Preparation::Ready(Prepared { input, prompt }))
    }

    fn output_metadata(&self, response: Option<&GenerateResponse>) -> Metadata {
        let mut metadata = Metadata::new();
        metadata.insert(META_MODEL.to_string(), self.model.name().to_string());
        if let Some(usage) = response.and_then(|r| r.token_usage) {
            metadata.insert(META_TOTAL_TOKENS.to_string(), usage.total_tokens.to_string());
        }
        metadata
    }

    /// Invoke the chain, pulling the reply as a stream of fragments.
    ///
    /// Guardrails and template rendering run before the stream opens. A
    /// blocked input yields a stream that is already finished with the
    /// refusal.
    ///
    /// # Errors
    /// Memory, template and backend failures while opening the stream.
    pub async fn stream(&self, input: ChainInput) -> Result<ChainStream> {
        let started = Instant::now();
        let prepared = match self.prepare(input).await? {
            Preparation::Ready(prepared) => prepared,
            Preparation::Blocked(refusal) => return Ok(ChainStream::finished(refusal)),
        };

        let fragments = self
            .model
            .stream(&prepared.prompt, self.generation.as_ref())
            .await?;

        Ok(ChainStream {
            fragments: Some(fragments),
            accumulated: String::new(),
            input: prepared.input,
            memory: self.memory.clone(),
            output_guardrails: self.output_guardrails.clone(),
            metadata: self.output_metadata(None),
            started,
            refusal: None,
        })
    }
}

#[async_trait]
impl Chain for ModelChain {
    fn name(&self) -> &str {
        &self.name
    }

    async fn invoke(&self, input: ChainInput) -> Result<ChainOutput> {
        let started = Instant::now();
        let prepared = match self.prepare(input).await? {
            Preparation::Ready(prepared) => prepared,
            Preparation::Blocked(refusal) => return Ok(refusal),
        };

        let response = self
            .model
            .generate(&prepared.prompt, self.generation.as_ref())
            .await?;

        let text = match evaluate(&self.output_guardrails, &response.text, Stage::Output) {
            GuardrailOutcome::Passed => response.text.clone(),
            GuardrailOutcome::Modified(text) => text,
            GuardrailOutcome::Blocked { guardrail, reason } => {
                return Ok(ChainOutput::blocked(Refusal { guardrail, reason }));
            }
        };

        let output = ChainOutput::from_text(text)
            .with_metadata_map(self.output_metadata(Some(&response)))
            .with_processing_time(elapsed_ms(started));

        if let Some(memory) = &self.memory {
            memory.save(&prepared.input, &output).await?;
        }

        debug!(
            chain = %self.name,
            model_ms = response.processing_time_ms,
            chars = output.text.len(),
            "model chain complete"
        );
        Ok(output)
    }
}

fn elapsed_ms(started: Instant) -> u64 {
    u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX)
}

// ---------------------------------------------------------------------------
// Streaming
// ---------------------------------------------------------------------------

/// A reply being streamed from the model.
///
/// Fragments are accumulated as they are pulled. [`finish`](Self::finish)
/// saves whatever has been accumulated to memory, so a consumer that stops
/// early records a partial turn.
pub struct ChainStream {
    fragments: Option<TextStream>,
    accumulated: String,
    input: ChainInput,
    memory: Option<Arc<dyn Memory>>,
    output_guardrails: Vec<Arc<dyn Guardrail>>,
    metadata: Metadata,
    started: Instant,
    refusal: Option<ChainOutput>,
}

impl ChainStream {
    fn finished(refusal: ChainOutput) -> Self {
        Self {
            fragments: None,
            accumulated: String::new(),
            input: ChainInput::default(),
            memory: None,
            output_guardrails: Vec::new(),
            metadata: Metadata::new(),
            started: Instant::now(),
            refusal: Some(refusal),
        }
    }

    /// Pull the next fragment. `None` once the model is done.
    ///
    /// After a backend error the stream is closed.
    ///
    /// # Errors
    /// The backend failed mid-stream.
    pub async fn next_fragment(&mut self) -> Option<Result<String>> {
        let fragments = self.fragments.as_mut()?;
        match fragments.next().await {
            Some(Ok(fragment)) => {
                self.accumulated.push_str(&fragment);
                Some(Ok(fragment))
            }
            Some(Err(e)) => {
                self.fragments = None;
                Some(Err(e.into()))
            }
            None => {
                self.fragments = None;
                None
            }
        }
    }

    /// Text received so far.
    #[must_use]
    pub fn accumulated(&self) -> &str {
        &self.accumulated
    }

    /// Whether the input was refused before any model call.
    #[must_use]
    pub fn is_blocked(&self) -> bool {
        self.refusal.is_some()
    }

    /// Stop pulling, save the accumulated text and return the output.
    ///
    /// Dropping the stream handle stops generation.
    ///
    /// # Errors
    /// Memory failures while saving the turn.
    pub async fn finish(mut self) -> Result<ChainOutput> {
        if let Some(refusal) = self.refusal.take() {
            return Ok(refusal);
        }
        self.fragments = None;

        let text = match evaluate(&self.output_guardrails, &self.accumulated, Stage::Output) {
            GuardrailOutcome::Passed => std::mem::take(&mut self.accumulated),
            GuardrailOutcome::Modified(text) => text,
            GuardrailOutcome::Blocked { guardrail, reason } => {
                return Ok(ChainOutput::blocked(Refusal { guardrail, reason }));
            }
        };

        let output = ChainOutput::from_text(text)
            .with_metadata_map(self.metadata)
            .with_processing_time(elapsed_ms(self.started));

        if let Some(memory) = &self.memory {
            memory.save(&self.input, &output).await?;
        }
        Ok(output)
    }

    /// Drain every fragment, then [`finish`](Self::finish).
    ///
    /// # Errors
    /// The first backend error, or a memory failure.
    pub async fn collect(mut self) -> Result<ChainOutput> {
        while let Some(fragment) = self.next_fragment().await {
            fragment?;
        }
        self.finish().await
    }
}
