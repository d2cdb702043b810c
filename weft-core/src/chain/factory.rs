//! Builds chains around one shared model.
//!
//! Replaces a process-wide "default model": the application constructs one
//! factory with the model it wants and asks it for chains.

use std::sync::Arc;

use weft_llm::{GenerationConfig, LanguageModel, PromptId, PromptLibrary};

use super::{ChatChain, ClassifyChain, ModelChain, SummarizeChain, TranslateChain};
use crate::agent::{Agent, AgentConfig};
use crate::config::WeftConfig;
use crate::error::Result;
use crate::guardrail::{Guardrail, guardrails_from_config};
use crate::memory::Memory;

/// Hands out chains bound to the same model, prompts and guardrails.
#[derive(Clone)]
pub struct ChainFactory {
    model: Arc<dyn LanguageModel>,
    prompts: PromptLibrary,
    generation: GenerationConfig,
    overrides: GenerationConfig,
    guardrails: Vec<Arc<dyn Guardrail>>,
}

impl ChainFactory {
    /// Factory with built-in prompts, balanced sampling and no guardrails.
    #[must_use]
    pub fn new(model: Arc<dyn LanguageModel>) -> Self {
        Self {
            model,
            prompts: PromptLibrary::builtin(),
            generation: GenerationConfig::balanced(),
            overrides: GenerationConfig::default(),
            guardrails: Vec::new(),
        }
    }

    /// Factory using the sampling and guardrail sections of `config`.
    #[must_use]
    pub fn from_config(model: Arc<dyn LanguageModel>, config: &WeftConfig) -> Self {
        Self {
            generation: config.generation.resolve(),
            overrides: config.generation.overrides.clone(),
            guardrails: guardrails_from_config(&config.guardrails),
            ..Self::new(model)
        }
    }

    /// Replace built-in prompts with the ones `prompts` defines.
    #[must_use]
    pub fn with_prompts(mut self, prompts: PromptLibrary) -> Self {
        self.prompts = self.prompts.overlay(prompts);
        self
    }

    /// Sampling options for plain model chains. Fields set here also
    /// override the task chains' presets.
    #[must_use]
    pub fn with_generation(mut self, config: GenerationConfig) -> Self {
        self.overrides = config.clone();
        self.generation = config;
        self
    }

    /// Add an input guardrail to every chain built from now on.
    #[must_use]
    pub fn with_guardrail(mut self, guardrail: Arc<dyn Guardrail>) -> Self {
        self.guardrails.push(guardrail);
        self
    }

    /// The shared model.
    #[must_use]
    pub fn model(&self) -> Arc<dyn LanguageModel> {
        Arc::clone(&self.model)
    }

    fn tune(&self, chain: ModelChain, id: PromptId) -> ModelChain {
        let preset = self
            .prompts
            .get(id)
            .map(|entry| entry.preset.config())
            .unwrap_or_default();
        chain
            .with_generation(self.overrides.merged_over(&preset))
            .with_guardrails(self.guardrails.iter().cloned())
    }

    /// A chain sending input straight to the model.
    #[must_use]
    pub fn model_chain(&self, name: impl Into<String>) -> ModelChain {
        ModelChain::new(name, self.model())
            .with_generation(self.generation.clone())
            .with_guardrails(self.guardrails.iter().cloned())
    }

    /// A summarizer.
    ///
    /// # Errors
    /// The prompt library has no summarize template.
    pub fn summarize(&self) -> Result<SummarizeChain> {
        Ok(SummarizeChain::with_prompts(self.model(), &self.prompts)?
            .configure(|c| self.tune(c, PromptId::Summarize)))
    }

    /// A classifier over `labels`.
    ///
    /// # Errors
    /// `labels` is empty or the library has no classify template.
    pub fn classify<I, S>(&self, labels: I) -> Result<ClassifyChain>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Ok(ClassifyChain::with_prompts(self.model(), labels, &self.prompts)?
            .configure(|c| self.tune(c, PromptId::Classify)))
    }

    /// A translator into `target_language`.
    ///
    /// # Errors
    /// The library has no translate template.
    pub fn translate(&self, target_language: impl Into<String>) -> Result<TranslateChain> {
        Ok(
            TranslateChain::with_prompts(self.model(), target_language, &self.prompts)?
                .configure(|c| self.tune(c, PromptId::Translate)),
        )
    }

    /// A chat session over `memory`.
    ///
    /// # Errors
    /// The library has no chat template.
    pub fn chat(&self, memory: Arc<dyn Memory>) -> Result<ChatChain> {
        Ok(ChatChain::with_prompts(self.model(), memory, &self.prompts)?
            .configure(|c| self.tune(c, PromptId::Chat)))
    }

    /// An agent reasoning with the shared model.
    ///
    /// # Errors
    /// The library has no agent reasoning template.
    pub fn agent(&self, config: AgentConfig) -> Result<Agent> {
        Agent::with_prompts(self.model(), config, &self.prompts)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chain::Chain;
    use crate::memory::BufferMemory;
    use weft_llm::ScriptedModel;

    #[tokio::test]
    async fn chains_share_the_model() {
        let model = Arc::new(ScriptedModel::new(["short", "positive", "Hallo", "hi"]));
        let factory = ChainFactory::new(model.clone());

        factory.summarize().expect("summarize").run("a b c").await.expect("run");
        factory
            .classify(["positive", "negative"])
            .expect("classify")
            .run("great")
            .await
            .expect("run");
        factory.translate("German").expect("translate").run("Hello").await.expect("run");
        factory
            .chat(Arc::new(BufferMemory::new(2)))
            .expect("chat")
            .run("hey")
            .await
            .expect("run");

        assert_eq!(model.call_count(), 4);
    }

    #[tokio::test]
    async fn config_guardrails_apply_to_every_chain() {
        let config = WeftConfig::from_toml(
            r#"
            [guardrails]
            blocked_patterns = ["password"]
            "#,
        )
        .expect("config");
        let model = Arc::new(ScriptedModel::fixed("unused"));
        let factory = ChainFactory::from_config(model.clone(), &config);

        let output = factory
            .model_chain("plain")
            .invoke("my password".into())
            .await
            .expect("refusal");
        assert!(output.is_blocked());
        assert!(factory.summarize().expect("summarize").run("password").await.is_err());
        assert_eq!(model.call_count(), 0);
    }

    #[tokio::test]
    async fn custom_prompts_override_builtins() {
        let entry = r#"
            [prompt]
            version = "2"
            preset = "creative"
            template = "TL;DR {input}"
        "#;
        let model = Arc::new(ScriptedModel::echo());
        let factory = ChainFactory::new(model).with_prompts(single(PromptId::Summarize, entry));
        let summary = factory.summarize().expect("summarize").run("words here").await.expect("run");
        assert_eq!(summary.text, "TL;DR words here");
    }

    fn single(id: PromptId, content: &str) -> PromptLibrary {
        let dir = tempfile::tempdir().expect("tempdir");
        std::fs::write(dir.path().join(id.filename()), content).expect("write");
        PromptLibrary::from_directory(dir.path()).expect("load")
    }
}
