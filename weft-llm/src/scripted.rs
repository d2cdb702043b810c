//! Deterministic in-process model for tests, benchmarks and demos.

use std::collections::VecDeque;
use std::time::Instant;

use async_trait::async_trait;
use futures::stream::{self, StreamExt};
use parking_lot::Mutex;

use crate::error::LlmError;
use crate::model::{LanguageModel, TextStream};
use crate::types::{GenerateResponse, GenerationConfig, TokenUsage};

/// What the model says once its script runs out.
#[derive(Debug, Clone)]
enum Fallback {
    /// Repeat this reply forever.
    Fixed(String),
    /// Reply with the prompt itself.
    Echo,
    /// Fail every call.
    Fail(String),
}

#[derive(Debug)]
struct ScriptState {
    replies: VecDeque<Result<String, String>>,
    fail_next: u32,
    prompts: Vec<String>,
}

/// A model that replays scripted replies.
///
/// Replies are consumed front to back; once they run out the fallback
/// (fixed reply, echo or failure) answers every further call. Every prompt
/// received is recorded for inspection.
#[derive(Debug)]
pub struct ScriptedModel {
    name: String,
    state: Mutex<ScriptState>,
    fallback: Fallback,
}

impl ScriptedModel {
    fn with_fallback(fallback: Fallback) -> Self {
        Self {
            name: "scripted".to_string(),
            state: Mutex::new(ScriptState {
                replies: VecDeque::new(),
                fail_next: 0,
                prompts: Vec::new(),
            }),
            fallback,
        }
    }

    /// Reply with the given texts in order, then repeat the last one.
    #[must_use]
    pub fn new<I, S>(replies: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let replies: Vec<String> = replies.into_iter().map(Into::into).collect();
        let last = replies.last().cloned().unwrap_or_default();
        let model = Self::with_fallback(Fallback::Fixed(last));
        model
            .state
            .lock()
            .replies
            .extend(replies.into_iter().map(Ok));
        model
    }

    /// Always reply with `text`.
    #[must_use]
    pub fn fixed(text: impl Into<String>) -> Self {
        Self::with_fallback(Fallback::Fixed(text.into()))
    }

    /// Reply with the prompt it was given.
    #[must_use]
    pub fn echo() -> Self {
        Self::with_fallback(Fallback::Echo)
    }

    /// Fail every call with a backend error carrying `message`.
    #[must_use]
    pub fn failing(message: impl Into<String>) -> Self {
        Self::with_fallback(Fallback::Fail(message.into()))
    }

    /// Rename the model (shows up in logs).
    #[must_use]
    pub fn named(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Fail the next `times` calls before following the script.
    #[must_use]
    pub fn failing_first(self, times: u32) -> Self {
        self.state.lock().fail_next = times;
        self
    }

    /// Queue a scripted failure after the replies queued so far.
    #[must_use]
    pub fn then_fail(self, message: impl Into<String>) -> Self {
        self.state.lock().replies.push_back(Err(message.into()));
        self
    }

    /// Queue a reply after the ones queued so far.
    #[must_use]
    pub fn then_reply(self, text: impl Into<String>) -> Self {
        self.state.lock().replies.push_back(Ok(text.into()));
        self
    }

    /// Every prompt received so far, oldest first.
    #[must_use]
    pub fn prompts(&self) -> Vec<String> {
        self.state.lock().prompts.clone()
    }

    /// Number of calls received so far.
    #[must_use]
    pub fn call_count(&self) -> usize {
        self.state.lock().prompts.len()
    }

    fn next_reply(&self, prompt: &str) -> Result<String, LlmError> {
        let mut state = self.state.lock();
        state.prompts.push(prompt.to_string());

        if state.fail_next > 0 {
            state.fail_next -= 1;
            return Err(LlmError::Backend("scripted transient failure".to_string()));
        }

        match state.replies.pop_front() {
            Some(Ok(text)) => Ok(text),
            Some(Err(message)) => Err(LlmError::Backend(message)),
            None => match &self.fallback {
                Fallback::Fixed(text) => Ok(text.clone()),
                Fallback::Echo => Ok(prompt.to_string()),
                Fallback::Fail(message) => Err(LlmError::Backend(message.clone())),
            },
        }
    }
}

/// Split text into fragments that concatenate back to the original.
pub(crate) fn word_fragments(text: &str) -> Vec<String> {
    let mut fragments = Vec::new();
    let mut current = String::new();
    for ch in text.chars() {
        current.push(ch);
        if ch.is_whitespace() {
            fragments.push(std::mem::take(&mut current));
        }
    }
    if !current.is_empty() {
        fragments.push(current);
    }
    fragments
}

#[async_trait]
impl LanguageModel for ScriptedModel {
    fn name(&self) -> &str {
        &self.name
    }

    async fn generate(
        &self,
        prompt: &str,
        _config: Option<&GenerationConfig>,
    ) -> Result<GenerateResponse, LlmError> {
        let start = Instant::now();
        let text = self.next_reply(prompt)?;
        let usage = TokenUsage::new(
            prompt.split_whitespace().count() as u32,
            text.split_whitespace().count() as u32,
        );
        Ok(GenerateResponse::new(text, start.elapsed().as_millis() as u64).with_usage(usage))
    }

    async fn stream(
        &self,
        prompt: &str,
        _config: Option<&GenerationConfig>,
    ) -> Result<TextStream, LlmError> {
        let text = self.next_reply(prompt)?;
        let fragments = word_fragments(&text);
        Ok(stream::iter(fragments.into_iter().map(Ok)).boxed())
    }
}
