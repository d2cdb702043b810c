//! Summarizing conversation memory.

use std::collections::{BTreeMap, VecDeque};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::Mutex;
use tracing::{debug, warn};
use weft_llm::prompt::{MEMORY_SUMMARY, PromptTemplate};
use weft_llm::{GenerationConfig, LanguageModel};

use super::Memory;
use crate::error::Result;
use crate::types::{ChainInput, ChainOutput, MemoryEntry, format_history};

#[derive(Debug, Default)]
struct SummaryState {
    summary: Option<String>,
    recent: VecDeque<MemoryEntry>,
}

/// Keeps the last `recent_turns` pairs verbatim and folds older turns into
/// a running summary with one model call per overflow.
///
/// `load` returns the summary (role `system`) first, then the verbatim turns.
/// If the summarizing call fails the error propagates, the turn being saved
/// is dropped and the older turns stay verbatim until the next successful
/// save. A failed `save` leaves the memory as it was.
pub struct SummaryMemory {
    model: Arc<dyn LanguageModel>,
    recent_turns: usize,
    template: String,
    generation: GenerationConfig,
    state: Mutex<SummaryState>,
}

impl SummaryMemory {
    /// Create a summarizing memory.
    #[must_use]
    pub fn new(model: Arc<dyn LanguageModel>, recent_turns: usize) -> Self {
        Self {
            model,
            recent_turns,
            template: MEMORY_SUMMARY.to_string(),
            generation: GenerationConfig::structured(),
            state: Mutex::new(SummaryState::default()),
        }
    }

    /// Use a custom summarization template. It must use `{summary}` and `{lines}`.
    #[must_use]
    pub fn with_template(mut self, template: PromptTemplate) -> Self {
        self.template = template.source().to_string();
        self
    }

    /// The current running summary, if any turns have been folded.
    pub async fn summary(&self) -> Option<String> {
        self.state.lock().await.summary.clone()
    }

    async fn fold(&self, previous: Option<&str>, overflow: &[MemoryEntry]) -> Result<String> {
        let mut vars = BTreeMap::new();
        vars.insert("summary".to_string(), previous.unwrap_or("(none)").to_string());
        vars.insert("lines".to_string(), format_history(overflow));
        let prompt = PromptTemplate::new(self.template.as_str())?.render(&vars)?;
        let response = self.model.generate(&prompt, Some(&self.generation)).await?;
        Ok(response.text.trim().to_string())
    }
}

#[async_trait]
impl Memory for SummaryMemory {
    async fn load(&self, _input: &ChainInput) -> Result<Vec<MemoryEntry>> {
        let state = self.state.lock().await;
        let mut entries = Vec::with_capacity(state.recent.len() + 1);
        if let Some(summary) = &state.summary {
            entries.push(MemoryEntry::system(summary.clone()));
        }
        entries.extend(state.recent.iter().cloned());
        Ok(entries)
    }

    async fn save(&self, input: &ChainInput, output: &ChainOutput) -> Result<()> {
        let mut state = self.state.lock().await;
        state.recent.push_back(MemoryEntry::user(input.text.clone()));
        state.recent.push_back(MemoryEntry::assistant(output.text.clone()));

        let cap = self.recent_turns.saturating_mul(2);
        if state.recent.len() <= cap {
            return Ok(());
        }

        let overflow_len = state.recent.len() - cap;
        let overflow: Vec<MemoryEntry> = state.recent.iter().take(overflow_len).cloned().collect();
        debug!(folded = overflow.len(), "summarizing overflowing turns");

        match self.fold(state.summary.as_deref(), &overflow).await {
            Ok(summary) => {
                state.recent.drain(..overflow_len);
                state.summary = Some(summary);
                Ok(())
            }
            Err(e) => {
                // Roll back this turn; a retried invocation saves it again.
                state.recent.pop_back();
                state.recent.pop_back();
                warn!(error = %e, "summary update failed; turn not saved");
                Err(e)
            }
        }
    }

    async fn clear(&self) -> Result<()> {
        let mut state = self.state.lock().await;
        state.summary = None;
        state.recent.clear();
        Ok(())
    }

    async fn len(&self) -> usize {
        let state = self.state.lock().await;
        state.recent.len() + usize::from(state.summary.is_some())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Role;
    use weft_llm::ScriptedModel;

    async fn save(memory: &SummaryMemory, user: &str, assistant: &str) -> Result<()> {
        memory
            .save(&ChainInput::new(user), &ChainOutput::from_text(assistant))
            .await
    }

    #[tokio::test]
    async fn keeps_recent_turns_verbatim_until_overflow() {
        let model = Arc::new(ScriptedModel::fixed("unused"));
        let memory = SummaryMemory::new(model.clone(), 2);
        save(&memory, "q1", "a1").await.expect("save");
        save(&memory, "q2", "a2").await.expect("save");

        let entries = memory.load(&ChainInput::default()).await.expect("load");
        assert_eq!(entries.len(), 4);
        assert_eq!(model.call_count(), 0);
    }

    #[tokio::test]
    async fn folds_overflow_into_summary() {
        let model = Arc::new(ScriptedModel::new(["User asked q1.", "User asked q1 and q2."]));
        let memory = SummaryMemory::new(model.clone(), 1);
        save(&memory, "q1", "a1").await.expect("save");
        save(&memory, "q2", "a2").await.expect("save");

        let entries = memory.load(&ChainInput::default()).await.expect("load");
        assert_eq!(entries[0], MemoryEntry::system("User asked q1."));
        assert_eq!(entries[1], MemoryEntry::user("q2"));
        assert_eq!(entries[2], MemoryEntry::assistant("a2"));
        assert!(model.prompts()[0].contains("User: q1\nAssistant: a1"));

        save(&memory, "q3", "a3").await.expect("save");
        assert_eq!(memory.summary().await.as_deref(), Some("User asked q1 and q2."));
        assert!(model.prompts()[1].contains("User asked q1."));
    }

    #[tokio::test]
    async fn failed_summary_leaves_memory_unchanged() {
        let model = Arc::new(ScriptedModel::failing("offline"));
        let memory = SummaryMemory::new(model, 1);
        save(&memory, "q1", "a1").await.expect("no overflow yet");
        let before = memory.load(&ChainInput::default()).await.expect("load");

        assert!(save(&memory, "q2", "a2").await.is_err());

        let after = memory.load(&ChainInput::default()).await.expect("load");
        assert_eq!(after, before);
        assert_eq!(after, vec![MemoryEntry::user("q1"), MemoryEntry::assistant("a1")]);
        assert!(after.iter().all(|e| e.role != Role::System));
    }

    #[tokio::test]
    async fn clear_drops_summary() {
        let model = Arc::new(ScriptedModel::fixed("summary"));
        let memory = SummaryMemory::new(model, 0);
        save(&memory, "q1", "a1").await.expect("save");
        assert_eq!(memory.summary().await.as_deref(), Some("summary"));
        memory.clear().await.expect("clear");
        assert!(memory.load(&ChainInput::default()).await.expect("load").is_empty());
    }
}
