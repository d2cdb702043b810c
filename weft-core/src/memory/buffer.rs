//! Fixed-window conversation buffer.

use std::collections::VecDeque;

use async_trait::async_trait;
use parking_lot::Mutex;
use tracing::trace;

use super::Memory;
use crate::config::MemorySettings;
use crate::error::Result;
use crate::types::{ChainInput, ChainOutput, MemoryEntry};

/// Keeps the most recent `max_entries` user/assistant pairs.
///
/// One save appends one user entry and one assistant entry, so the buffer
/// never holds more than `2 × max_entries` entries. Oldest pairs are dropped
/// first; the order of what remains is never changed.
#[derive(Debug)]
pub struct BufferMemory {
    max_entries: usize,
    entries: Mutex<VecDeque<MemoryEntry>>,
}

impl BufferMemory {
    /// Create a buffer holding at most `max_entries` pairs.
    #[must_use]
    pub fn new(max_entries: usize) -> Self {
        Self {
            max_entries,
            entries: Mutex::new(VecDeque::with_capacity(max_entries.saturating_mul(2))),
        }
    }

    /// Create a buffer sized from configuration.
    #[must_use]
    pub fn from_config(settings: &MemorySettings) -> Self {
        Self::new(settings.buffer_max_entries)
    }

    /// Maximum number of user/assistant pairs kept.
    #[must_use]
    pub fn max_entries(&self) -> usize {
        self.max_entries
    }

    /// Record a turn without going through a chain.
    pub fn push_turn(&self, user: impl Into<String>, assistant: impl Into<String>) {
        let mut entries = self.entries.lock();
        entries.push_back(MemoryEntry::user(user));
        entries.push_back(MemoryEntry::assistant(assistant));

        let cap = self.max_entries.saturating_mul(2);
        while entries.len() > cap {
            entries.pop_front();
        }
        trace!(len = entries.len(), cap, "buffer memory saved turn");
    }

    /// Current contents, oldest first.
    #[must_use]
    pub fn entries(&self) -> Vec<MemoryEntry> {
        self.entries.lock().iter().cloned().collect()
    }

}

#[async_trait]
impl Memory for BufferMemory {
    async fn load(&self, _input: &ChainInput) -> Result<Vec<MemoryEntry>> {
        Ok(self.entries())
    }

    async fn save(&self, input: &ChainInput, output: &ChainOutput) -> Result<()> {
        self.push_turn(input.text.clone(), output.text.clone());
        Ok(())
    }

    async fn clear(&self) -> Result<()> {
        self.entries.lock().clear();
        Ok(())
    }

    async fn len(&self) -> usize {
        self.entries.lock().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Role;

    async fn save(memory: &BufferMemory, user: &str, assistant: &str) {
        memory
            .save(&ChainInput::new(user), &ChainOutput::from_text(assistant))
            .await
            .expect("save");
    }

    #[tokio::test]
    async fn keeps_most_recent_pairs() {
        let memory = BufferMemory::new(2);
        save(&memory, "q1", "a1").await;
        save(&memory, "q2", "a2").await;
        save(&memory, "q3", "a3").await;

        let entries = memory.load(&ChainInput::default()).await.expect("load");
        let contents: Vec<&str> = entries.iter().map(|e| e.content.as_str()).collect();
        assert_eq!(contents, vec!["q2", "a2", "q3", "a3"]);
        assert_eq!(entries[0].role, Role::User);
        assert_eq!(entries[1].role, Role::Assistant);
    }

    #[tokio::test]
    async fn load_is_idempotent() {
        let memory = BufferMemory::new(3);
        save(&memory, "hello", "hi").await;
        let first = memory.load(&ChainInput::default()).await.expect("load");
        let second = memory.load(&ChainInput::default()).await.expect("load");
        assert_eq!(first, second);
    }

    #[tokio::test]
    async fn clear_empties_buffer() {
        let memory = BufferMemory::new(3);
        save(&memory, "hello", "hi").await;
        assert_eq!(memory.len().await, 2);
        memory.clear().await.expect("clear");
        assert!(memory.is_empty().await);
    }

    #[tokio::test]
    async fn zero_capacity_keeps_nothing() {
        let memory = BufferMemory::new(0);
        save(&memory, "hello", "hi").await;
        assert!(memory.entries().is_empty());
    }
}
