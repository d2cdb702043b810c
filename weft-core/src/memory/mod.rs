//! Conversation memory.
//!
//! A [`Memory`] is consulted before a chain calls the model and updated
//! after it answers. Entries come back in the order they were saved:
//!
//! - [`BufferMemory`]: the last *k* user/assistant pairs, verbatim
//! - [`SummaryMemory`]: the last *k* pairs verbatim, older turns folded
//!   into one running summary by a model call
//!
//! Instances are not designed for concurrent writers. Callers sharing one
//! memory across chains must serialize their invocations.

pub mod buffer;
pub mod summary;

pub use buffer::BufferMemory;
pub use summary::SummaryMemory;

use async_trait::async_trait;

use crate::error::Result;
use crate::types::{ChainInput, ChainOutput, MemoryEntry};

/// Stores and replays prior turns.
#[async_trait]
pub trait Memory: Send + Sync {
    /// Entries to include as context for `input`, oldest first.
    async fn load(&self, input: &ChainInput) -> Result<Vec<MemoryEntry>>;

    /// Record one completed turn.
    async fn save(&self, input: &ChainInput, output: &ChainOutput) -> Result<()>;

    /// Forget everything.
    async fn clear(&self) -> Result<()>;

    /// Number of entries `load` would currently return.
    async fn len(&self) -> usize;

    /// Whether `load` would currently return nothing.
    async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}
