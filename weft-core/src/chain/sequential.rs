//! Run chains one after another.

use std::time::Instant;

use async_trait::async_trait;
use tracing::debug;

use super::{Chain, SharedChain};
use crate::error::{Result, WeftError};
use crate::types::{ChainInput, ChainOutput};

/// Feeds each stage the previous stage's text and metadata.
///
/// The caller's metadata reaches the first stage only; later stages see
/// whatever the stage before them emitted.
pub struct SequentialChain {
    name: String,
    chains: Vec<SharedChain>,
}

impl SequentialChain {
    /// Build a sequence from `chains`, run in the given order.
    #[must_use]
    pub fn new(name: impl Into<String>, chains: Vec<SharedChain>) -> Self {
        Self {
            name: name.into(),
            chains,
        }
    }

    /// Append a stage.
    #[must_use]
    pub fn then(mut self, chain: SharedChain) -> Self {
        self.chains.push(chain);
        self
    }

    /// Number of stages.
    #[must_use]
    pub fn len(&self) -> usize {
        self.chains.len()
    }

    /// Whether there are no stages.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.chains.is_empty()
    }
}

#[async_trait]
impl Chain for SequentialChain {
    fn name(&self) -> &str {
        &self.name
    }

    async fn invoke(&self, input: ChainInput) -> Result<ChainOutput> {
        let started = Instant::now();
        let Some((first, rest)) = self.chains.split_first() else {
            return Err(WeftError::EmptySequence);
        };

        let mut output = first.invoke(input).await?;
        for (stage, chain) in rest.iter().enumerate() {
            if output.is_blocked() {
                debug!(chain = %self.name, stage, "stopping sequence on refusal");
                return Ok(output);
            }
            output = chain.invoke(output.to_input()).await?;
        }

        let ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);
        debug!(chain = %self.name, stages = self.chains.len(), ms, "sequence complete");
        Ok(output.with_processing_time(ms))
    }
}
