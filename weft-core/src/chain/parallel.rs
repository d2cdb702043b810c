//! Run chains concurrently on the same input.

use std::time::Instant;

use async_trait::async_trait;
use futures::future::try_join_all;
use tracing::debug;

use super::{Chain, SharedChain};
use crate::error::Result;
use crate::types::{ChainInput, ChainOutput};

/// Separator placed between branch texts in the combined output.
pub const PARALLEL_SEPARATOR: &str = "\n---\n";

/// Fans one input out to every branch and waits for all of them.
///
/// If any branch fails the whole call fails and the remaining branches are
/// dropped; there are no partial results. On success:
///
/// - `text` is the branch texts joined with [`PARALLEL_SEPARATOR`]
/// - `value` is a `Vec<ChainOutput>` in declaration order
/// - `metadata` is the input metadata overlaid with each branch's metadata
///   in declaration order, so a later branch wins a key collision
pub struct ParallelChain {
    name: String,
    chains: Vec<SharedChain>,
}

impl ParallelChain {
    /// Build a fan-out over `chains`.
    #[must_use]
    pub fn new(name: impl Into<String>, chains: Vec<SharedChain>) -> Self {
        Self {
            name: name.into(),
            chains,
        }
    }

    /// Add a branch.
    #[must_use]
    pub fn with_branch(mut self, chain: SharedChain) -> Self {
        self.chains.push(chain);
        self
    }
}

#[async_trait]
impl Chain for ParallelChain {
    fn name(&self) -> &str {
        &self.name
    }

    async fn invoke(&self, input: ChainInput) -> Result<ChainOutput> {
        let started = Instant::now();
        let outputs = try_join_all(
            self.chains
                .iter()
                .map(|chain| chain.invoke(input.clone())),
        )
        .await?;

        let text = outputs
            .iter()
            .map(|o| o.text.as_str())
            .collect::<Vec<_>>()
            .join(PARALLEL_SEPARATOR);

        let mut metadata = input.metadata;
        for output in &outputs {
            metadata.extend(output.metadata.iter().map(|(k, v)| (k.clone(), v.clone())));
        }

        let ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);
        debug!(chain = %self.name, branches = outputs.len(), ms, "parallel complete");
        Ok(ChainOutput::new(outputs, text)
            .with_metadata_map(metadata)
            .with_processing_time(ms))
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::time::Duration;

    use super::*;
    use crate::chain::FnChain;
    use crate::error::WeftError;

    /// Replies after a delay, so completion order differs from declaration order.
    struct Slow {
        name: &'static str,
        delay_ms: u64,
    }

    #[async_trait]
    impl Chain for Slow {
        fn name(&self) -> &str {
            self.name
        }

        async fn invoke(&self, _input: ChainInput) -> Result<ChainOutput> {
            tokio::time::sleep(Duration::from_millis(self.delay_ms)).await;
            Ok(ChainOutput::from_text(self.name).with_metadata("winner", self.name))
        }
    }

    #[tokio::test(start_paused = true)]
    async fn combines_in_declaration_order() {
        let chain = ParallelChain::new(
            "fan",
            vec![
                Arc::new(Slow { name: "a", delay_ms: 30 }),
                Arc::new(Slow { name: "b", delay_ms: 10 }),
            ],
        );

        let output = chain
            .invoke(ChainInput::new("q").with_metadata("caller", "app"))
            .await
            .expect("invoke");

        assert_eq!(output.text, "a\n---\nb");
        let values = output.value_as::<Vec<ChainOutput>>().expect("list value");
        assert_eq!(values.len(), 2);
        assert_eq!(values[0].text, "a");
        assert_eq!(output.metadata.get("winner").map(String::as_str), Some("b"));
        assert_eq!(output.metadata.get("caller").map(String::as_str), Some("app"));
    }

    #[tokio::test]
    async fn any_failure_fails_the_group() {
        let ok: SharedChain = Arc::new(FnChain::new("ok", |i: ChainInput| {
            Ok(ChainOutput::from_text(i.text))
        }));
        let bad: SharedChain = Arc::new(FnChain::new("bad", |_i: ChainInput| {
            Err(WeftError::Tool {
                tool: "bad".into(),
                message: "exploded".into(),
            })
        }));
        let chain = ParallelChain::new("fan", vec![ok]).with_branch(bad);
        assert!(chain.invoke("x".into()).await.is_err());
    }

    /// Sets `finished` only if it runs to completion.
    struct Flagging {
        finished: Arc<AtomicBool>,
    }

    #[async_trait]
    impl Chain for Flagging {
        fn name(&self) -> &str {
            "flagging"
        }

        async fn invoke(&self, _input: ChainInput) -> Result<ChainOutput> {
            tokio::time::sleep(Duration::from_secs(5)).await;
            self.finished.store(true, Ordering::SeqCst);
            Ok(ChainOutput::from_text("late"))
        }
    }

    #[tokio::test(start_paused = true)]
    async fn failure_cancels_slower_siblings() {
        let finished = Arc::new(AtomicBool::new(false));
        let slow: SharedChain = Arc::new(Flagging {
            finished: Arc::clone(&finished),
        });
        let bad: SharedChain = Arc::new(FnChain::new("bad", |_i: ChainInput| {
            Err(WeftError::Tool {
                tool: "bad".into(),
                message: "exploded".into(),
            })
        }));

        let before = tokio::time::Instant::now();
        let result = ParallelChain::new("fan", vec![slow, bad]).invoke("x".into()).await;
        assert!(result.is_err());
        assert!(before.elapsed() < Duration::from_secs(5));

        tokio::time::sleep(Duration::from_secs(10)).await;
        assert!(!finished.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn no_branches_yields_empty_list() {
        let output = ParallelChain::new("none", Vec::new())
            .invoke("x".into())
            .await
            .expect("invoke");
        assert_eq!(output.text, "");
        assert_eq!(output.value_as::<Vec<ChainOutput>>().map(Vec::len), Some(0));
    }
}
