//! Retrying chain runner with an audit trail.
//!
//! One [`ExecutionRecord`] is appended per attempt, in attempt order, and
//! records are never modified afterwards. Only retryable failures (backend
//! errors) are retried; configuration errors are recorded once and returned.

use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::Serialize;
use tracing::{info, warn};
use uuid::Uuid;

use crate::chain::Chain;
use crate::config::ExecutorSettings;
use crate::error::Result;
use crate::types::{ChainInput, ChainOutput};

/// One attempt of one chain execution.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ExecutionRecord {
    /// Shared by every attempt of the same `execute` call.
    pub execution_id: Uuid,
    /// Name of the chain that ran.
    pub chain_name: String,
    /// 1-based attempt number.
    pub attempt: u32,
    /// Whether this attempt produced an output.
    pub success: bool,
    /// When the attempt finished.
    pub timestamp: DateTime<Utc>,
    /// Wall-clock duration of the attempt.
    pub duration_ms: u64,
    /// The failure message, for failed attempts.
    pub error: Option<String>,
}

/// Runs chains with a retry policy and keeps a history of every attempt.
///
/// The history belongs to this executor and is only cleared by
/// [`clear_history`](Self::clear_history).
#[derive(Debug)]
pub struct ChainExecutor {
    max_retries: u32,
    backoff: Option<Duration>,
    history: Mutex<Vec<ExecutionRecord>>,
}

impl ChainExecutor {
    /// Retry up to `max_retries` times after the first attempt, immediately.
    #[must_use]
    pub fn new(max_retries: u32) -> Self {
        Self {
            max_retries,
            backoff: None,
            history: Mutex::new(Vec::new()),
        }
    }

    /// Executor configured from the `[executor]` section.
    #[must_use]
    pub fn from_config(settings: &ExecutorSettings) -> Self {
        let executor = Self::new(settings.max_retries);
        if settings.backoff_ms > 0 {
            executor.with_backoff(Duration::from_millis(settings.backoff_ms))
        } else {
            executor
        }
    }

    /// Wait `backoff` between attempts.
    #[must_use]
    pub fn with_backoff(mut self, backoff: Duration) -> Self {
        self.backoff = Some(backoff);
        self
    }

    /// Configured retry count.
    #[must_use]
    pub fn max_retries(&self) -> u32 {
        self.max_retries
    }

    /// Run `chain`, retrying retryable failures.
    ///
    /// # Errors
    /// The last failure once retries are exhausted, or the first
    /// non-retryable failure.
    pub async fn execute<C>(&self, chain: &C, input: ChainInput) -> Result<ChainOutput>
    where
        C: Chain + ?Sized,
    {
        let execution_id = Uuid::new_v4();
        let mut attempt: u32 = 1;

        loop {
            let started = Instant::now();
            let result = chain.invoke(input.clone()).await;
            let duration_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);

            match result {
                Ok(output) => {
                    self.record(execution_id, chain.name(), attempt, duration_ms, None);
                    if attempt > 1 {
                        info!(chain = chain.name(), attempt, "chain succeeded after retry");
                    }
                    return Ok(output);
                }
                Err(e) => {
                    self.record(execution_id, chain.name(), attempt, duration_ms, Some(e.to_string()));

                    if !e.is_retryable() || attempt > self.max_retries {
                        info!(
                            chain = chain.name(),
                            attempts = attempt,
                            error = %e,
                            "chain execution failed"
                        );
                        return Err(e);
                    }

                    warn!(
                        chain = chain.name(),
                        attempt,
                        max_retries = self.max_retries,
                        error = %e,
                        "chain attempt failed, retrying"
                    );
                    if let Some(backoff) = self.backoff {
                        tokio::time::sleep(backoff).await;
                    }
                    attempt += 1;
                }
            }
        }
    }

    fn record(
        &self,
        execution_id: Uuid,
        chain_name: &str,
        attempt: u32,
        duration_ms: u64,
        error: Option<String>,
    ) {
        self.history.lock().push(ExecutionRecord {
            execution_id,
            chain_name: chain_name.to_string(),
            attempt,
            success: error.is_none(),
            timestamp: Utc::now(),
            duration_ms,
            error,
        });
    }

    /// Every record since construction or the last clear, oldest first.
    #[must_use]
    pub fn history(&self) -> Vec<ExecutionRecord> {
        self.history.lock().clone()
    }

    /// Forget all records.
    pub fn clear_history(&self) {
        self.history.lock().clear();
    }
}

impl Default for ChainExecutor {
    fn default() -> Self {
        Self::from_config(&ExecutorSettings::default())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::chain::{FnChain, ModelChain};
    use crate::error::WeftError;
    use weft_llm::ScriptedModel;

    #[tokio::test]
    async fn no_retries_records_single_failure() {
        let chain = ModelChain::new("always-fails", Arc::new(ScriptedModel::failing("offline")));
        let executor = ChainExecutor::new(0);

        let err = executor.execute(&chain, "hi".into()).await.expect_err("fails");
        assert!(matches!(err, WeftError::Execution(_)));

        let history = executor.history();
        assert_eq!(history.len(), 1);
        assert!(!history[0].success);
        assert_eq!(history[0].attempt, 1);
        assert!(history[0].error.as_deref().is_some_and(|e| e.contains("offline")));
    }

    #[tokio::test]
    async fn retries_until_success() {
        let model = Arc::new(ScriptedModel::fixed("ok").failing_first(2));
        let chain = ModelChain::new("flaky", model.clone());
        let executor = ChainExecutor::new(3);

        let output = executor.execute(&chain, "hi".into()).await.expect("succeeds");
        assert_eq!(output.text, "ok");

        let history = executor.history();
        let attempts: Vec<(u32, bool)> = history.iter().map(|r| (r.attempt, r.success)).collect();
        assert_eq!(attempts, vec![(1, false), (2, false), (3, true)]);
        assert!(history.iter().all(|r| r.execution_id == history[0].execution_id));
        assert!(history.iter().all(|r| r.chain_name == "flaky"));
        assert_eq!(model.call_count(), 3);
    }

    #[tokio::test]
    async fn gives_up_after_max_retries() {
        let chain = ModelChain::new("down", Arc::new(ScriptedModel::failing("offline")));
        let executor = ChainExecutor::new(2);

        assert!(executor.execute(&chain, "hi".into()).await.is_err());
        assert_eq!(executor.history().len(), 3);
    }

    #[tokio::test]
    async fn configuration_errors_are_not_retried() {
        let chain = FnChain::new("misconfigured", |_input: ChainInput| {
            Err(WeftError::NoBranch { key: "x".into() })
        });
        let executor = ChainExecutor::new(5);

        assert!(executor.execute(&chain, "hi".into()).await.is_err());
        assert_eq!(executor.history().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn backoff_waits_between_attempts() {
        let model = Arc::new(ScriptedModel::fixed("ok").failing_first(1));
        let chain = ModelChain::new("flaky", model);
        let executor = ChainExecutor::new(1).with_backoff(Duration::from_secs(5));

        let before = tokio::time::Instant::now();
        executor.execute(&chain, "hi".into()).await.expect("succeeds");
        assert!(before.elapsed() >= Duration::from_secs(5));
    }

    #[tokio::test]
    async fn history_accumulates_and_clears() {
        let chain = ModelChain::new("echo", Arc::new(ScriptedModel::echo()));
        let executor = ChainExecutor::default();

        executor.execute(&chain, "one".into()).await.expect("ok");
        executor.execute(&chain, "two".into()).await.expect("ok");
        let history = executor.history();
        assert_eq!(history.len(), 2);
        assert_ne!(history[0].execution_id, history[1].execution_id);

        let json = serde_json::to_string(&history[0]).expect("serialize");
        assert!(json.contains("\"chain_name\":\"echo\""));

        executor.clear_history();
        assert!(executor.history().is_empty());
    }
}
