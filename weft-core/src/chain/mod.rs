//! Chains: the unit of work and its composition operators.
//!
//! Every chain maps a [`ChainInput`] to a [`ChainOutput`]. Callers never need
//! to know the concrete variant:
//!
//! - [`ModelChain`]: one model call around an optional prompt template
//! - [`SequentialChain`]: stages run in order, each fed the previous output
//! - [`ParallelChain`]: branches run concurrently on the same input
//! - [`ConditionalChain`]: a router picks one branch by key
//! - [`tasks`]: typed summarize, classify, translate and chat chains
//!
//! Composite chains hold their members as `Arc<dyn Chain>`, so the same
//! chain can appear in several trees.

pub mod conditional;
pub mod factory;
pub mod model;
pub mod parallel;
pub mod sequential;
pub mod tasks;

pub use conditional::ConditionalChain;
pub use factory::ChainFactory;
pub use model::{ChainStream, ModelChain};
pub use parallel::{PARALLEL_SEPARATOR, ParallelChain};
pub use sequential::SequentialChain;
pub use tasks::{
    ChatChain, ClassifyChain, Classification, Summary, SummarizeChain, TranslateChain, Translation,
};

use std::sync::Arc;

use async_trait::async_trait;

use crate::error::Result;
use crate::types::{ChainInput, ChainOutput};

/// A composable unit mapping a [`ChainInput`] to a [`ChainOutput`].
#[async_trait]
pub trait Chain: Send + Sync {
    /// Name used in logs and execution records.
    fn name(&self) -> &str;

    /// Run the chain once.
    ///
    /// # Errors
    /// Configuration mistakes (missing template variables, empty sequences,
    /// unmatched branches) and backend failures. A guardrail block is not an
    /// error; it comes back as a refusal output.
    async fn invoke(&self, input: ChainInput) -> Result<ChainOutput>;
}

/// Shared handle to any chain.
pub type SharedChain = Arc<dyn Chain>;

#[async_trait]
impl<C: Chain + ?Sized> Chain for Arc<C> {
    fn name(&self) -> &str {
        (**self).name()
    }

    async fn invoke(&self, input: ChainInput) -> Result<ChainOutput> {
        (**self).invoke(input).await
    }
}

/// A chain built from a closure. Handy for routing glue and tests.
pub struct FnChain<F> {
    name: String,
    f: F,
}

impl<F> FnChain<F>
where
    F: Fn(ChainInput) -> Result<ChainOutput> + Send + Sync,
{
    /// Wrap `f` as a chain called `name`.
    pub fn new(name: impl Into<String>, f: F) -> Self {
        Self {
            name: name.into(),
            f,
        }
    }
}

#[async_trait]
impl<F> Chain for FnChain<F>
where
    F: Fn(ChainInput) -> Result<ChainOutput> + Send + Sync,
{
    fn name(&self) -> &str {
        &self.name
    }

    async fn invoke(&self, input: ChainInput) -> Result<ChainOutput> {
        (self.f)(input)
    }
}
