//! Route an input to one of several chains.

use std::collections::HashMap;

use async_trait::async_trait;
use tracing::debug;

use super::{Chain, SharedChain};
use crate::error::{Result, WeftError};
use crate::types::{ChainInput, ChainOutput};

type Router = Box<dyn Fn(&ChainInput) -> String + Send + Sync>;

/// Picks a branch by the key a router computes from the input.
///
/// Unknown keys go to the default branch when one is set, otherwise the call
/// fails with [`WeftError::NoBranch`].
pub struct ConditionalChain {
    name: String,
    router: Router,
    branches: HashMap<String, SharedChain>,
    default: Option<SharedChain>,
}

impl ConditionalChain {
    /// A conditional chain with no branches yet.
    pub fn new<F>(name: impl Into<String>, router: F) -> Self
    where
        F: Fn(&ChainInput) -> String + Send + Sync + 'static,
    {
        Self {
            name: name.into(),
            router: Box::new(router),
            branches: HashMap::new(),
            default: None,
        }
    }

    /// Route `key` to `chain`. A repeated key replaces the earlier branch.
    #[must_use]
    pub fn with_branch(mut self, key: impl Into<String>, chain: SharedChain) -> Self {
        self.branches.insert(key.into(), chain);
        self
    }

    /// Fallback for keys with no branch.
    #[must_use]
    pub fn with_default(mut self, chain: SharedChain) -> Self {
        self.default = Some(chain);
        self
    }
}

#[async_trait]
impl Chain for ConditionalChain {
    fn name(&self) -> &str {
        &self.name
    }

    async fn invoke(&self, input: ChainInput) -> Result<ChainOutput> {
        let key = (self.router)(&input);
        let branch = match self.branches.get(&key).or(self.default.as_ref()) {
            Some(branch) => branch,
            None => return Err(WeftError::NoBranch { key }),
        };
        debug!(chain = %self.name, %key, branch = branch.name(), "routed");
        branch.invoke(input).await
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::chain::FnChain;

    fn constant(text: &'static str) -> SharedChain {
        Arc::new(FnChain::new(text, move |_i: ChainInput| Ok(ChainOutput::from_text(text))))
    }

    fn by_language(input: &ChainInput) -> String {
        input.metadata.get("lang").cloned().unwrap_or_default()
    }

    #[tokio::test]
    async fn routes_by_key() {
        let chain = ConditionalChain::new("router", by_language)
            .with_branch("fr", constant("bonjour"))
            .with_branch("de", constant("hallo"));

        let output = chain
            .invoke(ChainInput::new("hi").with_metadata("lang", "de"))
            .await
            .expect("invoke");
        assert_eq!(output.text, "hallo");
    }

    #[tokio::test]
    async fn falls_back_to_default() {
        let chain = ConditionalChain::new("router", by_language)
            .with_branch("fr", constant("bonjour"))
            .with_default(constant("hello"));

        let output = chain.invoke("hi".into()).await.expect("invoke");
        assert_eq!(output.text, "hello");
    }

    #[tokio::test]
    async fn unmatched_key_without_default_fails() {
        let chain = ConditionalChain::new("router", |_i: &ChainInput| "es".to_string())
            .with_branch("fr", constant("bonjour"));

        let err = chain.invoke("hi".into()).await.expect_err("no branch");
        assert!(matches!(err, WeftError::NoBranch { ref key } if key == "es"));
        assert_eq!(err.to_string(), "no branch for key: es");
    }
}
