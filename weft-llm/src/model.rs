//! The model capability contract every backend plugs into.

use async_trait::async_trait;
use futures::stream::{self, BoxStream, StreamExt};

use crate::error::LlmError;
use crate::types::{GenerateResponse, GenerationConfig};

/// A lazy, finite stream of generated text fragments.
///
/// One stream per call; it cannot be restarted. Dropping it stops generation.
pub type TextStream = BoxStream<'static, Result<String, LlmError>>;

/// A text generator: turns a prompt into text, whole or as fragments.
#[async_trait]
pub trait LanguageModel: Send + Sync {
    /// Backend identifier used in logs.
    fn name(&self) -> &str;

    /// Generate a complete response.
    async fn generate(
        &self,
        prompt: &str,
        config: Option<&GenerationConfig>,
    ) -> Result<GenerateResponse, LlmError>;

    /// Generate a response as a stream of fragments.
    ///
    /// Backends without native streaming inherit this, which yields the whole
    /// generation as a single fragment.
    async fn stream(
        &self,
        prompt: &str,
        config: Option<&GenerationConfig>,
    ) -> Result<TextStream, LlmError> {
        let response = self.generate(prompt, config).await?;
        Ok(stream::once(async move { Ok(response.text) }).boxed())
    }

    /// Whether the backend can currently serve requests.
    fn is_available(&self) -> bool {
        true
    }
}
