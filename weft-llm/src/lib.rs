//! # weft-llm: Model Capability Layer for weft
//!
//! The orchestration core never talks to a model backend directly. It
//! depends on the [`LanguageModel`] trait defined here, which any
//! platform-native engine can implement:
//!   - **`HttpModel`**: Ollama or any OpenAI-compatible local server
//!   - **`ScriptedModel`**: deterministic replies for tests and demos
//!   - your own on-device engine
//!
//! This crate also owns the pieces every backend shares:
//!   - Sampling options and named presets ([`GenerationConfig`])
//!   - Strict prompt templates and the built-in prompt library
//!   - A uniform backend error type ([`LlmError`])
//!
//! # Architecture
//!
//! ```text
//! Chain ──prompt──▶ LanguageModel::generate ──▶ GenerateResponse
//!       ──prompt──▶ LanguageModel::stream   ──▶ TextStream (fragments)
//! ```

pub mod client;
pub mod error;
pub mod model;
pub mod prompt;
pub mod scripted;
pub mod types;

pub use client::{HttpModel, LlmProvider};
pub use error::{LlmError, PromptError};
pub use model::{LanguageModel, TextStream};
pub use prompt::{PromptId, PromptLibrary, PromptTemplate};
pub use scripted::ScriptedModel;
pub use types::{GenerateResponse, GenerationConfig, GenerationPreset, TokenUsage};
