//! # Weft Core
//!
//! On-device LLM orchestration: compose prompt-driven operations into
//! pipelines with memory, safety checks, retries and multi-step reasoning.
//!
//! The model itself is an external collaborator behind the
//! [`LanguageModel`](weft_llm::LanguageModel) trait. This crate organizes
//! what happens around it:
//!
//! - **Chains**: [`ModelChain`] and the composition operators
//!   [`SequentialChain`], [`ParallelChain`], [`ConditionalChain`]
//! - **Memory**: [`BufferMemory`] and [`SummaryMemory`]
//! - **Guardrails**: input/output checks that pass, rewrite or refuse
//! - **Executor**: [`ChainExecutor`] retries and keeps an audit trail
//! - **Agent**: a bounded Think/Act/Observe loop over [`Tool`]s and chains
//!
//! ## Example
//!
//! ```
//! use std::sync::Arc;
//! use weft_core::{ChainExecutor, ChainFactory, SequentialChain, SharedChain};
//! use weft_llm::ScriptedModel;
//!
//! # tokio_test_block_on(async {
//! let model = Arc::new(ScriptedModel::new(["A short summary.", "Un court résumé."]));
//! let factory = ChainFactory::new(model);
//!
//! let stages: Vec<SharedChain> = vec![
//!     Arc::new(factory.summarize()?),
//!     Arc::new(factory.translate("French")?),
//! ];
//! let pipeline = SequentialChain::new("summarize-then-translate", stages);
//!
//! let executor = ChainExecutor::new(2);
//! let output = executor.execute(&pipeline, "Some long text...".into()).await?;
//! assert_eq!(output.text, "Un court résumé.");
//! # Ok::<(), weft_core::WeftError>(())
//! # }).unwrap();
//! # fn tokio_test_block_on<F: std::future::Future>(f: F) -> F::Output {
//! #     tokio::runtime::Builder::new_current_thread().enable_all().build().unwrap().block_on(f)
//! # }
//! ```

#![deny(clippy::unwrap_used)]
#![deny(missing_docs)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod agent;
pub mod chain;
pub mod config;
pub mod error;
pub mod executor;
pub mod guardrail;
pub mod memory;
pub mod telemetry;
pub mod tool;
pub mod types;

pub use agent::{Agent, AgentConfig, AgentResult, AgentState, AgentStep};
pub use chain::{
    Chain, ChainFactory, ChainStream, ConditionalChain, FnChain, ModelChain, ParallelChain,
    SequentialChain, SharedChain,
};
pub use config::WeftConfig;
pub use error::{Result, WeftError};
pub use executor::{ChainExecutor, ExecutionRecord};
pub use guardrail::{
    ContentFilterGuardrail, Guardrail, GuardrailOutcome, InputLengthGuardrail,
    PatternRedactionGuardrail,
};
pub use memory::{BufferMemory, Memory, SummaryMemory};
pub use tool::{Document, FunctionTool, LocalSearchTool, SharedTool, Tool, ToolArgs};
pub use types::*;
