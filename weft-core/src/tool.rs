//! Tools: named capabilities the agent can call.

use std::collections::{BTreeMap, HashSet};
use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;
use futures::FutureExt;
use futures::future::BoxFuture;
use ordered_float::OrderedFloat;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{Result, WeftError};

/// Arguments passed to a tool.
pub type ToolArgs = BTreeMap<String, String>;

/// Argument key holding the agent's free-form action input.
pub const INPUT_ARG: &str = "input";

/// A named, invocable capability.
#[async_trait]
pub trait Tool: Send + Sync {
    /// Name the agent uses to call the tool.
    fn id(&self) -> &str;

    /// One-line description shown to the model.
    fn description(&self) -> &str;

    /// Run the tool.
    ///
    /// # Errors
    /// Whatever the tool considers a failure; the agent records it as an
    /// error observation.
    async fn invoke(&self, args: &ToolArgs) -> Result<String>;
}

/// Shared handle to any tool.
pub type SharedTool = Arc<dyn Tool>;

// ---------------------------------------------------------------------------
// FunctionTool
// ---------------------------------------------------------------------------

type SyncHandler = Box<dyn Fn(&ToolArgs) -> Result<String> + Send + Sync>;
type AsyncHandler = Box<dyn Fn(ToolArgs) -> BoxFuture<'static, Result<String>> + Send + Sync>;

enum Handler {
    Sync(SyncHandler),
    Async(AsyncHandler),
}

/// Wraps a caller-supplied function, synchronous or asynchronous.
pub struct FunctionTool {
    id: String,
    description: String,
    handler: Handler,
}

impl FunctionTool {
    /// Wrap a synchronous function.
    pub fn new<F>(id: impl Into<String>, description: impl Into<String>, f: F) -> Self
    where
        F: Fn(&ToolArgs) -> Result<String> + Send + Sync + 'static,
    {
        Self {
            id: id.into(),
            description: description.into(),
            handler: Handler::Sync(Box::new(f)),
        }
    }

    /// Wrap an asynchronous function.
    pub fn new_async<F, Fut>(id: impl Into<String>, description: impl Into<String>, f: F) -> Self
    where
        F: Fn(ToolArgs) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<String>> + Send + 'static,
    {
        Self {
            id: id.into(),
            description: description.into(),
            handler: Handler::Async(Box::new(move |args| f(args).boxed())),
        }
    }
}

#[async_trait]
impl Tool for FunctionTool {
    fn id(&self) -> &str {
        &self.id
    }

    fn description(&self) -> &str {
        &self.description
    }

    async fn invoke(&self, args: &ToolArgs) -> Result<String> {
        match &self.handler {
            Handler::Sync(f) => f(args),
            Handler::Async(f) => f(args.clone()).await,
        }
    }
}

// ---------------------------------------------------------------------------
// LocalSearchTool
// ---------------------------------------------------------------------------

/// A searchable in-memory document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Document {
    /// Short title; matches here count double.
    pub title: String,
    /// Body text returned on a match.
    pub content: String,
}

impl Document {
    /// Create a document.
    #[must_use]
    pub fn new(title: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            content: content.into(),
        }
    }
}

/// Keyword search over an in-memory document set.
///
/// Scoring: the query is split into lowercase alphanumeric terms; a
/// document scores `(2 × terms found in title + terms found in content) /
/// query terms`. The highest score wins and the earliest document wins a
/// tie. A zero score is reported as "no match", not as an error.
#[derive(Debug, Clone)]
pub struct LocalSearchTool {
    id: String,
    documents: Vec<Document>,
}

impl LocalSearchTool {
    /// Search tool called `local_search` over `documents`.
    #[must_use]
    pub fn new(documents: Vec<Document>) -> Self {
        Self {
            id: "local_search".to_string(),
            documents,
        }
    }

    /// Use a different tool id.
    #[must_use]
    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = id.into();
        self
    }

    /// Add a document.
    #[must_use]
    pub fn with_document(mut self, title: impl Into<String>, content: impl Into<String>) -> Self {
        self.documents.push(Document::new(title, content));
        self
    }

    /// Number of documents held.
    #[must_use]
    pub fn len(&self) -> usize {
        self.documents.len()
    }

    /// Whether there are no documents.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.documents.is_empty()
    }

    /// The best-matching document for `query`, if any scores above zero.
    #[must_use]
    pub fn search(&self, query: &str) -> Option<&Document> {
        let terms = terms(query);
        if terms.is_empty() {
            return None;
        }

        let mut best: Option<(OrderedFloat<f64>, &Document)> = None;
        for document in &self.documents {
            let score = score(&terms, document);
            if score.0 <= 0.0 {
                continue;
            }
            if best.is_none_or(|(top, _)| score > top) {
                best = Some((score, document));
            }
        }
        best.map(|(_, document)| document)
    }
}

fn terms(text: &str) -> Vec<String> {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
        .map(str::to_lowercase)
        .collect()
}

#[allow(clippy::cast_precision_loss)]
fn score(query_terms: &[String], document: &Document) -> OrderedFloat<f64> {
    let title: HashSet<String> = terms(&document.title).into_iter().collect();
    let content: HashSet<String> = terms(&document.content).into_iter().collect();

    let title_hits = query_terms.iter().filter(|t| title.contains(*t)).count();
    let content_hits = query_terms.iter().filter(|t| content.contains(*t)).count();

    OrderedFloat((title_hits * 2 + content_hits) as f64 / query_terms.len() as f64)
}

#[async_trait]
impl Tool for LocalSearchTool {
    fn id(&self) -> &str {
        &self.id
    }

    fn description(&self) -> &str {
        "Search local documents by keyword and return the best match"
    }

    async fn invoke(&self, args: &ToolArgs) -> Result<String> {
        let query = args
            .get("query")
            .or_else(|| args.get(INPUT_ARG))
            .ok_or_else(|| WeftError::Tool {
                tool: self.id.clone(),
                message: "missing 'query' argument".into(),
            })?;

        match self.search(query) {
            Some(document) => {
                debug!(tool = %self.id, title = %document.title, "document matched");
                Ok(document.content.clone())
            }
            None => Ok(format!("No matching document found for '{query}'")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(pairs: &[(&str, &str)]) -> ToolArgs {
        pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect()
    }

    fn library() -> LocalSearchTool {
        LocalSearchTool::new(Vec::new())
            .with_document("Rust ownership", "Each value has a single owner.")
            .with_document("Cooking pasta", "Boil water, add salt, then the pasta. Rust never sleeps.")
            .with_document("Borrowing", "References borrow values without taking ownership.")
    }

    #[tokio::test]
    async fn sync_function_tool() {
        let tool = FunctionTool::new("upper", "Uppercase the input", |args: &ToolArgs| {
            Ok(args.get(INPUT_ARG).cloned().unwrap_or_default().to_uppercase())
        });
        assert_eq!(tool.id(), "upper");
        assert_eq!(tool.invoke(&args(&[("input", "abc")])).await.expect("ok"), "ABC");
    }

    #[tokio::test]
    async fn async_function_tool() {
        let tool = FunctionTool::new_async("len", "Count characters", |args: ToolArgs| async move {
            let text = args.get(INPUT_ARG).cloned().unwrap_or_default();
            Ok(text.chars().count().to_string())
        });
        assert_eq!(tool.invoke(&args(&[("input", "héllo")])).await.expect("ok"), "5");
    }

    #[test]
    fn title_matches_outrank_content_matches() {
        let tool = library();
        let best = tool.search("rust").expect("match");
        assert_eq!(best.title, "Rust ownership");
    }

    #[test]
    fn ties_go_to_the_earliest_document() {
        let tool = LocalSearchTool::new(vec![
            Document::new("A", "shared term"),
            Document::new("B", "shared term"),
        ]);
        assert_eq!(tool.search("shared").map(|d| d.title.as_str()), Some("A"));
    }

    #[tokio::test]
    async fn no_match_is_an_observation() {
        let tool = library();
        let reply = tool.invoke(&args(&[("query", "quantum")])).await.expect("ok");
        assert_eq!(reply, "No matching document found for 'quantum'");
    }

    #[tokio::test]
    async fn falls_back_to_input_argument() {
        let tool = library();
        let reply = tool.invoke(&args(&[("input", "borrow values")])).await.expect("ok");
        assert_eq!(reply, "References borrow values without taking ownership.");
    }

    #[tokio::test]
    async fn missing_query_is_tool_error() {
        let tool = library();
        let err = tool.invoke(&ToolArgs::new()).await.expect_err("no query");
        assert!(matches!(err, WeftError::Tool { .. }));
    }
}
