//! HTTP model backend: Ollama and OpenAI-compatible servers.
//!
//! The client performs exactly one request per call. Retry policy lives in
//! the orchestration layer, not here.

use std::collections::VecDeque;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use futures::stream::{self, BoxStream, StreamExt};
use reqwest::Client;
use serde_json::{Value, json};
use tracing::{debug, warn};

use crate::error::LlmError;
use crate::model::{LanguageModel, TextStream};
use crate::types::{GenerateResponse, GenerationConfig, TokenUsage};

/// Provider backend for LLM inference.
#[derive(Debug, Clone)]
pub enum LlmProvider {
    /// Ollama running locally (recommended).
    Ollama { base_url: String },
    /// OpenAI-compatible API (llama.cpp server, LM Studio, vLLM, ...).
    OpenAiCompatible { base_url: String, api_key: String },
}

/// A [`LanguageModel`] served over HTTP.
pub struct HttpModel {
    provider: LlmProvider,
    http: Client,
    model: String,
    timeout: Duration,
}

impl HttpModel {
    /// Create a new HTTP-backed model.
    #[must_use]
    pub fn new(provider: LlmProvider, model: impl Into<String>) -> Self {
        Self {
            provider,
            http: Client::new(),
            model: model.into(),
            timeout: Duration::from_millis(30_000),
        }
    }

    /// Local Ollama at its default address.
    #[must_use]
    pub fn ollama(model: impl Into<String>) -> Self {
        Self::new(
            LlmProvider::Ollama {
                base_url: "http://localhost:11434".to_string(),
            },
            model,
        )
    }

    /// Set the per-request timeout.
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    async fn post(&self, url: &str, body: &Value, api_key: Option<&str>) -> Result<reqwest::Response, LlmError> {
        let mut request = self.http.post(url).json(body).timeout(self.timeout);
        if let Some(key) = api_key {
            request = request.header("Authorization", format!("Bearer {key}"));
        }

        let resp = request.send().await.map_err(|e| {
            if e.is_timeout() {
                warn!("{} request timed out after {}ms", self.model, self.timeout.as_millis());
                LlmError::Timeout(self.timeout.as_millis() as u64)
            } else {
                warn!("{} request failed: {}", self.model, e);
                LlmError::from(e)
            }
        })?;

        if resp.status().is_success() {
            Ok(resp)
        } else {
            let status = resp.status();
            let detail = resp.text().await.unwrap_or_default();
            warn!("{} returned HTTP {}", self.model, status);
            Err(LlmError::RequestFailed(format!("HTTP {status}: {detail}")))
        }
    }
}

/// Build the body for Ollama's `/api/generate`.
#[must_use]
pub fn ollama_body(model: &str, prompt: &str, config: Option<&GenerationConfig>, stream: bool) -> Value {
    let mut options = serde_json::Map::new();
    if let Some(config) = config {
        if let Some(t) = config.temperature {
            options.insert("temperature".into(), json!(t));
        }
        if let Some(k) = config.top_k {
            options.insert("top_k".into(), json!(k));
        }
        if let Some(p) = config.top_p {
            options.insert("top_p".into(), json!(p));
        }
        if let Some(n) = config.max_tokens {
            options.insert("num_predict".into(), json!(n));
        }
        if !config.stop_sequences.is_empty() {
            options.insert("stop".into(), json!(config.stop_sequences));
        }
    }
    json!({
        "model": model,
        "prompt": prompt,
        "stream": stream,
        "options": Value::Object(options),
    })
}

/// Build the body for `/v1/chat/completions`.
#[must_use]
pub fn openai_body(model: &str, prompt: &str, config: Option<&GenerationConfig>) -> Value {
    let mut body = json!({
        "model": model,
        "messages": [
            { "role": "user", "content": prompt },
        ],
    });
    if let Some(config) = config {
        if let Some(t) = config.temperature {
            body["temperature"] = json!(t);
        }
        if let Some(p) = config.top_p {
            body["top_p"] = json!(p);
        }
        if let Some(n) = config.max_tokens {
            body["max_tokens"] = json!(n);
        }
        if !config.stop_sequences.is_empty() {
            body["stop"] = json!(config.stop_sequences);
        }
    }
    body
}

/// Extract text and usage from a non-streaming Ollama reply.
///
/// # Errors
///
/// Returns [`LlmError::ParseError`] if the reply has no `response` field.
pub fn parse_ollama_response(json: &Value) -> Result<(String, Option<TokenUsage>), LlmError> {
    if let Some(error) = json["error"].as_str() {
        return Err(LlmError::Backend(error.to_string()));
    }
    let text = json["response"]
        .as_str()
        .ok_or_else(|| LlmError::ParseError(format!("missing 'response' in {json}")))?
        .to_string();
    let usage = match (json["prompt_eval_count"].as_u64(), json["eval_count"].as_u64()) {
        (Some(p), Some(c)) => Some(TokenUsage::new(p as u32, c as u32)),
        _ => None,
    };
    Ok((text, usage))
}

/// Extract text and usage from an OpenAI-compatible chat completion.
///
/// # Errors
///
/// Returns [`LlmError::ParseError`] if the reply has no message content.
pub fn parse_openai_response(json: &Value) -> Result<(String, Option<TokenUsage>), LlmError> {
    if let Some(error) = json["error"]["message"].as_str() {
        return Err(LlmError::Backend(error.to_string()));
    }
    let text = json["choices"][0]["message"]["content"]
        .as_str()
        .ok_or_else(|| LlmError::ParseError(format!("missing message content in {json}")))?
        .to_string();
    let usage = match (
        json["usage"]["prompt_tokens"].as_u64(),
        json["usage"]["completion_tokens"].as_u64(),
    ) {
        (Some(p), Some(c)) => Some(TokenUsage::new(p as u32, c as u32)),
        _ => None,
    };
    Ok((text, usage))
}

/// Parse one line of Ollama's streaming output into `(fragment, done)`.
///
/// Blank lines yield `None`.
///
/// # Errors
///
/// Returns an error for malformed JSON or a reported backend error.
pub fn parse_ollama_stream_line(line: &str) -> Result<Option<(String, bool)>, LlmError> {
    let line = line.trim();
    if line.is_empty() {
        return Ok(None);
    }
    let json: Value = serde_json::from_str(line).map_err(|e| LlmError::ParseError(e.to_string()))?;
    if let Some(error) = json["error"].as_str() {
        return Err(LlmError::Backend(error.to_string()));
    }
    let fragment = json["response"].as_str().unwrap_or_default().to_string();
    let done = json["done"].as_bool().unwrap_or(false);
    Ok(Some((fragment, done)))
}

/// Incremental newline-delimited JSON decoder state.
struct NdjsonState {
    bytes: BoxStream<'static, Result<Vec<u8>, LlmError>>,
    buffer: Vec<u8>,
    pending: VecDeque<String>,
    done: bool,
}

impl NdjsonState {
    /// Move every complete line in the buffer into `pending`.
    fn drain_lines(&mut self, flush: bool) -> Result<(), LlmError> {
        while let Some(pos) = self.buffer.iter().position(|b| *b == b'\n') {
            let line: Vec<u8> = self.buffer.drain(..=pos).collect();
            self.accept_line(&line)?;
        }
        if flush && !self.buffer.is_empty() {
            let line = std::mem::take(&mut self.buffer);
            self.accept_line(&line)?;
        }
        Ok(())
    }

    fn accept_line(&mut self, line: &[u8]) -> Result<(), LlmError> {
        let line = String::from_utf8_lossy(line);
        if let Some((fragment, done)) = parse_ollama_stream_line(&line)? {
            if !fragment.is_empty() {
                self.pending.push_back(fragment);
            }
            if done {
                self.done = true;
            }
        }
        Ok(())
    }
}

fn ndjson_fragments(bytes: BoxStream<'static, Result<Vec<u8>, LlmError>>) -> TextStream {
    let state = NdjsonState {
        bytes,
        buffer: Vec::new(),
        pending: VecDeque::new(),
        done: false,
    };
    stream::unfold(state, |mut st| async move {
        loop {
            if let Some(fragment) = st.pending.pop_front() {
                return Some((Ok(fragment), st));
            }
            if st.done {
                return None;
            }
            match st.bytes.next().await {
                Some(Ok(chunk)) => {
                    st.buffer.extend_from_slice(&chunk);
                    if let Err(e) = st.drain_lines(false) {
                        st.done = true;
                        return Some((Err(e), st));
                    }
                }
                Some(Err(e)) => {
                    st.done = true;
                    return Some((Err(e), st));
                }
                None => {
                    let flushed = st.drain_lines(true);
                    st.done = true;
                    if let Err(e) = flushed {
                        return Some((Err(e), st));
                    }
                }
            }
        }
    })
    .boxed()
}

#[async_trait]
impl LanguageModel for HttpModel {
    fn name(&self) -> &str {
        &self.model
    }

    async fn generate(
        &self,
        prompt: &str,
        config: Option<&GenerationConfig>,
    ) -> Result<GenerateResponse, LlmError> {
        let start = Instant::now();
        let (text, usage) = match &self.provider {
            LlmProvider::Ollama { base_url } => {
                let url = format!("{base_url}/api/generate");
                let body = ollama_body(&self.model, prompt, config, false);
                let json: Value = self.post(&url, &body, None).await?.json().await?;
                parse_ollama_response(&json)?
            }
            LlmProvider::OpenAiCompatible { base_url, api_key } => {
                let url = format!("{base_url}/v1/chat/completions");
                let body = openai_body(&self.model, prompt, config);
                let json: Value = self.post(&url, &body, Some(api_key)).await?.json().await?;
                parse_openai_response(&json)?
            }
        };

        let latency_ms = start.elapsed().as_millis() as u64;
        debug!(model = %self.model, latency_ms, "generation complete");

        let mut response = GenerateResponse::new(text, latency_ms);
        response.token_usage = usage;
        Ok(response)
    }

    async fn stream(
        &self,
        prompt: &str,
        config: Option<&GenerationConfig>,
    ) -> Result<TextStream, LlmError> {
        match &self.provider {
            LlmProvider::Ollama { base_url } => {
                let url = format!("{base_url}/api/generate");
                let body = ollama_body(&self.model, prompt, config, true);
                let resp = self.post(&url, &body, None).await?;
                let bytes = resp
                    .bytes_stream()
                    .map(|chunk| chunk.map(|b| b.to_vec()).map_err(LlmError::from))
                    .boxed();
                Ok(ndjson_fragments(bytes))
            }
            LlmProvider::OpenAiCompatible { .. } => {
                let response = self.generate(prompt, config).await?;
                Ok(stream::once(async move { Ok(response.text) }).boxed())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ollama_body_maps_generation_config() {
        let config = GenerationConfig::structured()
            .with_max_tokens(64)
            .with_stop_sequence("Observation:");
        let body = ollama_body("qwen2.5:1.5b", "hi", Some(&config), false);
        assert_eq!(body["model"], "qwen2.5:1.5b");
        assert_eq!(body["stream"], false);
        assert_eq!(body["options"]["num_predict"], 64);
        assert_eq!(body["options"]["top_k"], 10);
        assert_eq!(body["options"]["stop"][0], "Observation:");
    }

    #[test]
    fn ollama_body_without_config_has_empty_options() {
        let body = ollama_body("m", "hi", None, true);
        assert_eq!(body["stream"], true);
        assert!(body["options"].as_object().is_some_and(serde_json::Map::is_empty));
    }

    #[test]
    fn openai_body_sets_sampling_fields() {
        let config = GenerationConfig::creative().with_max_tokens(10);
        let body = openai_body("m", "hello", Some(&config));
        assert_eq!(body["messages"][0]["content"], "hello");
        assert_eq!(body["max_tokens"], 10);
        assert!(body.get("top_k").is_none());
    }

    #[test]
    fn parses_ollama_response_with_usage() {
        let json = json!({"response": "Paris", "prompt_eval_count": 12, "eval_count": 3});
        let (text, usage) = parse_ollama_response(&json).expect("parse");
        assert_eq!(text, "Paris");
        assert_eq!(usage.map(|u| u.total_tokens), Some(15));
    }

    #[test]
    fn ollama_error_field_is_backend_error() {
        let json = json!({"error": "model not found"});
        assert!(matches!(parse_ollama_response(&json), Err(LlmError::Backend(_))));
    }

    #[test]
    fn parses_openai_response() {
        let json = json!({
            "choices": [{"message": {"content": "Bonjour"}}],
            "usage": {"prompt_tokens": 5, "completion_tokens": 1}
        });
        let (text, usage) = parse_openai_response(&json).expect("parse");
        assert_eq!(text, "Bonjour");
        assert_eq!(usage.map(|u| u.completion_tokens), Some(1));
    }

    #[test]
    fn stream_line_parsing() {
        assert_eq!(parse_ollama_stream_line("   ").expect("blank"), None);
        assert_eq!(
            parse_ollama_stream_line(r#"{"response":"Hel","done":false}"#).expect("line"),
            Some(("Hel".to_string(), false))
        );
        assert!(parse_ollama_stream_line("{not json").is_err());
    }

    #[tokio::test]
    async fn ndjson_decoder_handles_split_chunks() {
        let chunks: Vec<Result<Vec<u8>, LlmError>> = vec![
            Ok(br#"{"response":"Hel","done":false}"#.to_vec()),
            Ok(b"\n{\"response\":\"lo\",".to_vec()),
            Ok(b"\"done\":false}\n{\"response\":\"\",\"done\":true}\n".to_vec()),
            Ok(br#"{"response":"ignored","done":false}"#.to_vec()),
        ];
        let fragments: Vec<String> = ndjson_fragments(stream::iter(chunks).boxed())
            .map(|f| f.expect("fragment"))
            .collect()
            .await;
        assert_eq!(fragments, vec!["Hel", "lo"]);
    }
}
