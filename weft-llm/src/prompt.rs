//! Prompt templates for weft chains.
//!
//! Templates use `{name}` placeholders; `{{` and `}}` produce literal braces.
//! Every built-in prompt is a versioned, testable artifact and can be
//! overridden from TOML files on disk.

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use serde::Deserialize;

use crate::error::PromptError;
use crate::types::GenerationPreset;

/// Summarization prompt.
pub const SUMMARIZE: &str = r"Summarize the following text in a few sentences.
Keep names, numbers and conclusions. Do not add information.

Text:
{input}

Summary:";

/// Classification prompt. `{labels}` is a comma-separated list.
pub const CLASSIFY: &str = r"Classify the following text into exactly one of these categories: {labels}.
Answer with the category name only.

Text:
{input}

Category:";

/// Translation prompt.
pub const TRANSLATE: &str = r"Translate the following text into {target_language}.
Answer with the translation only.

Text:
{input}

Translation:";

/// Conversational prompt. `{history}` holds prior turns, one per line.
pub const CHAT: &str = r"You are a helpful on-device assistant. Answer briefly and accurately.

{history}
User: {input}
Assistant:";

/// Reasoning prompt for the agent loop.
pub const AGENT_REASONING: &str = r"{system_prompt}

You can use these actions:
{actions}

Respond using exactly this format:
Thought: <your reasoning about what to do next>
Action: <one action name from the list above>
Action Input: <the input text for the action>

When you know the answer, respond with:
Thought: <your reasoning>
Final Answer: <the answer to the question>

Question: {query}
{scratchpad}";

/// Running-summary prompt used by summarizing memory.
pub const MEMORY_SUMMARY: &str = r"Progressively summarize the conversation, adding onto the previous summary.
Keep facts the user stated and decisions that were made.

Previous summary:
{summary}

New lines of conversation:
{lines}

New summary:";

/// Simple template interpolation for prompts.
///
/// Replaces `{key}` with the corresponding value and leaves unknown
/// placeholders untouched.
#[must_use]
pub fn render_template(template: &str, vars: &[(&str, &str)]) -> String {
    let mut result = template.to_string();
    for (key, value) in vars {
        result = result.replace(&format!("{{{key}}}"), value);
    }
    result
}

/// One piece of a parsed template.
#[derive(Debug, Clone, PartialEq, Eq)]
enum Segment {
    Literal(String),
    Variable(String),
}

fn parse_segments(template: &str) -> Result<Vec<Segment>, PromptError> {
    let mut segments = Vec::new();
    let mut literal = String::new();
    let mut chars = template.char_indices().peekable();

    while let Some((pos, ch)) = chars.next() {
        match ch {
            '{' if matches!(chars.peek(), Some((_, '{'))) => {
                chars.next();
                literal.push('{');
            }
            '}' if matches!(chars.peek(), Some((_, '}'))) => {
                chars.next();
                literal.push('}');
            }
            '{' => {
                let mut name = String::new();
                let mut closed = false;
                for (_, c) in chars.by_ref() {
                    if c == '}' {
                        closed = true;
                        break;
                    }
                    name.push(c);
                }
                if !closed {
                    return Err(PromptError::Unterminated(pos));
                }
                if !literal.is_empty() {
                    segments.push(Segment::Literal(std::mem::take(&mut literal)));
                }
                segments.push(Segment::Variable(name.trim().to_string()));
            }
            other => literal.push(other),
        }
    }
    if !literal.is_empty() {
        segments.push(Segment::Literal(literal));
    }
    Ok(segments)
}

/// A prompt with named placeholders, rendered strictly.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PromptTemplate {
    source: String,
    segments: Vec<Segment>,
}

impl PromptTemplate {
    /// Parse a template.
    ///
    /// # Errors
    ///
    /// Returns [`PromptError::Unterminated`] if a `{` is never closed.
    pub fn new(source: impl Into<String>) -> Result<Self, PromptError> {
        let source = source.into();
        let segments = parse_segments(&source)?;
        Ok(Self { source, segments })
    }

    /// The raw template text.
    #[must_use]
    pub fn source(&self) -> &str {
        &self.source
    }

    /// Placeholder names in first-occurrence order, without duplicates.
    #[must_use]
    pub fn variables(&self) -> Vec<&str> {
        let mut names: Vec<&str> = Vec::new();
        for segment in &self.segments {
            if let Segment::Variable(name) = segment {
                if !names.contains(&name.as_str()) {
                    names.push(name.as_str());
                }
            }
        }
        names
    }

    /// Render with every placeholder filled from `vars`.
    ///
    /// # Errors
    ///
    /// Returns [`PromptError::MissingVariable`] naming the first placeholder
    /// that has no value.
    pub fn render(&self, vars: &BTreeMap<String, String>) -> Result<String, PromptError> {
        let mut out = String::with_capacity(self.source.len());
        for segment in &self.segments {
            match segment {
                Segment::Literal(text) => out.push_str(text),
                Segment::Variable(name) => {
                    let value = vars
                        .get(name)
                        .ok_or_else(|| PromptError::MissingVariable(name.clone()))?;
                    out.push_str(value);
                }
            }
        }
        Ok(out)
    }
}

impl FromStr for PromptTemplate {
    type Err = PromptError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s)
    }
}

// ---------------------------------------------------------------------------
// PromptLibrary: versioned TOML template loader
// ---------------------------------------------------------------------------

/// Identifies a built-in prompt by purpose.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PromptId {
    /// Text summarization.
    Summarize,
    /// Single-label classification.
    Classify,
    /// Translation into a target language.
    Translate,
    /// Conversational turn with history.
    Chat,
    /// Agent Think step.
    AgentReasoning,
    /// Running conversation summary.
    MemorySummary,
}

impl PromptId {
    /// Returns the TOML filename (without path) for this prompt.
    #[must_use]
    pub fn filename(self) -> String {
        format!("{self}.toml")
    }

    /// All prompt IDs.
    #[must_use]
    pub fn all() -> &'static [PromptId] {
        &[
            Self::Summarize,
            Self::Classify,
            Self::Translate,
            Self::Chat,
            Self::AgentReasoning,
            Self::MemorySummary,
        ]
    }
}

impl fmt::Display for PromptId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Summarize => "summarize",
            Self::Classify => "classify",
            Self::Translate => "translate",
            Self::Chat => "chat",
            Self::AgentReasoning => "agent_reasoning",
            Self::MemorySummary => "memory_summary",
        };
        write!(f, "{name}")
    }
}

impl FromStr for PromptId {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "summarize" => Ok(Self::Summarize),
            "classify" => Ok(Self::Classify),
            "translate" => Ok(Self::Translate),
            "chat" => Ok(Self::Chat),
            "agent_reasoning" => Ok(Self::AgentReasoning),
            "memory_summary" => Ok(Self::MemorySummary),
            _ => Err(format!("unknown prompt id: '{s}'")),
        }
    }
}

/// `[prompt]` section of a TOML prompt file.
#[derive(Debug, Clone, Deserialize)]
struct TomlPromptFile {
    prompt: TomlPromptData,
}

#[derive(Debug, Clone, Deserialize)]
struct TomlPromptData {
    version: String,
    #[serde(default)]
    preset: GenerationPreset,
    template: String,
}

/// A loaded prompt with its metadata.
#[derive(Debug, Clone)]
pub struct PromptEntry {
    /// Prompt version string (e.g., "1.0").
    pub version: String,
    /// Sampling preset the prompt was written for.
    pub preset: GenerationPreset,
    /// The parsed template.
    pub template: PromptTemplate,
}

impl PromptEntry {
    fn builtin(preset: GenerationPreset, source: &str) -> Result<Self, PromptError> {
        Ok(Self {
            version: "builtin".into(),
            preset,
            template: PromptTemplate::new(source)?,
        })
    }
}

/// A set of prompt templates keyed by [`PromptId`].
///
/// # Example
///
/// ```
/// use std::collections::BTreeMap;
/// use weft_llm::prompt::{PromptId, PromptLibrary};
///
/// let library = PromptLibrary::builtin();
/// let mut vars = BTreeMap::new();
/// vars.insert("input".to_string(), "Rust is a systems language.".to_string());
/// let prompt = library.render(PromptId::Summarize, &vars).unwrap();
/// assert!(prompt.contains("Rust is a systems language."));
/// ```
#[derive(Debug, Clone)]
pub struct PromptLibrary {
    templates: HashMap<PromptId, PromptEntry>,
}

impl PromptLibrary {
    /// The compiled-in templates (the `const` strings in this module).
    #[must_use]
    pub fn builtin() -> Self {
        let builtins = [
            (PromptId::Summarize, GenerationPreset::Structured, SUMMARIZE),
            (PromptId::Classify, GenerationPreset::Structured, CLASSIFY),
            (PromptId::Translate, GenerationPreset::Structured, TRANSLATE),
            (PromptId::Chat, GenerationPreset::Conversational, CHAT),
            (PromptId::AgentReasoning, GenerationPreset::Structured, AGENT_REASONING),
            (PromptId::MemorySummary, GenerationPreset::Structured, MEMORY_SUMMARY),
        ];

        let mut templates = HashMap::new();
        for (id, preset, source) in builtins {
            // The constants above contain no unterminated placeholders.
            if let Ok(entry) = PromptEntry::builtin(preset, source) {
                templates.insert(id, entry);
            }
        }
        Self { templates }
    }

    /// Parse a single TOML prompt file body.
    ///
    /// # Errors
    ///
    /// Returns [`PromptError::Load`] if the TOML is malformed and
    /// [`PromptError::Unterminated`] if the template is.
    pub fn parse_entry(content: &str) -> Result<PromptEntry, PromptError> {
        let parsed: TomlPromptFile =
            toml::from_str(content).map_err(|e| PromptError::Load(e.to_string()))?;
        let d = parsed.prompt;
        Ok(PromptEntry {
            version: d.version,
            preset: d.preset,
            template: PromptTemplate::new(d.template)?,
        })
    }

    /// Load prompt templates from a directory of TOML files.
    ///
    /// Each TOML file must match a known [`PromptId`] filename.
    /// Unknown files are ignored.
    ///
    /// # Errors
    ///
    /// Returns an error if a TOML file exists but cannot be parsed, or if the
    /// directory holds no known prompt files.
    pub fn from_directory(dir: impl AsRef<Path>) -> Result<Self, PromptError> {
        let dir = dir.as_ref();
        let mut templates = HashMap::new();

        for id in PromptId::all() {
            let path: PathBuf = dir.join(id.filename());
            if path.exists() {
                let content = std::fs::read_to_string(&path)
                    .map_err(|e| PromptError::Load(format!("{}: {e}", path.display())))?;
                let entry = Self::parse_entry(&content).map_err(|e| match e {
                    PromptError::Load(msg) => PromptError::Load(format!("{}: {msg}", path.display())),
                    other => other,
                })?;
                templates.insert(*id, entry);
            }
        }

        if templates.is_empty() {
            return Err(PromptError::Load(format!(
                "no prompt templates found in directory: {}",
                dir.display()
            )));
        }

        Ok(Self { templates })
    }

    /// Replace built-ins with whatever `other` defines.
    #[must_use]
    pub fn overlay(mut self, other: PromptLibrary) -> Self {
        self.templates.extend(other.templates);
        self
    }

    /// Get a loaded prompt by ID.
    #[must_use]
    pub fn get(&self, id: PromptId) -> Option<&PromptEntry> {
        self.templates.get(&id)
    }

    /// Get a loaded template by ID.
    ///
    /// # Errors
    ///
    /// Returns [`PromptError::NotLoaded`] if the ID has no template.
    pub fn template(&self, id: PromptId) -> Result<&PromptTemplate, PromptError> {
        self.get(id)
            .map(|entry| &entry.template)
            .ok_or_else(|| PromptError::NotLoaded(id.to_string()))
    }

    /// Render the template for `id` strictly.
    ///
    /// # Errors
    ///
    /// Returns an error if the ID is not loaded or a variable is missing.
    pub fn render(
        &self,
        id: PromptId,
        vars: &BTreeMap<String, String>,
    ) -> Result<String, PromptError> {
        self.template(id)?.render(vars)
    }

    /// Number of loaded templates.
    #[must_use]
    pub fn len(&self) -> usize {
        self.templates.len()
    }

    /// Whether no templates are loaded.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.templates.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn vars(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect()
    }

    #[test]
    fn template_rendering_works() {
        let rendered = render_template(
            "Hello {name}, you are a {role}.",
            &[("name", "Ada"), ("role", "engineer")],
        );
        assert_eq!(rendered, "Hello Ada, you are a engineer.");
    }

    #[test]
    fn lenient_rendering_keeps_unknown_placeholders() {
        let rendered = render_template("Hello {name}, {unknown}.", &[("name", "Ada")]);
        assert_eq!(rendered, "Hello Ada, {unknown}.");
    }

    #[test]
    fn strict_rendering_fails_on_missing_variable() {
        let template = PromptTemplate::new("Translate {input} into {language}").expect("parse");
        let err = template
            .render(&vars(&[("input", "hola")]))
            .expect_err("language is missing");
        assert_eq!(err, PromptError::MissingVariable("language".to_string()));
    }

    #[test]
    fn escaped_braces_are_literal() {
        let template = PromptTemplate::new(r#"Return JSON: {{"label": "{label}"}}"#).expect("parse");
        assert_eq!(template.variables(), vec!["label"]);
        let out = template.render(&vars(&[("label", "spam")])).expect("render");
        assert_eq!(out, r#"Return JSON: {"label": "spam"}"#);
    }

    #[test]
    fn variables_are_deduplicated_in_order() {
        let template = PromptTemplate::new("{b} {a} {b}").expect("parse");
        assert_eq!(template.variables(), vec!["b", "a"]);
    }

    #[test]
    fn unterminated_placeholder_is_rejected() {
        assert_eq!(
            PromptTemplate::new("oops {input").expect_err("unterminated"),
            PromptError::Unterminated(5)
        );
    }

    #[test]
    fn prompt_id_from_str_round_trip() {
        for id in PromptId::all() {
            let parsed: PromptId = id.to_string().parse().expect("should parse");
            assert_eq!(*id, parsed);
        }
        assert!("nonexistent".parse::<PromptId>().is_err());
    }

    #[test]
    fn builtin_library_has_every_template() {
        let library = PromptLibrary::builtin();
        assert_eq!(library.len(), PromptId::all().len());
        let agent = library.template(PromptId::AgentReasoning).expect("loaded");
        assert_eq!(
            agent.variables(),
            vec!["system_prompt", "actions", "query", "scratchpad"]
        );
    }

    #[test]
    fn parse_entry_reads_toml() {
        let entry = PromptLibrary::parse_entry(
            r#"
[prompt]
version = "2.1"
preset = "creative"
template = "Write a haiku about {input}"
"#,
        )
        .expect("parse");
        assert_eq!(entry.version, "2.1");
        assert_eq!(entry.preset, GenerationPreset::Creative);
        assert_eq!(entry.template.variables(), vec!["input"]);
    }

    #[test]
    fn from_directory_errors_on_empty() {
        let dir = tempfile::tempdir().expect("tempdir");
        assert!(PromptLibrary::from_directory(dir.path()).is_err());
    }

    #[test]
    fn from_directory_loads_and_overlays() {
        let dir = tempfile::tempdir().expect("tempdir");
        std::fs::write(
            dir.path().join("summarize.toml"),
            "[prompt]\nversion = \"1.0\"\ntemplate = \"TL;DR: {input}\"\n",
        )
        .expect("write");
        std::fs::write(dir.path().join("notes.toml"), "ignored = true\n").expect("write");

        let loaded = PromptLibrary::from_directory(dir.path()).expect("load");
        assert_eq!(loaded.len(), 1);

        let library = PromptLibrary::builtin().overlay(loaded);
        let out = library
            .render(PromptId::Summarize, &vars(&[("input", "text")]))
            .expect("render");
        assert_eq!(out, "TL;DR: text");
        assert!(library.get(PromptId::Chat).is_some());
    }
}
