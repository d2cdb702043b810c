//! Agent: a bounded Think/Act/Observe loop over tools and chains.
//!
//! Each step asks the model for either a final answer or the next action,
//! runs the action and records what it returned. The loop stops when the
//! model answers ([`AgentState::Answered`]) or the step budget runs out
//! ([`AgentState::Exhausted`]). Steps run strictly one after another since
//! every prompt includes all earlier observations.
//!
//! Failures inside a step (model error, unknown action, tool error, a reply
//! in the wrong format) become error observations; the loop keeps going.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{Instrument, debug, info, info_span, warn};
use uuid::Uuid;
use weft_llm::{GenerationConfig, LanguageModel, PromptId, PromptLibrary, PromptTemplate};

use crate::chain::{Chain, SharedChain};
use crate::config::AgentSettings;
use crate::error::{Result, WeftError};
use crate::tool::{INPUT_ARG, SharedTool, ToolArgs};
use crate::types::ChainInput;

/// Where the loop is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentState {
    /// Budget left and no answer yet.
    Running,
    /// The model gave a final answer.
    Answered,
    /// The budget ran out; the answer is a best effort.
    Exhausted,
}

impl fmt::Display for AgentState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Running => write!(f, "running"),
            Self::Answered => write!(f, "answered"),
            Self::Exhausted => write!(f, "exhausted"),
        }
    }
}

/// One reasoning iteration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgentStep {
    /// The model's reasoning.
    pub thought: String,
    /// Action name, empty when the model proposed none.
    pub action: String,
    /// Text passed to the action.
    pub input: String,
    /// What the action returned, or what went wrong.
    pub observation: String,
    /// Whether `observation` describes a failure.
    #[serde(default)]
    pub failed: bool,
}

/// Outcome of one [`Agent::run`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgentResult {
    /// The final answer, or a best-effort one when exhausted. Never empty.
    pub answer: String,
    /// Every step taken, in order.
    pub steps: Vec<AgentStep>,
    /// Equal to `steps.len()`.
    pub total_steps: usize,
    /// `Answered` or `Exhausted`.
    pub state: AgentState,
}

/// Agent settings: budget, persona and the actions it may take.
#[derive(Clone)]
pub struct AgentConfig {
    /// Step budget.
    pub max_steps: usize,
    /// Callable tools. Resolved before chains on a name collision.
    pub tools: Vec<SharedTool>,
    /// Callable chains, addressed by [`Chain::name`](crate::chain::Chain::name).
    pub chains: Vec<SharedChain>,
    /// Persona placed at the top of every reasoning prompt.
    pub system_prompt: String,
    /// Sampling options for the reasoning calls.
    pub generation: GenerationConfig,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self::from_config(&AgentSettings::default())
    }
}

impl AgentConfig {
    /// Settings from the `[agent]` section with no actions.
    #[must_use]
    pub fn from_config(settings: &AgentSettings) -> Self {
        Self {
            max_steps: settings.max_steps,
            tools: Vec::new(),
            chains: Vec::new(),
            system_prompt: settings.system_prompt.clone(),
            generation: GenerationConfig::structured().with_stop_sequence("\nObservation:"),
        }
    }

    /// Set the step budget.
    #[must_use]
    pub fn with_max_steps(mut self, max_steps: usize) -> Self {
        self.max_steps = max_steps;
        self
    }

    /// Set the persona.
    #[must_use]
    pub fn with_system_prompt(mut self, system_prompt: impl Into<String>) -> Self {
        self.system_prompt = system_prompt.into();
        self
    }

    /// Add a tool.
    #[must_use]
    pub fn with_tool(mut self, tool: SharedTool) -> Self {
        self.tools.push(tool);
        self
    }

    /// Add a chain.
    #[must_use]
    pub fn with_chain(mut self, chain: SharedChain) -> Self {
        self.chains.push(chain);
        self
    }

    /// Sampling options for the reasoning calls.
    #[must_use]
    pub fn with_generation(mut self, generation: GenerationConfig) -> Self {
        self.generation = generation;
        self
    }
}

// ---------------------------------------------------------------------------
// Reply parsing
// ---------------------------------------------------------------------------

/// What the model proposed.
#[derive(Debug, Clone, PartialEq, Eq)]
enum Reply {
    Final { answer: String },
    Action { thought: String, action: String, input: String },
    Unparsed { thought: String },
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum Field {
    Thought,
    Action,
    Input,
    Answer,
    Other,
}

/// Parse a ReAct reply.
///
/// Accepts `Action: name` with `Action Input: text`, or `Action: name[text]`.
/// A `Final Answer:` anywhere wins over an action.
fn parse_reply(reply: &str) -> Reply {
    let mut thought: Vec<&str> = Vec::new();
    let mut action: Option<&str> = None;
    let mut input: Vec<&str> = Vec::new();
    let mut answer: Option<Vec<&str>> = None;
    let mut field = Field::Other;

    for line in reply.lines() {
        let trimmed = line.trim();
        if let Some(rest) = trimmed.strip_prefix("Final Answer:") {
            answer = Some(vec![rest.trim()]);
            field = Field::Answer;
        } else if let Some(rest) = trimmed.strip_prefix("Action Input:") {
            input = vec![rest.trim()];
            field = Field::Input;
        } else if let Some(rest) = trimmed.strip_prefix("Action:") {
            action = Some(rest.trim());
            field = Field::Action;
        } else if let Some(rest) = trimmed.strip_prefix("Thought:") {
            thought.push(rest.trim());
            field = Field::Thought;
        } else if trimmed.starts_with("Observation:") {
            // The model started inventing observations; stop reading.
            break;
        } else {
            match field {
                Field::Thought => thought.push(trimmed),
                Field::Input => input.push(trimmed),
                Field::Answer => {
                    if let Some(lines) = answer.as_mut() {
                        lines.push(trimmed);
                    }
                }
                Field::Action | Field::Other => {}
            }
        }
    }

    // An empty final answer is no answer.
    if let Some(answer) = answer.map(|lines| join_lines(&lines)).filter(|a| !a.is_empty()) {
        return Reply::Final { answer };
    }

    let thought = join_lines(&thought);
    match action.filter(|a| !a.is_empty()) {
        Some(action) => {
            let (action, input) = match split_bracket_form(action) {
                Some((name, bracketed)) => (name, bracketed.to_string()),
                None => (action, join_lines(&input)),
            };
            Reply::Action {
                thought,
                action: action.to_string(),
                input,
            }
        }
        None if thought.is_empty() => Reply::Unparsed {
            thought: reply.trim().to_string(),
        },
        None => Reply::Unparsed { thought },
    }
}

fn join_lines(lines: &[&str]) -> String {
    lines.join("\n").trim().to_string()
}

/// `search[rust ownership]` → `("search", "rust ownership")`.
fn split_bracket_form(action: &str) -> Option<(&str, &str)> {
    let open = action.find('[')?;
    let close = action.rfind(']')?;
    if close < open {
        return None;
    }
    Some((action[..open].trim(), action[open + 1..close].trim()))
}

/// Tool arguments for an action input.
///
/// A JSON object of strings becomes the argument map; anything else is
/// passed as `{"input": text}`.
fn tool_args(input: &str) -> ToolArgs {
    if let Ok(serde_json::Value::Object(map)) = serde_json::from_str::<serde_json::Value>(input) {
        let strings: Option<ToolArgs> = map
            .into_iter()
            .map(|(k, v)| match v {
                serde_json::Value::String(s) => Some((k, s)),
                _ => None,
            })
            .collect();
        if let Some(args) = strings {
            return args;
        }
    }
    let mut args = BTreeMap::new();
    args.insert(INPUT_ARG.to_string(), input.to_string());
    args
}

fn format_scratchpad(steps: &[AgentStep]) -> String {
    steps
        .iter()
        .map(|step| {
            let mut block = String::new();
            if !step.thought.is_empty() {
                block.push_str(&format!("Thought: {}\n", step.thought));
            }
            if !step.action.is_empty() {
                block.push_str(&format!("Action: {}\nAction Input: {}\n", step.action, step.input));
            }
            block.push_str(&format!("Observation: {}", step.observation));
            block
        })
        .collect::<Vec<_>>()
        .join("\n")
}

const FORMAT_REMINDER: &str = "Error: reply contained neither an action nor a final answer. \
Respond with 'Thought:', 'Action:' and 'Action Input:' lines, or with 'Final Answer:'.";

// ---------------------------------------------------------------------------
// Agent
// ---------------------------------------------------------------------------

/// Runs the reasoning loop against one model.
pub struct Agent {
    model: Arc<dyn LanguageModel>,
    config: AgentConfig,
    template: PromptTemplate,
}

impl Agent {
    /// Agent using the built-in reasoning prompt.
    ///
    /// # Errors
    /// The built-in prompt failed to load.
    pub fn new(model: Arc<dyn LanguageModel>, config: AgentConfig) -> Result<Self> {
        Self::with_prompts(model, config, &PromptLibrary::builtin())
    }

    /// Agent using the reasoning prompt from `prompts`.
    ///
    /// # Errors
    /// `prompts` has no agent reasoning template.
    pub fn with_prompts(
        model: Arc<dyn LanguageModel>,
        config: AgentConfig,
        prompts: &PromptLibrary,
    ) -> Result<Self> {
        let template = prompts.template(PromptId::AgentReasoning)?.clone();
        Ok(Self {
            model,
            config,
            template,
        })
    }

    /// The agent's configuration.
    #[must_use]
    pub fn config(&self) -> &AgentConfig {
        &self.config
    }

    fn describe_actions(&self) -> String {
        let tools = self
            .config
            .tools
            .iter()
            .map(|t| format!("- {}: {}", t.id(), t.description()));
        let chains = self
            .config
            .chains
            .iter()
            .map(|c| format!("- {}: run the {} chain on the input text", c.name(), c.name()));
        tools.chain(chains).collect::<Vec<_>>().join("\n")
    }

    fn action_names(&self) -> Vec<&str> {
        self.config
            .tools
            .iter()
            .map(|t| t.id())
            .chain(self.config.chains.iter().map(|c| c.name()))
            .collect()
    }

    /// Run the loop for `query`.
    ///
    /// # Errors
    /// Only when the reasoning prompt cannot be rendered. Everything that
    /// goes wrong inside a step is recorded as an observation instead.
    pub async fn run(&self, query: &str) -> Result<AgentResult> {
        let run_id = Uuid::new_v4();
        let span = info_span!("agent.run", %run_id, max_steps = self.config.max_steps);
        self.run_loop(query).instrument(span).await
    }

    async fn run_loop(&self, query: &str) -> Result<AgentResult> {
        let actions = self.describe_actions();
        let mut steps: Vec<AgentStep> = Vec::with_capacity(self.config.max_steps);

        while steps.len() < self.config.max_steps {
            let mut vars = BTreeMap::new();
            vars.insert("system_prompt".to_string(), self.config.system_prompt.clone());
            vars.insert("actions".to_string(), actions.clone());
            vars.insert("query".to_string(), query.to_string());
            vars.insert("scratchpad".to_string(), format_scratchpad(&steps));
            let prompt = self.template.render(&vars)?;

            // Think
            let reply = match self.model.generate(&prompt, Some(&self.config.generation)).await {
                Ok(response) => response.text,
                Err(e) => {
                    warn!(step = steps.len() + 1, error = %e, "reasoning call failed");
                    steps.push(AgentStep {
                        thought: String::new(),
                        action: String::new(),
                        input: String::new(),
                        observation: format!("Error: model call failed: {e}"),
                        failed: true,
                    });
                    continue;
                }
            };

            // Act
            let step = match parse_reply(&reply) {
                Reply::Final { answer } => {
                    info!(steps = steps.len(), "agent answered");
                    return Ok(AgentResult {
                        answer,
                        total_steps: steps.len(),
                        steps,
                        state: AgentState::Answered,
                    });
                }
                Reply::Unparsed { thought } => AgentStep {
                    thought,
                    action: String::new(),
                    input: String::new(),
                    observation: FORMAT_REMINDER.to_string(),
                    failed: true,
                },
                // Observe
                Reply::Action {
                    thought,
                    action,
                    input,
                } => {
                    let (observation, failed) = match self.perform(&action, &input).await {
                        Ok(outcome) => outcome,
                        Err(WeftError::UnknownAction { name }) => (
                            format!(
                                "Error: unknown action '{name}'. Available actions: {}",
                                self.action_names().join(", ")
                            ),
                            true,
                        ),
                        Err(e) => (format!("Error: {e}"), true),
                    };
                    AgentStep {
                        thought,
                        action,
                        input,
                        observation,
                        failed,
                    }
                }
            };
            debug!(
                step = steps.len() + 1,
                action = %step.action,
                failed = step.failed,
                "agent step recorded"
            );
            steps.push(step);
        }

        let answer = best_effort_answer(&steps, self.config.max_steps);
        info!(steps = steps.len(), "agent exhausted its step budget");
        Ok(AgentResult {
            answer,
            total_steps: steps.len(),
            steps,
            state: AgentState::Exhausted,
        })
    }

    /// Resolve `action` (tools first, then chains) and run it.
    ///
    /// Returns the observation and whether it describes a failure; a chain
    /// refusal is observed as one.
    async fn perform(&self, action: &str, input: &str) -> Result<(String, bool)> {
        let span = info_span!("agent.action", action = %action);
        async {
            if let Some(tool) = self.config.tools.iter().find(|t| t.id() == action) {
                return Ok((tool.invoke(&tool_args(input)).await?, false));
            }
            if let Some(chain) = self.config.chains.iter().find(|c| c.name() == action) {
                let output = chain.invoke(ChainInput::new(input)).await?;
                let blocked = output.is_blocked();
                return Ok((output.text, blocked));
            }
            Err(WeftError::UnknownAction {
                name: action.to_string(),
            })
        }
        .instrument(span)
        .await
    }
}

fn best_effort_answer(steps: &[AgentStep], max_steps: usize) -> String {
    steps
        .iter()
        .rev()
        .find(|s| !s.failed && !s.observation.trim().is_empty())
        .map(|s| s.observation.clone())
        .or_else(|| {
            steps
                .iter()
                .rev()
                .find(|s| !s.thought.trim().is_empty())
                .map(|s| s.thought.clone())
        })
        .unwrap_or_else(|| format!("No final answer within {max_steps} steps."))
}
