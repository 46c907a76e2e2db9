use crate::clients::{GENERATION_FAILURE_PREFIX, LLMError, TextGenerator};
use crate::memory::ErrorMemory;
use crate::parser::{MalformedReason, ParsedStep, parse};
use crate::prompts::{PromptAssembler, PromptInputs, build_observation_segment};
use crate::tools::{ToolError, ToolRegistry};
use futures::FutureExt;
use serde::{Deserialize, Serialize};
use std::any::Any;
use std::fmt::Write as _;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, error, info, warn};

pub const DEFAULT_MAX_ITERATIONS: usize = 15;
pub const DEFAULT_TRANSCRIPT_SOFT_LIMIT: usize = 7500;

pub const GENERATION_FAILURE_ANSWER: &str = "Agent Error: LLM communication failed for ReAct logic.";
pub const INTERNAL_FAILURE_ANSWER: &str = "Agent Error: unexpected internal failure.";

const PLACEHOLDER_ANSWER_OBSERVATION: &str = "Error: Final Answer seems to contain placeholders (e.g., '[details]'). \
Provide specific values/details directly from observations, or explicitly state if information was not found after diligent search.";
const PLACEHOLDER_ANSWER_MEMORY: &str = "Final Answer rejected due to placeholders.";
const NO_ACTION_OBSERVATION: &str =
    "Error: LLM did not provide a `Final Answer:` or a valid `Action: ToolName[input]`. One is required.";
const REPEATED_ACTION_OBSERVATION: &str = "Error: The exact same action and input were repeated. This indicates a loop. \
You MUST change your plan: try different input, a different tool, or provide a Final Answer if no other options.";
const TRANSCRIPT_WARNING: &str =
    "Warning: Interaction log is very long, approaching context limit. Aim for Final Answer.";

#[derive(Debug, Clone, PartialEq)]
pub struct AgentConfig {
    pub max_iterations: usize,
    /// Characters of transcript after which the trace carries a convergence warning.
    pub transcript_soft_limit: usize,
    pub generation_timeout: Duration,
    pub tool_timeout: Duration,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            max_iterations: DEFAULT_MAX_ITERATIONS,
            transcript_soft_limit: DEFAULT_TRANSCRIPT_SOFT_LIMIT,
            generation_timeout: Duration::from_secs(120),
            tool_timeout: Duration::from_secs(60),
        }
    }
}

#[derive(Debug, Error)]
pub enum AgentError {
    #[error(transparent)]
    Generation(#[from] LLMError),
    #[error("generation timed out after {0:?}")]
    GenerationTimeout(Duration),
    #[error("generation service returned no text")]
    EmptyGeneration,
    #[error("{0}")]
    FailureSentinel(String),
    #[error("{kind} - {detail}")]
    ToolExecution { kind: &'static str, detail: String },
}

impl From<ToolError> for AgentError {
    fn from(error: ToolError) -> Self {
        AgentError::ToolExecution {
            kind: error.kind(),
            detail: error.to_string(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Info,
    Warning,
    Error,
    Muted,
}

impl Severity {
    /// Severity of observation text by its textual tag.
    pub fn classify(text: &str) -> Self {
        if text.contains("Error:") {
            Severity::Error
        } else if text.contains("Warning:") || text.contains("Could not find") {
            Severity::Warning
        } else {
            Severity::Info
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Severity::Info => "ok",
            Severity::Warning => "warning",
            Severity::Error => "error",
            Severity::Muted => "none",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TraceNote {
    pub severity: Severity,
    pub text: String,
}

/// One iteration of the loop as seen by an operator. Independent of the transcript.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Step {
    pub iteration: usize,
    pub max_iterations: usize,
    pub raw: String,
    pub action: Option<String>,
    pub observation: Option<String>,
    pub severity: Severity,
    pub final_answer: Option<String>,
    pub notes: Vec<TraceNote>,
}

impl Step {
    pub fn new(iteration: usize, max_iterations: usize) -> Self {
        Self {
            iteration,
            max_iterations,
            raw: String::new(),
            action: None,
            observation: None,
            severity: Severity::Muted,
            final_answer: None,
            notes: Vec::new(),
        }
    }

    fn note(&mut self, severity: Severity, text: impl Into<String>) {
        self.notes.push(TraceNote {
            severity,
            text: text.into(),
        });
    }
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Trace {
    question: String,
    steps: Vec<Step>,
    conclusion: Option<TraceNote>,
}

impl Trace {
    pub fn new(question: &str) -> Self {
        Self {
            question: question.to_string(),
            steps: Vec::new(),
            conclusion: None,
        }
    }

    pub fn question(&self) -> &str {
        &self.question
    }

    pub fn steps(&self) -> &[Step] {
        &self.steps
    }

    pub fn conclusion(&self) -> Option<&TraceNote> {
        self.conclusion.as_ref()
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    fn push(&mut self, step: Step) {
        self.steps.push(step);
    }

    fn conclude(&mut self, severity: Severity, text: impl Into<String>) {
        self.conclusion = Some(TraceNote {
            severity,
            text: text.into(),
        });
    }

    pub fn render(&self) -> String {
        let mut out = String::new();
        let _ = writeln!(out, "**User Question:** {}", self.question);

        for step in &self.steps {
            let _ = writeln!(out, "\n**--- Iteration {}/{} ---**", step.iteration, step.max_iterations);
            if !step.raw.is_empty() {
                let _ = writeln!(out, "**LLM Output (Raw):**\n```text\n{}\n```", step.raw);
            }
            if let Some(answer) = &step.final_answer {
                let _ = writeln!(out, "**Final Answer Extracted:** `{answer}`");
            } else if let Some(action) = &step.action {
                let _ = writeln!(out, "**Action Parsed:** `{action}`");
            } else if !step.raw.is_empty() {
                let _ = writeln!(out, "**Action Parsed:** none");
            }
            if let Some(observation) = &step.observation {
                let _ = writeln!(out, "**Observation:** [{}] {observation}", step.severity.label());
            }
            for note in &step.notes {
                let _ = writeln!(out, "[{}] {}", note.severity.label(), note.text);
            }
        }

        if let Some(conclusion) = &self.conclusion {
            let _ = writeln!(out, "\n[{}] {}", conclusion.severity.label(), conclusion.text);
        }
        out
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Answered,
    MaxIterations,
    GenerationFailed,
    InternalFailure,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RunOutcome {
    pub answer: String,
    pub trace: Trace,
    pub status: RunStatus,
}

impl RunOutcome {
    pub fn iterations(&self) -> usize {
        self.trace.len()
    }

    pub fn is_answered(&self) -> bool {
        self.status == RunStatus::Answered
    }

    /// The `(answer, trace)` pair presentation layers consume.
    pub fn into_pair(self) -> (String, String) {
        let trace = self.trace.render();
        (self.answer, trace)
    }
}

pub fn max_iterations_message(max_iterations: usize) -> String {
    format!(
        "Agent Error: Max iterations ({max_iterations}) reached. Unable to complete the request. \
This may be due to a complex query, the LLM getting stuck, or a tool repeatedly failing. \
Please review the reasoning trace. You could try rephrasing the question or breaking it into smaller parts."
    )
}

pub fn action_key(name: &str, input: &str) -> String {
    format!("{name}[{input}]")
}

struct Observation {
    text: String,
    severity: Severity,
}

impl Observation {
    fn classified(text: String) -> Self {
        let severity = Severity::classify(&text);
        Self { text, severity }
    }

    fn error(text: String) -> Self {
        Self {
            text,
            severity: Severity::Error,
        }
    }
}

pub type StepCallback = Arc<dyn Fn(&Step) + Send + Sync>;

/// The reason/act/observe loop. One instance per conversation; error memory carries
/// across questions, so concurrent questions need separate instances.
pub struct ReactAgent {
    client: Arc<dyn TextGenerator>,
    tools: Arc<ToolRegistry>,
    prompts: PromptAssembler,
    config: AgentConfig,
    error_memory: ErrorMemory,
    step_callback: Option<StepCallback>,
}

impl ReactAgent {
    pub fn new(client: Arc<dyn TextGenerator>, tools: Arc<ToolRegistry>, config: AgentConfig) -> Self {
        info!(tools = tools.len(), max_iterations = config.max_iterations, "ReAct agent created");
        Self {
            client,
            tools,
            prompts: PromptAssembler::default(),
            config,
            error_memory: ErrorMemory::default(),
            step_callback: None,
        }
    }

    pub fn with_prompts(mut self, prompts: PromptAssembler) -> Self {
        self.prompts = prompts;
        self
    }

    pub fn with_step_callback(mut self, callback: StepCallback) -> Self {
        self.step_callback = Some(callback);
        self
    }

    pub fn config(&self) -> &AgentConfig {
        &self.config
    }

    pub fn tools(&self) -> &ToolRegistry {
        &self.tools
    }

    pub fn error_memory(&self) -> &ErrorMemory {
        &self.error_memory
    }

    pub fn reset_error_memory(&mut self) {
        self.error_memory.clear();
    }

    /// Answers one question. Never fails: every outcome, including internal faults,
    /// comes back as an answer string with its trace.
    pub async fn run(&mut self, question: &str, history: &str) -> RunOutcome {
        let mut trace = Trace::new(question);

        let result = AssertUnwindSafe(self.run_loop(question, history, &mut trace))
            .catch_unwind()
            .await;

        match result {
            Ok((answer, status)) => RunOutcome { answer, trace, status },
            Err(panic) => {
                let detail = panic_message(panic.as_ref());
                error!(%detail, "ReAct loop panicked");
                trace.conclude(Severity::Error, format!("{INTERNAL_FAILURE_ANSWER} {detail}"));
                RunOutcome {
                    answer: INTERNAL_FAILURE_ANSWER.to_string(),
                    trace,
                    status: RunStatus::InternalFailure,
                }
            }
        }
    }

    async fn run_loop(&mut self, question: &str, history: &str, trace: &mut Trace) -> (String, RunStatus) {
        let tool_descriptions = self.tools.describe_all();
        let recent_errors = self.error_memory.render_recent();
        let mut transcript = self.prompts.build(&PromptInputs {
            tool_descriptions: &tool_descriptions,
            history,
            question,
            recent_errors: &recent_errors,
        });

        let max_iterations = self.config.max_iterations;
        let mut last_action: Option<String> = None;

        for iteration in 1..=max_iterations {
            debug!(iteration, max_iterations, question = %preview(question, 50), "ReAct iteration");
            let mut step = Step::new(iteration, max_iterations);

            let generated = match self.generate(&transcript).await {
                Ok(text) => text,
                Err(err) => {
                    let message = format!("LLM Communication Error (ReAct): {err}");
                    error!("{message}");
                    step.note(Severity::Error, message);
                    self.emit(step, trace);
                    return (GENERATION_FAILURE_ANSWER.to_string(), RunStatus::GenerationFailed);
                }
            };

            transcript.push_str(&generated);
            step.raw = generated;

            let observation = match parse(&step.raw) {
                ParsedStep::FinalAnswer(answer) => {
                    info!(%answer, iteration, "final answer extracted");
                    step.final_answer = Some(answer.clone());
                    self.emit(step, trace);
                    return (answer, RunStatus::Answered);
                }
                ParsedStep::Malformed(reason) => {
                    if reason == MalformedReason::NoActionFound {
                        last_action = None;
                    }
                    self.handle_malformed(&reason, &mut step)
                }
                ParsedStep::ToolCall { name, input } => {
                    let key = action_key(&name, &input);
                    step.action = Some(key.clone());

                    let observation = if last_action.as_deref() == Some(key.as_str()) {
                        warn!(action = %key, "repeated action, skipping execution");
                        self.error_memory.record(REPEATED_ACTION_OBSERVATION);
                        Observation::error(REPEATED_ACTION_OBSERVATION.to_string())
                    } else {
                        self.dispatch(&name, &input).await
                    };
                    last_action = Some(key);
                    observation
                }
            };

            transcript.push_str(&build_observation_segment(&observation.text));
            step.observation = Some(observation.text);
            step.severity = observation.severity;

            if transcript.chars().count() > self.config.transcript_soft_limit {
                step.note(Severity::Warning, TRANSCRIPT_WARNING);
            }
            self.emit(step, trace);
        }

        let message = max_iterations_message(max_iterations);
        warn!(question = %preview(question, 50), "max iterations reached");
        trace.conclude(Severity::Error, message.clone());
        (message, RunStatus::MaxIterations)
    }

    async fn generate(&self, prompt: &str) -> Result<String, AgentError> {
        let timeout = self.config.generation_timeout;
        let text = tokio::time::timeout(timeout, self.client.generate(prompt))
            .await
            .map_err(|_| AgentError::GenerationTimeout(timeout))??;

        if text.trim().is_empty() {
            return Err(AgentError::EmptyGeneration);
        }
        if text.starts_with(GENERATION_FAILURE_PREFIX) {
            return Err(AgentError::FailureSentinel(text));
        }
        Ok(text)
    }

    fn handle_malformed(&mut self, reason: &MalformedReason, step: &mut Step) -> Observation {
        match reason {
            MalformedReason::PlaceholderFinalAnswer { answer } => {
                step.note(
                    Severity::Error,
                    format!("Rejected Final Answer: `{answer}` (contains placeholders without clear 'not found' statement)."),
                );
                self.error_memory.record(PLACEHOLDER_ANSWER_MEMORY);
                Observation::error(PLACEHOLDER_ANSWER_OBSERVATION.to_string())
            }
            MalformedReason::PlaceholderToolName { name } => {
                let text = format!(
                    "Error: LLM provided a placeholder tool name '{name}'. Use an actual tool name from 'Available Tools'."
                );
                self.error_memory.record(&text);
                Observation::error(text)
            }
            MalformedReason::NoActionFound => {
                self.error_memory.record(NO_ACTION_OBSERVATION);
                Observation::error(NO_ACTION_OBSERVATION.to_string())
            }
        }
    }

    async fn dispatch(&mut self, name: &str, input: &str) -> Observation {
        let Some(tool) = self.tools.get(name) else {
            let text = format!(
                "Error: Unknown tool '{name}'. Valid tools are: {}.",
                self.tools.names().join(", ")
            );
            self.error_memory.record(&text);
            return Observation::error(text);
        };

        info!(tool = name, input = %preview(input, 100), "executing tool");
        let input = input.to_string();
        let execution = AssertUnwindSafe(async move { tool.execute(input).await }).catch_unwind();
        let timeout = self.config.tool_timeout;

        let failure = match tokio::time::timeout(timeout, execution).await {
            Ok(Ok(Ok(output))) => {
                debug!(tool = name, observation = %preview(output.text(), 200), "tool finished");
                if output.is_failure() {
                    self.error_memory.record(&format!("Tool '{name}' reported: {}", output.text()));
                }
                return Observation::classified(output.into_text());
            }
            Ok(Ok(Err(tool_error))) => AgentError::from(tool_error),
            Ok(Err(panic)) => AgentError::ToolExecution {
                kind: "Panic",
                detail: panic_message(panic.as_ref()),
            },
            Err(_) => AgentError::ToolExecution {
                kind: "Timeout",
                detail: format!("no result after {timeout:?}"),
            },
        };

        error!(tool = name, error = %failure, "tool execution failed");
        let text = format!("Agent-level Error executing {name}: {failure}");
        self.error_memory.record(&text);
        Observation::error(text)
    }

    fn emit(&self, step: Step, trace: &mut Trace) {
        if let Some(callback) = &self.step_callback {
            callback(&step);
        }
        trace.push(step);
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}

fn preview(text: &str, max_chars: usize) -> String {
    let mut preview: String = text.chars().take(max_chars).collect();
    if text.chars().count() > max_chars {
        preview.push_str("...");
    }
    preview
}
