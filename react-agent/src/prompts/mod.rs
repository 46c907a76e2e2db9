pub const REACT_PROMPT_TEMPLATE: &str = r#"You are a precise, self-critical assistant that answers questions with the ReAct protocol: you think, you act with exactly one tool call, you read the observation, and you repeat until you can give a final answer.

## Protocol

1. Thought
   - Analyse the Current User Question together with the Conversation History.
   - Policy questions (leave policy, company policy, the policy document): use `PolicyDocumentQA[the user's full question]` first.
   - Report or sales questions: read `report.csv` with `FileReaderTool[report.csv]` unless its data is already in a recent observation, then compute on the extracted values with `CalculatorTool`.
   - Plain arithmetic: use `CalculatorTool[expression]` directly.
   - Give every tool exactly the input it expects. Do not guess.

2. Action
   - Write EXACTLY ONE line of the form `Action: ToolName[input]`.
   - Examples:
     Action: PolicyDocumentQA[What is the rule for leave carry-over and its deadline?]
     Action: FileReaderTool[report.csv]
     Action: CalculatorTool[[10000, 12000, 15000]]
     Action: CalculatorTool[5 * (3 + 2)]

3. Observation
   - Written by the system after your action. It is your primary source of information.
   - If it reports an error, do not repeat the failing action. Re-plan using Recent Errors.

4. Final Answer
   - When the observations answer the question, write `Final Answer: ` followed by the concrete answer.
   - Use real values from the observations, never placeholders. If the document does not contain the information, say so.

## Available Tools
{tool_descriptions}

## Conversation History
{conversation_history}

## Current User Question
{user_question}

## Recent Errors (avoid repeating these; say in your Thought how you avoid them)
{recent_errors}

Begin with `Thought:` and follow it with EITHER one `Action: ToolName[input]` line OR a `Final Answer: ...` line.
"#;

const EMPTY_HISTORY: &str = "No previous conversation.";
const EMPTY_ERRORS: &str = "None";

#[derive(Debug, Clone, Copy, Default)]
pub struct PromptInputs<'a> {
    pub tool_descriptions: &'a str,
    pub history: &'a str,
    pub question: &'a str,
    pub recent_errors: &'a str,
}

#[derive(Debug, Clone)]
pub struct PromptAssembler {
    template: String,
}

impl Default for PromptAssembler {
    fn default() -> Self {
        Self::with_template(REACT_PROMPT_TEMPLATE)
    }
}

impl PromptAssembler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Placeholders: `{tool_descriptions}`, `{conversation_history}`, `{user_question}`, `{recent_errors}`.
    pub fn with_template(template: impl Into<String>) -> Self {
        Self {
            template: template.into(),
        }
    }

    pub fn template(&self) -> &str {
        &self.template
    }

    pub fn build(&self, inputs: &PromptInputs<'_>) -> String {
        let history = non_empty_or(inputs.history, EMPTY_HISTORY);
        let recent_errors = non_empty_or(inputs.recent_errors, EMPTY_ERRORS);

        render_template(
            &self.template,
            &[
                ("tool_descriptions", inputs.tool_descriptions),
                ("conversation_history", history),
                ("user_question", inputs.question),
                ("recent_errors", recent_errors),
            ],
        )
    }
}

fn non_empty_or<'a>(value: &'a str, fallback: &'a str) -> &'a str {
    if value.trim().is_empty() { fallback } else { value }
}

/// Single pass, so braces inside substituted values are never expanded again.
fn render_template(template: &str, values: &[(&str, &str)]) -> String {
    let mut output = String::with_capacity(template.len());
    let mut rest = template;

    while let Some(open) = rest.find('{') {
        output.push_str(&rest[..open]);
        let after = &rest[open + 1..];

        let substituted = after.find('}').and_then(|close| {
            let key = &after[..close];
            values
                .iter()
                .find(|(name, _)| *name == key)
                .map(|(_, value)| (*value, close))
        });

        match substituted {
            Some((value, close)) => {
                output.push_str(value);
                rest = &after[close + 1..];
            }
            None => {
                output.push('{');
                rest = after;
            }
        }
    }
    output.push_str(rest);
    output
}

/// Transcript segment appended after every non-terminal round.
pub fn build_observation_segment(observation: &str) -> String {
    format!("\nObservation: {observation}\nThought:")
}
