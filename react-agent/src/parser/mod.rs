//! Turns one round of generated text into the next step of the loop.
//!
//! The accepted grammar is line structured:
//!
//! ```text
//! Final Answer: <text up to the next Thought/Action/Observation line>
//! Action: <Name>[<input>]
//! ```
//!
//! A final answer wins over any action in the same round. Only the first action
//! line counts, and an action never spans lines.

use serde::{Deserialize, Serialize};
use std::fmt;

const FINAL_ANSWER_MARKER: &str = "final answer";
const SECTION_MARKERS: [&str; 3] = ["thought", "action", "observation"];
const NOT_FOUND_PHRASES: [&str; 4] = ["not found", "not contain", "unable to find", "document does not state"];
const PLACEHOLDER_TOOL_NAMES: [&str; 3] = ["toolname", "input", "actiontool"];

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum MalformedReason {
    PlaceholderFinalAnswer { answer: String },
    PlaceholderToolName { name: String },
    NoActionFound,
}

impl fmt::Display for MalformedReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MalformedReason::PlaceholderFinalAnswer { .. } => write!(f, "placeholder final answer"),
            MalformedReason::PlaceholderToolName { .. } => write!(f, "placeholder tool name"),
            MalformedReason::NoActionFound => write!(f, "no final answer or action found"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ParsedStep {
    FinalAnswer(String),
    ToolCall { name: String, input: String },
    Malformed(MalformedReason),
}

pub fn parse(generated: &str) -> ParsedStep {
    if let Some(answer) = find_final_answer(generated) {
        if has_placeholder_span(&answer) && !mentions_not_found(&answer) {
            return ParsedStep::Malformed(MalformedReason::PlaceholderFinalAnswer { answer });
        }
        return ParsedStep::FinalAnswer(answer);
    }

    match generated.lines().find_map(parse_action_line) {
        Some((name, _)) if PLACEHOLDER_TOOL_NAMES.contains(&name.to_ascii_lowercase().as_str()) => {
            ParsedStep::Malformed(MalformedReason::PlaceholderToolName { name: name.to_string() })
        }
        Some((name, input)) => ParsedStep::ToolCall {
            name: name.to_string(),
            input: input.trim().to_string(),
        },
        None => ParsedStep::Malformed(MalformedReason::NoActionFound),
    }
}

/// Text after the first `Final Answer:` marker (case-insensitive, whitespace allowed before
/// the colon), up to a line that opens a new section. Trimmed.
fn find_final_answer(text: &str) -> Option<String> {
    // ASCII lowercasing keeps byte offsets aligned with `text`.
    let lower = text.to_ascii_lowercase();
    let mut search_from = 0;

    while let Some(found) = lower[search_from..].find(FINAL_ANSWER_MARKER) {
        let marker_end = search_from + found + FINAL_ANSWER_MARKER.len();
        search_from = marker_end;

        let rest = &text[marker_end..];
        let Some(after_colon) = rest.trim_start().strip_prefix(':') else {
            continue;
        };
        let end = section_end(after_colon);
        return Some(after_colon[..end].trim().to_string());
    }
    None
}

/// Byte offset of the first newline that is followed, after any whitespace, by a section
/// marker or by the end of the text.
fn section_end(body: &str) -> usize {
    for (offset, _) in body.match_indices('\n') {
        let following = body[offset + 1..].trim_start();
        if following.is_empty() || starts_with_section_marker(following) {
            return offset;
        }
    }
    body.len()
}

fn starts_with_section_marker(text: &str) -> bool {
    SECTION_MARKERS.iter().any(|marker| {
        text.get(..marker.len())
            .is_some_and(|prefix| prefix.eq_ignore_ascii_case(marker))
    })
}

/// A `[...]` or `<...>` style span with at least one character inside. Openers and closers
/// may mix, matching how template placeholders leak into answers.
fn has_placeholder_span(text: &str) -> bool {
    // Earliest opener since the last closer decides whether the next closer ends a span.
    let mut open: Option<usize> = None;
    for (index, c) in text.chars().enumerate() {
        match c {
            '[' | '<' => {
                open.get_or_insert(index);
            }
            ']' | '>' => {
                if open.take().is_some_and(|start| index > start + 1) {
                    return true;
                }
            }
            _ => {}
        }
    }
    false
}

fn mentions_not_found(text: &str) -> bool {
    let lower = text.to_lowercase();
    NOT_FOUND_PHRASES.iter().any(|phrase| lower.contains(phrase))
}

/// `Action: Name[input]` on a single line. Returns the name and the raw text between the
/// first `[` and the last `]`.
fn parse_action_line(line: &str) -> Option<(&str, &str)> {
    let line = line.trim();
    let keyword = line.get(..6)?;
    if !keyword.eq_ignore_ascii_case("action") {
        return None;
    }

    let rest = line[6..].trim_start().strip_prefix(':')?.trim_start();
    let name_len = rest
        .find(|c: char| !(c.is_ascii_alphanumeric() || c == '_'))
        .unwrap_or(rest.len());
    if name_len == 0 {
        return None;
    }

    let (name, rest) = rest.split_at(name_len);
    let input = rest.trim_start().strip_prefix('[')?.strip_suffix(']')?;
    Some((name, input))
}
