use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::info;

pub const ERROR_MEMORY_LIMIT: usize = 3;
pub const ERROR_MESSAGE_MAX_CHARS: usize = 200;
pub const DEFAULT_HISTORY_FILE: &str = "persistent_chat_history.json";
pub const DEFAULT_CONTEXT_TURNS: usize = 3;

/// Recent failures fed back into every prompt. Strict FIFO, oldest evicted first.
#[derive(Debug, Clone, PartialEq)]
pub struct ErrorMemory {
    entries: VecDeque<String>,
    limit: usize,
}

impl Default for ErrorMemory {
    fn default() -> Self {
        Self::new(ERROR_MEMORY_LIMIT)
    }
}

impl ErrorMemory {
    pub fn new(limit: usize) -> Self {
        Self {
            entries: VecDeque::with_capacity(limit),
            limit,
        }
    }

    pub fn record(&mut self, raw_message: &str) {
        let message = sanitize(raw_message);
        self.entries.push_back(message);
        while self.entries.len() > self.limit {
            self.entries.pop_front();
        }
    }

    pub fn render_recent(&self) -> String {
        if self.entries.is_empty() {
            return "None".to_string();
        }

        let skip = self.entries.len().saturating_sub(self.limit);
        self.entries
            .iter()
            .skip(skip)
            .map(|entry| format!("- {entry}"))
            .collect::<Vec<_>>()
            .join("\n")
    }

    pub fn entries(&self) -> Vec<String> {
        self.entries.iter().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }
}

/// Newline runs collapse to one space, then the text is cut to the char budget.
fn sanitize(raw: &str) -> String {
    let mut collapsed = String::with_capacity(raw.len());
    let mut in_break = false;
    for c in raw.chars() {
        if c == '\n' || c == '\r' {
            if !in_break {
                collapsed.push(' ');
                in_break = true;
            }
        } else {
            collapsed.push(c);
            in_break = false;
        }
    }
    collapsed.chars().take(ERROR_MESSAGE_MAX_CHARS).collect()
}

#[derive(Debug, Error)]
pub enum HistoryError {
    #[error("History path '{0}' is a directory, not a file")]
    IsDirectory(PathBuf),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Corrupt history file: {0}")]
    Corrupt(#[from] serde_json::Error),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatTurn {
    pub question: String,
    pub answer: String,
    #[serde(default)]
    pub trace: String,
}

/// Past question/answer pairs, optionally persisted as a JSON array.
#[derive(Debug, Clone, Default)]
pub struct ChatHistory {
    turns: Vec<ChatTurn>,
    path: Option<PathBuf>,
}

impl ChatHistory {
    pub fn new() -> Self {
        Self::default()
    }

    /// A missing file yields an empty history bound to `path`.
    pub fn load(path: impl Into<PathBuf>) -> Result<Self, HistoryError> {
        let path = path.into();
        if path.is_dir() {
            return Err(HistoryError::IsDirectory(path));
        }

        let turns = if path.exists() {
            let content = std::fs::read_to_string(&path)?;
            let turns: Vec<ChatTurn> = serde_json::from_str(&content)?;
            info!(path = %path.display(), turns = turns.len(), "loaded chat history");
            turns
        } else {
            Vec::new()
        };

        Ok(Self { turns, path: Some(path) })
    }

    /// Empty history that will save to `path` without reading it.
    pub fn fresh(path: impl Into<PathBuf>) -> Self {
        Self {
            turns: Vec::new(),
            path: Some(path.into()),
        }
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    pub fn turns(&self) -> &[ChatTurn] {
        &self.turns
    }

    pub fn len(&self) -> usize {
        self.turns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.turns.is_empty()
    }

    pub fn push(&mut self, turn: ChatTurn) {
        self.turns.push(turn);
    }

    pub fn save(&self) -> Result<(), HistoryError> {
        let Some(path) = &self.path else {
            return Ok(());
        };
        let json = serde_json::to_string_pretty(&self.turns)?;
        std::fs::write(path, json)?;
        Ok(())
    }

    /// Empties the history and removes the backing file. A directory at the path is left alone.
    pub fn clear(&mut self) -> Result<(), HistoryError> {
        self.turns.clear();
        match &self.path {
            Some(path) if path.is_dir() => Err(HistoryError::IsDirectory(path.clone())),
            Some(path) if path.exists() => {
                std::fs::remove_file(path)?;
                Ok(())
            }
            _ => Ok(()),
        }
    }

    /// The last `max_turns` pairs as prompt context, or an empty string.
    pub fn prompt_context(&self, max_turns: usize) -> String {
        let start = self.turns.len().saturating_sub(max_turns);
        let blocks: Vec<String> = self.turns[start..]
            .iter()
            .filter(|turn| !turn.question.is_empty() && !turn.answer.is_empty())
            .map(|turn| format!("User: {}\nAgent: {}", turn.question, turn.answer))
            .collect();

        if blocks.is_empty() {
            return String::new();
        }
        format!("Recent Conversation History (chronological order):\n{}", blocks.join("\n\n"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;
    use tempfile::TempDir;

    #[test]
    fn test_error_memory_empty_renders_none() {
        let memory = ErrorMemory::default();
        assert_eq!(memory.render_recent(), "None");
        assert!(memory.is_empty());
    }

    #[rstest]
    #[case(1, "- e1")]
    #[case(3, "- e1\n- e2\n- e3")]
    #[case(4, "- e2\n- e3\n- e4")]
    #[case(7, "- e5\n- e6\n- e7")]
    fn test_error_memory_keeps_last_three(#[case] count: usize, #[case] expected: &str) {
        let mut memory = ErrorMemory::default();
        for i in 1..=count {
            memory.record(&format!("e{i}"));
        }

        assert_eq!(memory.render_recent(), expected);
        assert_eq!(memory.len(), count.min(ERROR_MEMORY_LIMIT));
    }

    #[test]
    fn test_error_memory_collapses_newlines_and_truncates() {
        let mut memory = ErrorMemory::default();
        memory.record("line one\n\n\nline two\r\nline three");
        memory.record(&"x".repeat(500));

        let entries = memory.entries();
        assert_eq!(entries[0], "line one line two line three");
        assert_eq!(entries[1].chars().count(), ERROR_MESSAGE_MAX_CHARS);
    }

    #[test]
    fn test_error_memory_truncates_on_char_boundary() {
        let mut memory = ErrorMemory::default();
        memory.record(&"é".repeat(300));
        assert_eq!(memory.entries()[0].chars().count(), ERROR_MESSAGE_MAX_CHARS);
    }

    #[test]
    fn test_error_memory_clear() {
        let mut memory = ErrorMemory::default();
        memory.record("boom");
        memory.clear();
        assert_eq!(memory.render_recent(), "None");
    }

    fn turn(question: &str, answer: &str) -> ChatTurn {
        ChatTurn {
            question: question.to_string(),
            answer: answer.to_string(),
            trace: String::new(),
        }
    }

    #[test]
    fn test_prompt_context_uses_last_turns() {
        let mut history = ChatHistory::new();
        assert_eq!(history.prompt_context(DEFAULT_CONTEXT_TURNS), "");

        for i in 1..=4 {
            history.push(turn(&format!("q{i}"), &format!("a{i}")));
        }

        assert_eq!(
            history.prompt_context(DEFAULT_CONTEXT_TURNS),
            "Recent Conversation History (chronological order):\nUser: q2\nAgent: a2\n\nUser: q3\nAgent: a3\n\nUser: q4\nAgent: a4"
        );
    }

    #[test]
    fn test_history_save_and_load() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join(DEFAULT_HISTORY_FILE);

        let mut history = ChatHistory::load(&path).unwrap();
        assert!(history.is_empty());
        history.push(turn("What is 5 + 7?", "12"));
        history.save().unwrap();

        let reloaded = ChatHistory::load(&path).unwrap();
        assert_eq!(reloaded.turns(), history.turns());
    }

    #[test]
    fn test_history_load_errors() {
        let dir = TempDir::new().unwrap();
        assert!(matches!(ChatHistory::load(dir.path()), Err(HistoryError::IsDirectory(_))));

        let corrupt = dir.path().join("corrupt.json");
        std::fs::write(&corrupt, "{not json").unwrap();
        assert!(matches!(ChatHistory::load(&corrupt), Err(HistoryError::Corrupt(_))));
    }

    #[test]
    fn test_history_clear_removes_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join(DEFAULT_HISTORY_FILE);
        let mut history = ChatHistory::fresh(&path);
        history.push(turn("q", "a"));
        history.save().unwrap();
        assert!(path.exists());

        history.clear().unwrap();
        assert!(history.is_empty());
        assert!(!path.exists());
    }

    #[test]
    fn test_history_clear_leaves_directory_intact() {
        let dir = TempDir::new().unwrap();
        let project = dir.path().join("project");
        std::fs::create_dir(&project).unwrap();
        std::fs::write(project.join("important.rs"), "fn main() {}").unwrap();

        let mut history = ChatHistory::fresh(&project);
        history.push(turn("q", "a"));

        assert!(matches!(history.clear(), Err(HistoryError::IsDirectory(_))));
        assert!(history.is_empty());
        assert!(project.join("important.rs").is_file());
    }
}
