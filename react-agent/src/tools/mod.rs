pub mod calculator;
pub mod document_qa;
pub mod file_reader;

pub use calculator::CalculatorTool;
pub use document_qa::DocumentQaTool;
pub use file_reader::FileReaderTool;

use crate::clients::TextGenerator;
use futures::Future;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;
use std::pin::Pin;
use std::sync::Arc;
use thiserror::Error;

/// A tool could not produce an observation at all. Expected failures are `ToolOutput::Failure`.
#[derive(Debug, Error)]
pub enum ToolError {
    #[error("IO error: {0}")]
    IoError(String),
}

impl ToolError {
    pub fn kind(&self) -> &'static str {
        match self {
            ToolError::IoError(_) => "IoError",
        }
    }
}

impl From<std::io::Error> for ToolError {
    fn from(error: std::io::Error) -> Self {
        ToolError::IoError(error.to_string())
    }
}

/// What a tool hands back to the loop. The text is surfaced to the prompt unchanged.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", content = "text", rename_all = "lowercase")]
pub enum ToolOutput {
    Success(String),
    Failure(String),
}

impl ToolOutput {
    /// Classifies plain observation text by the `"Error:"` wire convention.
    pub fn from_text(text: impl Into<String>) -> Self {
        let text = text.into();
        if text.contains("Error:") {
            ToolOutput::Failure(text)
        } else {
            ToolOutput::Success(text)
        }
    }

    pub fn text(&self) -> &str {
        match self {
            ToolOutput::Success(text) | ToolOutput::Failure(text) => text,
        }
    }

    pub fn is_failure(&self) -> bool {
        matches!(self, ToolOutput::Failure(_))
    }

    pub fn into_text(self) -> String {
        match self {
            ToolOutput::Success(text) | ToolOutput::Failure(text) => text,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolInfo {
    pub name: String,
    pub description: String,
}

pub type ToolFuture = Pin<Box<dyn Future<Output = Result<ToolOutput, ToolError>> + Send>>;

pub trait ToolTrait: Send + Sync {
    fn info(&self) -> ToolInfo;
    fn execute(&self, input: String) -> ToolFuture;
}

/// Name to tool lookup, built once at startup and shared read-only afterwards.
pub struct ToolRegistry {
    tools: HashMap<String, Box<dyn ToolTrait>>,
    order: Vec<String>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self {
            tools: HashMap::new(),
            order: Vec::new(),
        }
    }

    /// Registering a name twice replaces the tool but keeps its original position.
    pub fn register(&mut self, tool: Box<dyn ToolTrait>) {
        let name = tool.info().name;
        if !self.tools.contains_key(&name) {
            self.order.push(name.clone());
        }
        self.tools.insert(name, tool);
    }

    pub fn get(&self, name: &str) -> Option<&dyn ToolTrait> {
        self.tools.get(name).map(|t| t.as_ref())
    }

    pub fn has(&self, name: &str) -> bool {
        self.tools.contains_key(name)
    }

    /// Tool names in registration order.
    pub fn names(&self) -> Vec<String> {
        self.order.clone()
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    pub fn infos(&self) -> Vec<ToolInfo> {
        self.order
            .iter()
            .filter_map(|name| self.tools.get(name))
            .map(|tool| tool.info())
            .collect()
    }

    /// One `- name: description` line per tool, for the reasoning prompt.
    pub fn describe_all(&self) -> String {
        if self.is_empty() {
            return "No tools available.".to_string();
        }

        self.infos()
            .iter()
            .map(|info| format!("- {}: {}", info.name, info.description))
            .collect::<Vec<_>>()
            .join("\n")
    }
}

impl Default for ToolRegistry {
    fn default() -> Self {
        Self::new()
    }
}

pub fn default_tools(base_path: PathBuf, document: PathBuf, generator: Arc<dyn TextGenerator>) -> ToolRegistry {
    let mut registry = ToolRegistry::new();

    registry.register(Box::new(DocumentQaTool::new(document, generator)));
    registry.register(Box::new(FileReaderTool::new(base_path)));
    registry.register(Box::new(CalculatorTool::new()));

    registry
}
