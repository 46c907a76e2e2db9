pub mod clients;
pub mod core;
pub mod memory;
pub mod parser;
pub mod prompts;
pub mod tools;

pub use clients::{LLMError, ModelInfo, OllamaClient, OllamaConfig, TextGenerator, create_llm_client};
pub use core::{AgentConfig, ReactAgent, RunOutcome, RunStatus, Severity, Step, Trace};
pub use memory::{ChatHistory, ChatTurn, ErrorMemory};
pub use parser::{MalformedReason, ParsedStep, parse};
pub use prompts::{PromptAssembler, PromptInputs};
pub use tools::{ToolError, ToolOutput, ToolRegistry, ToolTrait, default_tools};
