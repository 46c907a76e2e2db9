//! Question answering over a single plain-text policy document.
//!
//! The document is chunked once, lazily, on first use. Each question retrieves
//! the best-overlapping chunks by keyword and asks the generator to answer from
//! them alone. A failed load is retried on the next call.

use super::{ToolFuture, ToolInfo, ToolOutput, ToolTrait};
use crate::clients::TextGenerator;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::OnceCell;
use tracing::{info, warn};

const CHUNK_SIZE: usize = 1000;
const CHUNK_OVERLAP: usize = 200;
const TOP_K: usize = 3;
const NO_ANSWER: &str = "Could not find a specific answer in the document for this query.";

const STOP_WORDS: &[&str] = &[
    "the", "and", "for", "are", "what", "which", "who", "how", "when", "where", "why", "does", "with", "that",
    "this", "from", "about", "can", "into", "there", "their", "have", "has", "was", "were", "will", "would",
    "should", "could", "any", "all", "our", "your", "you",
];

const QA_PROMPT: &str = "Use the following pieces of context to answer the question at the end. \
If you don't know the answer, just say that you don't know, don't try to make up an answer.";

pub struct DocumentQaTool {
    document_path: PathBuf,
    document_name: String,
    generator: Arc<dyn TextGenerator>,
    chunks: Arc<OnceCell<Vec<String>>>,
}

impl DocumentQaTool {
    pub fn new(document_path: PathBuf, generator: Arc<dyn TextGenerator>) -> Self {
        let document_name = document_path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_else(|| document_path.display().to_string());

        Self {
            document_path,
            document_name,
            generator,
            chunks: Arc::new(OnceCell::new()),
        }
    }
}

impl ToolTrait for DocumentQaTool {
    fn info(&self) -> ToolInfo {
        ToolInfo {
            name: "PolicyDocumentQA".to_string(),
            description: format!(
                "Answers questions specifically about the '{}' document (employee leave policy). Input should be the user's question about the policy.",
                self.document_name
            ),
        }
    }

    fn execute(&self, input: String) -> ToolFuture {
        let path = self.document_path.clone();
        let name = self.document_name.clone();
        let generator = Arc::clone(&self.generator);
        let chunks = Arc::clone(&self.chunks);

        Box::pin(async move {
            let question = input.trim();
            if question.is_empty() {
                return Ok(ToolOutput::Failure("Error: No question provided to PolicyDocumentQA tool.".to_string()));
            }

            let chunks = match chunks.get_or_try_init(|| load_chunks(&path, &name)).await {
                Ok(chunks) => chunks,
                Err(detail) => {
                    warn!(document = %path.display(), "policy document unavailable");
                    return Ok(ToolOutput::Failure(format!(
                        "Error: Policy Q&A system could not be initialized. Detail: {detail}"
                    )));
                }
            };

            info!(question, "answering from policy document");
            let context = retrieve(chunks, question, TOP_K).join("\n\n");
            let prompt = format!("{QA_PROMPT}\n\n{context}\n\nQuestion: {question}\nHelpful Answer:");

            let output = match generator.generate(&prompt).await {
                Ok(answer) if answer.trim().is_empty() => ToolOutput::Success(format!("Answer from '{name}': {NO_ANSWER}")),
                Ok(answer) => ToolOutput::Success(format!("Answer from '{name}': {}", answer.trim())),
                Err(e) => ToolOutput::Failure(format!("Error during PolicyDocumentQA execution: {e}")),
            };
            Ok(output)
        })
    }
}

async fn load_chunks(path: &Path, name: &str) -> Result<Vec<String>, String> {
    let content = tokio::fs::read_to_string(path)
        .await
        .map_err(|e| format!("Error: Document '{name}' could not be read: {e}."))?;

    let text = content
        .split("\n\n")
        .map(str::trim)
        .filter(|paragraph| !paragraph.is_empty())
        .collect::<Vec<_>>()
        .join("\n\n");
    if text.is_empty() {
        return Err(format!("Error: Document '{name}' is empty. Cannot build new index."));
    }

    let chunks = split_into_chunks(&text, CHUNK_SIZE, CHUNK_OVERLAP);
    info!(document = name, chunks = chunks.len(), "policy document indexed");
    Ok(chunks)
}

/// Windows of at most `size` chars, overlapping by `overlap`, cut at whitespace when one
/// falls in the back half of the window.
pub fn split_into_chunks(text: &str, size: usize, overlap: usize) -> Vec<String> {
    let chars: Vec<char> = text.chars().collect();
    let mut chunks = Vec::new();
    let mut start = 0;

    while start < chars.len() {
        let mut end = (start + size).min(chars.len());
        if end < chars.len() {
            if let Some(cut) = (start + size / 2..end).rev().find(|&i| chars[i].is_whitespace()) {
                end = cut;
            }
        }

        let chunk: String = chars[start..end].iter().collect();
        let chunk = chunk.trim();
        if !chunk.is_empty() {
            chunks.push(chunk.to_string());
        }
        if end == chars.len() {
            break;
        }
        start = end.saturating_sub(overlap).max(start + 1);
    }
    chunks
}

fn keywords(text: &str) -> HashSet<String> {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|word| word.chars().count() >= 3)
        .map(str::to_lowercase)
        .filter(|word| !STOP_WORDS.contains(&word.as_str()))
        .collect()
}

/// The `k` chunks sharing the most keywords with the question, earliest first on ties.
/// Falls back to the leading chunks when nothing overlaps.
pub fn retrieve<'a>(chunks: &'a [String], question: &str, k: usize) -> Vec<&'a str> {
    let query = keywords(question);
    let mut scored: Vec<(usize, usize)> = chunks
        .iter()
        .enumerate()
        .map(|(index, chunk)| (index, keywords(chunk).intersection(&query).count()))
        .filter(|(_, score)| *score > 0)
        .collect();

    if scored.is_empty() {
        return chunks.iter().take(k).map(String::as_str).collect();
    }

    scored.sort_by(|a, b| b.1.cmp(&a.1).then(a.0.cmp(&b.0)));
    scored.into_iter().take(k).map(|(index, _)| chunks[index].as_str()).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clients::{LLMError, ModelInfo};
    use async_trait::async_trait;
    use std::sync::Mutex;
    use tempfile::TempDir;

    struct RecordingGenerator {
        reply: Result<String, String>,
        prompts: Mutex<Vec<String>>,
    }

    impl RecordingGenerator {
        fn replying(reply: &str) -> Arc<Self> {
            Arc::new(Self {
                reply: Ok(reply.to_string()),
                prompts: Mutex::new(Vec::new()),
            })
        }
    }

    #[async_trait]
    impl TextGenerator for RecordingGenerator {
        async fn generate(&self, prompt: &str) -> Result<String, LLMError> {
            self.prompts.lock().unwrap().push(prompt.to_string());
            self.reply.clone().map_err(LLMError::RequestFailed)
        }

        fn model_info(&self) -> ModelInfo {
            ModelInfo {
                name: "recording".to_string(),
                max_tokens: None,
            }
        }
    }

    fn policy_file(content: &str) -> (TempDir, PathBuf) {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("policy.txt");
        std::fs::write(&path, content).unwrap();
        (dir, path)
    }

    #[tokio::test]
    async fn test_answers_from_relevant_chunk() {
        let (_dir, path) = policy_file("Leave carry-over is capped at five days.\n\nParking is free on Fridays.");
        let generator = RecordingGenerator::replying(" Five days. ");
        let tool = DocumentQaTool::new(path, Arc::clone(&generator) as Arc<dyn TextGenerator>);

        let output = tool.execute("How many leave days carry over?".to_string()).await.unwrap();

        assert_eq!(output, ToolOutput::Success("Answer from 'policy.txt': Five days.".to_string()));
        let prompts = generator.prompts.lock().unwrap();
        assert!(prompts[0].contains("Leave carry-over is capped"));
        assert!(prompts[0].ends_with("Question: How many leave days carry over?\nHelpful Answer:"));
    }

    #[tokio::test]
    async fn test_missing_document_is_failure_and_retried() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("policy.txt");
        let generator = RecordingGenerator::replying("yes");
        let tool = DocumentQaTool::new(path.clone(), generator);

        let first = tool.execute("Is there a policy?".to_string()).await.unwrap();
        assert!(first.is_failure());
        assert!(first.text().starts_with("Error: Policy Q&A system could not be initialized."));

        std::fs::write(&path, "There is a policy.").unwrap();
        let second = tool.execute("Is there a policy?".to_string()).await.unwrap();
        assert_eq!(second.text(), "Answer from 'policy.txt': yes");
    }

    #[tokio::test]
    async fn test_empty_question_and_empty_answer() {
        let (_dir, path) = policy_file("Some policy text.");
        let tool = DocumentQaTool::new(path, RecordingGenerator::replying("   "));

        let empty = tool.execute("  ".to_string()).await.unwrap();
        assert_eq!(empty.text(), "Error: No question provided to PolicyDocumentQA tool.");

        let no_answer = tool.execute("What about pets?".to_string()).await.unwrap();
        assert!(no_answer.text().ends_with(NO_ANSWER));
    }

    #[tokio::test]
    async fn test_generator_failure_is_reported() {
        let (_dir, path) = policy_file("Some policy text.");
        let generator = Arc::new(RecordingGenerator {
            reply: Err("connection refused".to_string()),
            prompts: Mutex::new(Vec::new()),
        });
        let tool = DocumentQaTool::new(path, generator);

        let output = tool.execute("What is the policy?".to_string()).await.unwrap();
        assert!(output.is_failure());
        assert!(output.text().contains("connection refused"));
    }

    #[test]
    fn test_split_into_chunks_overlaps() {
        let text = "word ".repeat(500);
        let chunks = split_into_chunks(text.trim(), 100, 20);

        assert!(chunks.len() > 1);
        assert!(chunks.iter().all(|chunk| chunk.chars().count() <= 100));
        assert!(chunks.concat().len() > text.trim().len());
    }

    #[test]
    fn test_retrieve_ranks_by_overlap() {
        let chunks = vec![
            "Parking rules".to_string(),
            "Annual leave and carry-over deadline".to_string(),
            "Annual bonus".to_string(),
        ];

        let best = retrieve(&chunks, "What is the leave carry-over deadline?", 2);
        assert_eq!(best[0], "Annual leave and carry-over deadline");

        let fallback = retrieve(&chunks, "zzz", 2);
        assert_eq!(fallback, vec!["Parking rules", "Annual leave and carry-over deadline"]);
    }
}
