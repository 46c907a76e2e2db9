use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;
use tracing::warn;

/// Prefix of sentinel strings some backends return in place of generated text.
pub const GENERATION_FAILURE_PREFIX: &str = "ERROR_OLLAMA";

/// An `Observation:` starting this close to the last `Thought:` is treated as hallucinated.
pub const OBSERVATION_TRUNCATION_WINDOW: usize = 10;

const DEFAULT_BASE_URL: &str = "http://localhost:11434";
const DEFAULT_MODEL: &str = "mistral";

const STOP_SEQUENCES: [&str; 4] = ["Observation:", "\nObservation:", "Observation:\n", "\nThought:"];

#[derive(Debug, Error)]
pub enum LLMError {
    #[error("Request failed: {0}")]
    RequestFailed(String),
    #[error("Request timed out after {0:?}")]
    Timeout(Duration),
    #[error("API error: {0}")]
    ApiError(String),
    #[error("Parse error: {0}")]
    ParseError(String),
    #[error("Configuration error: {0}")]
    ConfigError(String),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelInfo {
    pub name: String,
    #[serde(default)]
    pub max_tokens: Option<u32>,
}

/// One generation round: prompt in, continuation text out.
#[async_trait]
pub trait TextGenerator: Send + Sync {
    async fn generate(&self, prompt: &str) -> Result<String, LLMError>;

    fn model_info(&self) -> ModelInfo;
}

#[derive(Debug, Clone, PartialEq)]
pub struct OllamaConfig {
    pub base_url: String,
    pub model: String,
    pub temperature: f32,
    pub num_predict: u32,
    pub timeout: Duration,
}

impl Default for OllamaConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            model: DEFAULT_MODEL.to_string(),
            temperature: 0.05,
            num_predict: 400,
            timeout: Duration::from_secs(120),
        }
    }
}

impl OllamaConfig {
    pub fn from_env() -> Self {
        let base_url = std::env::var("OLLAMA_BASE_URL").unwrap_or_else(|_| DEFAULT_BASE_URL.to_string());
        let model = std::env::var("OLLAMA_MODEL").unwrap_or_else(|_| DEFAULT_MODEL.to_string());

        Self {
            base_url,
            model,
            ..Default::default()
        }
    }
}

#[derive(Debug, Serialize)]
struct GenerateRequest<'a> {
    model: &'a str,
    prompt: &'a str,
    stream: bool,
    options: GenerateOptions<'a>,
}

#[derive(Debug, Serialize)]
struct GenerateOptions<'a> {
    temperature: f32,
    num_predict: u32,
    stop: &'a [&'a str],
}

#[derive(Debug, Deserialize)]
struct GenerateResponse {
    #[serde(default)]
    response: String,
}

pub struct OllamaClient {
    config: OllamaConfig,
    client: reqwest::Client,
    endpoint: String,
}

impl OllamaClient {
    pub fn new(config: OllamaConfig) -> Self {
        let endpoint = format!("{}/api/generate", config.base_url.trim_end_matches('/'));
        Self {
            config,
            client: reqwest::Client::new(),
            endpoint,
        }
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    fn build_request<'a>(&'a self, prompt: &'a str) -> GenerateRequest<'a> {
        GenerateRequest {
            model: &self.config.model,
            prompt,
            stream: false,
            options: GenerateOptions {
                temperature: self.config.temperature,
                num_predict: self.config.num_predict,
                stop: &STOP_SEQUENCES,
            },
        }
    }
}

#[async_trait]
impl TextGenerator for OllamaClient {
    async fn generate(&self, prompt: &str) -> Result<String, LLMError> {
        let request = self.build_request(prompt);

        let response = self
            .client
            .post(&self.endpoint)
            .timeout(self.config.timeout)
            .json(&request)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    LLMError::Timeout(self.config.timeout)
                } else {
                    LLMError::RequestFailed(e.to_string())
                }
            })?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| LLMError::RequestFailed(e.to_string()))?;

        if !status.is_success() {
            return Err(LLMError::ApiError(format!("{status}: {body}")));
        }

        let parsed: GenerateResponse = serde_json::from_str(&body)
            .map_err(|e| LLMError::ParseError(format!("{e}. Raw response: {body}")))?;

        Ok(truncate_hallucinated_observation(parsed.response.trim()))
    }

    fn model_info(&self) -> ModelInfo {
        ModelInfo {
            name: self.config.model.clone(),
            max_tokens: Some(self.config.num_predict),
        }
    }
}

/// Drops an `Observation:` the model wrote for itself before taking any action.
pub fn truncate_hallucinated_observation(text: &str) -> String {
    let Some(observation_pos) = text.find("Observation:") else {
        return text.to_string();
    };
    if text.contains("Action:") || text.contains("Final Answer:") {
        return text.to_string();
    }

    let early = match text.rfind("Thought:") {
        None => true,
        Some(thought_pos) => observation_pos < thought_pos + OBSERVATION_TRUNCATION_WINDOW,
    };

    if early {
        warn!("truncated an `Observation:` the model generated before any action");
        text[..observation_pos].trim().to_string()
    } else {
        text.to_string()
    }
}

pub fn create_llm_client(provider: &str, config: OllamaConfig) -> Result<Box<dyn TextGenerator>, LLMError> {
    match provider {
        "ollama" | "Ollama" => Ok(Box::new(OllamaClient::new(config))),
        _ => Err(LLMError::ConfigError(format!("Unknown provider: {}", provider))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case::no_observation("Thought: thinking", "Thought: thinking")]
    #[case::leading_observation("Observation: made up", "")]
    #[case::observation_right_after_thought("Thought:Observation: fake", "Thought:")]
    #[case::late_observation(
        "Thought: I have reasoned about this at length. Observation: x",
        "Thought: I have reasoned about this at length. Observation: x"
    )]
    #[case::action_present("Action: CalculatorTool[1]\nObservation: x", "Action: CalculatorTool[1]\nObservation: x")]
    #[case::final_answer_present("Observation: x\nFinal Answer: 2", "Observation: x\nFinal Answer: 2")]
    fn test_truncate_hallucinated_observation(#[case] input: &str, #[case] expected: &str) {
        assert_eq!(truncate_hallucinated_observation(input), expected);
    }

    #[test]
    fn test_request_body_shape() {
        let client = OllamaClient::new(OllamaConfig::default());
        let body = serde_json::to_value(client.build_request("hello")).unwrap();

        assert_eq!(body["model"], "mistral");
        assert_eq!(body["prompt"], "hello");
        assert_eq!(body["stream"], false);
        assert_eq!(body["options"]["num_predict"], 400);
        assert_eq!(body["options"]["stop"].as_array().unwrap().len(), 4);
    }

    #[test]
    fn test_endpoint_strips_trailing_slash() {
        let client = OllamaClient::new(OllamaConfig {
            base_url: "http://ollama:11434/".to_string(),
            ..Default::default()
        });
        assert_eq!(client.endpoint(), "http://ollama:11434/api/generate");
    }

    #[test]
    fn test_model_info_reports_token_budget() {
        let info = OllamaClient::new(OllamaConfig::default()).model_info();
        assert_eq!(info.name, "mistral");
        assert_eq!(info.max_tokens, Some(400));
    }

    #[test]
    fn test_create_llm_client_unknown_provider() {
        let result = create_llm_client("openai", OllamaConfig::default());
        assert!(matches!(result, Err(LLMError::ConfigError(_))));
    }

    #[tokio::test]
    async fn test_generate_connection_refused() {
        let client = OllamaClient::new(OllamaConfig {
            base_url: "http://127.0.0.1:1".to_string(),
            timeout: Duration::from_secs(5),
            ..Default::default()
        });

        let result = client.generate("Thought:").await;
        assert!(matches!(result, Err(LLMError::RequestFailed(_)) | Err(LLMError::Timeout(_))));
    }
}
