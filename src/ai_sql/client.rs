//! Completion provider clients and the query generator

use crate::ai_sql::config::{AiProviderType, CompletionConfig};
use crate::ai_sql::error::GenerationError;
use crate::ai_sql::prompt::PromptPayload;
use async_trait::async_trait;
use regex::Regex;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::sync::LazyLock;
use std::time::Duration;
use tracing::{debug, info};

static CODE_FENCE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)```(?:sql)?").expect("valid fence pattern"));

/// One request to a completion provider
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CompletionRequest {
    pub system: String,
    pub user: String,
    pub model: String,
    pub temperature: f32,
    pub max_tokens: u32,
}

/// Trait for completion providers
#[async_trait]
pub trait CompletionProvider: Send + Sync {
    /// Return the text of the first candidate
    async fn complete(&self, request: &CompletionRequest) -> Result<String, GenerationError>;

    /// Get provider name
    fn name(&self) -> &str;
}

fn build_http_client(timeout: Duration) -> Result<Client, GenerationError> {
    Client::builder()
        .timeout(timeout)
        .build()
        .map_err(|e| GenerationError::Network(format!("Failed to create HTTP client: {}", e)))
}

fn map_send_error(e: reqwest::Error, timeout: Duration) -> GenerationError {
    if e.is_timeout() {
        GenerationError::Timeout {
            timeout_secs: timeout.as_secs(),
        }
    } else {
        GenerationError::Network(format!("Request failed: {}", e))
    }
}

async fn check_status(response: reqwest::Response) -> Result<reqwest::Response, GenerationError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let error_text = response
        .text()
        .await
        .unwrap_or_else(|_| "Unknown error".to_string());
    Err(GenerationError::Api {
        status_code: status.as_u16(),
        message: error_text,
    })
}

/// OpenAI-compatible chat completions provider
pub struct OpenAIProvider {
    client: Client,
    api_key: String,
    base_url: String,
    timeout: Duration,
}

impl OpenAIProvider {
    pub fn new(api_key: String, base_url: String, timeout: Duration) -> Result<Self, GenerationError> {
        Ok(Self {
            client: build_http_client(timeout)?,
            api_key,
            base_url,
            timeout,
        })
    }
}

#[async_trait]
impl CompletionProvider for OpenAIProvider {
    async fn complete(&self, request: &CompletionRequest) -> Result<String, GenerationError> {
        let url = format!("{}/chat/completions", self.base_url);

        let request_body = OpenAIRequest {
            model: request.model.clone(),
            messages: vec![
                Message {
                    role: "system".to_string(),
                    content: request.system.clone(),
                },
                Message {
                    role: "user".to_string(),
                    content: request.user.clone(),
                },
            ],
            temperature: request.temperature,
            max_tokens: request.max_tokens,
        };

        debug!(
            "Calling OpenAI API with model: {}, max_tokens: {}, temperature: {}",
            request.model, request.max_tokens, request.temperature
        );

        let response = self
            .client
            .post(&url)
            .bearer_auth(&self.api_key)
            .json(&request_body)
            .send()
            .await
            .map_err(|e| map_send_error(e, self.timeout))?;

        let response_body: OpenAIResponse = check_status(response)
            .await?
            .json()
            .await
            .map_err(|e| GenerationError::InvalidResponse(e.to_string()))?;

        response_body
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .ok_or(GenerationError::EmptyResponse)
    }

    fn name(&self) -> &str {
        "OpenAI"
    }
}

/// Anthropic messages provider
pub struct AnthropicProvider {
    client: Client,
    api_key: String,
    base_url: String,
    timeout: Duration,
}

impl AnthropicProvider {
    pub fn new(api_key: String, base_url: String, timeout: Duration) -> Result<Self, GenerationError> {
        Ok(Self {
            client: build_http_client(timeout)?,
            api_key,
            base_url,
            timeout,
        })
    }
}

#[async_trait]
impl CompletionProvider for AnthropicProvider {
    async fn complete(&self, request: &CompletionRequest) -> Result<String, GenerationError> {
        let url = format!("{}/v1/messages", self.base_url);

        let request_body = AnthropicRequest {
            model: request.model.clone(),
            max_tokens: request.max_tokens,
            temperature: request.temperature,
            system: Some(request.system.clone()),
            messages: vec![Message {
                role: "user".to_string(),
                content: request.user.clone(),
            }],
        };

        debug!(
            "Calling Anthropic API with model: {}, max_tokens: {}, temperature: {}",
            request.model, request.max_tokens, request.temperature
        );

        let response = self
            .client
            .post(&url)
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", "2023-06-01")
            .header("content-type", "application/json")
            .json(&request_body)
            .send()
            .await
            .map_err(|e| map_send_error(e, self.timeout))?;

        let response_body: AnthropicResponse = check_status(response)
            .await?
            .json()
            .await
            .map_err(|e| GenerationError::InvalidResponse(e.to_string()))?;

        // Extract text content from the first content block
        response_body
            .content
            .into_iter()
            .find_map(|block| block.text)
            .ok_or(GenerationError::EmptyResponse)
    }

    fn name(&self) -> &str {
        "Anthropic"
    }
}

// Provider API types
#[derive(Debug, Serialize, Deserialize)]
struct Message {
    role: String,
    content: String,
}

#[derive(Debug, Serialize)]
struct OpenAIRequest {
    model: String,
    messages: Vec<Message>,
    temperature: f32,
    max_tokens: u32,
}

#[derive(Debug, Deserialize)]
struct OpenAIResponse {
    choices: Vec<OpenAIChoice>,
}

#[derive(Debug, Deserialize)]
struct OpenAIChoice {
    message: OpenAIMessage,
}

#[derive(Debug, Deserialize)]
struct OpenAIMessage {
    content: Option<String>,
}

#[derive(Debug, Serialize)]
struct AnthropicRequest {
    model: String,
    max_tokens: u32,
    temperature: f32,
    #[serde(skip_serializing_if = "Option::is_none")]
    system: Option<String>,
    messages: Vec<Message>,
}

#[derive(Debug, Deserialize)]
struct AnthropicResponse {
    content: Vec<ContentBlock>,
}

#[derive(Debug, Deserialize)]
struct ContentBlock {
    #[serde(default)]
    text: Option<String>,
}

/// Create a completion provider based on configuration
pub fn create_provider(
    config: &CompletionConfig,
) -> Result<Box<dyn CompletionProvider>, GenerationError> {
    let api_key = config.api_key.clone().ok_or_else(|| {
        GenerationError::Configuration(format!(
            "{} API key not configured. Set {} environment variable or add api_key to [completion].",
            config.provider,
            config.provider.api_key_env_var()
        ))
    })?;
    let base_url = config.base_url().to_string();
    let timeout = Duration::from_secs(config.timeout_seconds);

    match config.provider {
        AiProviderType::OpenAI => Ok(Box::new(OpenAIProvider::new(api_key, base_url, timeout)?)),
        AiProviderType::Anthropic => {
            Ok(Box::new(AnthropicProvider::new(api_key, base_url, timeout)?))
        }
    }
}

/// Remove markdown code fences (```` ```sql ```` and ```` ``` ````, any case) and trim
pub fn strip_code_fences(text: &str) -> String {
    CODE_FENCE.replace_all(text, "").trim().to_string()
}

/// Turns a prompt into raw candidate SQL text through one provider call
pub struct QueryGenerator {
    provider: Box<dyn CompletionProvider>,
    model: String,
    temperature: f32,
    max_tokens: u32,
    timeout: Duration,
}

impl QueryGenerator {
    pub fn new(provider: Box<dyn CompletionProvider>, config: &CompletionConfig) -> Self {
        Self {
            provider,
            model: config.model().to_string(),
            temperature: config.temperature,
            max_tokens: config.max_tokens,
            timeout: Duration::from_secs(config.timeout_seconds),
        }
    }

    /// Override the completion timeout
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Call the provider once; no retry. The result has code fences stripped.
    pub async fn generate(&self, payload: &PromptPayload) -> Result<String, GenerationError> {
        info!("Generating SQL with {}", self.provider.name());

        let request = CompletionRequest {
            system: payload.system.clone(),
            user: payload.user.clone(),
            model: self.model.clone(),
            temperature: self.temperature,
            max_tokens: self.max_tokens,
        };

        debug!("System prompt length: {} chars", request.system.len());
        debug!("User prompt length: {} chars", request.user.len());

        let text = tokio::time::timeout(self.timeout, self.provider.complete(&request))
            .await
            .map_err(|_| GenerationError::Timeout {
                timeout_secs: self.timeout.as_secs(),
            })??;

        let cleaned = strip_code_fences(&text);
        if cleaned.is_empty() {
            return Err(GenerationError::EmptyResponse);
        }
        Ok(cleaned)
    }
}
