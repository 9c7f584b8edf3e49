//! OpenAI-compatible chat-completions client.
//!
//! Talks to a self-hosted model server exposing `/v1/chat/completions`.
//! Extraction requests ask for a JSON object answer via `response_format`.

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};

use crate::error::LlmError;
use crate::metrics::{MetricsCollector, TokenUsage};

/// A message in a conversation with an LLM.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Message {
    /// Role of the message sender (e.g., "system", "user", "assistant").
    pub role: String,
    /// Content of the message.
    pub content: String,
}

impl Message {
    /// Create a new system message.
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: "system".to_string(),
            content: content.into(),
        }
    }

    /// Create a new user message.
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: "user".to_string(),
            content: content.into(),
        }
    }
}

/// Constrains the shape of the model's answer.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ResponseFormat {
    #[serde(rename = "type")]
    pub format_type: String,
}

impl ResponseFormat {
    /// Ask for a single JSON object.
    pub fn json_object() -> Self {
        Self {
            format_type: "json_object".to_string(),
        }
    }
}

/// Request for text generation from an LLM.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenerationRequest {
    /// Model identifier to use for generation.
    pub model: String,
    /// Conversation messages.
    pub messages: Vec<Message>,
    /// Sampling temperature (0.0 - 2.0). Higher values = more random.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f64>,
    /// Maximum number of tokens to generate.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
    /// Answer format constraint.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub response_format: Option<ResponseFormat>,
}

impl GenerationRequest {
    /// Create a new generation request with default parameters.
    pub fn new(model: impl Into<String>, messages: Vec<Message>) -> Self {
        Self {
            model: model.into(),
            messages,
            temperature: None,
            max_tokens: None,
            response_format: None,
        }
    }

    /// Set the temperature for this request.
    pub fn with_temperature(mut self, temperature: f64) -> Self {
        self.temperature = Some(temperature);
        self
    }

    /// Set the max tokens for this request.
    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = Some(max_tokens);
        self
    }

    /// Set the response format for this request.
    pub fn with_response_format(mut self, format: ResponseFormat) -> Self {
        self.response_format = Some(format);
        self
    }
}

/// Response from an LLM generation request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenerationResponse {
    /// Model that generated this response.
    pub model: String,
    /// Generated choices/completions.
    pub choices: Vec<Choice>,
    /// Token usage statistics.
    pub usage: Usage,
}

impl GenerationResponse {
    /// Get the content of the first choice, if available.
    pub fn first_content(&self) -> Option<&str> {
        self.choices.first().map(|c| c.message.content.as_str())
    }
}

/// A single generated choice from the LLM.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Choice {
    /// Generated message.
    pub message: Message,
    /// Reason the generation stopped (e.g., "stop", "length").
    pub finish_reason: Option<String>,
}

/// Token usage statistics for a generation request.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Usage {
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
}

/// Trait for LLM providers that can generate text.
#[async_trait]
pub trait LlmProvider: Send + Sync {
    /// Generate a response for the given request.
    async fn generate(&self, request: GenerationRequest) -> Result<GenerationResponse, LlmError>;
}

/// Client for an OpenAI-compatible model server.
pub struct ChatClient {
    /// Base URL of the server, without the `/v1/...` suffix.
    api_base: String,
    /// Optional bearer token.
    api_key: Option<String>,
    http_client: Client,
}

impl ChatClient {
    /// Create a new client.
    ///
    /// # Arguments
    ///
    /// * `api_base` - Base URL of the model server (e.g., "http://localhost:8080")
    /// * `api_key` - Optional bearer token
    ///
    /// # Errors
    ///
    /// Returns `LlmError::ClientBuild` if the HTTP client cannot be built.
    pub fn new(api_base: impl Into<String>, api_key: Option<String>) -> Result<Self, LlmError> {
        let http_client = Client::builder()
            .timeout(Duration::from_secs(120))
            .build()
            .map_err(|e| LlmError::ClientBuild(e.to_string()))?;

        Ok(Self {
            api_base: api_base.into().trim_end_matches('/').to_string(),
            api_key,
            http_client,
        })
    }

    /// Get the API base URL.
    pub fn api_base(&self) -> &str {
        &self.api_base
    }

    /// Full URL of the chat-completions endpoint.
    pub fn completions_url(&self) -> String {
        format!("{}/v1/chat/completions", self.api_base)
    }

    /// Polls the model server until it answers a one-token request with 200.
    ///
    /// A 503 means the model is still loading. Connection errors and timeouts
    /// are retried. Waits `delay` between attempts.
    ///
    /// # Errors
    ///
    /// Returns `LlmError::NotReady` after `max_attempts` failed attempts.
    pub async fn wait_until_ready(
        &self,
        model: &str,
        max_attempts: u32,
        attempt_timeout: Duration,
        delay: Duration,
    ) -> Result<(), LlmError> {
        tracing::info!(url = %self.completions_url(), "Waiting for model endpoint");

        let ping = GenerationRequest::new(model, vec![Message::user("test")]).with_max_tokens(1);

        for attempt in 1..=max_attempts {
            let result = self
                .authorized(self.http_client.post(self.completions_url()))
                .timeout(attempt_timeout)
                .json(&ping)
                .send()
                .await;

            match result {
                Ok(resp) if resp.status() == StatusCode::OK => {
                    tracing::info!(attempt, "Model endpoint ready");
                    return Ok(());
                }
                Ok(resp) if resp.status() == StatusCode::SERVICE_UNAVAILABLE => {
                    tracing::debug!(attempt, max_attempts, "Model still loading");
                }
                Ok(resp) => {
                    tracing::warn!(
                        attempt,
                        status = resp.status().as_u16(),
                        "Model endpoint returned unexpected status"
                    );
                }
                Err(e) => {
                    tracing::debug!(attempt, max_attempts, error = %e, "Model endpoint unreachable");
                }
            }

            if attempt < max_attempts {
                tokio::time::sleep(delay).await;
            }
        }

        tracing::error!(attempts = max_attempts, "Model endpoint never became ready");
        Err(LlmError::NotReady {
            attempts: max_attempts,
        })
    }

    fn authorized(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match self.api_key {
            Some(ref api_key) => request.header("Authorization", format!("Bearer {}", api_key)),
            None => request,
        }
    }
}

/// Internal response structure for the OpenAI-compatible API.
///
/// Self-hosted servers omit some fields, so everything but `choices` is
/// optional.
#[derive(Debug, Deserialize)]
struct ApiResponse {
    #[serde(default)]
    model: String,
    choices: Vec<ApiChoice>,
    #[serde(default)]
    usage: Option<ApiUsage>,
}

#[derive(Debug, Deserialize)]
struct ApiChoice {
    message: ApiMessage,
    #[serde(default)]
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ApiMessage {
    #[serde(default)]
    role: Option<String>,
    #[serde(default)]
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ApiUsage {
    #[serde(default)]
    prompt_tokens: u32,
    #[serde(default)]
    completion_tokens: u32,
}

/// Error response from the API.
#[derive(Debug, Deserialize)]
struct ApiErrorResponse {
    error: ApiErrorDetail,
}

#[derive(Debug, Deserialize)]
struct ApiErrorDetail {
    message: String,
}

#[async_trait]
impl LlmProvider for ChatClient {
    async fn generate(&self, request: GenerationRequest) -> Result<GenerationResponse, LlmError> {
        let started = Instant::now();
        let model = request.model.clone();
        let result = self.send(&request).await;

        let tokens = match result {
            Ok(ref response) => TokenUsage::new(
                response.usage.prompt_tokens as u64,
                response.usage.completion_tokens as u64,
            ),
            Err(_) => TokenUsage::default(),
        };
        MetricsCollector::new().record_llm_request(
            &model,
            result.is_ok(),
            started.elapsed().as_secs_f64(),
            tokens,
        );

        result
    }
}

impl ChatClient {
    async fn send(&self, request: &GenerationRequest) -> Result<GenerationResponse, LlmError> {
        let http_response = self
            .authorized(self.http_client.post(self.completions_url()))
            .header("Content-Type", "application/json")
            .json(request)
            .send()
            .await
            .map_err(|e| LlmError::RequestFailed(e.to_string()))?;

        let status = http_response.status();

        if !status.is_success() {
            let status_code = status.as_u16();

            let error_text = http_response
                .text()
                .await
                .unwrap_or_else(|_| "Failed to read error response".to_string());

            let message = serde_json::from_str::<ApiErrorResponse>(&error_text)
                .map(|parsed| parsed.error.message)
                .unwrap_or(error_text);

            if status_code == 429 {
                return Err(LlmError::RateLimited(message));
            }

            return Err(LlmError::ApiError {
                code: status_code,
                message,
            });
        }

        let api_response: ApiResponse = http_response
            .json()
            .await
            .map_err(|e| LlmError::ParseError(format!("Failed to parse API response: {}", e)))?;

        let choices = api_response
            .choices
            .into_iter()
            .map(|choice| Choice {
                message: Message {
                    role: choice.message.role.unwrap_or_else(|| "assistant".to_string()),
                    content: choice.message.content.unwrap_or_default(),
                },
                finish_reason: choice.finish_reason,
            })
            .collect();

        let usage = api_response
            .usage
            .map(|u| Usage {
                prompt_tokens: u.prompt_tokens,
                completion_tokens: u.completion_tokens,
            })
            .unwrap_or_default();

        let model = if api_response.model.is_empty() {
            request.model.clone()
        } else {
            api_response.model
        };

        Ok(GenerationResponse {
            model,
            choices,
            usage,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_serialization() {
        let request = GenerationRequest::new("llama", vec![Message::user("hi")])
            .with_temperature(0.4)
            .with_max_tokens(3200)
            .with_response_format(ResponseFormat::json_object());

        let value = serde_json::to_value(&request).expect("serializable");
        assert_eq!(value["model"], "llama");
        assert_eq!(value["max_tokens"], 3200);
        assert_eq!(value["response_format"]["type"], "json_object");
        assert_eq!(value["messages"][0]["role"], "user");
    }

    #[test]
    fn test_optional_fields_skipped() {
        let request = GenerationRequest::new("llama", vec![]);
        let value = serde_json::to_value(&request).expect("serializable");
        assert!(value.get("temperature").is_none());
        assert!(value.get("response_format").is_none());
    }

    #[test]
    fn test_completions_url_strips_trailing_slash() {
        let client = ChatClient::new("http://localhost:8080/", None).expect("client");
        assert_eq!(client.api_base(), "http://localhost:8080");
        assert_eq!(
            client.completions_url(),
            "http://localhost:8080/v1/chat/completions"
        );
    }

    #[test]
    fn test_minimal_server_response_parses() {
        let body = r#"{"choices":[{"message":{"content":"{\"PE\":10}"}}]}"#;
        let parsed: ApiResponse = serde_json::from_str(body).expect("parses");
        assert_eq!(parsed.choices.len(), 1);
        assert!(parsed.usage.is_none());
        assert_eq!(parsed.choices[0].message.content.as_deref(), Some("{\"PE\":10}"));
    }

    #[test]
    fn test_first_content() {
        let response = GenerationResponse {
            model: "llama".to_string(),
            choices: vec![Choice {
                message: Message {
                    role: "assistant".to_string(),
                    content: "{}".to_string(),
                },
                finish_reason: Some("stop".to_string()),
            }],
            usage: Usage::default(),
        };
        assert_eq!(response.first_content(), Some("{}"));
    }
}
