//! OpenRouter API client implementation
//!
//! Implements the LlmClient trait against OpenRouter's OpenAI-compatible
//! chat-completions endpoint.

use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde_json::{Value, json};

use crate::llm::client::{LlmClient, LlmError};
use crate::llm::types::{CompletionRequest, CompletionResponse, StopReason, Usage};

/// Default API base URL
pub const DEFAULT_BASE_URL: &str = "https://openrouter.ai/api/v1";

/// Default model - lets OpenRouter pick
pub const DEFAULT_MODEL: &str = "openrouter/auto";

/// Environment variable holding the API key
pub const DEFAULT_API_KEY_ENV: &str = "OPEN_ROUTER";

/// Configuration for the OpenRouter client
#[derive(Debug, Clone, PartialEq)]
pub struct OpenRouterConfig {
    pub model: String,
    pub base_url: String,
    pub temperature: f32,
    pub max_tokens: Option<u32>,
    pub timeout: Duration,
}

impl Default for OpenRouterConfig {
    fn default() -> Self {
        Self {
            model: DEFAULT_MODEL.to_string(),
            base_url: DEFAULT_BASE_URL.to_string(),
            temperature: 0.0,
            max_tokens: None,
            timeout: Duration::from_secs(60),
        }
    }
}

impl OpenRouterConfig {
    /// Create a new config with a specific model
    pub fn with_model(model: impl Into<String>) -> Self {
        Self {
            model: model.into(),
            ..Default::default()
        }
    }

    fn endpoint(&self) -> String {
        format!("{}/chat/completions", self.base_url.trim_end_matches('/'))
    }
}

/// OpenRouter API client
pub struct OpenRouterClient {
    client: Client,
    api_key: String,
    config: OpenRouterConfig,
    usage: Arc<Mutex<Usage>>,
}

impl OpenRouterClient {
    /// Create a new client, reading the API key from `api_key_env`
    pub fn new(config: OpenRouterConfig, api_key_env: &str) -> Result<Self, LlmError> {
        let api_key = std::env::var(api_key_env).map_err(|_| LlmError::MissingApiKey {
            env_var: api_key_env.to_string(),
        })?;

        Self::with_api_key(api_key, config)
    }

    /// Create a client with an explicit API key
    pub fn with_api_key(api_key: String, config: OpenRouterConfig) -> Result<Self, LlmError> {
        let client = Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| LlmError::Network(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            client,
            api_key,
            config,
            usage: Arc::new(Mutex::new(Usage::default())),
        })
    }

    /// Build the request body for the chat-completions API
    fn build_request(&self, request: &CompletionRequest) -> Value {
        let model = request.model.as_ref().unwrap_or(&self.config.model).clone();
        let temperature = request.temperature.unwrap_or(self.config.temperature);

        let mut messages: Vec<Value> = Vec::with_capacity(request.messages.len() + 1);
        if !request.system.is_empty() {
            messages.push(json!({ "role": "system", "content": request.system }));
        }
        messages.extend(
            request
                .messages
                .iter()
                .map(|m| json!({ "role": m.role.as_str(), "content": m.content })),
        );

        let mut body = json!({
            "model": model,
            "messages": messages,
            "temperature": temperature
        });

        if let Some(max_tokens) = request.max_tokens.or(self.config.max_tokens) {
            body["max_tokens"] = json!(max_tokens);
        }

        body
    }

    /// Parse the API response into a CompletionResponse
    fn parse_response(&self, body: Value) -> Result<CompletionResponse, LlmError> {
        if let Some(error) = body.get("error") {
            let message = error["message"].as_str().unwrap_or("unknown error").to_string();
            let status = error["code"].as_u64().unwrap_or(500) as u16;
            return Err(LlmError::ApiError { status, message });
        }

        let choice = body["choices"]
            .get(0)
            .ok_or_else(|| LlmError::InvalidResponse("response has no choices".to_string()))?;

        let content = choice["message"]["content"].as_str().unwrap_or("").to_string();
        let stop_reason = StopReason::from_finish_reason(choice["finish_reason"].as_str());

        let usage = if let Some(u) = body.get("usage") {
            Usage::new(
                u["prompt_tokens"].as_u64().unwrap_or(0),
                u["completion_tokens"].as_u64().unwrap_or(0),
            )
        } else {
            Usage::default()
        };

        self.usage.lock().unwrap_or_else(PoisonError::into_inner).add(&usage);

        Ok(CompletionResponse {
            content,
            stop_reason,
            usage,
        })
    }

    /// Send a request to the API
    async fn send_request(&self, body: Value) -> Result<Value, LlmError> {
        let response = self
            .client
            .post(self.config.endpoint())
            .bearer_auth(&self.api_key)
            .header("content-type", "application/json")
            .json(&body)
            .send()
            .await
            .map_err(|e| LlmError::Network(format!("Request failed: {}", e)))?;

        let status = response.status();

        // Handle rate limiting
        if status.as_u16() == 429 {
            let retry_after = response
                .headers()
                .get("retry-after")
                .and_then(|h| h.to_str().ok())
                .and_then(|s| s.parse::<u64>().ok())
                .unwrap_or(60);
            return Err(LlmError::RateLimited {
                retry_after: Duration::from_secs(retry_after),
            });
        }

        if !status.is_success() {
            let message = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());
            return Err(LlmError::ApiError {
                status: status.as_u16(),
                message,
            });
        }

        response
            .json()
            .await
            .map_err(|e| LlmError::InvalidResponse(format!("Failed to parse response: {}", e)))
    }

    /// Get cumulative token usage
    pub fn total_usage(&self) -> Usage {
        self.usage.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }
}

#[async_trait]
impl LlmClient for OpenRouterClient {
    async fn complete(&self, request: CompletionRequest) -> Result<CompletionResponse, LlmError> {
        let body = self.build_request(&request);
        log::debug!("Sending completion request to {} (model {})", self.config.base_url, body["model"]);
        let response = self.send_request(body).await?;
        self.parse_response(response)
    }

    fn model(&self) -> &str {
        &self.config.model
    }

    fn is_ready(&self) -> bool {
        !self.api_key.is_empty()
    }
}

impl std::fmt::Debug for OpenRouterClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OpenRouterClient")
            .field("model", &self.config.model)
            .field("base_url", &self.config.base_url)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::Message;

    fn client() -> OpenRouterClient {
        OpenRouterClient::with_api_key("test-key".to_string(), OpenRouterConfig::default()).unwrap()
    }

    #[test]
    fn test_config_default() {
        let config = OpenRouterConfig::default();
        assert_eq!(config.model, DEFAULT_MODEL);
        assert_eq!(config.base_url, DEFAULT_BASE_URL);
        assert_eq!(config.temperature, 0.0);
        assert_eq!(config.max_tokens, None);
        assert_eq!(config.endpoint(), "https://openrouter.ai/api/v1/chat/completions");
    }

    #[test]
    fn test_endpoint_trims_trailing_slash() {
        let config = OpenRouterConfig {
            base_url: "http://localhost:8080/v1/".to_string(),
            ..Default::default()
        };
        assert_eq!(config.endpoint(), "http://localhost:8080/v1/chat/completions");
    }

    #[test]
    fn test_client_without_api_key() {
        let result = OpenRouterClient::new(OpenRouterConfig::default(), "SQLPILOT_TEST_KEY_THAT_IS_NEVER_SET");
        match result {
            Err(LlmError::MissingApiKey { env_var }) => assert_eq!(env_var, "SQLPILOT_TEST_KEY_THAT_IS_NEVER_SET"),
            other => panic!("expected missing key, got {:?}", other.map(|_| ())),
        }
    }

    #[test]
    fn test_client_with_api_key() {
        let client = client();
        assert!(client.is_ready());
        assert_eq!(client.model(), DEFAULT_MODEL);
    }

    #[test]
    fn test_build_request_basic() {
        let request = CompletionRequest::new("You write SQL").with_user_message("How many movies?");
        let body = client().build_request(&request);

        assert_eq!(body["model"], DEFAULT_MODEL);
        assert_eq!(body["temperature"], 0.0);
        assert_eq!(body["messages"][0]["role"], "system");
        assert_eq!(body["messages"][0]["content"], "You write SQL");
        assert_eq!(body["messages"][1]["role"], "user");
        assert_eq!(body["messages"][1]["content"], "How many movies?");
        assert!(body.get("max_tokens").is_none());
    }

    #[test]
    fn test_build_request_overrides() {
        let mut request = CompletionRequest::new("")
            .with_user_message("Hi")
            .with_message(Message::assistant("Hello"))
            .with_max_tokens(256);
        request.model = Some("anthropic/claude-3.5-sonnet".to_string());

        let body = client().build_request(&request);

        assert_eq!(body["model"], "anthropic/claude-3.5-sonnet");
        assert_eq!(body["max_tokens"], 256);
        let messages = body["messages"].as_array().unwrap();
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[1]["role"], "assistant");
    }

    #[test]
    fn test_parse_response_text() {
        let client = client();
        let response = client
            .parse_response(json!({
                "choices": [{
                    "message": { "role": "assistant", "content": "SELECT COUNT(*) FROM movies" },
                    "finish_reason": "stop"
                }],
                "usage": { "prompt_tokens": 120, "completion_tokens": 9 }
            }))
            .unwrap();

        assert_eq!(response.content, "SELECT COUNT(*) FROM movies");
        assert_eq!(response.stop_reason, StopReason::EndTurn);
        assert_eq!(response.usage, Usage::new(120, 9));
    }

    #[test]
    fn test_parse_response_without_choices() {
        let err = client().parse_response(json!({ "choices": [] })).unwrap_err();
        assert!(matches!(err, LlmError::InvalidResponse(_)));
    }

    #[test]
    fn test_parse_response_error_body() {
        let err = client()
            .parse_response(json!({ "error": { "message": "No endpoints found", "code": 404 } }))
            .unwrap_err();
        assert_eq!(
            err,
            LlmError::ApiError {
                status: 404,
                message: "No endpoints found".to_string()
            }
        );
    }

    #[test]
    fn test_total_usage_accumulation() {
        let client = client();
        for (input, output) in [(100, 50), (200, 100)] {
            let _ = client.parse_response(json!({
                "choices": [{ "message": { "content": "" }, "finish_reason": "length" }],
                "usage": { "prompt_tokens": input, "completion_tokens": output }
            }));
        }
        assert_eq!(client.total_usage(), Usage::new(300, 150));
    }

    #[test]
    fn test_debug_impl_hides_key() {
        let debug_str = format!("{:?}", client());
        assert!(debug_str.contains("OpenRouterClient"));
        assert!(debug_str.contains(DEFAULT_MODEL));
        assert!(!debug_str.contains("test-key"));
    }

    #[test]
    fn test_send_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<OpenRouterClient>();
    }

    #[test]
    fn test_empty_api_key_not_ready() {
        let client = OpenRouterClient::with_api_key(String::new(), OpenRouterConfig::default()).unwrap();
        assert!(!client.is_ready());
    }
}
