//! OpenAI-compatible chat-completions adapter.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::debug;

use docgrab_shared::{DocgrabError, Result};

use crate::{ChatMessage, CompletionRequest, CompletionResponse, LlmClient, TokenUsage};

/// Default chat-completions endpoint.
const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";

/// HTTP timeout for one completion call.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(60);

// ---------------------------------------------------------------------------
// Wire types
// ---------------------------------------------------------------------------

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: &'a [ChatMessage],
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
    #[serde(default)]
    usage: Option<TokenUsage>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: AssistantMessage,
}

#[derive(Debug, Deserialize)]
struct AssistantMessage {
    #[serde(default)]
    content: String,
}

// ---------------------------------------------------------------------------
// Client
// ---------------------------------------------------------------------------

/// Client for an OpenAI-compatible chat-completions API.
///
/// The provider identifier has the form `vendor/model` (e.g.
/// `openai/gpt-4o`); the model name sent on the wire is the last segment.
/// Reasoning models (identifier containing `o1`) reject system messages and
/// the `temperature`/`max_tokens` parameters, so requests to them are
/// rewritten into a single user message without those fields.
pub struct OpenAiClient {
    provider_id: String,
    model: String,
    api_key: String,
    base_url: String,
    client: Client,
}

impl OpenAiClient {
    /// Create a client for `provider_id` authenticated with `api_key`.
    pub fn new(provider_id: impl Into<String>, api_key: impl Into<String>) -> Result<Self> {
        let provider_id = provider_id.into();
        let model = provider_id
            .rsplit('/')
            .next()
            .unwrap_or(&provider_id)
            .to_string();

        let client = Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| DocgrabError::Llm(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            provider_id,
            model,
            api_key: api_key.into(),
            base_url: DEFAULT_BASE_URL.to_string(),
            client,
        })
    }

    /// Point the client at a different endpoint (local gateways, tests).
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    fn is_reasoning_model(&self) -> bool {
        self.provider_id.to_lowercase().contains("o1")
    }

    /// Apply the reasoning-model quirks to a request.
    fn adapt(&self, request: CompletionRequest) -> CompletionRequest {
        if !self.is_reasoning_model() {
            return request;
        }

        let merged = request
            .messages
            .iter()
            .map(|m| m.content.as_str())
            .collect::<Vec<_>>()
            .join("\n\n");

        CompletionRequest {
            messages: vec![ChatMessage::user(merged)],
            temperature: None,
            max_tokens: None,
        }
    }
}

#[async_trait]
impl LlmClient for OpenAiClient {
    fn provider_id(&self) -> &str {
        &self.provider_id
    }

    async fn complete(&self, request: CompletionRequest) -> Result<CompletionResponse> {
        let request = self.adapt(request);

        let body = ChatRequest {
            model: &self.model,
            messages: &request.messages,
            temperature: request.temperature,
            max_tokens: request.max_tokens,
        };

        let response = self
            .client
            .post(format!("{}/chat/completions", self.base_url))
            .bearer_auth(self.api_key.trim())
            .json(&body)
            .send()
            .await
            .map_err(|e| DocgrabError::Llm(format!("{}: request failed: {e}", self.model)))?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            let snippet: String = text.chars().take(300).collect();
            return Err(DocgrabError::Llm(format!(
                "{}: HTTP {status}: {snippet}",
                self.model
            )));
        }

        let parsed: ChatResponse = response
            .json()
            .await
            .map_err(|e| DocgrabError::Llm(format!("{}: invalid response body: {e}", self.model)))?;

        let content = parsed
            .choices
            .into_iter()
            .next()
            .map(|c| c.message.content)
            .ok_or_else(|| DocgrabError::Llm(format!("{}: response had no choices", self.model)))?;

        let usage = parsed.usage.unwrap_or_default();
        debug!(
            model = %self.model,
            prompt_tokens = usage.prompt_tokens,
            completion_tokens = usage.completion_tokens,
            "completion received"
        );

        Ok(CompletionResponse { content, usage })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{body_partial_json, method, path};
    use wiremock::{Mock, MockServer, Request, ResponseTemplate};

    fn request() -> CompletionRequest {
        CompletionRequest {
            messages: vec![
                ChatMessage::system("You are a careful analyst."),
                ChatMessage::user("Summarize this page."),
            ],
            temperature: Some(0.0),
            max_tokens: Some(500),
        }
    }

    fn completion_body(content: &str) -> serde_json::Value {
        serde_json::json!({
            "choices": [{"message": {"role": "assistant", "content": content}}],
            "usage": {"prompt_tokens": 12, "completion_tokens": 5, "total_tokens": 17}
        })
    }

    #[test]
    fn model_name_is_last_provider_segment() {
        let client = OpenAiClient::new("openai/gpt-4o", "k").unwrap();
        assert_eq!(client.model, "gpt-4o");
        assert_eq!(client.provider_id(), "openai/gpt-4o");

        let bare = OpenAiClient::new("gpt-4o-mini", "k").unwrap();
        assert_eq!(bare.model, "gpt-4o-mini");
    }

    #[test]
    fn reasoning_detection_is_case_insensitive() {
        assert!(OpenAiClient::new("openai/O1-preview", "k").unwrap().is_reasoning_model());
        assert!(OpenAiClient::new("openai/o1-mini", "k").unwrap().is_reasoning_model());
        assert!(!OpenAiClient::new("openai/gpt-4o", "k").unwrap().is_reasoning_model());
    }

    #[test]
    fn reasoning_models_get_merged_single_user_message() {
        let client = OpenAiClient::new("openai/o1-mini", "k").unwrap();
        let adapted = client.adapt(request());

        assert_eq!(adapted.messages.len(), 1);
        assert_eq!(adapted.messages[0].role, "user");
        assert!(adapted.messages[0].content.contains("careful analyst"));
        assert!(adapted.messages[0].content.contains("Summarize this page."));
        assert!(adapted.temperature.is_none());
        assert!(adapted.max_tokens.is_none());
    }

    #[test]
    fn standard_models_keep_request_untouched() {
        let client = OpenAiClient::new("openai/gpt-4o", "k").unwrap();
        let adapted = client.adapt(request());
        assert_eq!(adapted.messages.len(), 2);
        assert_eq!(adapted.temperature, Some(0.0));
        assert_eq!(adapted.max_tokens, Some(500));
    }

    #[tokio::test]
    async fn complete_parses_content_and_usage() {
        let server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .and(body_partial_json(serde_json::json!({"model": "gpt-4o"})))
            .respond_with(ResponseTemplate::new(200).set_body_json(completion_body("hello")))
            .mount(&server)
            .await;

        let client = OpenAiClient::new("openai/gpt-4o", "test-key")
            .unwrap()
            .with_base_url(server.uri());

        let response = client.complete(request()).await.unwrap();
        assert_eq!(response.content, "hello");
        assert_eq!(response.usage.total_tokens, 17);
    }

    #[tokio::test]
    async fn reasoning_request_omits_temperature_on_the_wire() {
        let server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .respond_with(move |req: &Request| {
                let body: serde_json::Value = serde_json::from_slice(&req.body).unwrap();
                assert!(body.get("temperature").is_none());
                assert!(body.get("max_tokens").is_none());
                assert_eq!(body["messages"].as_array().unwrap().len(), 1);
                ResponseTemplate::new(200).set_body_json(completion_body("ok"))
            })
            .mount(&server)
            .await;

        let client = OpenAiClient::new("openai/o1-mini", "test-key")
            .unwrap()
            .with_base_url(server.uri());

        let response = client.complete(request()).await.unwrap();
        assert_eq!(response.content, "ok");
    }

    #[tokio::test]
    async fn non_success_status_is_an_llm_error() {
        let server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .respond_with(ResponseTemplate::new(429).set_body_string("rate limited"))
            .mount(&server)
            .await;

        let client = OpenAiClient::new("openai/gpt-4o", "test-key")
            .unwrap()
            .with_base_url(server.uri());

        let err = client.complete(request()).await.unwrap_err();
        let msg = err.to_string();
        assert!(msg.contains("429"), "{msg}");
        assert!(msg.contains("rate limited"), "{msg}");
    }

    #[tokio::test]
    async fn missing_usage_defaults_to_zero() {
        let server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "choices": [{"message": {"role": "assistant", "content": "x"}}]
            })))
            .mount(&server)
            .await;

        let client = OpenAiClient::new("openai/gpt-4o", "test-key")
            .unwrap()
            .with_base_url(server.uri());

        let response = client.complete(request()).await.unwrap();
        assert_eq!(response.usage.total_tokens, 0);
    }
}
