//! Completion providers: one system prompt + one user prompt in, text out.
//!
//! Two HTTP backends ship: any OpenAI-compatible `/chat/completions`
//! endpoint and the Anthropic Messages API. The backend is chosen from
//! `[llm] provider` when the research context is built.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument};

use deepdive_shared::{DeepDiveError, LlmBackend, LlmConfig, Result};

const ANTHROPIC_VERSION: &str = "2023-06-01";

/// A model reply.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Completion {
    pub content: String,
    /// Model that actually answered, as reported by the API.
    pub model: String,
    pub usage: Option<Usage>,
}

/// Token accounting for one call.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Usage {
    pub input_tokens: u64,
    pub output_tokens: u64,
}

/// A single-turn text completion backend.
#[async_trait]
pub trait CompletionProvider: Send + Sync {
    /// Configured model identifier.
    fn model(&self) -> &str;

    async fn complete(&self, system: &str, user: &str) -> Result<Completion>;
}

/// Build the configured completion backend.
pub fn build_completion_provider(
    config: &LlmConfig,
    api_key: String,
) -> Result<Box<dyn CompletionProvider>> {
    let client = Client::builder()
        .timeout(Duration::from_secs(config.timeout_secs))
        .build()
        .map_err(|e| DeepDiveError::Network(format!("failed to build HTTP client: {e}")))?;

    Ok(match config.provider {
        LlmBackend::Openai => Box::new(OpenAiCompatible::new(client, config, api_key)),
        LlmBackend::Anthropic => Box::new(AnthropicMessages::new(client, config, api_key)),
    })
}

/// Read an error body for inclusion in a message.
async fn error_body(response: reqwest::Response) -> String {
    response
        .text()
        .await
        .unwrap_or_else(|_| "<unreadable body>".to_string())
}

// ---------------------------------------------------------------------------
// OpenAI-compatible
// ---------------------------------------------------------------------------

/// Client for `POST {base_url}/chat/completions`.
pub struct OpenAiCompatible {
    client: Client,
    endpoint: String,
    api_key: String,
    model: String,
    max_tokens: u32,
}

impl OpenAiCompatible {
    pub fn new(client: Client, config: &LlmConfig, api_key: String) -> Self {
        Self {
            client,
            endpoint: format!("{}/chat/completions", config.base_url.trim_end_matches('/')),
            api_key,
            model: config.model.clone(),
            max_tokens: config.max_tokens,
        }
    }
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    max_tokens: u32,
    messages: [ChatMessage<'a>; 2],
}

#[derive(Serialize)]
struct ChatMessage<'a> {
    role: &'static str,
    content: &'a str,
}

#[derive(Deserialize)]
struct ChatResponse {
    #[serde(default)]
    model: Option<String>,
    #[serde(default)]
    choices: Vec<ChatChoice>,
    #[serde(default)]
    usage: Option<ChatUsage>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatReply,
}

#[derive(Deserialize)]
struct ChatReply {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Deserialize)]
struct ChatUsage {
    #[serde(default)]
    prompt_tokens: u64,
    #[serde(default)]
    completion_tokens: u64,
}

#[async_trait]
impl CompletionProvider for OpenAiCompatible {
    fn model(&self) -> &str {
        &self.model
    }

    #[instrument(skip_all, fields(model = %self.model, prompt_len = user.len()))]
    async fn complete(&self, system: &str, user: &str) -> Result<Completion> {
        let body = ChatRequest {
            model: &self.model,
            max_tokens: self.max_tokens,
            messages: [
                ChatMessage {
                    role: "system",
                    content: system,
                },
                ChatMessage {
                    role: "user",
                    content: user,
                },
            ],
        };

        let response = self
            .client
            .post(&self.endpoint)
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| DeepDiveError::Network(format!("{}: {e}", self.endpoint)))?;

        let status = response.status();
        if !status.is_success() {
            let text = error_body(response).await;
            return Err(DeepDiveError::Completion(format!(
                "LLM API error {}: {text}",
                status.as_u16()
            )));
        }

        let parsed: ChatResponse = response
            .json()
            .await
            .map_err(|e| DeepDiveError::Completion(format!("malformed response: {e}")))?;

        let Some(choice) = parsed.choices.into_iter().next() else {
            return Err(DeepDiveError::Completion(
                "LLM API returned no choices".into(),
            ));
        };

        let completion = Completion {
            content: choice.message.content.unwrap_or_default(),
            model: parsed.model.unwrap_or_else(|| self.model.clone()),
            usage: parsed.usage.map(|u| Usage {
                input_tokens: u.prompt_tokens,
                output_tokens: u.completion_tokens,
            }),
        };
        debug!(reply_len = completion.content.len(), usage = ?completion.usage, "completion received");
        Ok(completion)
    }
}

// ---------------------------------------------------------------------------
// Anthropic Messages
// ---------------------------------------------------------------------------

/// Client for `POST {base_url}/messages`.
pub struct AnthropicMessages {
    client: Client,
    endpoint: String,
    api_key: String,
    model: String,
    max_tokens: u32,
}

impl AnthropicMessages {
    pub fn new(client: Client, config: &LlmConfig, api_key: String) -> Self {
        Self {
            client,
            endpoint: format!("{}/messages", config.base_url.trim_end_matches('/')),
            api_key,
            model: config.model.clone(),
            max_tokens: config.max_tokens,
        }
    }
}

#[derive(Serialize)]
struct MessagesRequest<'a> {
    model: &'a str,
    max_tokens: u32,
    system: &'a str,
    messages: [ChatMessage<'a>; 1],
}

#[derive(Deserialize)]
struct MessagesResponse {
    #[serde(default)]
    model: Option<String>,
    #[serde(default)]
    content: Vec<ContentBlock>,
    #[serde(default)]
    usage: Option<MessagesUsage>,
}

#[derive(Deserialize)]
struct ContentBlock {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    text: Option<String>,
}

#[derive(Deserialize)]
struct MessagesUsage {
    #[serde(default)]
    input_tokens: u64,
    #[serde(default)]
    output_tokens: u64,
}

#[async_trait]
impl CompletionProvider for AnthropicMessages {
    fn model(&self) -> &str {
        &self.model
    }

    #[instrument(skip_all, fields(model = %self.model, prompt_len = user.len()))]
    async fn complete(&self, system: &str, user: &str) -> Result<Completion> {
        let body = MessagesRequest {
            model: &self.model,
            max_tokens: self.max_tokens,
            system,
            messages: [ChatMessage {
                role: "user",
                content: user,
            }],
        };

        let response = self
            .client
            .post(&self.endpoint)
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", ANTHROPIC_VERSION)
            .json(&body)
            .send()
            .await
            .map_err(|e| DeepDiveError::Network(format!("{}: {e}", self.endpoint)))?;

        let status = response.status();
        if !status.is_success() {
            let text = error_body(response).await;
            return Err(DeepDiveError::Completion(format!(
                "LLM API error {}: {text}",
                status.as_u16()
            )));
        }

        let parsed: MessagesResponse = response
            .json()
            .await
            .map_err(|e| DeepDiveError::Completion(format!("malformed response: {e}")))?;

        let text: Vec<String> = parsed
            .content
            .into_iter()
            .filter(|b| b.kind == "text")
            .filter_map(|b| b.text)
            .collect();
        if text.is_empty() {
            return Err(DeepDiveError::Completion(
                "LLM API returned no text content".into(),
            ));
        }

        let completion = Completion {
            content: text.join(""),
            model: parsed.model.unwrap_or_else(|| self.model.clone()),
            usage: parsed.usage.map(|u| Usage {
                input_tokens: u.input_tokens,
                output_tokens: u.output_tokens,
            }),
        };
        debug!(reply_len = completion.content.len(), usage = ?completion.usage, "completion received");
        Ok(completion)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use wiremock::matchers::{body_partial_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn config_for(server: &MockServer, provider: LlmBackend) -> LlmConfig {
        LlmConfig {
            provider,
            base_url: format!("{}/v1/", server.uri()),
            model: "test-model".into(),
            max_tokens: 256,
            ..LlmConfig::default()
        }
    }

    #[tokio::test]
    async fn openai_compatible_returns_first_choice() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/chat/completions"))
            .and(header("authorization", "Bearer sk-test"))
            .and(body_partial_json(json!({
                "model": "test-model",
                "max_tokens": 256,
                "messages": [
                    {"role": "system", "content": "be brief"},
                    {"role": "user", "content": "hello"}
                ]
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "model": "test-model-2024",
                "choices": [{"message": {"role": "assistant", "content": "hi there"}}],
                "usage": {"prompt_tokens": 12, "completion_tokens": 3}
            })))
            .mount(&server)
            .await;

        let provider =
            build_completion_provider(&config_for(&server, LlmBackend::Openai), "sk-test".into())
                .unwrap();
        let reply = provider.complete("be brief", "hello").await.expect("complete");

        assert_eq!(reply.content, "hi there");
        assert_eq!(reply.model, "test-model-2024");
        assert_eq!(
            reply.usage,
            Some(Usage {
                input_tokens: 12,
                output_tokens: 3
            })
        );
    }

    #[tokio::test]
    async fn openai_compatible_reports_status_and_body() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/chat/completions"))
            .respond_with(ResponseTemplate::new(429).set_body_string("rate limited"))
            .mount(&server)
            .await;

        let provider =
            build_completion_provider(&config_for(&server, LlmBackend::Openai), "k".into()).unwrap();
        let err = provider.complete("s", "u").await.unwrap_err();
        assert_eq!(err.to_string(), "completion error: LLM API error 429: rate limited");
    }

    #[tokio::test]
    async fn openai_compatible_rejects_empty_choices() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/chat/completions"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"choices": []})))
            .mount(&server)
            .await;

        let provider =
            build_completion_provider(&config_for(&server, LlmBackend::Openai), "k".into()).unwrap();
        let err = provider.complete("s", "u").await.unwrap_err();
        assert!(err.to_string().contains("no choices"));
    }

    #[tokio::test]
    async fn anthropic_sends_headers_and_joins_text_blocks() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/messages"))
            .and(header("x-api-key", "ak-test"))
            .and(header("anthropic-version", ANTHROPIC_VERSION))
            .and(body_partial_json(json!({
                "model": "test-model",
                "system": "be brief",
                "messages": [{"role": "user", "content": "hello"}]
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "model": "test-model",
                "content": [
                    {"type": "text", "text": "part one, "},
                    {"type": "text", "text": "part two"}
                ],
                "usage": {"input_tokens": 9, "output_tokens": 4}
            })))
            .mount(&server)
            .await;

        let provider = build_completion_provider(
            &config_for(&server, LlmBackend::Anthropic),
            "ak-test".into(),
        )
        .unwrap();
        assert_eq!(provider.model(), "test-model");
        let reply = provider.complete("be brief", "hello").await.expect("complete");
        assert_eq!(reply.content, "part one, part two");
        assert_eq!(reply.usage.map(|u| u.output_tokens), Some(4));
    }
}
