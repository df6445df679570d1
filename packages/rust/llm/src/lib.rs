//! OpenAI-compatible chat-completion client.
//!
//! Works against any `/chat/completions` endpoint speaking the OpenAI wire
//! format (OpenAI itself, OpenRouter, local gateways).

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument};

use channel_digest_shared::{CompletionClient, DigestError, LlmSettings, Result, Secret};

/// User-Agent string for completion requests.
const USER_AGENT: &str = concat!("channel-digest/", env!("CARGO_PKG_VERSION"));

const SERVICE: &str = "llm";

// ---------------------------------------------------------------------------
// Wire types
// ---------------------------------------------------------------------------

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
}

#[derive(Debug, Serialize)]
struct ChatMessage<'a> {
    role: &'static str,
    content: &'a str,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<Choice>,
    #[serde(default)]
    usage: Option<Usage>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ResponseMessage,
}

#[derive(Debug, Deserialize)]
struct ResponseMessage {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Usage {
    #[serde(default)]
    prompt_tokens: u64,
    #[serde(default)]
    completion_tokens: u64,
}

// ---------------------------------------------------------------------------
// Client
// ---------------------------------------------------------------------------

/// Chat-completion client implementing [`CompletionClient`].
pub struct ChatClient {
    client: Client,
    endpoint: String,
    api_key: Secret,
    model: String,
    temperature: Option<f32>,
    max_tokens: Option<u32>,
}

impl ChatClient {
    /// Build a client from resolved settings.
    pub fn new(settings: &LlmSettings) -> Result<Self> {
        let client = Client::builder()
            .user_agent(USER_AGENT)
            .timeout(settings.timeout)
            .build()
            .map_err(|e| DigestError::Network(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            client,
            endpoint: format!(
                "{}/chat/completions",
                settings.base_url.as_str().trim_end_matches('/')
            ),
            api_key: settings.api_key.clone(),
            model: settings.model.clone(),
            temperature: settings.temperature,
            max_tokens: settings.max_tokens,
        })
    }

    /// Model id sent with every request.
    pub fn model(&self) -> &str {
        &self.model
    }
}

#[async_trait]
impl CompletionClient for ChatClient {
    #[instrument(skip_all, fields(model = %self.model, prompt_chars = user_prompt.len()))]
    async fn complete(&self, system_prompt: &str, user_prompt: &str) -> Result<String> {
        let request = ChatRequest {
            model: &self.model,
            messages: vec![
                ChatMessage {
                    role: "system",
                    content: system_prompt,
                },
                ChatMessage {
                    role: "user",
                    content: user_prompt,
                },
            ],
            temperature: self.temperature,
            max_tokens: self.max_tokens,
        };

        let response = self
            .client
            .post(&self.endpoint)
            .bearer_auth(self.api_key.expose())
            .json(&request)
            .send()
            .await
            .map_err(|e| DigestError::Network(format!("{}: {e}", self.endpoint)))?;

        let status = response.status();
        if !status.is_success() {
            let body: String = response
                .text()
                .await
                .unwrap_or_default()
                .chars()
                .take(300)
                .collect();
            return Err(match status {
                StatusCode::UNAUTHORIZED => {
                    DigestError::api(SERVICE, format!("authentication failed: {body}"))
                }
                StatusCode::TOO_MANY_REQUESTS => {
                    DigestError::api(SERVICE, format!("rate limit exceeded: {body}"))
                }
                _ => DigestError::api(SERVICE, format!("HTTP {status}: {body}")),
            });
        }

        let parsed: ChatResponse = response
            .json()
            .await
            .map_err(|e| DigestError::parse(format!("invalid chat completion body: {e}")))?;

        if let Some(usage) = &parsed.usage {
            debug!(
                tokens_in = usage.prompt_tokens,
                tokens_out = usage.completion_tokens,
                "completion usage"
            );
        }

        parsed
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .filter(|text| !text.trim().is_empty())
            .ok_or_else(|| DigestError::api(SERVICE, "no response content"))
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use serde_json::json;
    use url::Url;
    use wiremock::matchers::{body_partial_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    use super::*;

    fn client(server: &MockServer) -> ChatClient {
        ChatClient::new(&LlmSettings {
            api_key: Secret::new("sk-test"),
            base_url: Url::parse(&format!("{}/v1", server.uri())).unwrap(),
            model: "gpt-4".into(),
            temperature: Some(0.2),
            max_tokens: None,
            timeout: Duration::from_secs(5),
        })
        .unwrap()
    }

    #[tokio::test]
    async fn complete_returns_first_choice() {
        let server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/v1/chat/completions"))
            .and(header("authorization", "Bearer sk-test"))
            .and(body_partial_json(json!({
                "model": "gpt-4",
                "messages": [
                    {"role": "system", "content": "sys"},
                    {"role": "user", "content": "hello"}
                ]
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "model": "gpt-4",
                "choices": [{"index": 0, "message": {"role": "assistant", "content": "hi there"}}],
                "usage": {"prompt_tokens": 12, "completion_tokens": 3}
            })))
            .expect(1)
            .mount(&server)
            .await;

        let text = client(&server).complete("sys", "hello").await.unwrap();
        assert_eq!(text, "hi there");
    }

    #[tokio::test]
    async fn empty_content_is_an_error() {
        let server = MockServer::start().await;

        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "choices": [{"message": {"role": "assistant", "content": "  "}}]
            })))
            .mount(&server)
            .await;

        let err = client(&server).complete("s", "u").await.unwrap_err();
        assert!(err.to_string().contains("no response content"));
    }

    #[tokio::test]
    async fn missing_choices_is_an_error() {
        let server = MockServer::start().await;

        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"choices": []})))
            .mount(&server)
            .await;

        assert!(client(&server).complete("s", "u").await.is_err());
    }

    #[tokio::test]
    async fn unauthorized_is_reported() {
        let server = MockServer::start().await;

        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(401).set_body_string("bad key"))
            .mount(&server)
            .await;

        let err = client(&server).complete("s", "u").await.unwrap_err();
        assert!(err.to_string().contains("authentication failed"));
    }

    #[test]
    fn request_omits_unset_options() {
        let request = ChatRequest {
            model: "m",
            messages: vec![],
            temperature: None,
            max_tokens: Some(100),
        };
        let json = serde_json::to_string(&request).unwrap();
        assert!(!json.contains("temperature"));
        assert!(json.contains(r#""max_tokens":100"#));
    }
}
