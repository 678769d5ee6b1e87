use async_trait::async_trait;
use serde::Serialize;
use serde_json::Value;
use std::time::Duration;
use tracing::warn;

use crate::error::ExtractError;
use crate::retry::{RateLimitPolicy, RateLimitedClient, RawResponse};

const OLLAMA_TIMEOUT: Duration = Duration::from_secs(240);
const OPENROUTER_TIMEOUT: Duration = Duration::from_secs(120);
pub const OPENROUTER_URL: &str = "https://openrouter.ai/api/v1/chat/completions";

/// A model that turns a system + user prompt into a text completion.
#[async_trait]
pub trait ExtractionBackend: Send + Sync {
    /// Short label for logs, e.g. `ollama:llama3`.
    fn describe(&self) -> String;

    async fn complete(&self, system: &str, user: &str) -> Result<String, ExtractError>;
}

#[derive(Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

fn chat_messages<'a>(system: &'a str, user: &'a str) -> Vec<ChatMessage<'a>> {
    vec![
        ChatMessage {
            role: "system",
            content: system,
        },
        ChatMessage {
            role: "user",
            content: user,
        },
    ]
}

/// Pull the completion out of a JSON envelope by pointer. An empty string
/// is a valid (empty) completion; a missing one is an error, so the bundle
/// is not cached.
fn envelope_content(
    body: &str,
    pointer: &str,
    backend: &'static str,
) -> Result<String, ExtractError> {
    serde_json::from_str::<Value>(body)
        .ok()
        .and_then(|v| v.pointer(pointer).and_then(Value::as_str).map(str::to_string))
        .ok_or_else(|| {
            warn!(backend, "Response envelope has no message content");
            ExtractError::Envelope {
                backend,
                body: error_body(body),
            }
        })
}

fn error_body(body: &str) -> String {
    body.chars().take(400).collect()
}

/// Local, unthrottled model served by Ollama.
#[derive(Clone)]
pub struct OllamaBackend {
    base_url: String,
    model: String,
    num_ctx: u32,
    client: reqwest::Client,
}

#[derive(Serialize)]
struct OllamaChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    stream: bool,
    options: OllamaOptions,
}

#[derive(Serialize)]
struct OllamaOptions {
    num_ctx: u32,
}

impl OllamaBackend {
    pub fn new(base_url: String, model: String, num_ctx: u32) -> Result<Self, ExtractError> {
        let client = reqwest::Client::builder().timeout(OLLAMA_TIMEOUT).build()?;
        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            model,
            num_ctx,
            client,
        })
    }
}

#[async_trait]
impl ExtractionBackend for OllamaBackend {
    fn describe(&self) -> String {
        format!("ollama:{}", self.model)
    }

    async fn complete(&self, system: &str, user: &str) -> Result<String, ExtractError> {
        let url = format!("{}/api/chat", self.base_url);
        let request = OllamaChatRequest {
            model: &self.model,
            messages: chat_messages(system, user),
            stream: false,
            options: OllamaOptions {
                num_ctx: self.num_ctx,
            },
        };

        let response = self.client.post(&url).json(&request).send().await?;
        let status = response.status();
        let body = response.text().await?;

        if !status.is_success() {
            return Err(ExtractError::Backend {
                status: status.as_u16(),
                body: error_body(&body),
            });
        }

        envelope_content(&body, "/message/content", "ollama")
    }
}

/// Remote model behind OpenRouter's chat-completions API, paced and retried
/// through a [`RateLimitedClient`].
pub struct OpenRouterBackend {
    api_key: String,
    model: String,
    url: String,
    client: reqwest::Client,
    limiter: RateLimitedClient,
}

#[derive(Serialize)]
struct ChatCompletionRequest<'a> {
    model: &'a str,
    temperature: f32,
    max_tokens: u32,
    messages: Vec<ChatMessage<'a>>,
}

impl OpenRouterBackend {
    pub fn new(
        api_key: Option<String>,
        model: String,
        policy: RateLimitPolicy,
    ) -> Result<Self, ExtractError> {
        let api_key = api_key
            .map(|k| k.trim().to_string())
            .filter(|k| !k.is_empty())
            .ok_or_else(|| {
                ExtractError::Config(
                    "OPENROUTER_API_KEY is required for the openrouter backend".to_string(),
                )
            })?;
        let client = reqwest::Client::builder().timeout(OPENROUTER_TIMEOUT).build()?;

        Ok(Self {
            api_key,
            model,
            url: OPENROUTER_URL.to_string(),
            client,
            limiter: RateLimitedClient::new(policy),
        })
    }

    /// Point the backend at a different chat-completions endpoint.
    pub fn with_url(mut self, url: impl Into<String>) -> Self {
        self.url = url.into();
        self
    }

    async fn send_once(
        &self,
        request: &ChatCompletionRequest<'_>,
    ) -> Result<RawResponse, ExtractError> {
        let response = self
            .client
            .post(&self.url)
            .bearer_auth(&self.api_key)
            .header("HTTP-Referer", "https://kg-builder.local")
            .header("X-Title", "kg-builder")
            .json(request)
            .send()
            .await
            .map_err(classify)?;

        RawResponse::from_response(response).await.map_err(classify)
    }
}

/// Network-level failures are retryable; anything else is not.
fn classify(e: reqwest::Error) -> ExtractError {
    if e.is_timeout() || e.is_connect() || e.is_request() || e.is_body() {
        ExtractError::Transient(e.to_string())
    } else {
        ExtractError::Http(e)
    }
}

#[async_trait]
impl ExtractionBackend for OpenRouterBackend {
    fn describe(&self) -> String {
        format!("openrouter:{}", self.model)
    }

    async fn complete(&self, system: &str, user: &str) -> Result<String, ExtractError> {
        let request = ChatCompletionRequest {
            model: &self.model,
            temperature: 0.1,
            max_tokens: 1400,
            messages: chat_messages(system, user),
        };

        let body = self
            .limiter
            .execute("openrouter", || self.send_once(&request))
            .await?;

        envelope_content(&body, "/choices/0/message/content", "openrouter")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    /// Serve one canned HTTP response on a local port and return its URL.
    async fn serve_once(status_line: &'static str, body: &'static str) -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut request = Vec::new();
            let mut buf = [0u8; 4096];
            // Read headers and the JSON body before answering
            loop {
                let n = socket.read(&mut buf).await.unwrap();
                request.extend_from_slice(&buf[..n]);
                if n == 0 || request_complete(&request) {
                    break;
                }
            }
            let response = format!(
                "HTTP/1.1 {status_line}\r\ncontent-type: application/json\r\n\
                 content-length: {}\r\nconnection: close\r\n\r\n{body}",
                body.len()
            );
            socket.write_all(response.as_bytes()).await.unwrap();
            socket.shutdown().await.ok();
        });

        format!("http://{addr}/api/v1/chat/completions")
    }

    fn request_complete(request: &[u8]) -> bool {
        let text = String::from_utf8_lossy(request);
        let Some((head, body)) = text.split_once("\r\n\r\n") else {
            return false;
        };
        let length = head
            .lines()
            .find_map(|line| {
                let (name, value) = line.split_once(':')?;
                name.eq_ignore_ascii_case("content-length")
                    .then(|| value.trim().parse::<usize>().ok())
                    .flatten()
            })
            .unwrap_or(0);
        body.len() >= length
    }

    fn remote(url: String) -> OpenRouterBackend {
        let policy = RateLimitPolicy {
            min_interval_ms: 0,
            ..RateLimitPolicy::default()
        };
        OpenRouterBackend::new(Some("sk-test".to_string()), "m".to_string(), policy)
            .unwrap()
            .with_url(url)
    }

    #[test]
    fn test_ollama_envelope() {
        let body = r#"{"model":"m","message":{"role":"assistant","content":"[1]"},"done":true}"#;
        assert_eq!(envelope_content(body, "/message/content", "ollama").unwrap(), "[1]");
    }

    #[test]
    fn test_openrouter_envelope() {
        let body = r#"{"choices":[{"message":{"role":"assistant","content":"[]"}}]}"#;
        let content = envelope_content(body, "/choices/0/message/content", "openrouter");
        assert_eq!(content.unwrap(), "[]");
    }

    #[test]
    fn test_empty_content_is_a_valid_completion() {
        let body = r#"{"choices":[{"message":{"role":"assistant","content":""}}]}"#;
        let content = envelope_content(body, "/choices/0/message/content", "openrouter");
        assert_eq!(content.unwrap(), "");
    }

    #[test]
    fn test_missing_content_is_an_error() {
        let relayed = r#"{"error":{"message":"Provider returned error","code":502}}"#;
        let pointer = "/choices/0/message/content";

        for body in [relayed, r#"{"choices":[]}"#, "<html>"] {
            let result = envelope_content(body, pointer, "openrouter");
            assert!(matches!(result, Err(ExtractError::Envelope { backend: "openrouter", .. })));
        }
    }

    #[tokio::test]
    async fn test_openrouter_round_trip_over_http() {
        let url = serve_once(
            "200 OK",
            r#"{"choices":[{"message":{"role":"assistant","content":"[{\"id\":\"q1\"}]"}}]}"#,
        )
        .await;

        let content = remote(url).complete("system", "user").await.unwrap();
        assert_eq!(content, r#"[{"id":"q1"}]"#);
    }

    #[tokio::test]
    async fn test_openrouter_error_object_with_200_fails() {
        let url = serve_once(
            "200 OK",
            r#"{"error":{"message":"Provider returned error","code":502}}"#,
        )
        .await;

        let err = remote(url).complete("system", "user").await.unwrap_err();
        match err {
            ExtractError::Envelope { backend, body } => {
                assert_eq!(backend, "openrouter");
                assert!(body.contains("Provider returned error"));
            }
            other => panic!("expected Envelope error, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_openrouter_client_error_is_not_retried() {
        let url = serve_once("401 Unauthorized", r#"{"error":"bad key"}"#).await;

        let err = remote(url).complete("system", "user").await.unwrap_err();
        assert!(matches!(err, ExtractError::Backend { status: 401, .. }));
    }

    #[test]
    fn test_openrouter_requires_key() {
        for key in [None, Some("   ".to_string())] {
            let result = OpenRouterBackend::new(key, "m".to_string(), RateLimitPolicy::default());
            assert!(matches!(result, Err(ExtractError::Config(_))));
        }
    }

    #[test]
    fn test_describe() {
        let ollama =
            OllamaBackend::new("http://localhost:11434/".to_string(), "llama3".to_string(), 4096)
                .unwrap();
        assert_eq!(ollama.describe(), "ollama:llama3");
        assert_eq!(ollama.base_url, "http://localhost:11434");

        let remote = OpenRouterBackend::new(
            Some("k".to_string()),
            "deepseek".to_string(),
            RateLimitPolicy::default(),
        )
        .unwrap();
        assert_eq!(remote.describe(), "openrouter:deepseek");
    }
}
