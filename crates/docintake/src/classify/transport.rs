use std::time::Duration;

use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};
use serde::Serialize;
use serde_json::Value;

use crate::error::ClassifyError;

/// Longest error body kept in `HttpStatus` errors.
const MAX_ERROR_BODY: usize = 512;

/// Sends one prompt to a chat-style LLM endpoint and returns the reply text.
#[async_trait]
pub trait ChatTransport: Send + Sync {
    async fn complete(&self, prompt: &str) -> Result<String, ClassifyError>;
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: [ChatMessage<'a>; 1],
    stream: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
}

#[derive(Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

/// reqwest-based transport speaking the `{model, messages}` chat format.
pub struct HttpChatTransport {
    client: reqwest::Client,
    endpoint: String,
    model: String,
    api_key: Option<SecretString>,
    temperature: Option<f32>,
}

impl HttpChatTransport {
    pub fn new(
        endpoint: impl Into<String>,
        model: impl Into<String>,
        api_key: Option<SecretString>,
        timeout: Duration,
    ) -> Result<Self, ClassifyError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| ClassifyError::Transport(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self {
            client,
            endpoint: endpoint.into(),
            model: model.into(),
            api_key,
            temperature: None,
        })
    }

    pub fn with_temperature(mut self, temperature: Option<f32>) -> Self {
        self.temperature = temperature;
        self
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

#[async_trait]
impl ChatTransport for HttpChatTransport {
    async fn complete(&self, prompt: &str) -> Result<String, ClassifyError> {
        let body = ChatRequest {
            model: &self.model,
            messages: [ChatMessage {
                role: "user",
                content: prompt,
            }],
            stream: false,
            temperature: self.temperature,
        };

        let mut request = self.client.post(&self.endpoint).json(&body);
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key.expose_secret());
        }

        let response = request
            .send()
            .await
            .map_err(|e| ClassifyError::Transport(format!("Request failed: {}", e)))?;

        let status = response.status();
        let text = response
            .text()
            .await
            .map_err(|e| ClassifyError::Transport(format!("Failed to read body: {}", e)))?;

        if !status.is_success() {
            return Err(ClassifyError::HttpStatus {
                status: status.as_u16(),
                body: truncate_body(&text),
            });
        }

        reply_text(&text)
    }
}

/// Finds the reply text in an endpoint response. OpenAI-style
/// `choices[0].message.content`, Ollama-style `message.content`, and flat
/// `content` / `response` fields are accepted.
pub fn reply_text(body: &str) -> Result<String, ClassifyError> {
    let value: Value = serde_json::from_str(body)
        .map_err(|e| ClassifyError::UnexpectedResponse(format!("not JSON: {}", e)))?;

    let candidates = [
        value.pointer("/choices/0/message/content"),
        value.pointer("/message/content"),
        value.get("content"),
        value.get("response"),
    ];

    let reply = candidates
        .into_iter()
        .flatten()
        .find_map(Value::as_str)
        .map(str::to_string)
        .ok_or_else(|| ClassifyError::UnexpectedResponse(truncate_body(body)));
    reply
}

fn truncate_body(body: &str) -> String {
    if body.chars().count() <= MAX_ERROR_BODY {
        body.to_string()
    } else {
        let mut cut: String = body.chars().take(MAX_ERROR_BODY).collect();
        cut.push_str("...");
        cut
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reply_text_openai_shape() {
        let body = r#"{"choices":[{"message":{"role":"assistant","content":"{\"category\":\"Invoice\"}"}}]}"#;
        assert_eq!(reply_text(body).unwrap(), "{\"category\":\"Invoice\"}");
    }

    #[test]
    fn test_reply_text_ollama_and_flat_shapes() {
        assert_eq!(
            reply_text(r#"{"message":{"content":"a"}}"#).unwrap(),
            "a"
        );
        assert_eq!(reply_text(r#"{"content":"b"}"#).unwrap(), "b");
        assert_eq!(reply_text(r#"{"response":"c","done":true}"#).unwrap(), "c");
    }

    #[test]
    fn test_reply_text_missing_field() {
        assert!(matches!(
            reply_text(r#"{"id":"x"}"#),
            Err(ClassifyError::UnexpectedResponse(_))
        ));
        assert!(matches!(
            reply_text("<html>"),
            Err(ClassifyError::UnexpectedResponse(_))
        ));
    }

    #[test]
    fn test_request_body_shape() {
        let body = ChatRequest {
            model: "llama3",
            messages: [ChatMessage {
                role: "user",
                content: "hi",
            }],
            stream: false,
            temperature: None,
        };
        let json = serde_json::to_value(&body).unwrap();
        assert_eq!(
            json,
            serde_json::json!({
                "model": "llama3",
                "messages": [{"role": "user", "content": "hi"}],
                "stream": false
            })
        );
    }

    #[test]
    fn test_truncate_body() {
        let long = "x".repeat(MAX_ERROR_BODY + 10);
        let cut = truncate_body(&long);
        assert_eq!(cut.chars().count(), MAX_ERROR_BODY + 3);
        assert!(cut.ends_with("..."));
    }

    #[tokio::test]
    async fn test_unreachable_endpoint_is_transport_error() {
        let transport = HttpChatTransport::new(
            "http://127.0.0.1:9/v1/chat/completions",
            "m",
            None,
            Duration::from_secs(2),
        )
        .unwrap();
        let err = transport.complete("hi").await.unwrap_err();
        assert!(matches!(err, ClassifyError::Transport(_)));
        assert!(err.is_retryable());
    }
}
