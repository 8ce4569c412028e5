//! Model boundary: text in, untyped JSON out.
//!
//! [`ExtractionModel`] is the seam the orchestrator talks to. The shipped
//! implementation speaks the OpenAI-compatible chat-completions protocol, which
//! Groq and most hosted providers accept.

use std::time::{Duration, Instant};

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde_json::{json, Value};
use tracing::{error, info, warn};

use crate::error::ModelError;

pub const DEFAULT_BASE_URL: &str = "https://api.groq.com/openai/v1";

/// A hosted language model that answers with a JSON object.
#[async_trait]
pub trait ExtractionModel: Send + Sync {
    /// Send one system + user prompt pair and return the parsed JSON reply.
    async fn complete(&self, system_prompt: &str, user_prompt: &str) -> Result<Value, ModelError>;
}

/// Connection settings for [`ChatCompletionsModel`].
#[derive(Debug, Clone)]
pub struct ModelConfig {
    pub api_key: String,
    pub base_url: String,
    pub model: String,
    pub temperature: f32,
    pub max_retries: usize,
    pub timeout_seconds: u64,
}

impl ModelConfig {
    pub fn new(api_key: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            base_url: DEFAULT_BASE_URL.to_string(),
            model: model.into(),
            temperature: 0.0,
            max_retries: 3,
            timeout_seconds: 120,
        }
    }
}

/// Chat-completions client with JSON-object response format.
pub struct ChatCompletionsModel {
    client: Client,
    config: ModelConfig,
}

impl ChatCompletionsModel {
    pub fn new(config: ModelConfig) -> Result<Self, ModelError> {
        if config.api_key.trim().is_empty() {
            return Err(ModelError::Config("API key is empty".into()));
        }
        let client = Client::builder()
            .gzip(true)
            .connect_timeout(Duration::from_secs(15))
            .timeout(Duration::from_secs(config.timeout_seconds))
            .pool_idle_timeout(Duration::from_secs(30))
            .build()
            .map_err(|e| ModelError::Config(format!("HTTP client build failed: {e}")))?;
        Ok(Self { client, config })
    }

    pub fn model_name(&self) -> &str {
        &self.config.model
    }

    fn endpoint(&self) -> String {
        format!("{}/chat/completions", self.config.base_url.trim_end_matches('/'))
    }
}

fn is_retryable_status(status: StatusCode) -> bool {
    status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error()
}

#[async_trait]
impl ExtractionModel for ChatCompletionsModel {
    async fn complete(&self, system_prompt: &str, user_prompt: &str) -> Result<Value, ModelError> {
        let url = self.endpoint();
        let body = json!({
            "model": self.config.model,
            "messages": [
                { "role": "system", "content": system_prompt },
                { "role": "user", "content": user_prompt }
            ],
            "temperature": self.config.temperature,
            "response_format": { "type": "json_object" }
        });

        // Exponential backoff parameters
        let max_attempts = self.config.max_retries.max(1);
        let mut attempt = 0usize;
        let mut delay_ms = 2000u64;

        loop {
            attempt += 1;

            let send_started = Instant::now();
            info!("➡️ [LLM] Sending request (attempt {attempt})");
            let sent = self
                .client
                .post(&url)
                .bearer_auth(&self.config.api_key)
                .json(&body)
                .send()
                .await;
            let send_elapsed = send_started.elapsed();

            let resp = match sent {
                Ok(resp) => resp,
                Err(e) if (e.is_timeout() || e.is_connect()) && attempt < max_attempts => {
                    warn!("⚠️ [LLM] {e} on attempt {attempt}. Retrying in {delay_ms}ms...");
                    tokio::time::sleep(Duration::from_millis(delay_ms)).await;
                    delay_ms *= 2;
                    continue;
                }
                Err(e) => return Err(ModelError::Network(e.to_string())),
            };

            let status = resp.status();
            if status.is_success() {
                let decode_started = Instant::now();
                let val: Value = resp
                    .json()
                    .await
                    .map_err(|e| ModelError::Parse(format!("response body: {e}")))?;
                info!(
                    "✅ [LLM] Received reply (network={}ms, decode={}ms)",
                    send_elapsed.as_millis(),
                    decode_started.elapsed().as_millis()
                );
                return extract_json_payload(&val);
            }

            let text = match resp.text().await {
                Ok(text) => text,
                Err(e) => {
                    warn!("⚠️ [LLM] Could not read response body for status {status}: {e}");
                    String::new()
                }
            };
            warn!(
                "⚠️ [LLM] Non-success status {} on attempt {} (network={}ms): {}",
                status,
                attempt,
                send_elapsed.as_millis(),
                text
            );
            if !is_retryable_status(status) || attempt >= max_attempts {
                if is_retryable_status(status) {
                    error!("❌ [LLM] Exhausted retries");
                }
                return Err(ModelError::Api {
                    status: status.as_u16(),
                    body: text,
                });
            }

            tokio::time::sleep(Duration::from_millis(delay_ms)).await;
            delay_ms *= 2;
        }
    }
}

// ================================
// Reply parsing
// ================================

/// Parse JSON text, tolerating a surrounding Markdown code fence.
pub fn parse_json_text(text: &str) -> Result<Value, ModelError> {
    let trimmed = text.trim();
    let unfenced = trimmed
        .strip_prefix("```json")
        .or_else(|| trimmed.strip_prefix("```"))
        .and_then(|rest| rest.trim_end().strip_suffix("```"))
        .unwrap_or(trimmed);
    serde_json::from_str(unfenced.trim()).map_err(|e| ModelError::Parse(e.to_string()))
}

/// Pull the model's JSON out of a provider reply.
///
/// Accepts chat-completions (`choices[0].message.content`), Responses-API
/// (`output[].content[].text` of type `output_text`) and a bare top-level
/// `output_text`.
pub fn extract_json_payload(val: &Value) -> Result<Value, ModelError> {
    if let Some(content) = val
        .pointer("/choices/0/message/content")
        .and_then(Value::as_str)
    {
        return parse_json_text(content);
    }

    if let Some(output) = val.get("output").and_then(Value::as_array) {
        for item in output {
            let Some(contents) = item.get("content").and_then(Value::as_array) else {
                continue;
            };
            for c in contents {
                if c.get("type").and_then(Value::as_str) == Some("output_text") {
                    if let Some(text) = c.get("text").and_then(Value::as_str) {
                        return parse_json_text(text);
                    }
                }
            }
        }
    }

    if let Some(text) = val.get("output_text").and_then(Value::as_str) {
        return parse_json_text(text);
    }

    Err(ModelError::Parse(
        "could not find a JSON message in model reply".into(),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_chat_completion_content_is_parsed() {
        let reply = json!({
            "choices": [{
                "message": { "role": "assistant", "content": "{\"incoterm\": \"FOB\"}" }
            }]
        });

        assert_eq!(extract_json_payload(&reply).unwrap(), json!({"incoterm": "FOB"}));
    }

    #[test]
    fn test_responses_api_output_text_is_parsed() {
        let reply = json!({
            "output": [{
                "content": [{ "type": "output_text", "text": "{\"cargo_cbm\": 1.1}" }]
            }]
        });

        assert_eq!(extract_json_payload(&reply).unwrap(), json!({"cargo_cbm": 1.1}));
    }

    #[test]
    fn test_code_fence_is_stripped() {
        let parsed = parse_json_text("```json\n{\"is_dangerous\": true}\n```").unwrap();

        assert_eq!(parsed, json!({"is_dangerous": true}));
    }

    #[test]
    fn test_non_json_content_is_parse_error() {
        let reply = json!({
            "choices": [{ "message": { "content": "Sorry, I cannot help with that." } }]
        });

        let err = extract_json_payload(&reply).unwrap_err();
        assert!(matches!(err, ModelError::Parse(_)));
        assert!(!err.is_unavailable());
    }

    #[test]
    fn test_missing_message_is_parse_error() {
        assert!(matches!(
            extract_json_payload(&json!({"id": "x"})),
            Err(ModelError::Parse(_))
        ));
    }

    #[tokio::test]
    async fn test_unreadable_error_body_still_reports_status() {
        use tokio::io::{AsyncReadExt, AsyncWriteExt};

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut buf = vec![0u8; 16 * 1024];
            let _ = socket.read(&mut buf).await;
            // promises 100 bytes, sends 7, then hangs up
            socket
                .write_all(b"HTTP/1.1 400 Bad Request\r\nContent-Length: 100\r\n\r\npartial")
                .await
                .unwrap();
        });

        let mut config = ModelConfig::new("key", "m");
        config.base_url = format!("http://{addr}/v1");
        config.max_retries = 1;
        let model = ChatCompletionsModel::new(config).unwrap();

        let err = model.complete("system", "user").await.unwrap_err();
        match err {
            ModelError::Api { status, body } => {
                assert_eq!(status, 400);
                assert!(body.is_empty());
            }
            other => panic!("expected an API error, got {other:?}"),
        }
    }

    #[test]
    fn test_empty_api_key_rejected() {
        let result = ChatCompletionsModel::new(ModelConfig::new("  ", "llama-3.3-70b-versatile"));

        assert!(matches!(result, Err(ModelError::Config(_))));
    }

    #[test]
    fn test_endpoint_joins_base_url() {
        let mut config = ModelConfig::new("key", "m");
        config.base_url = "https://api.openai.com/v1/".into();
        let model = ChatCompletionsModel::new(config).unwrap();

        assert_eq!(model.endpoint(), "https://api.openai.com/v1/chat/completions");
        assert_eq!(model.model_name(), "m");
    }
}
