//! [`LlmDriver`] – OpenAI-compatible LLM interface.
//!
//! Talks to any model server exposing a `/v1/chat/completions` endpoint.
//! Every caller in this crate treats the driver as best-effort: any
//! [`LlmError`] falls back to the deterministic planner, so a missing or
//! flaky model never stalls the control loop.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

// ─────────────────────────────────────────────────────────────────────────────
// Error type
// ─────────────────────────────────────────────────────────────────────────────

/// Errors that can arise from LLM driver operations.
#[derive(Error, Debug)]
pub enum LlmError {
    /// The HTTP request to the model server failed.
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// The response from the model server could not be parsed.
    #[error("unexpected response format: {0}")]
    BadResponse(String),
}

// ─────────────────────────────────────────────────────────────────────────────
// Message types (OpenAI-compatible)
// ─────────────────────────────────────────────────────────────────────────────

/// The role of a participant in a chat conversation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

/// A single message in a chat conversation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: &'a [ChatMessage],
    stream: bool,
    temperature: f64,
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<Choice>,
}

#[derive(Deserialize)]
struct Choice {
    message: ChatMessage,
}

// ─────────────────────────────────────────────────────────────────────────────
// LlmDriver
// ─────────────────────────────────────────────────────────────────────────────

/// Cloneable connection settings from which [`LlmDriver`]s are built: one
/// driver per run loop, one per facade.
#[derive(Debug, Clone)]
pub struct LlmSettings {
    pub base_url: String,
    pub model: String,
    pub api_key: Option<String>,
    pub timeout: Duration,
}

impl LlmSettings {
    pub fn build(&self) -> LlmDriver {
        LlmDriver::new(
            self.base_url.clone(),
            self.model.clone(),
            self.api_key.clone(),
            self.timeout,
        )
    }

    /// The same settings pointed at a different model.
    pub fn with_model(&self, model: impl Into<String>) -> Self {
        Self {
            model: model.into(),
            ..self.clone()
        }
    }
}

/// An async client for an OpenAI-compatible chat-completions endpoint.
///
/// Construct once and reuse across ticks; the underlying connection pool is
/// shared.
pub struct LlmDriver {
    base_url: String,
    model: String,
    api_key: Option<String>,
    timeout: Duration,
    client: reqwest::Client,
}

impl LlmDriver {
    pub fn new(
        base_url: impl Into<String>,
        model: impl Into<String>,
        api_key: Option<String>,
        timeout: Duration,
    ) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            model: model.into(),
            api_key,
            timeout,
            client: reqwest::Client::new(),
        }
    }

    /// The model name requests are issued against.
    pub fn model(&self) -> &str {
        &self.model
    }

    /// Send `messages` to the model and return the assistant's reply text.
    ///
    /// # Errors
    ///
    /// [`LlmError::Http`] on transport failure or timeout;
    /// [`LlmError::BadResponse`] when the reply shape is unexpected.
    pub async fn complete(&self, messages: &[ChatMessage]) -> Result<String, LlmError> {
        let url = format!("{}/v1/chat/completions", self.base_url);
        let body = ChatRequest {
            model: &self.model,
            messages,
            stream: false,
            temperature: 0.2,
        };

        let mut request = self.client.post(&url).timeout(self.timeout).json(&body);
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }

        let response: ChatResponse = request
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;

        response
            .choices
            .into_iter()
            .next()
            .map(|c| c.message.content)
            .ok_or_else(|| LlmError::BadResponse("empty choices array".into()))
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Output scraping
// ─────────────────────────────────────────────────────────────────────────────

/// Extract the first JSON object or array embedded in model output.
///
/// Models wrap JSON in prose and code fences; this scans to the first
/// opening brace/bracket and parses exactly one value from there.
pub fn extract_json(text: &str) -> Result<serde_json::Value, LlmError> {
    let start = text
        .find(['{', '['])
        .ok_or_else(|| LlmError::BadResponse("no JSON found in model output".into()))?;
    let mut stream = serde_json::Deserializer::from_str(&text[start..]).into_iter::<serde_json::Value>();
    match stream.next() {
        Some(Ok(value)) => Ok(value),
        Some(Err(e)) => Err(LlmError::BadResponse(format!("malformed JSON: {e}"))),
        None => Err(LlmError::BadResponse("no JSON found in model output".into())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn chat_message_serializes_role() {
        let msg = ChatMessage {
            role: Role::System,
            content: "hello".into(),
        };
        let json = serde_json::to_string(&msg).unwrap();
        assert!(json.contains("\"system\""));
    }

    #[test]
    fn chat_message_roundtrip() {
        let msg = ChatMessage {
            role: Role::User,
            content: "What is next?".into(),
        };
        let json = serde_json::to_string(&msg).unwrap();
        let back: ChatMessage = serde_json::from_str(&json).unwrap();
        assert_eq!(back.role, Role::User);
        assert_eq!(back.content, "What is next?");
    }

    #[test]
    fn extract_json_from_fenced_output() {
        let text = "Here is my plan:\n```json\n{\"waypoints\": []}\n```\nDone.";
        let value = extract_json(text).unwrap();
        assert!(value["waypoints"].is_array());
    }

    #[test]
    fn extract_json_array() {
        let text = "steps: [{\"thought\": \"a\"}, {\"thought\": \"b\"}] trailing";
        let value = extract_json(text).unwrap();
        assert_eq!(value.as_array().unwrap().len(), 2);
    }

    #[test]
    fn extract_json_without_payload_fails() {
        assert!(extract_json("no structured output here").is_err());
    }

    #[tokio::test]
    async fn complete_fails_cleanly_without_server() {
        let driver = LlmDriver::new(
            "http://127.0.0.1:1",
            "test-model",
            None,
            Duration::from_millis(200),
        );
        let messages = [ChatMessage {
            role: Role::User,
            content: "hi".into(),
        }];
        assert!(matches!(
            driver.complete(&messages).await,
            Err(LlmError::Http(_))
        ));
    }
}
