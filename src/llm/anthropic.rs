use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};

use super::{
    AttemptError, ChatRole, GenerationBackend, GenerationError, GenerationRequest, RetryPolicy,
};

const API_URL: &str = "https://api.anthropic.com/v1/messages";

/// Configuration for the Anthropic API client
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AnthropicConfig {
    /// API key (falls back to the ANTHROPIC_API_KEY env var)
    pub api_key: Option<String>,
    /// Model to use (e.g., "claude-sonnet-4-20250514")
    pub model: String,
    pub max_attempts: u32,
    /// Seconds between attempts
    pub backoff_secs: u64,
}

impl Default for AnthropicConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            model: "claude-sonnet-4-20250514".to_string(),
            max_attempts: 5,
            backoff_secs: 1,
        }
    }
}

impl AnthropicConfig {
    /// Fill a missing key from the environment
    pub fn resolve_key(&self) -> Result<String, GenerationError> {
        self.api_key
            .clone()
            .filter(|k| !k.is_empty())
            .or_else(|| std::env::var("ANTHROPIC_API_KEY").ok())
            .ok_or_else(|| GenerationError::Config {
                backend: "anthropic".to_string(),
                reason: "ANTHROPIC_API_KEY environment variable not set".to_string(),
            })
    }
}

/// Hosted chat-completion backend
pub struct AnthropicBackend {
    client: Client,
    api_key: String,
    model: String,
    policy: RetryPolicy,
}

impl AnthropicBackend {
    pub fn new(config: &AnthropicConfig) -> Result<Self, GenerationError> {
        let backoff = Duration::from_secs(config.backoff_secs);
        Ok(Self {
            client: Client::new(),
            api_key: config.resolve_key()?,
            model: config.model.clone(),
            policy: RetryPolicy::new(config.max_attempts, backoff, backoff),
        })
    }

    async fn attempt(&self, request: &AnthropicRequest<'_>) -> Result<String, AttemptError> {
        let response = self
            .client
            .post(API_URL)
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", "2023-06-01")
            .header("content-type", "application/json")
            .json(request)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(AttemptError::from_status(status, &body));
        }

        let response: AnthropicResponse = response.json().await?;
        let text: String = response
            .content
            .iter()
            .filter(|c| c.content_type == "text")
            .map(|c| c.text.as_str())
            .collect();

        if text.is_empty() {
            return Err(AttemptError::Transient("No text content in response".to_string()));
        }
        Ok(text)
    }
}

#[async_trait]
impl GenerationBackend for AnthropicBackend {
    fn name(&self) -> &str {
        "anthropic"
    }

    async fn generate(&self, request: &GenerationRequest) -> Result<String, GenerationError> {
        let body = build_request(&self.model, request);
        let body = &body;
        let text = self
            .policy
            .run(self.name(), false, move |_| self.attempt(body))
            .await?;
        Ok(text.trim().to_string())
    }
}

fn build_request<'a>(model: &'a str, request: &'a GenerationRequest) -> AnthropicRequest<'a> {
    let mut messages: Vec<Message<'a>> = request
        .history
        .iter()
        .map(|turn| Message {
            role: match turn.role {
                ChatRole::User => "user",
                ChatRole::Assistant => "assistant",
            },
            content: &turn.text,
        })
        .collect();
    messages.push(Message {
        role: "user",
        content: &request.prompt,
    });

    AnthropicRequest {
        model,
        max_tokens: request.sampling.max_length,
        temperature: Some(request.sampling.temperature.clamp(0.0, 1.0)),
        top_p: request.sampling.top_p,
        top_k: request.sampling.top_k,
        system: request.system.as_deref(),
        messages,
        // The API refuses whitespace-only stop sequences
        stop_sequences: request
            .stop_sequences
            .iter()
            .filter(|s| !s.trim().is_empty())
            .map(String::as_str)
            .collect(),
    }
}

#[derive(Debug, Serialize)]
struct AnthropicRequest<'a> {
    model: &'a str,
    max_tokens: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    top_p: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    top_k: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    system: Option<&'a str>,
    messages: Vec<Message<'a>>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    stop_sequences: Vec<&'a str>,
}

#[derive(Debug, Serialize)]
struct Message<'a> {
    role: &'static str,
    content: &'a str,
}

#[derive(Debug, Deserialize)]
struct AnthropicResponse {
    content: Vec<ContentBlock>,
}

#[derive(Debug, Deserialize)]
struct ContentBlock {
    #[serde(rename = "type")]
    content_type: String,
    #[serde(default)]
    text: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::{ChatTurn, STOP_SEQUENCES};

    #[test]
    fn test_request_shape() {
        let stops: Vec<String> = STOP_SEQUENCES.iter().map(|s| s.to_string()).collect();
        let mut request = GenerationRequest::new("Summarize this.").with_stop_sequences(&stops);
        request.system = Some("You summarize stories.".to_string());
        request.history.push(ChatTurn {
            role: ChatRole::Assistant,
            text: "Earlier summary.".to_string(),
        });

        let json = serde_json::to_value(build_request("claude-test", &request)).unwrap();
        assert_eq!(json["model"], "claude-test");
        assert_eq!(json["system"], "You summarize stories.");
        assert_eq!(json["messages"][0]["role"], "assistant");
        assert_eq!(json["messages"][1]["content"], "Summarize this.");
        assert_eq!(json["stop_sequences"].as_array().unwrap().len(), 3);
        assert_eq!(json["max_tokens"], 500);
    }

    #[test]
    fn test_parse_response() {
        let json = r#"{"content": [{"type": "text", "text": "A summary."}]}"#;
        let response: AnthropicResponse = serde_json::from_str(json).unwrap();
        assert_eq!(response.content[0].text, "A summary.");
    }

    #[test]
    fn test_configured_key_wins() {
        let config = AnthropicConfig {
            api_key: Some("sk-test".to_string()),
            ..Default::default()
        };
        assert_eq!(config.resolve_key().unwrap(), "sk-test");
    }
}
