use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::info;

use super::{AttemptError, GenerationBackend, GenerationError, GenerationRequest, RetryPolicy};

/// Attempts allowed for the startup context-limit probe
const PROBE_ATTEMPTS: u32 = 3;

/// Configuration for the self-hosted KoboldAI-compatible server
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct KoboldConfig {
    /// Base API URL, e.g. "http://localhost:5001/api"
    pub url: String,
    pub max_attempts: u32,
    /// Seconds between attempts
    pub backoff_secs: u64,
    /// Seconds to wait after a 503 busy answer
    pub busy_backoff_secs: u64,
}

impl Default for KoboldConfig {
    fn default() -> Self {
        Self {
            url: "http://localhost:5001/api".to_string(),
            max_attempts: 10,
            backoff_secs: 1,
            busy_backoff_secs: 5,
        }
    }
}

impl KoboldConfig {
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(
            self.max_attempts,
            Duration::from_secs(self.backoff_secs),
            Duration::from_secs(self.busy_backoff_secs),
        )
    }
}

/// Self-hosted inference server. It is the mandatory backend: running out of
/// attempts is fatal for the whole run.
pub struct KoboldBackend {
    client: Client,
    config: KoboldConfig,
    policy: RetryPolicy,
    max_context_length: u32,
}

impl KoboldBackend {
    /// Probe the server for its context limit and build the backend.
    pub async fn connect(config: KoboldConfig) -> Result<Self, GenerationError> {
        let client = Client::new();
        let max_context_length = probe_context_limit(&client, &config).await?;
        info!(url = %config.url, max_context_length, "Connected to KoboldAI server");
        Ok(Self::with_context_limit(client, config, max_context_length))
    }

    pub fn with_context_limit(client: Client, config: KoboldConfig, max_context_length: u32) -> Self {
        let policy = config.retry_policy();
        Self {
            client,
            config,
            policy,
            max_context_length,
        }
    }

    async fn attempt(&self, body: &KoboldRequest<'_>) -> Result<String, AttemptError> {
        let response = self
            .client
            .post(format!("{}/v1/generate", self.config.url))
            .header("accept", "application/json")
            .json(body)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let text = response.text().await.unwrap_or_default();
            return Err(AttemptError::from_status(status, &text));
        }

        let response: KoboldResponse = response.json().await?;
        response
            .results
            .into_iter()
            .next()
            .map(|r| r.text)
            .ok_or_else(|| AttemptError::Transient("No results in response".to_string()))
    }
}

#[async_trait]
impl GenerationBackend for KoboldBackend {
    fn name(&self) -> &str {
        "kobold"
    }

    fn supports_grammar(&self) -> bool {
        true
    }

    async fn generate(&self, request: &GenerationRequest) -> Result<String, GenerationError> {
        let prompt = raw_prompt(request);
        let body = KoboldRequest {
            max_context_length: self.max_context_length,
            max_length: request.sampling.max_length,
            prompt: &prompt,
            quiet: true,
            temperature: request.sampling.temperature,
            top_p: request.sampling.top_p,
            top_k: request.sampling.top_k,
            grammar: request.grammar.as_deref(),
            stop_sequence: &request.stop_sequences,
        };

        let body = &body;
        let text = self
            .policy
            .run(self.name(), true, move |_| self.attempt(body))
            .await?;

        Ok(cleanse(&text, &request.stop_sequences))
    }
}

/// Ask the server for its true maximum context length.
pub async fn probe_context_limit(
    client: &Client,
    config: &KoboldConfig,
) -> Result<u32, GenerationError> {
    let policy = RetryPolicy {
        max_attempts: PROBE_ATTEMPTS,
        ..config.retry_policy()
    };
    let url = format!("{}/extra/true_max_context_length", config.url);
    let url = url.as_str();

    policy
        .run("kobold", true, move |_| async move {
            let response = client
                .get(url)
                .header("accept", "application/json")
                .send()
                .await?;
            if !response.status().is_success() {
                let status = response.status();
                let text = response.text().await.unwrap_or_default();
                // A server that is up but refusing the probe is still unusable
                return Err(match AttemptError::from_status(status, &text) {
                    AttemptError::Permanent(m) => AttemptError::Transient(m),
                    other => other,
                });
            }
            let limit: ContextLimit = response.json().await?;
            Ok(limit.value)
        })
        .await
        .map_err(|err| match err {
            GenerationError::Rejected { backend, reason } => GenerationError::Fatal {
                backend,
                attempts: PROBE_ATTEMPTS,
                last_error: reason,
            },
            other => other,
        })
}

/// Flatten system text and history into the single raw prompt the server takes.
fn raw_prompt(request: &GenerationRequest) -> String {
    let mut prompt = String::new();
    if let Some(system) = &request.system {
        prompt.push_str(system);
        prompt.push_str("\n\n");
    }
    for turn in &request.history {
        prompt.push_str(&turn.text);
        prompt.push_str("\n\n");
    }
    prompt.push_str(&request.prompt);
    prompt
}

/// Remove every stop sequence from generated text.
pub fn cleanse(text: &str, stop_sequences: &[String]) -> String {
    let mut text = text.to_string();
    for stop in stop_sequences.iter().filter(|s| !s.is_empty()) {
        text = text.replace(stop.as_str(), "");
    }
    text.trim().to_string()
}

#[derive(Debug, Serialize)]
struct KoboldRequest<'a> {
    max_context_length: u32,
    max_length: u32,
    prompt: &'a str,
    quiet: bool,
    temperature: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    top_p: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    top_k: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    grammar: Option<&'a str>,
    stop_sequence: &'a [String],
}

#[derive(Debug, Deserialize)]
struct KoboldResponse {
    #[serde(default)]
    results: Vec<KoboldResult>,
}

#[derive(Debug, Deserialize)]
struct KoboldResult {
    text: String,
}

#[derive(Debug, Deserialize)]
struct ContextLimit {
    value: u32,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::{ChatRole, ChatTurn, STOP_SEQUENCES};

    fn stops() -> Vec<String> {
        STOP_SEQUENCES.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_cleanse_removes_stop_sequences() {
        let text = "  {\"Line1\": {}}\n ### Input:\nPrevious Summaries: ";
        assert_eq!(cleanse(text, &stops()), "{\"Line1\": {}}");
    }

    #[test]
    fn test_request_body_shape() {
        let stop = stops();
        let body = KoboldRequest {
            max_context_length: 8192,
            max_length: 500,
            prompt: "Hello",
            quiet: true,
            temperature: 0.5,
            top_p: None,
            top_k: None,
            grammar: Some("root ::= \"x\""),
            stop_sequence: &stop,
        };
        let json = serde_json::to_value(&body).unwrap();
        assert_eq!(json["max_context_length"], 8192);
        assert_eq!(json["stop_sequence"][0], "### Input:");
        assert_eq!(json["grammar"], "root ::= \"x\"");
        assert!(json.get("top_p").is_none());
    }

    #[test]
    fn test_raw_prompt_flattens_history() {
        let mut request = GenerationRequest::new("Now this.");
        request.system = Some("Be brief.".to_string());
        request.history.push(ChatTurn {
            role: ChatRole::User,
            text: "Earlier.".to_string(),
        });
        assert_eq!(raw_prompt(&request), "Be brief.\n\nEarlier.\n\nNow this.");
    }

    #[tokio::test]
    async fn test_unreachable_server_is_fatal() {
        let config = KoboldConfig {
            url: "http://127.0.0.1:9/api".to_string(),
            max_attempts: 2,
            backoff_secs: 0,
            busy_backoff_secs: 0,
        };
        let backend = KoboldBackend::with_context_limit(Client::new(), config, 2048);
        let err = backend
            .generate(&GenerationRequest::new("hi"))
            .await
            .unwrap_err();
        assert!(err.is_fatal());
    }
}
