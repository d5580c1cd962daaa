use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};

use super::{
    AttemptError, ChatRole, GenerationBackend, GenerationError, GenerationRequest, RetryPolicy,
};

const API_BASE: &str = "https://generativelanguage.googleapis.com/v1beta/models";

/// Harm categories sent with every request, all set to `BLOCK_NONE`
const SAFETY_CATEGORIES: &[&str] = &[
    "HARM_CATEGORY_DANGEROUS_CONTENT",
    "HARM_CATEGORY_HARASSMENT",
    "HARM_CATEGORY_HATE_SPEECH",
    "HARM_CATEGORY_SEXUALLY_EXPLICIT",
];

/// The API accepts at most this many stop sequences
const MAX_STOP_SEQUENCES: usize = 5;

/// Configuration for the hosted multi-turn generation API
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GeminiConfig {
    /// API key (falls back to the GEMINI_API_KEY env var)
    pub api_key: Option<String>,
    pub model: String,
    pub max_attempts: u32,
    /// Seconds between attempts
    pub backoff_secs: u64,
    pub temperature: f64,
    pub max_output_tokens: u32,
    pub top_p: f64,
    pub top_k: u32,
}

impl Default for GeminiConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            model: "gemini-1.5-flash".to_string(),
            max_attempts: 10,
            backoff_secs: 1,
            temperature: 1.0,
            max_output_tokens: 800,
            top_p: 0.8,
            top_k: 10,
        }
    }
}

impl GeminiConfig {
    pub fn resolve_key(&self) -> Result<String, GenerationError> {
        self.api_key
            .clone()
            .filter(|k| !k.is_empty())
            .or_else(|| std::env::var("GEMINI_API_KEY").ok())
            .ok_or_else(|| GenerationError::Config {
                backend: "gemini".to_string(),
                reason: "GEMINI_API_KEY environment variable not set".to_string(),
            })
    }
}

/// Hosted multi-turn backend with safety-filter parameters.
///
/// Sampling comes from the backend's own configuration rather than from the
/// request.
pub struct GeminiBackend {
    client: Client,
    api_key: String,
    config: GeminiConfig,
    policy: RetryPolicy,
}

impl GeminiBackend {
    pub fn new(config: &GeminiConfig) -> Result<Self, GenerationError> {
        let backoff = Duration::from_secs(config.backoff_secs);
        Ok(Self {
            client: Client::new(),
            api_key: config.resolve_key()?,
            config: config.clone(),
            policy: RetryPolicy::new(config.max_attempts, backoff, backoff),
        })
    }

    async fn attempt(&self, request: &GeminiRequest<'_>) -> Result<String, AttemptError> {
        let response = self
            .client
            .post(format!("{API_BASE}/{}:generateContent", self.config.model))
            .header("x-goog-api-key", &self.api_key)
            .json(request)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(AttemptError::from_status(status, &body));
        }

        let response: GeminiResponse = response.json().await?;
        first_candidate_text(response)
            .ok_or_else(|| AttemptError::Transient("No candidates in response".to_string()))
    }
}

#[async_trait]
impl GenerationBackend for GeminiBackend {
    fn name(&self) -> &str {
        "gemini"
    }

    async fn generate(&self, request: &GenerationRequest) -> Result<String, GenerationError> {
        let body = build_request(&self.config, request);
        let body = &body;
        let text = self
            .policy
            .run(self.name(), false, move |_| self.attempt(body))
            .await?;
        Ok(text.trim().to_string())
    }
}

fn build_request<'a>(config: &GeminiConfig, request: &'a GenerationRequest) -> GeminiRequest<'a> {
    let mut contents: Vec<Content<'a>> = request
        .history
        .iter()
        .map(|turn| Content {
            role: match turn.role {
                ChatRole::User => "user",
                ChatRole::Assistant => "model",
            },
            parts: vec![Part { text: &turn.text }],
        })
        .collect();
    contents.push(Content {
        role: "user",
        parts: vec![Part {
            text: &request.prompt,
        }],
    });

    GeminiRequest {
        contents,
        system_instruction: request.system.as_deref().map(|text| SystemInstruction {
            parts: vec![Part { text }],
        }),
        safety_settings: SAFETY_CATEGORIES
            .iter()
            .map(|&category| SafetySetting {
                category,
                threshold: "BLOCK_NONE",
            })
            .collect(),
        generation_config: GenerationConfig {
            stop_sequences: request
                .stop_sequences
                .iter()
                .take(MAX_STOP_SEQUENCES)
                .map(String::as_str)
                .collect(),
            temperature: config.temperature,
            max_output_tokens: config.max_output_tokens,
            top_p: config.top_p,
            top_k: config.top_k,
        },
    }
}

fn first_candidate_text(response: GeminiResponse) -> Option<String> {
    let candidate = response.candidates.into_iter().next()?;
    let text: String = candidate
        .content?
        .parts
        .into_iter()
        .filter_map(|p| p.text)
        .collect();
    (!text.trim().is_empty()).then_some(text)
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GeminiRequest<'a> {
    contents: Vec<Content<'a>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    system_instruction: Option<SystemInstruction<'a>>,
    safety_settings: Vec<SafetySetting>,
    generation_config: GenerationConfig<'a>,
}

#[derive(Debug, Serialize)]
struct Content<'a> {
    role: &'static str,
    parts: Vec<Part<'a>>,
}

#[derive(Debug, Serialize)]
struct SystemInstruction<'a> {
    parts: Vec<Part<'a>>,
}

#[derive(Debug, Serialize)]
struct Part<'a> {
    text: &'a str,
}

#[derive(Debug, Serialize)]
struct SafetySetting {
    category: &'static str,
    threshold: &'static str,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerationConfig<'a> {
    #[serde(skip_serializing_if = "Vec::is_empty")]
    stop_sequences: Vec<&'a str>,
    temperature: f64,
    max_output_tokens: u32,
    top_p: f64,
    top_k: u32,
}

#[derive(Debug, Deserialize)]
struct GeminiResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

#[derive(Debug, Deserialize)]
struct Candidate {
    #[serde(default)]
    content: Option<CandidateContent>,
}

#[derive(Debug, Deserialize)]
struct CandidateContent {
    #[serde(default)]
    parts: Vec<CandidatePart>,
}

#[derive(Debug, Deserialize)]
struct CandidatePart {
    #[serde(default)]
    text: Option<String>,
}
