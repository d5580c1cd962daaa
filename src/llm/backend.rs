use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Sampling settings sent with a generation request
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SamplingParams {
    pub temperature: f64,
    /// Maximum tokens to generate
    pub max_length: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub top_p: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub top_k: Option<u32>,
}

impl Default for SamplingParams {
    fn default() -> Self {
        Self {
            temperature: 0.5,
            max_length: 500,
            top_p: None,
            top_k: None,
        }
    }
}

/// Who produced a turn of conversation history
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChatRole {
    User,
    Assistant,
}

/// A prior turn sent to backends that accept conversation history
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatTurn {
    pub role: ChatRole,
    pub text: String,
}

/// A single provider-neutral generation request
#[derive(Debug, Clone, Default)]
pub struct GenerationRequest {
    pub prompt: String,
    pub system: Option<String>,
    pub sampling: SamplingParams,
    pub stop_sequences: Vec<String>,
    /// GBNF grammar; only honoured by backends that support it
    pub grammar: Option<String>,
    pub history: Vec<ChatTurn>,
}

impl GenerationRequest {
    pub fn new(prompt: impl Into<String>) -> Self {
        Self {
            prompt: prompt.into(),
            ..Default::default()
        }
    }

    pub fn with_sampling(mut self, sampling: SamplingParams) -> Self {
        self.sampling = sampling;
        self
    }

    pub fn with_stop_sequences(mut self, stop_sequences: &[String]) -> Self {
        self.stop_sequences = stop_sequences.to_vec();
        self
    }

    pub fn with_grammar(mut self, grammar: impl Into<String>) -> Self {
        self.grammar = Some(grammar.into());
        self
    }
}

/// Errors surfaced by the generation layer
#[derive(Debug, Error)]
pub enum GenerationError {
    /// The mandatory backend could not be reached; the run cannot continue
    #[error("{backend} backend unavailable after {attempts} attempts: {last_error}")]
    Fatal {
        backend: String,
        attempts: u32,
        last_error: String,
    },

    /// An optional backend gave up; callers fall back or degrade
    #[error("{backend} backend gave no response after {attempts} attempts: {last_error}")]
    Unavailable {
        backend: String,
        attempts: u32,
        last_error: String,
    },

    /// The backend refused the request or answered with something unusable
    #[error("{backend} rejected the request: {reason}")]
    Rejected { backend: String, reason: String },

    #[error("{backend} backend is not configured: {reason}")]
    Config { backend: String, reason: String },
}

impl GenerationError {
    pub fn is_fatal(&self) -> bool {
        matches!(self, GenerationError::Fatal { .. })
    }
}

/// True when `err` (or anything it wraps) is a fatal generation error.
pub fn is_fatal(err: &anyhow::Error) -> bool {
    err.chain()
        .filter_map(|e| e.downcast_ref::<GenerationError>())
        .any(GenerationError::is_fatal)
}

/// A text-generation provider.
#[async_trait]
pub trait GenerationBackend: Send + Sync {
    fn name(&self) -> &str;

    /// Whether `GenerationRequest::grammar` is passed through to the model
    fn supports_grammar(&self) -> bool {
        false
    }

    async fn generate(&self, request: &GenerationRequest) -> Result<String, GenerationError>;
}
