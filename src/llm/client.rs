use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::config::{BackendConfig, BackendKind};

use super::{
    attribution_grammar, prompt_request, AnthropicBackend, GeminiBackend, GenerationBackend,
    GenerationError, GenerationRequest, KoboldBackend,
};

/// The backends selected for a run, resolved once at startup.
///
/// Attribution always goes to the active backend. Summaries may go to the
/// secondary first and fall back to the active one.
#[derive(Clone)]
pub struct GenerationClient {
    active: Arc<dyn GenerationBackend>,
    secondary: Option<Arc<dyn GenerationBackend>>,
}

impl GenerationClient {
    pub fn new(
        active: Arc<dyn GenerationBackend>,
        secondary: Option<Arc<dyn GenerationBackend>>,
    ) -> Self {
        Self { active, secondary }
    }

    /// Build the configured backends.
    ///
    /// The active backend must come up; a secondary that cannot be built is
    /// dropped with a warning.
    pub async fn from_config(
        config: &BackendConfig,
        use_secondary: bool,
    ) -> Result<Self, GenerationError> {
        let active = build_backend(config.active, config).await?;
        info!(backend = active.name(), "Active generation backend ready");

        let secondary = match config.secondary.filter(|_| use_secondary) {
            Some(kind) => match build_backend(kind, config).await {
                Ok(backend) => {
                    info!(backend = backend.name(), "Secondary summarization backend ready");
                    Some(backend)
                }
                Err(e) if e.is_fatal() => return Err(e),
                Err(e) => {
                    warn!(error = %e, "Secondary backend unavailable, summaries use the active backend");
                    None
                }
            },
            None => None,
        };

        Ok(Self::new(active, secondary))
    }

    pub fn active_name(&self) -> &str {
        self.active.name()
    }

    /// Summarize with the fallback chain: secondary, then active.
    ///
    /// `Ok(None)` means every backend declined and the caller should keep its
    /// previous summary. Only fatal errors are returned as `Err`.
    pub async fn summarize(&self, prompt: String) -> Result<Option<String>, GenerationError> {
        let request = prompt_request(prompt);
        let chain = self.secondary.iter().chain(std::iter::once(&self.active));

        for backend in chain {
            match backend.generate(&request).await {
                Ok(text) if !text.trim().is_empty() => return Ok(Some(text)),
                Ok(_) => warn!(backend = backend.name(), "Empty summary"),
                Err(e) if e.is_fatal() => return Err(e),
                Err(e) => warn!(backend = backend.name(), error = %e, "Summary failed"),
            }
        }
        Ok(None)
    }

    /// Ask the active backend for a structured attribution of `line_count`
    /// lines. A grammar listing `speakers` is attached when the backend can
    /// use one.
    pub async fn attribute(
        &self,
        prompt: String,
        line_count: usize,
        speakers: &[String],
    ) -> Result<String, GenerationError> {
        let mut request = prompt_request(prompt);
        if self.active.supports_grammar() {
            request = request.with_grammar(attribution_grammar(line_count, speakers));
        }
        debug!(backend = self.active.name(), line_count, "Requesting attribution");
        self.complete(&request).await
    }

    /// Run a prepared request on the active backend.
    pub async fn complete(&self, request: &GenerationRequest) -> Result<String, GenerationError> {
        self.active.generate(request).await
    }
}

async fn build_backend(
    kind: BackendKind,
    config: &BackendConfig,
) -> Result<Arc<dyn GenerationBackend>, GenerationError> {
    Ok(match kind {
        BackendKind::Kobold => Arc::new(KoboldBackend::connect(config.kobold.clone()).await?),
        BackendKind::Anthropic => Arc::new(AnthropicBackend::new(&config.anthropic)?),
        BackendKind::Gemini => Arc::new(GeminiBackend::new(&config.gemini)?),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::GenerationRequest;
    use async_trait::async_trait;
    use std::sync::Mutex;

    /// Records requests and replays a fixed outcome
    struct Scripted {
        name: &'static str,
        grammar: bool,
        outcome: fn() -> Result<String, GenerationError>,
        seen: Mutex<Vec<GenerationRequest>>,
    }

    impl Scripted {
        fn new(
            name: &'static str,
            grammar: bool,
            outcome: fn() -> Result<String, GenerationError>,
        ) -> Arc<Self> {
            Arc::new(Self {
                name,
                grammar,
                outcome,
                seen: Mutex::new(Vec::new()),
            })
        }

        fn calls(&self) -> usize {
            self.seen.lock().unwrap().len()
        }
    }

    #[async_trait]
    impl GenerationBackend for Scripted {
        fn name(&self) -> &str {
            self.name
        }

        fn supports_grammar(&self) -> bool {
            self.grammar
        }

        async fn generate(&self, request: &GenerationRequest) -> Result<String, GenerationError> {
            self.seen.lock().unwrap().push(request.clone());
            (self.outcome)()
        }
    }

    fn unavailable() -> Result<String, GenerationError> {
        Err(GenerationError::Unavailable {
            backend: "gemini".to_string(),
            attempts: 10,
            last_error: "no candidates".to_string(),
        })
    }

    fn fatal() -> Result<String, GenerationError> {
        Err(GenerationError::Fatal {
            backend: "kobold".to_string(),
            attempts: 10,
            last_error: "connection refused".to_string(),
        })
    }

    #[tokio::test]
    async fn test_summary_prefers_secondary() {
        let active = Scripted::new("kobold", true, || Ok("from active".to_string()));
        let secondary = Scripted::new("gemini", false, || Ok("from secondary".to_string()));
        let client = GenerationClient::new(active.clone(), Some(secondary.clone()));

        let summary = client.summarize("prompt".to_string()).await.unwrap();
        assert_eq!(summary.as_deref(), Some("from secondary"));
        assert_eq!(active.calls(), 0);
    }

    #[tokio::test]
    async fn test_summary_falls_back_to_active() {
        let active = Scripted::new("kobold", true, || Ok("from active".to_string()));
        let secondary = Scripted::new("gemini", false, unavailable);
        let client = GenerationClient::new(active.clone(), Some(secondary.clone()));

        let summary = client.summarize("prompt".to_string()).await.unwrap();
        assert_eq!(summary.as_deref(), Some("from active"));
        assert_eq!(secondary.calls(), 1);
    }

    #[tokio::test]
    async fn test_summary_gives_up_softly() {
        let active = Scripted::new("anthropic", false, unavailable);
        let client = GenerationClient::new(active, None);
        assert_eq!(client.summarize("prompt".to_string()).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_fatal_summary_error_propagates() {
        let active = Scripted::new("kobold", true, fatal);
        let secondary = Scripted::new("gemini", false, unavailable);
        let client = GenerationClient::new(active, Some(secondary));
        assert!(client.summarize("prompt".to_string()).await.unwrap_err().is_fatal());
    }

    #[tokio::test]
    async fn test_grammar_only_for_supporting_backend() {
        let kobold = Scripted::new("kobold", true, || Ok("{}".to_string()));
        let client = GenerationClient::new(kobold.clone(), None);
        client
            .attribute("prompt".to_string(), 2, &["Character_1".to_string()])
            .await
            .unwrap();
        let grammar = kobold.seen.lock().unwrap()[0].grammar.clone().unwrap();
        assert!(grammar.contains("Line2-kv"));

        let hosted = Scripted::new("anthropic", false, || Ok("{}".to_string()));
        let client = GenerationClient::new(hosted.clone(), None);
        client.attribute("prompt".to_string(), 2, &[]).await.unwrap();
        assert!(hosted.seen.lock().unwrap()[0].grammar.is_none());
    }
}
