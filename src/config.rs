use std::fmt;
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::heuristics::HeuristicsConfig;
use crate::llm::{AnthropicConfig, GeminiConfig, KoboldConfig};
use crate::models::WindowConfig;

/// Top-level configuration, loaded from TOML. Every field has a default, so
/// an empty file is a complete configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub chunk: WindowConfig,
    pub summary: SummaryConfig,
    pub character: CharacterConfig,
    pub detection: DetectionConfig,
    pub backend: BackendConfig,
    pub output: OutputConfig,
    pub run: RunConfig,
}

/// Rolling summary settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SummaryConfig {
    /// Summarize at every window starting on a multiple of this (0 = never)
    pub every: usize,
    /// Send summaries to the secondary backend first
    pub use_secondary: bool,
}

impl Default for SummaryConfig {
    fn default() -> Self {
        Self {
            every: 20,
            use_secondary: true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CharacterConfig {
    /// Pre-register "Narrator"
    pub narrator: bool,
    /// Pre-register "Unknown"
    pub unknown: bool,
    /// Characters known up front; masked as themselves
    pub declared: Vec<String>,
    pub similarity_threshold: f64,
    pub narrate_bare_quotes: bool,
}

impl Default for CharacterConfig {
    fn default() -> Self {
        Self {
            narrator: true,
            unknown: true,
            declared: Vec::new(),
            similarity_threshold: 0.6,
            narrate_bare_quotes: false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DetectionConfig {
    /// Minimum detector confidence for a name to be registered
    pub confidence: f64,
    /// NER service URL; without one only declared names are detected
    pub endpoint: Option<String>,
}

impl Default for DetectionConfig {
    fn default() -> Self {
        Self {
            confidence: 0.4,
            endpoint: None,
        }
    }
}

/// Available generation providers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    /// Self-hosted KoboldAI-compatible server
    Kobold,
    Anthropic,
    Gemini,
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            BackendKind::Kobold => "kobold",
            BackendKind::Anthropic => "anthropic",
            BackendKind::Gemini => "gemini",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BackendConfig {
    pub active: BackendKind,
    /// Optional summarization fallback
    pub secondary: Option<BackendKind>,
    /// Attempts per window before attribution is skipped
    pub attribution_retries: u32,
    pub kobold: KoboldConfig,
    pub anthropic: AnthropicConfig,
    pub gemini: GeminiConfig,
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            active: BackendKind::Kobold,
            secondary: None,
            attribution_retries: 3,
            kobold: KoboldConfig::default(),
            anthropic: AnthropicConfig::default(),
            gemini: GeminiConfig::default(),
        }
    }
}

/// Which artifacts to write, and where
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OutputConfig {
    pub dir: PathBuf,
    /// `Speaker: content` lines
    pub plain: bool,
    /// Turn-delimited markup
    pub chatml: bool,
    /// Per-line metadata as JSON
    pub records: bool,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            dir: PathBuf::from("output"),
            plain: true,
            chatml: true,
            records: true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RunConfig {
    /// Books processed concurrently
    pub workers: usize,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self { workers: 2 }
    }
}

impl Config {
    /// Load configuration from a TOML file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {:?}", path))?;
        toml::from_str(&content).with_context(|| format!("Failed to parse config {:?}", path))
    }

    /// Load from `path` when given, otherwise use defaults.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        match path {
            Some(path) => Self::from_file(path),
            None => Ok(Self::default()),
        }
    }

    /// Check ranges and clamp values that depend on each other.
    pub fn validate(mut self) -> Result<Self> {
        if self.chunk.window_size == 0 {
            bail!("chunk.window_size must be at least 1");
        }
        let threshold = self.character.similarity_threshold;
        if !(0.0..=1.0).contains(&threshold) {
            bail!("character.similarity_threshold must be within [0, 1], got {threshold}");
        }
        if !(0.0..=1.0).contains(&self.detection.confidence) {
            bail!(
                "detection.confidence must be within [0, 1], got {}",
                self.detection.confidence
            );
        }
        if self.summary.every > self.chunk.context_lines {
            warn!(
                every = self.summary.every,
                context_lines = self.chunk.context_lines,
                "summary.every exceeds context_lines, clamping"
            );
            self.summary.every = self.chunk.context_lines;
        }
        if self.backend.secondary == Some(self.backend.active) {
            self.backend.secondary = None;
        }
        self.run.workers = self.run.workers.max(1);
        Ok(self)
    }

    pub fn heuristics(&self) -> HeuristicsConfig {
        HeuristicsConfig {
            similarity_threshold: self.character.similarity_threshold,
            narrate_bare_quotes: self.character.narrate_bare_quotes,
            ..Default::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_empty_file_is_default() {
        let config: Config = toml::from_str("").unwrap();
        assert_eq!(config.chunk.window_size, 5);
        assert_eq!(config.chunk.context_lines, 20);
        assert_eq!(config.summary.every, 20);
        assert_eq!(config.backend.active, BackendKind::Kobold);
        assert_eq!(config.backend.attribution_retries, 3);
        assert_eq!(config.run.workers, 2);
        assert!(config.output.chatml);
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            r#"
[chunk]
context_lines = 10

[summary]
every = 40

[character]
declared = ["Holmes", "Watson"]

[backend]
active = "anthropic"
secondary = "gemini"

[backend.kobold]
url = "http://gpu-box:5001/api"
"#
        )
        .unwrap();

        let config = Config::load(Some(file.path())).unwrap().validate().unwrap();
        assert_eq!(config.chunk.window_size, 5);
        assert_eq!(config.summary.every, 10);
        assert_eq!(config.character.declared, vec!["Holmes", "Watson"]);
        assert_eq!(config.backend.active, BackendKind::Anthropic);
        assert_eq!(config.backend.secondary, Some(BackendKind::Gemini));
        assert_eq!(config.backend.kobold.url, "http://gpu-box:5001/api");
        assert_eq!(config.backend.kobold.max_attempts, 10);
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        let mut config = Config::default();
        config.chunk.window_size = 0;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.character.similarity_threshold = 1.5;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_drops_duplicate_secondary() {
        let mut config = Config::default();
        config.backend.secondary = Some(BackendKind::Kobold);
        config.run.workers = 0;
        let config = config.validate().unwrap();
        assert_eq!(config.backend.secondary, None);
        assert_eq!(config.run.workers, 1);
    }
}
