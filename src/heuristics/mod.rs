pub mod bare_quotes;
pub mod punctuation;
pub mod speaker_names;

pub use bare_quotes::*;
pub use punctuation::*;
pub use speaker_names::*;

/// Configuration for the deterministic text heuristics
#[derive(Debug, Clone)]
pub struct HeuristicsConfig {
    /// Minimum similarity for a speaker guess to snap onto a roster entry
    pub similarity_threshold: f64,
    /// Minimum similarity for a guess to count as "no speaker given"
    pub unspecified_threshold: f64,
    /// Strings models use when they cannot name a speaker
    pub unspecified_tokens: Vec<String>,
    /// Append "<speaker> says." to lines that are only quoted speech
    pub narrate_bare_quotes: bool,
}

impl Default for HeuristicsConfig {
    fn default() -> Self {
        Self {
            similarity_threshold: 0.6,
            unspecified_threshold: 0.8,
            unspecified_tokens: vec![
                "not specified".to_string(),
                "n/a".to_string(),
                "unnamed".to_string(),
                "null".to_string(),
            ],
            narrate_bare_quotes: false,
        }
    }
}
