use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Speaker used when the model omits one for a line.
pub const DEFAULT_SPEAKER: &str = "Narrator";

/// The model's guess for a single line, before normalization.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LineAttribution {
    /// Who says or does the line
    #[serde(default = "default_speaker")]
    pub speaker: String,
    /// Who the line is addressed to
    #[serde(default)]
    pub talking_to: String,
    /// Short description of what happens in the line
    #[serde(default)]
    pub action: String,
}

fn default_speaker() -> String {
    DEFAULT_SPEAKER.to_string()
}

/// Complete attribution output for one window, keyed by 1-based line number.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WindowAttribution {
    pub lines: BTreeMap<usize, LineAttribution>,
}

impl WindowAttribution {
    /// The neutral result used once retries are exhausted.
    pub fn empty() -> Self {
        Self::default()
    }

    /// Attribution for the `k`-th (0-based) current line.
    pub fn line(&self, k: usize) -> Option<&LineAttribution> {
        self.lines.get(&(k + 1))
    }

    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }

    pub fn len(&self) -> usize {
        self.lines.len()
    }
}

/// JSON key the model uses for the `k`-th (0-based) line.
pub fn line_key(k: usize) -> String {
    format!("Line{}", k + 1)
}

/// A normalized attribution ready to be written into the paragraph sequence.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedLine {
    pub speaker: String,
    pub talking_to: String,
    pub action: String,
}

impl ResolvedLine {
    /// Compose `"<speaker> talking to <target> (<action>): <text>"`.
    ///
    /// Colons are stripped from the header fields so the first colon in the
    /// composed string is always the header separator.
    pub fn compose(&self, text: &str) -> String {
        format!(
            "{} talking to {} ({}): {}",
            strip_separator(&self.speaker),
            strip_separator(&self.talking_to),
            strip_separator(&self.action).replace(['(', ')'], ""),
            text
        )
    }
}

fn strip_separator(field: &str) -> String {
    field.replace(':', "").trim().to_string()
}
