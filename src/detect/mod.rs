pub mod http;
pub mod queue;
pub mod roster;

pub use http::*;
pub use queue::*;
pub use roster::*;

use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// A person-name span found by a detector
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DetectedName {
    /// The name as written in the text
    pub text: String,
    /// Detector confidence (0-1)
    pub confidence: f64,
}

impl DetectedName {
    pub fn new(text: impl Into<String>, confidence: f64) -> Self {
        Self {
            text: text.into(),
            confidence,
        }
    }
}

/// Finds character names in raw text.
#[async_trait]
pub trait EntityDetector: Send + Sync {
    /// Person names in `text` with confidence strictly above `min_confidence`,
    /// one entry per distinct name.
    async fn detect(&self, text: &str, min_confidence: f64) -> Result<Vec<DetectedName>>;
}

/// Keep the highest-confidence hit per name, preserving first-seen order.
pub fn dedup_names(names: impl IntoIterator<Item = DetectedName>) -> Vec<DetectedName> {
    let mut out: Vec<DetectedName> = Vec::new();
    for name in names {
        match out.iter_mut().find(|n| n.text == name.text) {
            Some(existing) => existing.confidence = existing.confidence.max(name.confidence),
            None => out.push(name),
        }
    }
    out
}
