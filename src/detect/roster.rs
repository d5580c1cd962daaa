use anyhow::Result;
use async_trait::async_trait;

use crate::identity::NameMasker;

use super::{DetectedName, EntityDetector};

/// Offline detector that only knows a fixed list of names.
///
/// Used when no NER service is configured: declared characters are still
/// found (whole word, case-insensitive) and reported with full confidence.
pub struct RosterDetector {
    matcher: NameMasker,
}

impl RosterDetector {
    pub fn new(names: &[String]) -> Result<Self> {
        let matcher = NameMasker::new(names.iter().map(|n| (n.as_str(), n.as_str())))?;
        Ok(Self { matcher })
    }
}

#[async_trait]
impl EntityDetector for RosterDetector {
    async fn detect(&self, text: &str, min_confidence: f64) -> Result<Vec<DetectedName>> {
        if min_confidence >= 1.0 {
            return Ok(Vec::new());
        }
        Ok(self
            .matcher
            .matches(text)
            .into_iter()
            .map(|name| DetectedName::new(name, 1.0))
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_finds_whole_word_names() {
        let detector =
            RosterDetector::new(&["Al".to_string(), "Mary Ann".to_string()]).unwrap();
        let found = detector
            .detect("Alice waved at mary ann. Mary Ann waved back.", 0.4)
            .await
            .unwrap();
        assert_eq!(found, vec![DetectedName::new("Mary Ann", 1.0)]);
    }

    #[tokio::test]
    async fn test_empty_roster_finds_nothing() {
        let detector = RosterDetector::new(&[]).unwrap();
        assert!(detector.detect("John spoke.", 0.4).await.unwrap().is_empty());
    }
}
