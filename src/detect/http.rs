use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};

use super::{dedup_names, DetectedName, EntityDetector};

/// Entity labels treated as person names
const PERSON_LABELS: &[&str] = &["PER", "PERSON"];

/// Named-entity recognition service reached over HTTP.
///
/// Expects `POST <endpoint>` with `{"text": ...}` and a reply of the form
/// `{"entities": [{"text": ..., "label": ..., "score": ...}]}`.
pub struct HttpEntityDetector {
    client: Client,
    endpoint: String,
}

impl HttpEntityDetector {
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            client: Client::new(),
            endpoint: endpoint.into(),
        }
    }
}

#[async_trait]
impl EntityDetector for HttpEntityDetector {
    async fn detect(&self, text: &str, min_confidence: f64) -> Result<Vec<DetectedName>> {
        let response = self
            .client
            .post(&self.endpoint)
            .json(&NerRequest { text })
            .send()
            .await
            .context("Failed to send request to entity detector")?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            anyhow::bail!("Entity detector error: {} - {}", status, body);
        }

        let response: NerResponse = response
            .json()
            .await
            .context("Failed to parse entity detector response")?;

        Ok(person_names(response.entities, min_confidence))
    }
}

fn person_names(entities: Vec<NerEntity>, min_confidence: f64) -> Vec<DetectedName> {
    dedup_names(
        entities
            .into_iter()
            .filter(|e| PERSON_LABELS.contains(&e.label.to_uppercase().as_str()))
            .filter(|e| e.score > min_confidence)
            .map(|e| DetectedName::new(e.text.trim(), e.score)),
    )
}

#[derive(Debug, Serialize)]
struct NerRequest<'a> {
    text: &'a str,
}

#[derive(Debug, Deserialize)]
struct NerResponse {
    #[serde(default)]
    entities: Vec<NerEntity>,
}

#[derive(Debug, Deserialize)]
struct NerEntity {
    text: String,
    #[serde(alias = "tag", alias = "entity_group")]
    label: String,
    #[serde(alias = "confidence")]
    score: f64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_ner_response() {
        let json = r#"{
            "entities": [
                {"text": "John", "label": "PER", "score": 0.99},
                {"text": "London", "label": "LOC", "score": 0.97},
                {"text": "Mary", "tag": "PERSON", "confidence": 0.35},
                {"text": "John", "label": "per", "score": 0.6}
            ]
        }"#;

        let response: NerResponse = serde_json::from_str(json).unwrap();
        let names = person_names(response.entities, 0.4);

        assert_eq!(names, vec![DetectedName::new("John", 0.99)]);
    }
}
