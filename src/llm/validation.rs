use std::collections::BTreeMap;

use serde_json::Value;
use thiserror::Error;

use crate::models::{line_key, LineAttribution, WindowAttribution};

/// Why an attribution response could not be used
#[derive(Debug, Error)]
pub enum AttributionError {
    #[error("response contains no JSON object")]
    NoJson,

    #[error("invalid attribution JSON: {0}")]
    InvalidJson(#[from] serde_json::Error),

    #[error("response has no Line1.speaker")]
    MissingSpeaker,
}

/// The span from the first `{` to the last `}`, if any.
pub fn extract_json_span(text: &str) -> Option<&str> {
    let start = text.find('{')?;
    let end = text.rfind('}')?;
    (end > start).then(|| &text[start..=end])
}

/// Parse a model response into per-line attributions for `line_count` lines.
///
/// Keys beyond `line_count` are ignored and missing keys are left out, so the
/// corresponding lines keep their original text. `Line1.speaker` must be
/// present for the response to count at all.
pub fn parse_attribution(
    text: &str,
    line_count: usize,
) -> Result<WindowAttribution, AttributionError> {
    let json = extract_json_span(text).ok_or(AttributionError::NoJson)?;
    let object: BTreeMap<String, Value> = serde_json::from_str(json)?;

    let has_first_speaker = object
        .get("Line1")
        .and_then(|line| line.get("speaker"))
        .and_then(Value::as_str)
        .is_some_and(|s| !s.trim().is_empty());
    if !has_first_speaker {
        return Err(AttributionError::MissingSpeaker);
    }

    let mut lines = BTreeMap::new();
    for k in 0..line_count {
        let Some(value) = object.get(&line_key(k)) else {
            continue;
        };
        // A malformed entry only costs its own line
        if let Ok(line) = serde_json::from_value::<LineAttribution>(value.clone()) {
            lines.insert(k + 1, line);
        }
    }

    Ok(WindowAttribution { lines })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extract_json_span() {
        assert_eq!(
            extract_json_span("Sure! {\"a\": {\"b\": 1}} Hope that helps."),
            Some("{\"a\": {\"b\": 1}}")
        );
        assert_eq!(extract_json_span("no json here"), None);
        assert_eq!(extract_json_span("} backwards {"), None);
    }

    #[test]
    fn test_parse_valid_response() {
        let text = r#"
        {
          "Line1": {"action": "sits", "talking_to": "", "speaker": "Narrator"},
          "Line2": {"action": "greets", "talking_to": "Character_2", "speaker": "Character_1"},
          "Line3": {"action": "replies"},
          "Line9": {"speaker": "Character_9"}
        }"#;

        let parsed = parse_attribution(text, 3).unwrap();
        assert_eq!(parsed.len(), 3);
        assert_eq!(parsed.line(1).unwrap().speaker, "Character_1");
        assert_eq!(parsed.line(2).unwrap().speaker, "Narrator");
        assert!(parsed.line(8).is_none());
    }

    #[test]
    fn test_missing_first_speaker_is_rejected() {
        let text = r#"{"Line1": {"action": "x"}, "Line2": {"speaker": "Character_1"}}"#;
        assert!(matches!(
            parse_attribution(text, 2),
            Err(AttributionError::MissingSpeaker)
        ));
    }

    #[test]
    fn test_garbage_is_rejected() {
        assert!(matches!(
            parse_attribution("I cannot help with that.", 5),
            Err(AttributionError::NoJson)
        ));
        assert!(matches!(
            parse_attribution("{Line1: speaker}", 5),
            Err(AttributionError::InvalidJson(_))
        ));
    }

    #[test]
    fn test_missing_lines_are_skipped() {
        let text = r#"{"Line1": {"speaker": "Character_1"}, "Line3": {"speaker": "Character_2"}}"#;
        let parsed = parse_attribution(text, 3).unwrap();
        assert!(parsed.line(1).is_none());
        assert_eq!(parsed.line(2).unwrap().speaker, "Character_2");
    }
}
