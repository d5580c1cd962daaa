use serde::{Deserialize, Serialize};

/// Per-line metadata produced while committing an attributed window.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TechnicalRecord {
    /// Paragraph index in the book
    pub index: usize,
    /// Resolved speaker (masked until rendering)
    pub speaker: String,
    /// Every original name known for the speaker
    pub aliases: Vec<String>,
    /// Resolved addressee
    pub talking_to: String,
    /// Model's description of the line
    pub action: String,
    /// Source text of the paragraph
    pub text: String,
    /// Rolling summary, when this line's window triggered one
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub summary: Option<String>,
}

impl TechnicalRecord {
    /// Apply a text transform to every free-text field.
    pub fn map_text(self, f: impl Fn(&str) -> String) -> Self {
        Self {
            index: self.index,
            speaker: f(&self.speaker),
            aliases: self.aliases,
            talking_to: f(&self.talking_to),
            action: f(&self.action),
            text: f(&self.text),
            summary: self.summary.as_deref().map(&f),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_summary_omitted_when_absent() {
        let record = TechnicalRecord {
            index: 3,
            speaker: "Character_1".into(),
            aliases: vec!["John".into()],
            talking_to: "Unknown".into(),
            action: "sits".into(),
            text: "John sat down.".into(),
            summary: None,
        };
        let json = serde_json::to_value(&record).unwrap();
        assert!(json.get("summary").is_none());
        assert_eq!(json["aliases"][0], "John");
    }

    #[test]
    fn test_map_text_keeps_index_and_aliases() {
        let record = TechnicalRecord {
            index: 1,
            speaker: "Character_1".into(),
            aliases: vec!["Character_1".into()],
            talking_to: "Character_2".into(),
            action: "Character_1 waves".into(),
            text: "text".into(),
            summary: Some("Character_1 left".into()),
        };
        let mapped = record.map_text(|s| s.replace("Character_1", "John"));
        assert_eq!(mapped.index, 1);
        assert_eq!(mapped.speaker, "John");
        assert_eq!(mapped.aliases, vec!["Character_1".to_string()]);
        assert_eq!(mapped.action, "John waves");
        assert_eq!(mapped.summary.as_deref(), Some("John left"));
    }
}
