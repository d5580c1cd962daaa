use std::ops::Range;

/// The paragraphs of one book.
///
/// `source` is the text as ingested and never changes. `lines` starts as a copy
/// of it and is rewritten in place as windows are attributed. Both have the same
/// length for the lifetime of the sequence, so an index always names the same
/// paragraph in either view.
#[derive(Debug, Clone)]
pub struct ParagraphSequence {
    source: Vec<String>,
    lines: Vec<String>,
}

impl ParagraphSequence {
    pub fn new(paragraphs: Vec<String>) -> Self {
        Self {
            lines: paragraphs.clone(),
            source: paragraphs,
        }
    }

    pub fn len(&self) -> usize {
        self.lines.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }

    /// Current (possibly attributed) text of the paragraphs in `range`,
    /// clamped to the sequence bounds.
    pub fn lines(&self, range: Range<usize>) -> &[String] {
        &self.lines[self.clamp(range)]
    }

    /// Untouched source text of the paragraphs in `range`, clamped.
    pub fn source(&self, range: Range<usize>) -> &[String] {
        &self.source[self.clamp(range)]
    }

    pub fn source_line(&self, index: usize) -> Option<&str> {
        self.source.get(index).map(String::as_str)
    }

    /// Overwrite a paragraph with its attributed rendition.
    ///
    /// Returns `false` if the index is out of bounds; the sequence length never
    /// changes.
    pub fn replace(&mut self, index: usize, text: String) -> bool {
        match self.lines.get_mut(index) {
            Some(slot) => {
                *slot = text;
                true
            }
            None => false,
        }
    }

    pub fn is_rewritten(&self, index: usize) -> bool {
        self.lines.get(index) != self.source.get(index)
    }

    pub fn all_lines(&self) -> &[String] {
        &self.lines
    }

    fn clamp(&self, range: Range<usize>) -> Range<usize> {
        let end = range.end.min(self.lines.len());
        let start = range.start.min(end);
        start..end
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sequence() -> ParagraphSequence {
        ParagraphSequence::new(vec!["a".into(), "b".into(), "a".into()])
    }

    #[test]
    fn test_ranges_are_clamped() {
        let seq = sequence();
        assert_eq!(seq.lines(1..10), &["b".to_string(), "a".to_string()]);
        assert!(seq.lines(5..10).is_empty());
    }

    #[test]
    fn test_replace_by_index_with_duplicate_text() {
        let mut seq = sequence();
        assert!(seq.replace(2, "X: a".into()));
        assert_eq!(seq.lines(0..3)[0], "a");
        assert_eq!(seq.lines(0..3)[2], "X: a");
        assert_eq!(seq.source_line(2), Some("a"));
        assert!(seq.is_rewritten(2));
        assert!(!seq.is_rewritten(0));
        assert!(!seq.replace(3, "out of range".into()));
        assert_eq!(seq.len(), 3);
    }
}
