use std::collections::HashMap;

/// Last window ordinal in which each character was mentioned or spoke.
#[derive(Debug, Clone, Default)]
pub struct RecencyTable {
    last_seen: HashMap<String, usize>,
}

impl RecencyTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record that `name` appeared in window `ordinal`. Never moves backwards.
    pub fn touch(&mut self, name: &str, ordinal: usize) {
        if name.is_empty() {
            return;
        }
        let entry = self.last_seen.entry(name.to_string()).or_insert(ordinal);
        *entry = (*entry).max(ordinal);
    }

    /// Characters seen within the last `horizon` windows up to and including
    /// `ordinal`, sorted by name.
    pub fn recent(&self, ordinal: usize, horizon: usize) -> Vec<String> {
        let oldest = ordinal.saturating_sub(horizon.saturating_sub(1));
        let mut names: Vec<String> = self
            .last_seen
            .iter()
            .filter(|&(_, &seen)| seen >= oldest && seen <= ordinal)
            .map(|(name, _)| name.clone())
            .collect();
        names.sort();
        names
    }

    pub fn len(&self) -> usize {
        self.last_seen.len()
    }

    pub fn is_empty(&self) -> bool {
        self.last_seen.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_recent_respects_horizon() {
        let mut table = RecencyTable::new();
        table.touch("Character_1", 0);
        table.touch("Character_2", 3);
        table.touch("Character_3", 5);

        assert_eq!(table.recent(5, 3), vec!["Character_2", "Character_3"]);
        assert_eq!(table.recent(5, 1), vec!["Character_3"]);
        assert_eq!(table.recent(5, 10).len(), 3);
    }

    #[test]
    fn test_touch_never_moves_backwards() {
        let mut table = RecencyTable::new();
        table.touch("Character_1", 4);
        table.touch("Character_1", 2);
        assert_eq!(table.recent(4, 1), vec!["Character_1"]);
        assert!(table.recent(2, 1).is_empty());
        table.touch("", 1);
        assert_eq!(table.len(), 1);
    }
}
