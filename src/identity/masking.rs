use std::collections::HashMap;

use regex::{Captures, Regex};

/// Whole-word, case-insensitive name substitution.
///
/// All names are compiled into one alternation ordered longest first, so at any
/// position the longest known name wins ("Anna" is never corrupted by a rule
/// for "Ann").
#[derive(Debug, Clone)]
pub struct NameMasker {
    regex: Option<Regex>,
    replacements: HashMap<String, String>,
}

impl NameMasker {
    /// Build a masker from `(name, replacement)` pairs.
    pub fn new<'a>(
        pairs: impl IntoIterator<Item = (&'a str, &'a str)>,
    ) -> Result<Self, regex::Error> {
        let mut replacements = HashMap::new();
        for (name, replacement) in pairs {
            let name = name.trim();
            if name.is_empty() {
                continue;
            }
            replacements
                .entry(name.to_lowercase())
                .or_insert_with(|| replacement.to_string());
        }

        if replacements.is_empty() {
            return Ok(Self {
                regex: None,
                replacements,
            });
        }

        let mut names: Vec<&String> = replacements.keys().collect();
        names.sort_by(|a, b| {
            b.chars()
                .count()
                .cmp(&a.chars().count())
                .then_with(|| a.cmp(b))
        });
        let alternation = names
            .iter()
            .map(|name| regex::escape(name))
            .collect::<Vec<_>>()
            .join("|");
        let regex = Regex::new(&format!(r"(?i)\b(?:{alternation})\b"))?;

        Ok(Self {
            regex: Some(regex),
            replacements,
        })
    }

    pub fn apply(&self, text: &str) -> String {
        let Some(regex) = &self.regex else {
            return text.to_string();
        };
        regex
            .replace_all(text, |caps: &Captures| {
                let matched = &caps[0];
                self.replacements
                    .get(&matched.to_lowercase())
                    .cloned()
                    .unwrap_or_else(|| matched.to_string())
            })
            .into_owned()
    }

    /// Replacements for every name occurring in `text`, in order of first
    /// occurrence and without repeats.
    pub fn matches(&self, text: &str) -> Vec<String> {
        let Some(regex) = &self.regex else {
            return Vec::new();
        };
        let mut found: Vec<String> = Vec::new();
        for m in regex.find_iter(text) {
            if let Some(replacement) = self.replacements.get(&m.as_str().to_lowercase())
                && !found.contains(replacement)
            {
                found.push(replacement.clone());
            }
        }
        found
    }

    pub fn is_empty(&self) -> bool {
        self.replacements.is_empty()
    }
}

/// Reverse substitution from pseudonyms to a representative original name.
///
/// Pseudonyms are matched as whole tokens, longest first, so `Character_1`
/// never rewrites the prefix of `Character_10`.
#[derive(Debug, Clone, Default)]
pub struct Unmasker {
    regex: Option<Regex>,
    originals: HashMap<String, String>,
}

impl Unmasker {
    /// Build from `(pseudonym, original)` pairs. The first pair for a
    /// pseudonym wins.
    pub fn new(pairs: impl IntoIterator<Item = (String, String)>) -> Result<Self, regex::Error> {
        let mut originals = HashMap::new();
        for (masked, original) in pairs {
            if masked.is_empty() || masked == original {
                continue;
            }
            originals.entry(masked).or_insert(original);
        }
        if originals.is_empty() {
            return Ok(Self::default());
        }

        let mut pseudonyms: Vec<&String> = originals.keys().collect();
        pseudonyms.sort_by(|a, b| b.len().cmp(&a.len()).then_with(|| a.cmp(b)));
        let alternation = pseudonyms
            .iter()
            .map(|p| regex::escape(p))
            .collect::<Vec<_>>()
            .join("|");
        let regex = Regex::new(&format!(r"\b(?:{alternation})\b"))?;

        Ok(Self {
            regex: Some(regex),
            originals,
        })
    }

    pub fn apply(&self, text: &str) -> String {
        let Some(regex) = &self.regex else {
            return text.to_string();
        };
        regex
            .replace_all(text, |caps: &Captures| {
                let matched = &caps[0];
                self.originals
                    .get(matched)
                    .cloned()
                    .unwrap_or_else(|| matched.to_string())
            })
            .into_owned()
    }
}

/// Numeric suffix of `Character_<n>`; anything else sorts as 0.
pub fn pseudonym_number(name: &str) -> u64 {
    name.rsplit('_')
        .next()
        .and_then(|suffix| suffix.parse().ok())
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_longest_name_wins() {
        let masker =
            NameMasker::new([("Ann", "Character_1"), ("Anna", "Character_2")]).unwrap();
        assert_eq!(
            masker.apply("Anna met Ann. ANNA laughed."),
            "Character_2 met Character_1. Character_2 laughed."
        );
    }

    #[test]
    fn test_whole_words_only() {
        let masker = NameMasker::new([("Al", "Character_1")]).unwrap();
        assert_eq!(masker.apply("Al saw Alice."), "Character_1 saw Alice.");
    }

    #[test]
    fn test_multi_word_names_and_escaping() {
        let masker = NameMasker::new([
            ("John Smith", "Character_1"),
            ("John", "Character_1"),
            ("St. Clair", "Character_2"),
        ])
        .unwrap();
        assert_eq!(
            masker.apply("John Smith and St. Clair; john alone."),
            "Character_1 and Character_2; Character_1 alone."
        );
    }

    #[test]
    fn test_empty_masker_is_identity() {
        let masker = NameMasker::new(Vec::<(&str, &str)>::new()).unwrap();
        assert!(masker.is_empty());
        assert_eq!(masker.apply("nothing here"), "nothing here");
    }

    #[test]
    fn test_unmask_whole_tokens() {
        let unmasker = Unmasker::new([
            ("Character_1".to_string(), "Jo".to_string()),
            ("Character_12".to_string(), "Mary".to_string()),
            ("Narrator".to_string(), "Narrator".to_string()),
        ])
        .unwrap();
        assert_eq!(
            unmasker.apply("Character_12 and Character_1 with Narrator"),
            "Mary and Jo with Narrator"
        );
        // No rule for Character_10, and Character_1 must not eat its prefix
        assert_eq!(unmasker.apply("Character_10 left."), "Character_10 left.");
    }

    #[test]
    fn test_pseudonym_number() {
        assert_eq!(pseudonym_number("Character_12"), 12);
        assert_eq!(pseudonym_number("Narrator"), 0);
    }
}
