use std::sync::LazyLock;

use regex::Regex;
use tracing::debug;

use crate::identity::{looks_like_pseudonym, NARRATOR, UNKNOWN};

use super::HeuristicsConfig;

static PARENTHETICAL: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\([^)]*\)").expect("Invalid parenthetical regex"));

/// `Character_3's mother` -> `mother`
static POSSESSIVE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)character_\d+['’]s\s+(.+)$").expect("Invalid possessive regex")
});

static NUMBERED: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)character_(\d+)").expect("Invalid pseudonym regex"));

/// Speaker display names accepted so far in a book.
#[derive(Debug, Clone, Default)]
pub struct SpeakerRoster {
    names: Vec<String>,
}

impl SpeakerRoster {
    pub fn new() -> Self {
        Self::default()
    }

    /// Roster pre-seeded with the reserved speakers.
    pub fn with_reserved(narrator: bool, unknown: bool) -> Self {
        let mut roster = Self::new();
        if narrator {
            roster.insert(NARRATOR);
        }
        if unknown {
            roster.insert(UNKNOWN);
        }
        roster
    }

    pub fn insert(&mut self, name: &str) -> bool {
        if name.is_empty() || self.contains(name) {
            return false;
        }
        self.names.push(name.to_string());
        true
    }

    pub fn contains(&self, name: &str) -> bool {
        self.names.iter().any(|n| n == name)
    }

    pub fn names(&self) -> &[String] {
        &self.names
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }

    /// Highest-scoring entry at or above `threshold`; ties go to the earliest.
    pub fn best_match(&self, name: &str, threshold: f64) -> Option<&str> {
        let mut best: Option<(&str, f64)> = None;
        for candidate in &self.names {
            let score = similarity(candidate, name);
            if score >= threshold && best.is_none_or(|(_, s)| score > s) {
                best = Some((candidate.as_str(), score));
            }
        }
        best.map(|(name, _)| name)
    }
}

/// Case-insensitive normalized edit-distance similarity in `[0, 1]`.
pub fn similarity(a: &str, b: &str) -> f64 {
    strsim::normalized_levenshtein(&a.to_lowercase(), &b.to_lowercase())
}

/// Strip leading articles and parentheticals, collapse whitespace and
/// capitalize the first letter. Idempotent.
pub fn clean_speaker(raw: &str) -> String {
    let mut name = raw.split_whitespace().collect::<Vec<_>>().join(" ");
    loop {
        let before = name.clone();
        name = PARENTHETICAL.replace_all(&name, "").into_owned();
        name = name.split_whitespace().collect::<Vec<_>>().join(" ");
        for article in ["the ", "a "] {
            if name
                .get(..article.len())
                .is_some_and(|prefix| prefix.eq_ignore_ascii_case(article))
            {
                name = name[article.len()..].trim_start().to_string();
                break;
            }
        }
        if name == before {
            break;
        }
    }
    capitalize_first(&name)
}

fn capitalize_first(name: &str) -> String {
    let mut chars = name.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

/// Map a free-text speaker guess onto a canonical roster name.
///
/// `normalize_speaker(normalize_speaker(x)) == normalize_speaker(x)` holds for
/// any input, which keeps the roster from drifting.
pub fn normalize_speaker(
    roster: &mut SpeakerRoster,
    raw: &str,
    should_register: bool,
    config: &HeuristicsConfig,
) -> String {
    let cleaned = clean_speaker(raw);

    if cleaned.is_empty() || is_unspecified(&cleaned, config) {
        if let Some(reserved) = [NARRATOR, UNKNOWN].into_iter().find(|n| roster.contains(n)) {
            return reserved.to_string();
        }
        if cleaned.is_empty() {
            return match_or_register(roster, UNKNOWN.to_string(), should_register, config);
        }
    }

    if !looks_like_pseudonym(&cleaned) {
        return match_or_register(roster, cleaned, should_register, config);
    }

    if let Some(caps) = POSSESSIVE.captures(&cleaned) {
        let rest = caps[1].to_string();
        debug!(raw, %rest, "Resolved possessive speaker");
        return normalize_speaker(roster, &rest, should_register, config);
    }

    match NUMBERED.captures(&cleaned) {
        Some(caps) => {
            let name = format!("Character_{}", &caps[1]);
            if should_register {
                roster.insert(&name);
            }
            name
        }
        None => {
            debug!(raw, "Pseudonym without a number, falling back to Unknown");
            match_or_register(roster, UNKNOWN.to_string(), should_register, config)
        }
    }
}

fn is_unspecified(name: &str, config: &HeuristicsConfig) -> bool {
    config
        .unspecified_tokens
        .iter()
        .any(|token| similarity(name, token) >= config.unspecified_threshold)
}

fn match_or_register(
    roster: &mut SpeakerRoster,
    name: String,
    should_register: bool,
    config: &HeuristicsConfig,
) -> String {
    if let Some(existing) = roster.best_match(&name, config.similarity_threshold) {
        if existing != name {
            debug!(speaker = %name, matched = existing, "Speaker matched roster entry");
        }
        return existing.to_string();
    }
    if should_register {
        roster.insert(&name);
    }
    name
}

#[cfg(test)]
mod tests {
    use super::*;

    fn roster() -> SpeakerRoster {
        let mut roster = SpeakerRoster::with_reserved(true, true);
        roster.insert("Character_1");
        roster.insert("Character_2");
        roster
    }

    #[test]
    fn test_clean_speaker() {
        assert_eq!(clean_speaker("the guard"), "Guard");
        assert_eq!(clean_speaker("A  stranger (hooded)"), "Stranger");
        assert_eq!(clean_speaker("(angry) the innkeeper"), "Innkeeper");
        assert_eq!(clean_speaker("Theodore"), "Theodore");
        assert_eq!(clean_speaker("  "), "");
    }

    #[test]
    fn test_unspecified_maps_to_narrator() {
        let config = HeuristicsConfig::default();
        let mut roster = roster();
        assert_eq!(normalize_speaker(&mut roster, "Not specified", true, &config), "Narrator");
        assert_eq!(normalize_speaker(&mut roster, "N/A", true, &config), "Narrator");
        assert_eq!(normalize_speaker(&mut roster, "", true, &config), "Narrator");

        let mut without_narrator = SpeakerRoster::with_reserved(false, true);
        assert_eq!(
            normalize_speaker(&mut without_narrator, "null", true, &config),
            "Unknown"
        );
    }

    #[test]
    fn test_fuzzy_match_onto_roster() {
        let config = HeuristicsConfig::default();
        let mut roster = roster();
        roster.insert("Innkeeper");
        assert_eq!(normalize_speaker(&mut roster, "the innkeepr", true, &config), "Innkeeper");
        assert_eq!(roster.len(), 5);
    }

    #[test]
    fn test_new_name_registered_only_when_asked() {
        let config = HeuristicsConfig::default();
        let mut roster = roster();
        assert_eq!(normalize_speaker(&mut roster, "soldiers", false, &config), "Soldiers");
        assert!(!roster.contains("Soldiers"));
        assert_eq!(normalize_speaker(&mut roster, "soldiers", true, &config), "Soldiers");
        assert!(roster.contains("Soldiers"));
    }

    #[test]
    fn test_pseudonym_extraction() {
        let config = HeuristicsConfig::default();
        let mut roster = roster();
        assert_eq!(normalize_speaker(&mut roster, "Doctor Character_3", true, &config), "Character_3");
        assert!(roster.contains("Character_3"));
        assert_eq!(normalize_speaker(&mut roster, "character_2 (whispering)", true, &config), "Character_2");
        assert_eq!(normalize_speaker(&mut roster, "Character_", true, &config), "Unknown");
    }

    #[test]
    fn test_possessive_pseudonym() {
        let config = HeuristicsConfig::default();
        let mut roster = roster();
        assert_eq!(normalize_speaker(&mut roster, "Character_1's mother", true, &config), "Mother");
        assert!(roster.contains("Mother"));
        assert_eq!(
            normalize_speaker(&mut roster, "Character_1's friend Character_2", true, &config),
            "Character_2"
        );
    }

    #[test]
    fn test_normalization_is_a_fixed_point() {
        let config = HeuristicsConfig::default();
        let inputs = [
            "the guard",
            "Character_2's uncle",
            "Doctor Character_7",
            "n/a",
            "Character_",
            "a Woman (old)",
            "Narator",
            "",
            "unnamed",
            "Guards",
        ];
        for register in [true, false] {
            let mut roster = roster();
            for input in inputs {
                let once = normalize_speaker(&mut roster, input, register, &config);
                let twice = normalize_speaker(&mut roster, &once, register, &config);
                assert_eq!(once, twice, "input {input:?}");
            }
        }
    }

    #[test]
    fn test_best_match_prefers_highest_score() {
        let mut roster = SpeakerRoster::new();
        roster.insert("Marian");
        roster.insert("Mary");
        assert_eq!(roster.best_match("Mary", 0.6), Some("Mary"));
        assert_eq!(roster.best_match("Zed", 0.6), None);
    }
}
