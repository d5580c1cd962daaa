use std::collections::{BTreeMap, HashMap};
use std::sync::LazyLock;

use anyhow::{Context, Result};
use regex::Regex;
use tracing::debug;

use super::masking::{pseudonym_number, NameMasker, Unmasker};

/// Speaker label for narration.
pub const NARRATOR: &str = "Narrator";
/// Speaker label for lines nobody could be found for.
pub const UNKNOWN: &str = "Unknown";

static PSEUDONYM_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)character_\d*").expect("Invalid pseudonym regex"));

/// Whether a string already contains a `Character_<n>` style pseudonym.
pub fn looks_like_pseudonym(name: &str) -> bool {
    PSEUDONYM_PATTERN.is_match(name)
}

/// How a name entered the identity map
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NameOrigin {
    /// Narrator / Unknown; never merged
    Reserved,
    /// Pre-declared roster entry, masked to itself
    Declared,
    /// Found by the entity detector
    Detected,
}

#[derive(Debug, Clone)]
struct IdentityEntry {
    name: String,
    /// Pseudonym assigned at registration; never changes
    allocated: String,
    /// Pseudonym after alias merging
    canonical: String,
    origin: NameOrigin,
    confidence: f64,
}

/// Owns the mapping from original names to pseudonyms for one book.
///
/// The map only grows. Alias merging may move a name onto another group's
/// pseudonym but never removes a name.
#[derive(Debug, Clone, Default)]
pub struct IdentityResolver {
    entries: Vec<IdentityEntry>,
    /// Lower-cased name -> entry position
    index: HashMap<String, usize>,
    detected_count: usize,
    masker: Option<NameMasker>,
}

impl IdentityResolver {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register Narrator and/or Unknown as reserved identities.
    pub fn with_reserved(narrator: bool, unknown: bool) -> Self {
        let mut resolver = Self::new();
        if narrator {
            resolver.insert(NARRATOR, NARRATOR.to_string(), NameOrigin::Reserved, 1.0);
        }
        if unknown {
            resolver.insert(UNKNOWN, UNKNOWN.to_string(), NameOrigin::Reserved, 1.0);
        }
        resolver
    }

    /// Register a pre-declared character whose pseudonym is its own name.
    pub fn declare(&mut self, name: &str) -> bool {
        let name = name.trim();
        if name.is_empty() || self.contains(name) {
            return false;
        }
        self.insert(name, name.to_string(), NameOrigin::Declared, 1.0)
    }

    /// Register a detector hit. Unseen names get the next `Character_<n>`.
    ///
    /// Returns the freshly allocated pseudonym, or `None` if the name was
    /// already known (or is unusable).
    pub fn register_detected(&mut self, name: &str, confidence: f64) -> Option<String> {
        let name = name.trim();
        if name.is_empty() || looks_like_pseudonym(name) {
            return None;
        }
        if let Some(&position) = self.index.get(&name.to_lowercase()) {
            let entry = &mut self.entries[position];
            entry.confidence = entry.confidence.max(confidence);
            return None;
        }

        self.detected_count += 1;
        let pseudonym = format!("Character_{}", self.detected_count);
        self.insert(name, pseudonym.clone(), NameOrigin::Detected, confidence);
        debug!(name, %pseudonym, confidence, "Registered new character");
        Some(pseudonym)
    }

    /// Coalesce names where one is a case-insensitive substring of the other.
    ///
    /// Groups are the connected components of the substring relation; each
    /// group takes the pseudonym of its earliest-registered member. Because the
    /// whole relation is re-evaluated on every call, a link found later unifies
    /// groups that were split before. Short names can over-merge ("Al" inside
    /// "Alice"); that is a known accuracy limitation of the heuristic.
    ///
    /// Returns how many names changed pseudonym.
    pub fn merge_aliases(&mut self) -> usize {
        let candidates: Vec<usize> = self
            .entries
            .iter()
            .enumerate()
            .filter(|(_, e)| e.origin != NameOrigin::Reserved)
            .map(|(i, _)| i)
            .collect();
        let lowered: Vec<String> = candidates
            .iter()
            .map(|&i| self.entries[i].name.to_lowercase())
            .collect();

        let mut parent: Vec<usize> = (0..candidates.len()).collect();
        for a in 0..candidates.len() {
            for b in (a + 1)..candidates.len() {
                if lowered[a].contains(&lowered[b]) || lowered[b].contains(&lowered[a]) {
                    union(&mut parent, a, b);
                }
            }
        }

        let mut changed = 0;
        for (slot, &position) in candidates.iter().enumerate() {
            let root = find(&mut parent, slot);
            let target = self.entries[candidates[root]].allocated.clone();
            let entry = &mut self.entries[position];
            if entry.canonical != target {
                debug!(name = %entry.name, from = %entry.canonical, to = %target, "Merged alias");
                entry.canonical = target;
                changed += 1;
            }
        }

        if changed > 0 {
            self.masker = None;
        }
        changed
    }

    /// Replace every known name in `text` with its pseudonym.
    pub fn mask(&mut self, text: &str) -> Result<String> {
        Ok(self.masker()?.apply(text))
    }

    /// Mask a batch of lines with one compiled masker.
    pub fn mask_lines(&mut self, lines: &[String]) -> Result<Vec<String>> {
        let masker = self.masker()?;
        Ok(lines.iter().map(|line| masker.apply(line)).collect())
    }

    /// Replace pseudonyms in `text` with the shortest original name in their group.
    pub fn unmask(&self, text: &str) -> Result<String> {
        Ok(self.unmasker()?.apply(text))
    }

    /// Snapshot of the reverse mapping, for unmasking many lines.
    ///
    /// Pseudonyms retired by a later merge still resolve, so text masked
    /// before the merge unmasks to the unified group.
    pub fn unmasker(&self) -> Result<Unmasker> {
        Unmasker::new(self.representatives()).context("Failed to compile unmasking pattern")
    }

    /// Pseudonym currently assigned to `name`, matched case-insensitively.
    pub fn pseudonym_of(&self, name: &str) -> Option<&str> {
        self.index
            .get(&name.trim().to_lowercase())
            .map(|&i| self.entries[i].canonical.as_str())
    }

    /// All original names in the group of `pseudonym`, in registration order.
    /// A pseudonym retired by merging resolves to its current group.
    pub fn aliases_of(&self, pseudonym: &str) -> Vec<String> {
        let canonical = self
            .entries
            .iter()
            .find(|e| e.allocated == pseudonym)
            .map_or(pseudonym, |e| e.canonical.as_str());
        self.entries
            .iter()
            .filter(|e| e.canonical == canonical)
            .map(|e| e.name.clone())
            .collect()
    }

    /// Distinct pseudonyms, ordered by number then name.
    pub fn pseudonyms(&self) -> Vec<String> {
        let mut pseudonyms: Vec<String> = self.groups().into_keys().collect();
        pseudonyms.sort_by(|a, b| {
            pseudonym_number(a)
                .cmp(&pseudonym_number(b))
                .then_with(|| a.cmp(b))
        });
        pseudonyms
    }

    /// Pseudonym -> member names.
    pub fn groups(&self) -> BTreeMap<String, Vec<String>> {
        let mut groups: BTreeMap<String, Vec<String>> = BTreeMap::new();
        for entry in &self.entries {
            groups
                .entry(entry.canonical.clone())
                .or_default()
                .push(entry.name.clone());
        }
        groups
    }

    /// `(name, pseudonym)` pairs in registration order.
    pub fn mapping(&self) -> Vec<(String, String)> {
        self.entries
            .iter()
            .map(|e| (e.name.clone(), e.canonical.clone()))
            .collect()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.index.contains_key(&name.trim().to_lowercase())
    }

    pub fn detected_count(&self) -> usize {
        self.detected_count
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn insert(&mut self, name: &str, pseudonym: String, origin: NameOrigin, confidence: f64) -> bool {
        let key = name.to_lowercase();
        if self.index.contains_key(&key) {
            return false;
        }
        self.index.insert(key, self.entries.len());
        self.entries.push(IdentityEntry {
            name: name.to_string(),
            allocated: pseudonym.clone(),
            canonical: pseudonym,
            origin,
            confidence,
        });
        self.masker = None;
        true
    }

    fn masker(&mut self) -> Result<&NameMasker> {
        if self.masker.is_none() {
            let masker = NameMasker::new(
                self.entries
                    .iter()
                    .map(|e| (e.name.as_str(), e.canonical.as_str())),
            )
            .context("Failed to compile name masking pattern")?;
            self.masker = Some(masker);
        }
        self.masker
            .as_ref()
            .context("Name masker unavailable")
    }

    /// `(pseudonym, shortest name of its group)` pairs, covering both current
    /// and originally allocated pseudonyms. Ties go to the earliest name.
    fn representatives(&self) -> Vec<(String, String)> {
        let mut shortest: BTreeMap<&str, &str> = BTreeMap::new();
        for entry in &self.entries {
            shortest
                .entry(entry.canonical.as_str())
                .and_modify(|current| {
                    if entry.name.chars().count() < current.chars().count() {
                        *current = entry.name.as_str();
                    }
                })
                .or_insert(entry.name.as_str());
        }

        let mut pairs: Vec<(String, String)> = shortest
            .iter()
            .map(|(&masked, &original)| (masked.to_string(), original.to_string()))
            .collect();
        for entry in &self.entries {
            if entry.allocated != entry.canonical
                && let Some(&original) = shortest.get(entry.canonical.as_str())
            {
                pairs.push((entry.allocated.clone(), original.to_string()));
            }
        }
        pairs
    }
}

fn find(parent: &mut [usize], mut node: usize) -> usize {
    while parent[node] != node {
        parent[node] = parent[parent[node]];
        node = parent[node];
    }
    node
}

/// Union keeping the smaller (earlier-registered) slot as the root.
fn union(parent: &mut [usize], a: usize, b: usize) {
    let root_a = find(parent, a);
    let root_b = find(parent, b);
    if root_a == root_b {
        return;
    }
    let (keep, absorb) = if root_a < root_b {
        (root_a, root_b)
    } else {
        (root_b, root_a)
    };
    parent[absorb] = keep;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pseudonyms_are_monotonic() {
        let mut resolver = IdentityResolver::with_reserved(true, true);
        assert_eq!(resolver.register_detected("John", 0.9).as_deref(), Some("Character_1"));
        assert_eq!(resolver.register_detected("Mary", 0.8).as_deref(), Some("Character_2"));
        assert_eq!(resolver.register_detected("john", 0.95), None);
        assert_eq!(resolver.register_detected("Peter", 0.7).as_deref(), Some("Character_3"));
        assert_eq!(resolver.pseudonym_of("JOHN"), Some("Character_1"));
        assert_eq!(resolver.pseudonym_of("Narrator"), Some("Narrator"));
        assert_eq!(resolver.detected_count(), 3);
    }

    #[test]
    fn test_pseudonym_strings_are_not_registered() {
        let mut resolver = IdentityResolver::new();
        assert_eq!(resolver.register_detected("Character_4", 0.9), None);
        assert_eq!(resolver.register_detected("  ", 0.9), None);
        assert!(resolver.is_empty());
    }

    #[test]
    fn test_merge_substring_aliases() {
        let mut resolver = IdentityResolver::new();
        resolver.register_detected("Harry Potter", 0.9);
        resolver.register_detected("Ron", 0.9);
        resolver.register_detected("Harry", 0.9);

        assert_eq!(resolver.merge_aliases(), 1);
        assert_eq!(resolver.pseudonym_of("Harry"), Some("Character_1"));
        assert_eq!(resolver.pseudonym_of("Ron"), Some("Character_2"));
        // Idempotent
        assert_eq!(resolver.merge_aliases(), 0);
        assert_eq!(resolver.pseudonym_of("Harry"), Some("Character_1"));
    }

    #[test]
    fn test_merge_membership_is_order_insensitive() {
        let names = ["Potter", "Harry", "Harry Potter", "Ron"];

        let mut forward = IdentityResolver::new();
        for name in names {
            forward.register_detected(name, 0.9);
        }
        forward.merge_aliases();

        let mut backward = IdentityResolver::new();
        for name in names.iter().rev() {
            backward.register_detected(name, 0.9);
        }
        backward.merge_aliases();

        let members = |resolver: &IdentityResolver| {
            let mut groups: Vec<Vec<String>> = resolver
                .groups()
                .into_values()
                .map(|mut g| {
                    g.sort();
                    g
                })
                .collect();
            groups.sort();
            groups
        };
        assert_eq!(members(&forward), members(&backward));
        assert_eq!(forward.groups().len(), 2);
    }

    #[test]
    fn test_late_link_unifies_earlier_groups() {
        let mut resolver = IdentityResolver::new();
        resolver.register_detected("Harry", 0.9);
        resolver.register_detected("Potter", 0.9);
        resolver.merge_aliases();
        assert_ne!(resolver.pseudonym_of("Harry"), resolver.pseudonym_of("Potter"));

        resolver.register_detected("Harry Potter", 0.9);
        resolver.merge_aliases();
        assert_eq!(resolver.pseudonym_of("Potter"), Some("Character_1"));
        assert_eq!(resolver.pseudonym_of("Harry Potter"), Some("Character_1"));
    }

    #[test]
    fn test_text_masked_before_late_link_unmasks_to_group() {
        let mut resolver = IdentityResolver::new();
        resolver.register_detected("Harry", 0.9);
        resolver.register_detected("Potter", 0.9);
        resolver.merge_aliases();
        let early = resolver.mask("Potter waved.").unwrap();
        assert_eq!(early, "Character_2 waved.");

        resolver.register_detected("Harry Potter", 0.9);
        resolver.merge_aliases();
        assert_eq!(resolver.unmask(&early).unwrap(), "Harry waved.");
        assert_eq!(
            resolver.aliases_of("Character_2"),
            vec!["Harry", "Potter", "Harry Potter"]
        );
    }

    #[test]
    fn test_retired_double_digit_pseudonym_is_not_corrupted() {
        let mut resolver = IdentityResolver::new();
        for name in ["Anne", "Cole", "Dara", "Finn", "Gus", "Hugo", "Ivy", "Jude", "Kit", "Bob"] {
            resolver.register_detected(name, 0.9);
        }
        let early = resolver.mask("Bob left.").unwrap();
        assert_eq!(early, "Character_10 left.");

        resolver.register_detected("Anne Bob", 0.9);
        resolver.merge_aliases();
        assert_eq!(resolver.pseudonym_of("Bob"), Some("Character_1"));
        assert_eq!(resolver.unmask(&early).unwrap(), "Bob left.");
        assert_eq!(resolver.unmask("Character_1 and Character_9").unwrap(), "Bob and Kit");
    }

    #[test]
    fn test_reserved_names_never_merge() {
        let mut resolver = IdentityResolver::with_reserved(true, false);
        resolver.register_detected("Narr", 0.9);
        resolver.merge_aliases();
        assert_eq!(resolver.pseudonym_of("Narrator"), Some("Narrator"));
        assert_eq!(resolver.pseudonym_of("Narr"), Some("Character_1"));
    }

    #[test]
    fn test_declared_names_lead_their_group() {
        let mut resolver = IdentityResolver::new();
        resolver.declare("Sherlock Holmes");
        resolver.register_detected("Holmes", 0.9);
        resolver.merge_aliases();
        assert_eq!(resolver.pseudonym_of("Holmes"), Some("Sherlock Holmes"));
        assert_eq!(
            resolver.mask("Holmes nodded.").unwrap(),
            "Sherlock Holmes nodded."
        );
        assert_eq!(resolver.unmask("Sherlock Holmes nodded.").unwrap(), "Holmes nodded.");
    }

    #[test]
    fn test_mask_unmask_uses_shortest_name() {
        let mut resolver = IdentityResolver::new();
        resolver.register_detected("Elizabeth Bennet", 0.9);
        resolver.register_detected("Elizabeth", 0.9);
        resolver.register_detected("Darcy", 0.9);
        resolver.merge_aliases();

        let text = "Elizabeth Bennet looked at Darcy. Elizabeth smiled.";
        let masked = resolver.mask(text).unwrap();
        assert_eq!(masked, "Character_1 looked at Character_3. Character_1 smiled.");
        assert_eq!(
            resolver.unmask(&masked).unwrap(),
            "Elizabeth looked at Darcy. Elizabeth smiled."
        );
    }

    #[test]
    fn test_aliases_of_group() {
        let mut resolver = IdentityResolver::new();
        resolver.register_detected("Watson", 0.9);
        resolver.register_detected("Dr. Watson", 0.9);
        resolver.merge_aliases();
        assert_eq!(resolver.aliases_of("Character_1"), vec!["Watson", "Dr. Watson"]);
        assert_eq!(resolver.pseudonyms(), vec!["Character_1"]);
    }

    #[test]
    fn test_unmask_many_pseudonyms() {
        let mut resolver = IdentityResolver::new();
        for i in 1..=12 {
            resolver.register_detected(&format!("Name{i}x"), 0.9);
        }
        assert_eq!(
            resolver.unmask("Character_12 met Character_1").unwrap(),
            "Name12x met Name1x"
        );
    }
}
