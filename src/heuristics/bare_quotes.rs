use crate::identity::NARRATOR;

fn is_quote(c: char) -> bool {
    matches!(c, '"' | '\u{201C}' | '\u{201D}')
}

/// True when the line is nothing but quoted speech, e.g. `"What?"`.
pub fn is_bare_quote(line: &str) -> bool {
    let mut inside = false;
    let mut saw_quote = false;
    for c in line.chars() {
        if is_quote(c) {
            inside = !inside;
            saw_quote = true;
        } else if !inside && !c.is_whitespace() {
            return false;
        }
    }
    saw_quote
}

/// Append `" <speaker> says."` to bare quoted speech so the speaker survives
/// in the text itself. Narration is left alone.
pub fn tag_bare_quote(line: &str, speaker: &str) -> String {
    if speaker != NARRATOR && is_bare_quote(line) {
        format!("{} {speaker} says.", line.trim_end())
    } else {
        line.to_string()
    }
}
