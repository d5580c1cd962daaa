//! GBNF grammar constraining attribution output to the expected JSON shape.

/// Shared terminal rules
const TERMINALS: &str = r#"char ::= [^"\\\x7F\x00-\x1F] | [\\] (["\\bfnrt] | "u" [0-9a-fA-F]{4})
space ::= | " " | "\n" [ \t]{0,20}
string ::= "\"" char* "\"" space"#;

/// Build a grammar for `line_count` lines (`Line1`..`LineN`), each an object
/// with `action`, `talking_to` and `speaker` in that order.
///
/// `speaker` prefers the given names but still accepts any string.
pub fn attribution_grammar(line_count: usize, speakers: &[String]) -> String {
    let line_count = line_count.max(1);
    let mut rules = Vec::new();

    for n in 1..=line_count {
        let line = format!("Line{n}");
        rules.push(format!(
            r#"{line} ::= "{{" space {line}-action-kv "," space {line}-talking-to-kv "," space {line}-speaker-kv "}}" space"#
        ));
        rules.push(format!(
            r#"{line}-action-kv ::= "\"action\"" space ":" space string"#
        ));
        rules.push(format!(
            r#"{line}-kv ::= "\"{line}\"" space ":" space {line}"#
        ));
        rules.push(format!(
            r#"{line}-speaker-kv ::= "\"speaker\"" space ":" space speakerstring"#
        ));
        rules.push(format!(
            r#"{line}-talking-to-kv ::= "\"talking_to\"" space ":" space string"#
        ));
    }

    let keys = (1..=line_count)
        .map(|n| format!("Line{n}-kv"))
        .collect::<Vec<_>>()
        .join(r#" "," space "#);
    rules.push(format!(r#"root ::= "{{" space {keys} "}}" space"#));
    rules.push(TERMINALS.to_string());
    rules.push(format!("speakerstring ::= {}", speaker_alternatives(speakers)));

    rules.join("\n")
}

fn speaker_alternatives(speakers: &[String]) -> String {
    let mut alternatives: Vec<String> = Vec::new();
    for speaker in speakers {
        let literal = quote_literal(speaker);
        if !alternatives.contains(&literal) {
            alternatives.push(literal);
        }
    }
    alternatives.push("string".to_string());
    alternatives.join(" | ")
}

/// A GBNF literal matching the JSON string encoding of `name`.
fn quote_literal(name: &str) -> String {
    let json = serde_json::Value::String(name.to_string()).to_string();
    let escaped = json.replace('\\', r"\\").replace('"', r#"\""#);
    format!("\"{escaped}\"")
}
