use anyhow::Result;
use tracing::info;

use crate::heuristics::to_ascii_text;
use crate::identity::Unmasker;
use crate::models::TechnicalRecord;

use super::BookContext;

/// Separator between the speaker and the addressee in an attribution header
const TALKING_TO: &str = " talking to ";

/// A maximal run of consecutive lines from one speaker
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Turn {
    pub speaker: String,
    pub lines: Vec<String>,
}

impl Turn {
    fn new(speaker: String) -> Self {
        Self {
            speaker,
            lines: Vec::new(),
        }
    }

    /// Turn text, one line per paragraph, trimmed.
    pub fn content(&self) -> String {
        self.lines.join("\n").trim().to_string()
    }

    /// `<|im_start|>speaker\ncontent<|im_end|>`, or `None` for an empty turn.
    pub fn to_chatml(&self) -> Option<String> {
        let content = self.content();
        if content.is_empty() {
            return None;
        }
        Some(format!("<|im_start|>{}\n{}<|im_end|>", self.speaker, content))
    }
}

/// Final outputs for one book, all unmasked
#[derive(Debug, Clone, Default)]
pub struct RenderedBook {
    /// `Speaker: content` lines; untouched paragraphs pass through as-is
    pub plain: Vec<String>,
    /// Attributed lines only
    pub turns: Vec<Turn>,
    pub records: Vec<TechnicalRecord>,
}

impl RenderedBook {
    /// Turn-delimited markup with blank lines removed.
    pub fn chatml(&self) -> String {
        let mut out = String::new();
        for block in self.turns.iter().filter_map(Turn::to_chatml) {
            for line in block.lines().filter(|line| !line.trim().is_empty()) {
                out.push_str(line);
                out.push('\n');
            }
        }
        out
    }
}

/// One rendered paragraph
#[derive(Debug, Clone, PartialEq, Eq)]
enum RenderedLine {
    Attributed { speaker: String, content: String },
    /// Paragraph the model never attributed
    Untouched(String),
}

/// Split a composed attribution string into display speaker and content.
///
/// The header is everything before the first colon; only the speaker part of
/// `"<speaker> talking to <target> (<action>)"` is kept.
pub fn split_attributed(line: &str) -> Option<(&str, &str)> {
    let (header, content) = line.split_once(':')?;
    let speaker = match header.find(TALKING_TO) {
        Some(at) => &header[..at],
        None => header,
    };
    Some((speaker.trim(), content.trim()))
}

fn render_line(line: &str, attributed: bool, unmasker: &Unmasker) -> RenderedLine {
    if attributed && let Some((speaker, content)) = split_attributed(line) {
        return RenderedLine::Attributed {
            speaker: to_ascii_text(&unmasker.apply(speaker)),
            content: to_ascii_text(&unmasker.apply(content)),
        };
    }
    RenderedLine::Untouched(line.to_string())
}

/// Group rendered lines into turns. Untouched paragraphs close the open turn
/// and are left out.
fn group_turns(lines: &[RenderedLine]) -> Vec<Turn> {
    let mut turns = Vec::new();
    let mut current: Option<Turn> = None;

    for line in lines {
        match line {
            RenderedLine::Attributed { speaker, content } => {
                if current.as_ref().is_some_and(|turn| &turn.speaker != speaker) {
                    turns.extend(current.take());
                }
                current
                    .get_or_insert_with(|| Turn::new(speaker.clone()))
                    .lines
                    .push(content.clone());
            }
            RenderedLine::Untouched(_) => turns.extend(current.take()),
        }
    }
    turns.extend(current);
    turns
}

/// Execute the rendering stage: unmask, fold punctuation and group turns.
pub fn execute_stage2(ctx: &BookContext) -> Result<RenderedBook> {
    let unmasker = ctx.identity.unmasker()?;

    let rendered: Vec<RenderedLine> = ctx
        .paragraphs
        .all_lines()
        .iter()
        .enumerate()
        .map(|(i, line)| render_line(line, ctx.paragraphs.is_rewritten(i), &unmasker))
        .collect();

    let plain = rendered
        .iter()
        .map(|line| match line {
            RenderedLine::Attributed { speaker, content } => format!("{speaker}: {content}"),
            RenderedLine::Untouched(text) => text.clone(),
        })
        .collect();
    let turns = group_turns(&rendered);
    // Aliases come from the final identity map so later merges are reflected
    let records = ctx
        .records
        .iter()
        .map(|record| TechnicalRecord {
            aliases: ctx.identity.aliases_of(&record.speaker),
            ..record.clone()
        })
        .map(|record| record.map_text(|text| to_ascii_text(&unmasker.apply(text))))
        .collect();

    info!(book = %ctx.name, turns = turns.len(), "Rendered book");
    Ok(RenderedBook {
        plain,
        turns,
        records,
    })
}
