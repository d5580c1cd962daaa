use anyhow::{Context, Result};
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::config::{CharacterConfig, Config};
use crate::detect::EntityDetector;
use crate::heuristics::{normalize_speaker, tag_bare_quote, HeuristicsConfig, SpeakerRoster};
use crate::identity::{IdentityResolver, NARRATOR, UNKNOWN};
use crate::llm::{
    build_attribution_prompt, build_summary_prompt, parse_attribution, GenerationClient,
};
use crate::models::{
    MaskedWindow, ParagraphSequence, RecencyTable, ResolvedLine, TechnicalRecord, Window,
    WindowAttribution, WindowConfig,
};

use super::{ProgressBoard, ProgressTracker};

/// Configuration for the attribution stage
#[derive(Debug, Clone)]
pub struct Stage1Config {
    pub window: WindowConfig,
    /// Summarize when a window starts on a multiple of this (0 = never)
    pub summary_every: usize,
    /// Attempts per window before its lines are left untagged
    pub attribution_retries: u32,
    /// Minimum detector confidence
    pub detection_confidence: f64,
    pub heuristics: HeuristicsConfig,
}

impl Default for Stage1Config {
    fn default() -> Self {
        Self {
            window: WindowConfig::default(),
            summary_every: 20,
            attribution_retries: 3,
            detection_confidence: 0.4,
            heuristics: HeuristicsConfig::default(),
        }
    }
}

impl From<&Config> for Stage1Config {
    fn from(config: &Config) -> Self {
        Self {
            window: config.chunk.clone(),
            summary_every: config.summary.every,
            attribution_retries: config.backend.attribution_retries,
            detection_confidence: config.detection.confidence,
            heuristics: config.heuristics(),
        }
    }
}

/// Counters collected while attributing a book
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct BookStats {
    pub paragraphs: usize,
    pub windows: usize,
    pub windows_attributed: usize,
    /// Windows whose attribution never parsed
    pub windows_degraded: usize,
    pub lines_attributed: usize,
    pub summaries: usize,
    pub summary_failures: usize,
    pub detection_failures: usize,
    pub characters: usize,
}

/// Everything the scheduler owns for one book. Nothing in here is shared
/// with other books.
#[derive(Debug, Clone)]
pub struct BookContext {
    pub name: String,
    pub paragraphs: ParagraphSequence,
    pub identity: IdentityResolver,
    pub roster: SpeakerRoster,
    pub recency: RecencyTable,
    /// Current rolling summary
    pub summary: String,
    pub records: Vec<TechnicalRecord>,
    pub stats: BookStats,
}

impl BookContext {
    pub fn new(name: impl Into<String>, paragraphs: Vec<String>, characters: &CharacterConfig) -> Self {
        let mut identity = IdentityResolver::with_reserved(characters.narrator, characters.unknown);
        let mut roster = SpeakerRoster::with_reserved(characters.narrator, characters.unknown);
        for name in &characters.declared {
            if identity.declare(name) {
                roster.insert(name.trim());
            }
        }

        let paragraphs = ParagraphSequence::new(paragraphs);
        let stats = BookStats {
            paragraphs: paragraphs.len(),
            ..Default::default()
        };

        Self {
            name: name.into(),
            paragraphs,
            identity,
            roster,
            recency: RecencyTable::new(),
            summary: String::new(),
            records: Vec::new(),
            stats,
        }
    }

    /// Reserved speakers present in this book's roster
    fn reserved_speakers(&self) -> Vec<String> {
        [NARRATOR, UNKNOWN]
            .into_iter()
            .filter(|name| self.roster.contains(name))
            .map(str::to_string)
            .collect()
    }
}

/// Scheduler states for one window, logged at debug level
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    WindowLoaded,
    Masked,
    Summarized,
    Attributed,
    Committed,
}

/// Walks a book window by window: detect and mask names, refresh the
/// rolling summary, ask for a structured attribution and write it back.
pub struct ChunkScheduler<'a> {
    config: &'a Stage1Config,
    detector: &'a dyn EntityDetector,
    client: &'a GenerationClient,
    board: Option<&'a ProgressBoard>,
}

impl<'a> ChunkScheduler<'a> {
    pub fn new(
        config: &'a Stage1Config,
        detector: &'a dyn EntityDetector,
        client: &'a GenerationClient,
    ) -> Self {
        Self {
            config,
            detector,
            client,
            board: None,
        }
    }

    pub fn with_progress(mut self, board: &'a ProgressBoard) -> Self {
        self.board = Some(board);
        self
    }

    /// Process every window of the book.
    ///
    /// Degraded windows (bad JSON, failed summary, detector error) are logged
    /// and skipped over. Only fatal backend errors are returned.
    pub async fn run(&self, ctx: &mut BookContext) -> Result<()> {
        let len = ctx.paragraphs.len();
        let window_config = &self.config.window;
        let total_windows = window_config.total_windows(len);
        let mut tracker = ProgressTracker::new(&ctx.name, total_windows, window_config.limit(len));

        info!(
            book = %ctx.name,
            paragraphs = len,
            windows = total_windows,
            "Starting attribution"
        );

        for start in window_config.window_starts(len) {
            let Some(window) = window_config.window_at(start, len) else {
                break;
            };
            debug!(window = window.ordinal, phase = ?Phase::WindowLoaded);
            if window.current.is_empty() {
                continue;
            }

            self.process_window(ctx, &window)
                .await
                .with_context(|| format!("Window {} of {} failed", window.ordinal, ctx.name))?;

            ctx.stats.windows += 1;
            tracker.advance(window.line_count());
            if let Some(board) = self.board {
                board.update(&tracker);
            }
        }

        ctx.stats.characters = ctx.identity.pseudonyms().len();
        info!(
            book = %ctx.name,
            windows = ctx.stats.windows,
            degraded = ctx.stats.windows_degraded,
            lines = ctx.stats.lines_attributed,
            "Attribution complete"
        );
        Ok(())
    }

    async fn process_window(&self, ctx: &mut BookContext, window: &Window) -> Result<()> {
        let masked = self.mask_window(ctx, window).await?;
        debug!(window = window.ordinal, phase = ?Phase::Masked);

        let summary = self.maybe_summarize(ctx, window).await?;
        if summary.is_some() {
            debug!(window = window.ordinal, phase = ?Phase::Summarized);
        }

        let attribution = self.attribute(ctx, window, &masked).await?;
        debug!(
            window = window.ordinal,
            phase = ?Phase::Attributed,
            lines = attribution.len()
        );

        self.commit(ctx, window, &masked, &attribution, summary);
        debug!(window = window.ordinal, phase = ?Phase::Committed);
        Ok(())
    }

    /// Detect names in the untouched source, register them and mask all
    /// three slices of the window.
    async fn mask_window(&self, ctx: &mut BookContext, window: &Window) -> Result<MaskedWindow> {
        let source_text = ctx.paragraphs.source(window.full_span()).join("\n");

        let detected = match self
            .detector
            .detect(&source_text, self.config.detection_confidence)
            .await
        {
            Ok(names) => names,
            Err(e) => {
                warn!(book = %ctx.name, window = window.ordinal, error = %e, "Entity detection failed");
                ctx.stats.detection_failures += 1;
                Vec::new()
            }
        };

        for name in &detected {
            ctx.identity.register_detected(&name.text, name.confidence);
        }
        ctx.identity.merge_aliases();

        for name in &detected {
            if let Some(pseudonym) = ctx.identity.pseudonym_of(&name.text) {
                ctx.recency.touch(pseudonym, window.ordinal);
            }
        }

        let previous = ctx
            .identity
            .mask_lines(ctx.paragraphs.lines(window.previous.clone()))?;
        let current = ctx
            .identity
            .mask_lines(ctx.paragraphs.source(window.current.clone()))?;
        let next = ctx
            .identity
            .mask_lines(ctx.paragraphs.source(window.next.clone()))?;
        Ok(MaskedWindow {
            previous,
            current,
            next,
        })
    }

    /// Refresh the rolling summary when this window triggers one.
    ///
    /// Returns the new summary, or `None` when nothing was triggered or every
    /// backend declined (the previous summary is kept).
    async fn maybe_summarize(&self, ctx: &mut BookContext, window: &Window) -> Result<Option<String>> {
        let every = self.config.summary_every;
        if every == 0 || window.start() % every != 0 {
            return Ok(None);
        }

        let characters = ctx.recency.recent(window.ordinal, every);
        let story_range = window.start()..window.start() + every;
        let story = ctx.identity.mask_lines(ctx.paragraphs.source(story_range))?;
        let prompt = build_summary_prompt(&characters, &ctx.summary, &story);

        match self.client.summarize(prompt).await? {
            Some(summary) => {
                ctx.stats.summaries += 1;
                ctx.summary = summary.clone();
                Ok(Some(summary))
            }
            None => {
                warn!(book = %ctx.name, window = window.ordinal, "Summary failed, keeping previous summary");
                ctx.stats.summary_failures += 1;
                Ok(None)
            }
        }
    }

    /// Ask for a structured attribution, retrying on unusable output.
    ///
    /// Falls back to an empty attribution once retries run out.
    async fn attribute(
        &self,
        ctx: &mut BookContext,
        window: &Window,
        masked: &MaskedWindow,
    ) -> Result<WindowAttribution> {
        let horizon = match self.config.summary_every {
            0 => usize::MAX,
            every => every,
        };
        let mut characters = ctx.reserved_speakers();
        for name in ctx.recency.recent(window.ordinal, horizon) {
            if !characters.contains(&name) {
                characters.push(name);
            }
        }

        let prompt = build_attribution_prompt(
            &characters,
            &ctx.summary,
            &masked.excerpt(),
            &masked.current,
        );
        let retries = self.config.attribution_retries.max(1);

        for attempt in 1..=retries {
            let response = match self
                .client
                .attribute(prompt.clone(), window.line_count(), &characters)
                .await
            {
                Ok(response) => response,
                Err(e) if e.is_fatal() => return Err(e.into()),
                Err(e) => {
                    warn!(book = %ctx.name, window = window.ordinal, attempt, error = %e, "Attribution request failed");
                    continue;
                }
            };

            match parse_attribution(&response, window.line_count()) {
                Ok(attribution) => {
                    ctx.stats.windows_attributed += 1;
                    return Ok(attribution);
                }
                Err(e) => {
                    warn!(book = %ctx.name, window = window.ordinal, attempt, error = %e, "Unusable attribution");
                    debug!(response = %response, "Rejected attribution response");
                }
            }
        }

        warn!(
            book = %ctx.name,
            window = window.ordinal,
            retries,
            "Giving up on window, lines keep their original text"
        );
        ctx.stats.windows_degraded += 1;
        Ok(WindowAttribution::empty())
    }

    /// Normalize speakers, update recency, record metadata and rewrite each
    /// attributed line in place.
    fn commit(
        &self,
        ctx: &mut BookContext,
        window: &Window,
        masked: &MaskedWindow,
        attribution: &WindowAttribution,
        mut summary: Option<String>,
    ) {
        let heuristics = &self.config.heuristics;

        for (k, text) in masked.current.iter().enumerate() {
            let (Some(line), Some(index)) = (attribution.line(k), window.paragraph_index(k)) else {
                continue;
            };

            let speaker = normalize_speaker(&mut ctx.roster, &line.speaker, true, heuristics);
            let talking_to = if line.talking_to.trim().is_empty() {
                UNKNOWN.to_string()
            } else {
                normalize_speaker(&mut ctx.roster, &line.talking_to, false, heuristics)
            };
            ctx.recency.touch(&speaker, window.ordinal);
            ctx.recency.touch(&talking_to, window.ordinal);

            let text = if heuristics.narrate_bare_quotes {
                tag_bare_quote(text, &speaker)
            } else {
                text.clone()
            };
            let resolved = ResolvedLine {
                speaker: speaker.clone(),
                talking_to: talking_to.clone(),
                action: line.action.trim().to_string(),
            };
            ctx.paragraphs.replace(index, resolved.compose(&text));

            // Aliases are filled in at render time from the final identity map
            ctx.records.push(TechnicalRecord {
                index,
                aliases: Vec::new(),
                speaker,
                talking_to,
                action: resolved.action,
                text: ctx.paragraphs.source_line(index).unwrap_or_default().to_string(),
                // Attached to the first committed line of the triggering window
                summary: summary.take(),
            });
            ctx.stats.lines_attributed += 1;
        }
    }
}

/// Execute the attribution stage for one book.
pub async fn execute_stage1(
    ctx: &mut BookContext,
    detector: &dyn EntityDetector,
    client: &GenerationClient,
    config: &Stage1Config,
    board: Option<&ProgressBoard>,
) -> Result<()> {
    let mut scheduler = ChunkScheduler::new(config, detector, client);
    if let Some(board) = board {
        scheduler = scheduler.with_progress(board);
    }
    scheduler.run(ctx).await
}
