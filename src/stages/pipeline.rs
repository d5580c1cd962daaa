use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{error, info, info_span, Instrument};
use uuid::Uuid;

use crate::config::{CharacterConfig, Config, OutputConfig};
use crate::detect::EntityDetector;
use crate::io::{write_artifacts, BookSource, WrittenArtifacts};
use crate::llm::{is_fatal, GenerationClient};

use super::{execute_stage1, execute_stage2, BookContext, BookStats, ProgressBoard, Stage1Config};

/// Outcome of one converted book
#[derive(Debug)]
pub struct BookReport {
    pub name: String,
    pub stats: BookStats,
    pub artifacts: WrittenArtifacts,
}

/// Outcome of a whole run
#[derive(Debug, Default)]
pub struct RunSummary {
    pub run_id: Uuid,
    pub completed: Vec<BookReport>,
    /// Books that failed without taking the run down
    pub failed: Vec<String>,
}

/// Shared, read-only state handed to every book worker
struct Shared {
    stage1: Stage1Config,
    characters: CharacterConfig,
    output: OutputConfig,
    detector: Arc<dyn EntityDetector>,
    client: GenerationClient,
    board: ProgressBoard,
    run_id: Uuid,
}

/// Converts books on a bounded worker pool, one book per worker.
///
/// Books share nothing mutable except the detector queue and the progress
/// board. A fatal backend error aborts every worker.
pub struct Pipeline {
    shared: Arc<Shared>,
    workers: usize,
}

impl Pipeline {
    pub fn new(config: &Config, detector: Arc<dyn EntityDetector>, client: GenerationClient) -> Self {
        Self {
            shared: Arc::new(Shared {
                stage1: Stage1Config::from(config),
                characters: config.character.clone(),
                output: config.output.clone(),
                detector,
                client,
                board: ProgressBoard::new(),
                run_id: Uuid::new_v4(),
            }),
            workers: config.run.workers.max(1),
        }
    }

    pub fn run_id(&self) -> Uuid {
        self.shared.run_id
    }

    pub async fn run(&self, books: Vec<BookSource>) -> Result<RunSummary> {
        let permits = Arc::new(Semaphore::new(self.workers));
        let mut tasks = JoinSet::new();

        info!(
            run_id = %self.shared.run_id,
            books = books.len(),
            workers = self.workers,
            backend = self.shared.client.active_name(),
            "Starting conversion run"
        );

        for book in books {
            let shared = Arc::clone(&self.shared);
            let permits = Arc::clone(&permits);
            let span = info_span!("book", book = %book.name);
            tasks.spawn(
                async move {
                    let _permit = permits
                        .acquire_owned()
                        .await
                        .context("Worker pool closed")?;
                    convert_book(&shared, &book)
                        .await
                        .with_context(|| format!("Book {} failed", book.name))
                }
                .instrument(span),
            );
        }

        let mut summary = RunSummary {
            run_id: self.shared.run_id,
            ..Default::default()
        };

        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(Ok(report)) => {
                    info!(
                        book = %report.name,
                        lines = report.stats.lines_attributed,
                        degraded = report.stats.windows_degraded,
                        "Book complete"
                    );
                    summary.completed.push(report);
                }
                Ok(Err(e)) if is_fatal(&e) => {
                    error!(error = %format!("{e:#}"), "Fatal backend failure, aborting run");
                    tasks.abort_all();
                    return Err(e);
                }
                Ok(Err(e)) => {
                    error!(error = %format!("{e:#}"), "Book failed");
                    summary.failed.push(format!("{e:#}"));
                }
                Err(e) => {
                    error!(error = %e, "Book worker panicked");
                    summary.failed.push(e.to_string());
                }
            }
        }

        summary.completed.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(summary)
    }
}

/// Load, attribute, render and write one book.
async fn convert_book(shared: &Shared, book: &BookSource) -> Result<BookReport> {
    let paragraphs = book.load()?;
    info!(paragraphs = paragraphs.len(), "Loaded book");

    let mut ctx = BookContext::new(&book.name, paragraphs, &shared.characters);
    execute_stage1(
        &mut ctx,
        shared.detector.as_ref(),
        &shared.client,
        &shared.stage1,
        Some(&shared.board),
    )
    .await?;

    let rendered = execute_stage2(&ctx)?;
    let artifacts = write_artifacts(&book.name, &rendered, &ctx.stats, shared.run_id, &shared.output)?;
    info!(?artifacts, "Wrote outputs");

    Ok(BookReport {
        name: ctx.name,
        stats: ctx.stats,
        artifacts,
    })
}
