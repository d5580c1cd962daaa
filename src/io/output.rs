use std::io::Write;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::Utc;
use serde::Serialize;
use uuid::Uuid;

use crate::config::OutputConfig;
use crate::models::TechnicalRecord;
use crate::stages::{BookStats, RenderedBook};

/// Structured metadata file for one book
#[derive(Debug, Clone, Serialize)]
pub struct RecordsDocument<'a> {
    pub book: &'a str,
    pub run_id: Uuid,
    /// RFC 3339 timestamp
    pub generated_at: String,
    pub stats: &'a BookStats,
    pub records: &'a [TechnicalRecord],
}

impl<'a> RecordsDocument<'a> {
    pub fn new(book: &'a str, run_id: Uuid, stats: &'a BookStats, records: &'a [TechnicalRecord]) -> Self {
        Self {
            book,
            run_id,
            generated_at: Utc::now().to_rfc3339(),
            stats,
            records,
        }
    }

    /// Write to a JSON file
    pub fn write_json(&self, path: &Path) -> Result<()> {
        let file = std::fs::File::create(path)
            .with_context(|| format!("Failed to create file: {:?}", path))?;
        serde_json::to_writer_pretty(file, self).context("Failed to write JSON")?;
        Ok(())
    }
}

/// Paths written for one book
#[derive(Debug, Default)]
pub struct WrittenArtifacts {
    pub plain: Option<PathBuf>,
    pub chatml: Option<PathBuf>,
    pub records: Option<PathBuf>,
}

fn write_text(path: &Path, text: &str) -> Result<()> {
    let mut file = std::fs::File::create(path)
        .with_context(|| format!("Failed to create file: {:?}", path))?;
    write!(file, "{}", text).with_context(|| format!("Failed to write {:?}", path))?;
    Ok(())
}

/// Write the enabled artifacts for `book` into `config.dir`.
pub fn write_artifacts(
    book: &str,
    rendered: &RenderedBook,
    stats: &BookStats,
    run_id: Uuid,
    config: &OutputConfig,
) -> Result<WrittenArtifacts> {
    std::fs::create_dir_all(&config.dir)
        .with_context(|| format!("Failed to create output directory {:?}", config.dir))?;
    let mut written = WrittenArtifacts::default();

    if config.plain {
        let path = config.dir.join(format!("{book}_converted.txt"));
        let mut text = rendered.plain.join("\n");
        text.push('\n');
        write_text(&path, &text)?;
        written.plain = Some(path);
    }

    if config.chatml {
        let path = config.dir.join(format!("{book}_chatml.txt"));
        write_text(&path, &rendered.chatml())?;
        written.chatml = Some(path);
    }

    if config.records {
        let path = config.dir.join(format!("{book}_records.json"));
        RecordsDocument::new(book, run_id, stats, &rendered.records).write_json(&path)?;
        written.records = Some(path);
    }

    Ok(written)
}
