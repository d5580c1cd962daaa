use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};

/// A book queued for conversion
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BookSource {
    /// File stem, used to name every output artifact
    pub name: String,
    pub path: PathBuf,
}

impl BookSource {
    pub fn from_path(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let name = path
            .file_stem()
            .and_then(|stem| stem.to_str())
            .filter(|stem| !stem.is_empty())
            .with_context(|| format!("Cannot derive a book name from {:?}", path))?
            .to_string();
        Ok(Self { name, path })
    }

    pub fn load(&self) -> Result<Vec<String>> {
        load_paragraphs(&self.path)
    }
}

/// Read a book file: a JSON array of paragraph strings.
pub fn load_paragraphs(path: &Path) -> Result<Vec<String>> {
    let content =
        std::fs::read_to_string(path).with_context(|| format!("Failed to read file: {:?}", path))?;
    parse_paragraphs(&content).with_context(|| format!("Invalid book file: {:?}", path))
}

/// Parse a JSON array of paragraph strings
pub fn parse_paragraphs(json: &str) -> Result<Vec<String>> {
    let paragraphs: Vec<String> =
        serde_json::from_str(json).context("Expected a JSON array of strings")?;
    Ok(paragraphs)
}

/// Books under `path`: the file itself, or every `.json` file in a directory
/// sorted by name.
pub fn discover_books(path: &Path) -> Result<Vec<BookSource>> {
    if path.is_file() {
        return Ok(vec![BookSource::from_path(path)?]);
    }
    if !path.is_dir() {
        bail!("Input path does not exist: {:?}", path);
    }

    let mut files = Vec::new();
    for entry in std::fs::read_dir(path).with_context(|| format!("Failed to list {:?}", path))? {
        let file = entry?.path();
        if file.is_file() && file.extension().is_some_and(|ext| ext == "json") {
            files.push(file);
        }
    }
    files.sort();

    files.into_iter().map(BookSource::from_path).collect()
}
