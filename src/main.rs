use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing::{error, info, level_filters::LevelFilter, warn, Level};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

use parley::{
    discover_books, load_paragraphs, BackendKind, Config, EntityDetector, GenerationClient,
    HttpEntityDetector, IdentityResolver, ParagraphSequence, Pipeline, RosterDetector,
    SerializedDetector,
};

#[derive(Parser)]
#[command(name = "parley")]
#[command(author, version, about = "Convert novels into speaker-attributed dialogue", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Attribute every line of one book, or a directory of books
    Convert {
        /// Book file (JSON array of paragraphs) or directory of them
        path: PathBuf,

        /// TOML configuration file
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Books processed concurrently
        #[arg(short, long)]
        workers: Option<usize>,

        /// Stop after this many paragraphs per book
        #[arg(long)]
        max_paragraphs: Option<usize>,

        /// Directory for output artifacts
        #[arg(short, long)]
        output_dir: Option<PathBuf>,

        /// Generation backend used for attribution
        #[arg(short, long, value_enum)]
        backend: Option<BackendKind>,

        /// Verbose output
        #[arg(short, long)]
        verbose: bool,
    },

    /// Report detected characters and pseudonyms without calling a backend
    Analyze {
        /// Book file (JSON array of paragraphs)
        input: PathBuf,

        /// TOML configuration file
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Verbose output
        #[arg(short, long)]
        verbose: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Convert {
            path,
            config,
            workers,
            max_paragraphs,
            output_dir,
            backend,
            verbose,
        } => {
            setup_logging(verbose);
            let mut config = Config::load(config.as_deref())?;
            if let Some(workers) = workers {
                config.run.workers = workers;
            }
            if let Some(max_paragraphs) = max_paragraphs {
                config.chunk.max_paragraphs = max_paragraphs;
            }
            if let Some(dir) = output_dir {
                config.output.dir = dir;
            }
            if let Some(backend) = backend {
                config.backend.active = backend;
            }
            convert(path, config.validate()?).await
        }
        Commands::Analyze {
            input,
            config,
            verbose,
        } => {
            setup_logging(verbose);
            let config = Config::load(config.as_deref())?.validate()?;
            analyze(input, config).await
        }
    }
}

fn setup_logging(verbose: bool) {
    let level = if verbose { Level::DEBUG } else { Level::INFO };
    // RUST_LOG overrides the flag when set
    let filter = EnvFilter::builder()
        .with_default_directive(LevelFilter::from_level(level).into())
        .from_env_lossy();
    let subscriber = FmtSubscriber::builder().with_env_filter(filter).finish();
    tracing::subscriber::set_global_default(subscriber).ok();
}

/// NER service when one is configured, otherwise the declared roster.
fn build_detector(config: &Config) -> Result<Arc<dyn EntityDetector>> {
    match &config.detection.endpoint {
        Some(endpoint) => {
            info!(%endpoint, "Using entity detection service");
            Ok(Arc::new(HttpEntityDetector::new(endpoint.clone())))
        }
        None => {
            if config.character.declared.is_empty() {
                warn!("No detection endpoint and no declared characters, names will not be masked");
            }
            Ok(Arc::new(RosterDetector::new(&config.character.declared)?))
        }
    }
}

async fn convert(path: PathBuf, config: Config) -> Result<()> {
    let books = discover_books(&path).context("Failed to find input books")?;
    if books.is_empty() {
        warn!("No books found in {:?}", path);
        return Ok(());
    }
    info!("Found {} book(s) in {:?}", books.len(), path);

    let detector = SerializedDetector::spawn(build_detector(&config)?);
    let client = GenerationClient::from_config(&config.backend, config.summary.use_secondary)
        .await
        .context("Failed to start generation backend")?;

    let pipeline = Pipeline::new(&config, Arc::new(detector.clone()), client);
    let result = pipeline.run(books).await;
    detector.shutdown().await;

    let summary = match result {
        Ok(summary) => summary,
        Err(e) => {
            error!("Run {} terminated: {:#}", pipeline.run_id(), e);
            return Err(e);
        }
    };

    let lines: usize = summary.completed.iter().map(|b| b.stats.lines_attributed).sum();
    let degraded: usize = summary.completed.iter().map(|b| b.stats.windows_degraded).sum();
    info!(
        "Complete: {} book(s) converted, {} failed, {} lines attributed, {} degraded windows",
        summary.completed.len(),
        summary.failed.len(),
        lines,
        degraded
    );
    for failure in &summary.failed {
        warn!("Failed: {}", failure);
    }
    info!("Output written to {:?}", config.output.dir);

    Ok(())
}

async fn analyze(input: PathBuf, config: Config) -> Result<()> {
    info!("Analyzing book from {:?}", input);
    let paragraphs = ParagraphSequence::new(load_paragraphs(&input)?);
    let detector = build_detector(&config)?;

    let mut identity =
        IdentityResolver::with_reserved(config.character.narrator, config.character.unknown);
    for name in &config.character.declared {
        identity.declare(name);
    }

    let window_config = &config.chunk;
    let mut per_window = Vec::new();
    for start in window_config.window_starts(paragraphs.len()) {
        let Some(window) = window_config.window_at(start, paragraphs.len()) else {
            break;
        };
        let text = paragraphs.source(window.full_span()).join("\n");
        let names = match detector.detect(&text, config.detection.confidence).await {
            Ok(names) => names,
            Err(e) => {
                warn!(window = window.ordinal, error = %e, "Entity detection failed");
                Vec::new()
            }
        };
        let new = names
            .iter()
            .filter(|name| identity.register_detected(&name.text, name.confidence).is_some())
            .count();
        identity.merge_aliases();
        per_window.push((window.ordinal, names.len(), new));
    }

    println!("Book Analysis");
    println!("=============");
    println!("Paragraphs: {}", paragraphs.len());
    println!("Windows: {}", per_window.len());
    println!("Detected names: {}", identity.detected_count());
    println!();

    println!("Identity Map");
    println!("------------");
    for (name, pseudonym) in identity.mapping() {
        println!("{} -> {}", name, pseudonym);
    }
    println!();

    println!("Alias Groups");
    println!("------------");
    for pseudonym in identity.pseudonyms() {
        let aliases = identity.aliases_of(&pseudonym);
        if aliases.len() > 1 || aliases.first() != Some(&pseudonym) {
            println!("{}: {}", pseudonym, aliases.join(", "));
        }
    }
    println!();

    println!("Detections per Window");
    println!("---------------------");
    for (ordinal, hits, new) in per_window {
        if hits > 0 {
            println!("Window {}: {} name(s), {} new", ordinal, hits, new);
        }
    }

    Ok(())
}
