pub mod config;
pub mod detect;
pub mod heuristics;
pub mod identity;
pub mod io;
pub mod llm;
pub mod models;
pub mod stages;

pub use config::{BackendKind, Config};
pub use detect::{
    EntityDetector, HttpEntityDetector, RosterDetector, SerializedDetector,
};
pub use heuristics::{normalize_speaker, HeuristicsConfig, SpeakerRoster};
pub use identity::IdentityResolver;
pub use io::{discover_books, load_paragraphs, write_artifacts, BookSource};
pub use llm::{is_fatal, GenerationBackend, GenerationClient, GenerationError};
pub use models::{ParagraphSequence, TechnicalRecord, WindowConfig};
pub use stages::{
    execute_stage1, execute_stage2, BookContext, ChunkScheduler, Pipeline, RenderedBook,
    Stage1Config,
};
