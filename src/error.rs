//! Custom error types for rustbiblio.
//!
//! This module defines the error taxonomy used throughout the pipeline.
//! All library functions return `Result<T, BiblioError>` instead of using `unwrap()`.

use std::path::PathBuf;
use thiserror::Error;

/// Main error type for rustbiblio operations.
///
/// Malformed input inside a record (bad date, missing field) never reaches this type:
/// it is recovered in place with a documented default. Only stage-level failures do.
#[derive(Debug, Error)]
pub enum BiblioError {
    /// The corpus file does not exist
    #[error("Corpus not found: {}", .0.display())]
    CorpusNotFound(PathBuf),

    /// A results table expected from a previous `run` does not exist
    #[error("Results table not found: {} (run the pipeline first)", .0.display())]
    MissingResults(PathBuf),

    /// Corpus or table content could not be interpreted
    #[error("Parse error: {0}")]
    Parse(String),

    /// Topic analysis could not run on the given corpus
    #[error("Topic analysis skipped: {0}")]
    Topic(#[from] TopicError),

    /// File I/O error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// CSV read/write error
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    /// TOML configuration file error
    #[error("Config file error: {0}")]
    ConfigFile(#[from] toml::de::Error),

    /// Invalid configuration, raised before any computation starts
    #[error("Config error: {0}")]
    Config(String),

    /// A background stage panicked or was aborted
    #[error("Stage error: {0}")]
    Stage(String),
}

/// Reasons the text analytics stage produced no topics.
///
/// These are "analytics-infeasible" conditions: the pipeline reports them as a
/// skipped stage and keeps every other artifact.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TopicError {
    /// No abstract survived the validity filter
    #[error("no valid text data")]
    NoValidText,

    /// Every token was a stopword or too short
    #[error("empty vocabulary")]
    EmptyVocabulary,

    /// Every TF-IDF weight is zero (e.g. a single document, or all terms shared by every document)
    #[error("all TF-IDF weights are zero")]
    DegenerateWeights,

    /// The caller cancelled the run
    #[error("cancelled")]
    Cancelled,

    /// The time budget expired before the first iteration completed
    #[error("time budget exhausted before the first iteration")]
    BudgetExhausted,
}

/// Result type alias using `BiblioError`
pub type Result<T> = std::result::Result<T, BiblioError>;

/// Extension trait for adding context to Option types
pub trait OptionExt<T> {
    /// Convert Option to Result with a parse error message
    fn ok_or_parse(self, msg: &str) -> Result<T>;
}

impl<T> OptionExt<T> for Option<T> {
    fn ok_or_parse(self, msg: &str) -> Result<T> {
        self.ok_or_else(|| BiblioError::Parse(msg.to_string()))
    }
}
