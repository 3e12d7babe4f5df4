use std::path::PathBuf;

use thiserror::Error;

use crate::models::SourceKind;

/// Convenient alias for fallible results returned by the engine.
pub type Result<T> = std::result::Result<T, EngineError>;

/// Failures that can occur while loading sources or deriving reports.
///
/// Row-level problems (missing identifier, unparseable date) never surface
/// here: the normalizer skips and counts them instead.
#[derive(Debug, Error)]
pub enum EngineError {
    /// Wrapper for IO failures such as reading or writing files.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Raised when a CSV export cannot be read or an output cannot be written.
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    /// Raised when the configuration file is not valid JSON for the schema.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Raised when a configured column is absent from the source table.
    #[error("{source_kind} source has no column named {column:?}")]
    SchemaMismatch {
        source_kind: SourceKind,
        column: String,
    },

    /// Raised when no file matches a configured source path.
    #[error("no file found for {source_kind} source at {}", .path.display())]
    MissingSource {
        source_kind: SourceKind,
        path: PathBuf,
    },

    /// Raised when the configuration parses but is semantically invalid.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// Raised when the tracing subscriber fails to initialise.
    #[error("failed to initialise logging: {0}")]
    Logging(String),
}
