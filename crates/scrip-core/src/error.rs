use std::path::PathBuf;

use thiserror::Error;

/// Why a persisted catalog could not be opened.
#[derive(Debug, Error)]
pub enum CatalogLoadError {
    #[error("no catalog at {0}")]
    NotFound(PathBuf),

    /// Only one of the index/metadata pair exists.
    #[error("catalog at {dir} is incomplete: {missing} is missing")]
    Incomplete { dir: PathBuf, missing: String },

    #[error("catalog file {path} is corrupt: {reason}")]
    Corrupt { path: PathBuf, reason: String },

    /// Both files decode but do not belong to each other.
    #[error("catalog at {dir} is inconsistent: {reason}")]
    Inconsistent { dir: PathBuf, reason: String },
}

#[derive(Debug, Error)]
pub enum Error {
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Catalog load failed: {0}")]
    CatalogLoad(#[from] CatalogLoadError),

    #[error("Embedding unavailable: {0}")]
    EmbeddingUnavailable(String),

    #[error("Invalid predicate: {0}")]
    InvalidPredicate(String),

    #[error("Vector dimension mismatch: expected {expected}, got {got}")]
    DimensionMismatch { expected: usize, got: usize },

    #[error("Deadline exceeded")]
    DeadlineExceeded,

    #[error("Request cancelled")]
    Cancelled,

    #[error("Source line {line}: {reason}")]
    Source { line: usize, reason: String },

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
