//! Error types for the waterbodies pipelines.

use thiserror::Error;

/// Errors produced by the pipelines.
#[derive(Error, Debug)]
pub enum Error {
    #[error("core error: {0}")]
    Core(#[from] waterbodies_core::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("database error: {0}")]
    Sql(#[from] rusqlite::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("invalid WKT geometry: {0}")]
    Wkt(String),

    #[error("geohash error: {0}")]
    Geohash(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("invariant violated: {0}")]
    InvariantViolation(String),

    #[error("invalid task: {0}")]
    InvalidTask(String),

    #[error("invalid temporal range '{value}': {reason}")]
    InvalidTemporalRange { value: String, reason: String },

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("catalog error: {0}")]
    Catalog(String),
}

/// Result alias for pipeline operations.
pub type Result<T> = std::result::Result<T, Error>;
