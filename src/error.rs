//! Error types for the knowledge harness library.
//!
//! Library modules return [`Error`]; the `kh` binary and the batch
//! orchestration layer wrap these in `anyhow` with context. Service-level
//! failures keep their own [`ServiceError`](crate::llm::ServiceError) so
//! callers can decide between retry, degradation, and propagation.

use thiserror::Error;

use crate::extract::ExtractError;
use crate::llm::ServiceError;

/// Result alias used across the library.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors surfaced by the store, keyword mapping, token ledger, and retrieval engine.
#[derive(Error, Debug)]
pub enum Error {
    #[error("configuration error: {0}")]
    Config(String),

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("embedding dimension mismatch: store expects {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    #[error(transparent)]
    Service(#[from] ServiceError),

    #[error(transparent)]
    Extract(#[from] ExtractError),

    #[error("document not found: {0}")]
    DocumentNotFound(i64),

    #[error("unknown {kind}: '{value}'")]
    UnknownVariant { kind: &'static str, value: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl Error {
    /// True for errors that indicate a broken configuration rather than a
    /// per-call problem. These must never be swallowed by a degraded path.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Error::DimensionMismatch { .. } | Error::Config(_))
    }
}
