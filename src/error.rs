//! Error taxonomy shared by the aggregation and storage layers.
//!
//! Per-record and per-source failures are absorbed into reports
//! ([`AggregateReport`](crate::aggregate::AggregateReport),
//! [`IngestReport`](crate::ingest::IngestReport)); only failures that
//! affect a whole operation surface as an [`Error`] to the caller.

use std::path::PathBuf;

use crate::models::SourceKind;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Network or auth failure after retries. Non-fatal to an aggregate call.
    #[error("source {kind} unavailable: {message}")]
    SourceUnavailable { kind: SourceKind, message: String },
    /// A raw record could not be mapped onto a [`Record`](crate::models::Record).
    #[error("cannot normalize {kind} record: {message}")]
    Normalization { kind: SourceKind, message: String },
    /// The store file could not be opened or created.
    #[error("store unavailable at {}: {message}", path.display())]
    StoreUnavailable { path: PathBuf, message: String },
    #[error("constraint violation: {0}")]
    ConstraintViolation(String),
    #[error("not found: {0}")]
    NotFound(String),
    #[error(transparent)]
    Storage(#[from] sqlx::Error),
}

pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Failure of a single upstream request, as seen by the pagination driver.
#[derive(Debug, Clone, thiserror::Error)]
#[error("{message}")]
pub struct SourceError {
    pub message: String,
    /// Whether repeating the same request may succeed (network errors, 429, 5xx).
    pub retryable: bool,
}

impl SourceError {
    pub fn transient(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            retryable: true,
        }
    }

    pub fn permanent(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            retryable: false,
        }
    }
}

impl From<reqwest::Error> for SourceError {
    fn from(err: reqwest::Error) -> Self {
        // Decoding failures will not fix themselves on retry.
        if err.is_decode() || err.is_builder() {
            Self::permanent(err.to_string())
        } else {
            Self::transient(err.to_string())
        }
    }
}
