//! Error taxonomy shared by the pipeline stages.
//!
//! Lifecycle errors (`NotFound`, `AlreadyProcessed`, `InvalidArgument`,
//! `InvalidScore`) are terminal for the action that raised them. Detector,
//! model, store and timeout failures are retryable and are handed back to the
//! orchestrator, which applies backoff.

use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("{entity} {id} not found")]
    NotFound { entity: &'static str, id: i64 },

    #[error("suggestion {0} is no longer pending")]
    AlreadyProcessed(i64),

    #[error("embedding dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    #[error("face extraction failed: {0}")]
    ExtractionFailure(String),

    #[error("store failure: {0}")]
    StoreFailure(String),

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("similarity score {0} is outside [0, 1]")]
    InvalidScore(f32),

    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    #[error("attempt timed out after {0:?}")]
    Timeout(Duration),

    #[error("internal error: {0}")]
    Internal(String),
}

impl Error {
    pub fn not_found(entity: &'static str, id: i64) -> Self {
        Error::NotFound { entity, id }
    }

    /// Whether the orchestrator should schedule another attempt.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Error::ExtractionFailure(_) | Error::StoreFailure(_) | Error::Io(_) | Error::Timeout(_)
        )
    }
}

impl From<rusqlite::Error> for Error {
    fn from(e: rusqlite::Error) -> Self {
        Error::StoreFailure(e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, Error>;
