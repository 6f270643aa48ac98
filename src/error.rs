//! Error taxonomy for the sync pipeline.
//!
//! Every phase of a content-type sync maps to exactly one variant, so a
//! failed run can always report which phase broke. Row-level write failures
//! are not errors: they are counted into `SyncState::PartialSuccess`.

use thiserror::Error;

use crate::catalog::FetchError;
use crate::sync::SyncPhase;

/// Phase-level failures of a sync run.
#[derive(Debug, Error)]
pub enum SyncError {
    /// Remote catalog could not be downloaded.
    #[error("Transport error: {0}")]
    Transport(#[from] FetchError),

    /// Payload was downloaded but is not a valid catalog document.
    #[error("Parse error: {0}")]
    Parse(String),

    /// A whole batch (or the category set) could not be committed.
    #[error("Write error: {0}")]
    Write(#[from] WriteError),

    /// Stale-row pruning or count recomputation failed.
    #[error("Index error: {0}")]
    Index(String),

    /// Invalid separator or filter configuration.
    #[error("Configuration error: {0}")]
    Config(String),

    /// The run was cancelled before it finished.
    #[error("Sync cancelled")]
    Cancelled,
}

impl SyncError {
    /// Phase this error belongs to, if it is tied to one.
    pub fn phase(&self) -> Option<SyncPhase> {
        match self {
            SyncError::Transport(_) => Some(SyncPhase::Fetching),
            SyncError::Parse(_) => Some(SyncPhase::Parsing),
            SyncError::Write(_) => Some(SyncPhase::Persisting),
            SyncError::Index(_) => Some(SyncPhase::Indexing),
            SyncError::Config(_) | SyncError::Cancelled => None,
        }
    }
}

/// Fatal failure of a write transaction.
///
/// When this is returned none of the rows of the affected batch are
/// considered committed.
#[derive(Debug, Error)]
pub enum WriteError {
    #[error("transaction failed: {0}")]
    Transaction(#[from] sqlx::Error),

    #[error("{0}")]
    Other(String),
}

impl From<anyhow::Error> for WriteError {
    fn from(err: anyhow::Error) -> Self {
        match err.downcast::<sqlx::Error>() {
            Ok(sqlx_err) => WriteError::Transaction(sqlx_err),
            Err(other) => WriteError::Other(other.to_string()),
        }
    }
}
