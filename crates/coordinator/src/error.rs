//! Error types for the coordinator

use collage_common::SourceParseError;
use collage_engine::MockEngineError;
use collage_wal::WalError;
use thiserror::Error;

/// Coordinator error types
///
/// Protocol outcomes (refusals, timeouts) are not errors; they end in
/// [`collage_common::Outcome::Abort`]. These are the failures that stop
/// the current attempt.
#[derive(Error, Debug)]
pub enum CoordinatorError {
    #[error("Write-ahead log error: {0}")]
    Wal(#[from] WalError),

    #[error("Failed to publish or retract {name}: {source}")]
    Publish {
        name: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Transaction already in flight: {0}")]
    DuplicateTransaction(String),

    #[error("Invalid source: {0}")]
    InvalidSource(#[from] SourceParseError),

    #[error("Engine error: {0}")]
    Engine(#[from] MockEngineError),

    #[error("Transaction task failed: {0}")]
    Join(#[from] tokio::task::JoinError),
}

/// Result type for coordinator operations
pub type Result<T> = std::result::Result<T, CoordinatorError>;
