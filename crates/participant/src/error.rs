//! Error types for the participant

use collage_engine::MockEngineError;
use collage_wal::WalError;
use thiserror::Error;

/// Participant error types
#[derive(Error, Debug)]
pub enum ParticipantError {
    #[error("Write-ahead log error: {0}")]
    Wal(#[from] WalError),

    #[error("Resource store error: {0}")]
    Store(#[from] std::io::Error),

    #[error("Engine error: {0}")]
    Engine(#[from] MockEngineError),
}

/// Result type for participant operations
pub type Result<T> = std::result::Result<T, ParticipantError>;
