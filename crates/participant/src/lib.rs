//! Participant side of the collage two-phase commit protocol
//!
//! A participant owns resources (files) that a coordinator wants to
//! consume. It votes on each PREPARE, holds locks on what it promised,
//! and applies the coordinator's decision exactly once, even across
//! crashes, by logging every step to its write-ahead log first.

pub mod config;
pub mod error;
pub mod lock;
pub mod oracle;
pub mod participant;
pub mod record;
pub mod recovery;
mod state;
pub mod store;

pub use config::ParticipantConfig;
pub use error::{ParticipantError, Result};
pub use lock::{LockAttempt, LockTable};
pub use oracle::{ApprovalOracle, FixedOracle};
pub use participant::Participant;
pub use record::ParticipantRecord;
pub use recovery::RecoveryReport;
pub use store::{DirectoryStore, ResourceStore};
