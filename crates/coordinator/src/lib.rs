//! Coordinator side of the collage two-phase commit protocol
//!
//! The coordinator decides whether a collage (an artifact built from
//! resources owned by several participants) may be published. Every
//! participant must vote ACCEPT; any refusal, missing vote or crash
//! before the decision is logged ends in ABORT. Once the decision is in
//! the write-ahead log it is sent until every participant acknowledges,
//! across coordinator restarts if need be.

pub mod config;
pub mod coordinator;
pub mod error;
pub mod publish;
pub mod record;
pub mod recovery;
pub mod transaction;

pub use config::CoordinatorConfig;
pub use coordinator::Coordinator;
pub use error::{CoordinatorError, Result};
pub use publish::Publisher;
pub use record::CoordinatorRecord;
pub use recovery::RecoveryReport;
pub use transaction::TransactionState;
