//! Common types for the collage commit protocol
//!
//! This crate defines:
//! - Source references (`participant:resource` pairs) and their grouping
//! - Participant votes and transaction outcomes

mod outcome;
mod source;

pub use outcome::{Outcome, Vote};
pub use source::{SourceParseError, SourceRef, group_by_participant};
