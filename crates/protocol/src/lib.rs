//! Protocol definitions for coordinator-participant communication
//!
//! The transport only moves opaque bytes between addresses. This crate
//! defines what those bytes mean for the commit protocol: one
//! [`ProtocolMessage`] per transport message, tagged with its [`Phase`].

pub mod messages;

pub use messages::{Envelope, ParseError, Phase, ProtocolMessage};
