//! In-memory mock engine standing in for the message transport
//!
//! The transport is deliberately unreliable: it may lose, duplicate and
//! reorder messages. Actors talk to it through a [`MockClient`] bound to
//! their address and receive messages through a [`MessageHandler`] hook.

use thiserror::Error;

pub mod client;
pub mod engine;
pub mod message;

pub use client::MockClient;
pub use engine::{Delivery, FaultPlan, MAILBOX_CAPACITY, MessageHandler, MockEngine};
pub use message::Message;

/// Mock engine errors
#[derive(Debug, Error)]
pub enum MockEngineError {
    #[error("Address not found: {0}")]
    AddressNotFound(String),

    #[error("Address already has a handler: {0}")]
    AddressInUse(String),
}

pub type Result<T> = std::result::Result<T, MockEngineError>;
