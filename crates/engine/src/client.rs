//! Mock client bound to one address

use crate::{
    Message, Result,
    engine::{MessageHandler, MockEngine},
};
use std::sync::Arc;

/// Mock client for interacting with the mock engine
#[derive(Clone)]
pub struct MockClient {
    /// Address of this actor
    address: String,

    /// Reference to the mock engine
    engine: Arc<MockEngine>,
}

impl MockClient {
    /// Create a new mock client
    pub fn new(address: impl Into<String>, engine: Arc<MockEngine>) -> Self {
        Self {
            address: address.into(),
            engine,
        }
    }

    /// Get the address of this client
    pub fn address(&self) -> &str {
        &self.address
    }

    /// Get the underlying engine
    pub fn engine(&self) -> &Arc<MockEngine> {
        &self.engine
    }

    /// Send bytes to another address
    pub fn send(&self, to: &str, body: Vec<u8>) {
        self.engine
            .send(Message::new(self.address.clone(), to, body));
    }

    /// Start receiving messages through `handler`
    pub fn register(&self, handler: Arc<dyn MessageHandler>) -> Result<()> {
        self.engine.register_handler(&self.address, handler)
    }

    /// Stop receiving messages
    pub fn unregister(&self) -> Result<()> {
        self.engine.unregister_handler(&self.address)
    }

    /// Take the oldest message our hook rejected
    pub fn next_retained(&self) -> Option<Message> {
        self.engine.next_retained(&self.address)
    }
}
