//! Message type carried by the mock engine

/// Message travelling between two addresses
///
/// The body is opaque to the transport; only the protocol layer knows how
/// to read it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    /// Sender address
    pub from: String,

    /// Recipient address
    pub to: String,

    /// Serialized payload
    pub body: Vec<u8>,
}

impl Message {
    /// Create a new message
    pub fn new(from: impl Into<String>, to: impl Into<String>, body: Vec<u8>) -> Self {
        Self {
            from: from.into(),
            to: to.into(),
            body,
        }
    }
}
