//! Typed protocol messages and their wire encoding

use collage_common::{Outcome, Vote};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors when reading a protocol message off the wire
#[derive(Debug, Error)]
pub enum ParseError {
    #[error("Malformed protocol message: {0}")]
    Malformed(#[from] serde_json::Error),

    #[error("Unknown phase: {0}")]
    UnknownPhase(String),
}

/// Phase tag carried by every protocol message
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum Phase {
    /// Vote request, coordinator to participant
    Prepare,
    /// Positive vote
    Accept,
    /// Negative vote
    Refuse,
    /// Commit decision
    Commit,
    /// Abort decision
    Abort,
    /// Decision applied
    Ack,
}

impl Phase {
    /// Parse from the wire tag
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "PREPARE" => Some(Self::Prepare),
            "ACCEPT" => Some(Self::Accept),
            "REFUSE" => Some(Self::Refuse),
            "COMMIT" => Some(Self::Commit),
            "ABORT" => Some(Self::Abort),
            "ACK" => Some(Self::Ack),
            _ => None,
        }
    }

    /// Convert to the wire tag
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Prepare => "PREPARE",
            Self::Accept => "ACCEPT",
            Self::Refuse => "REFUSE",
            Self::Commit => "COMMIT",
            Self::Abort => "ABORT",
            Self::Ack => "ACK",
        }
    }

    /// The vote this phase carries, if it is a vote
    pub fn vote(&self) -> Option<Vote> {
        match self {
            Self::Accept => Some(Vote::Accept),
            Self::Refuse => Some(Vote::Refuse),
            _ => None,
        }
    }

    /// The decision this phase carries, if it is a decision
    pub fn outcome(&self) -> Option<Outcome> {
        match self {
            Self::Commit => Some(Outcome::Commit),
            Self::Abort => Some(Outcome::Abort),
            _ => None,
        }
    }
}

impl From<Vote> for Phase {
    fn from(vote: Vote) -> Self {
        match vote {
            Vote::Accept => Self::Accept,
            Vote::Refuse => Self::Refuse,
        }
    }
}

impl From<Outcome> for Phase {
    fn from(outcome: Outcome) -> Self {
        match outcome {
            Outcome::Commit => Self::Commit,
            Outcome::Abort => Self::Abort,
        }
    }
}

impl From<Phase> for String {
    fn from(phase: Phase) -> Self {
        phase.as_str().to_string()
    }
}

impl TryFrom<String> for Phase {
    type Error = ParseError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        Phase::parse(&s).ok_or(ParseError::UnknownPhase(s))
    }
}

/// One protocol message
///
/// `resources` is only meaningful on PREPARE, where it lists the resources
/// the recipient owns for this transaction. `payload` is the artifact body
/// and is likewise only sent with PREPARE.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProtocolMessage {
    pub txn: String,
    #[serde(default)]
    pub resources: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payload: Option<Vec<u8>>,
    pub phase: Phase,
}

impl ProtocolMessage {
    /// Vote request for one participant's share of a transaction
    pub fn prepare(txn: impl Into<String>, resources: Vec<String>, payload: Vec<u8>) -> Self {
        Self {
            txn: txn.into(),
            resources,
            payload: Some(payload),
            phase: Phase::Prepare,
        }
    }

    pub fn vote(txn: impl Into<String>, vote: Vote) -> Self {
        Self::bare(txn, vote.into())
    }

    pub fn decision(txn: impl Into<String>, outcome: Outcome) -> Self {
        Self::bare(txn, outcome.into())
    }

    pub fn ack(txn: impl Into<String>) -> Self {
        Self::bare(txn, Phase::Ack)
    }

    fn bare(txn: impl Into<String>, phase: Phase) -> Self {
        Self {
            txn: txn.into(),
            resources: Vec::new(),
            payload: None,
            phase,
        }
    }

    /// Serialize for the transport
    pub fn encode(&self) -> Vec<u8> {
        // Strings, byte vectors and a unit enum always serialize
        serde_json::to_vec(self).unwrap_or_default()
    }

    /// Parse a transport body
    pub fn decode(body: &[u8]) -> Result<Self, ParseError> {
        Ok(serde_json::from_slice(body)?)
    }
}

/// A decoded protocol message together with the address it came from
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Envelope {
    pub from: String,
    pub message: ProtocolMessage,
}

impl Envelope {
    pub fn new(from: impl Into<String>, message: ProtocolMessage) -> Self {
        Self {
            from: from.into(),
            message,
        }
    }

    /// Transaction the message belongs to
    pub fn txn(&self) -> &str {
        &self.message.txn
    }
}
