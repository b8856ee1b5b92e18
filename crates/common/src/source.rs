//! Source references
//!
//! A collage is assembled from resources owned by different participants.
//! Each source is written `participant:resource`, where the first `:`
//! separates the owning participant from its local resource name.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Errors produced when parsing a source reference
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SourceParseError {
    #[error("Source is missing the ':' separator: {0}")]
    MissingSeparator(String),

    #[error("Source has an empty participant: {0}")]
    EmptyParticipant(String),

    #[error("Source has an empty resource: {0}")]
    EmptyResource(String),
}

/// A resource owned by a participant
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct SourceRef {
    pub participant: String,
    pub resource: String,
}

impl SourceRef {
    pub fn new(participant: impl Into<String>, resource: impl Into<String>) -> Self {
        Self {
            participant: participant.into(),
            resource: resource.into(),
        }
    }

    /// Parse a `participant:resource` string
    pub fn parse(s: &str) -> Result<Self, SourceParseError> {
        let (participant, resource) = s
            .split_once(':')
            .ok_or_else(|| SourceParseError::MissingSeparator(s.to_string()))?;

        if participant.is_empty() {
            return Err(SourceParseError::EmptyParticipant(s.to_string()));
        }
        if resource.is_empty() {
            return Err(SourceParseError::EmptyResource(s.to_string()));
        }

        Ok(Self::new(participant, resource))
    }
}

impl FromStr for SourceRef {
    type Err = SourceParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl fmt::Display for SourceRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.participant, self.resource)
    }
}

/// Partition sources by owning participant
///
/// Participants and their resources come out sorted, and repeated sources
/// collapse into one entry.
pub fn group_by_participant<'a>(
    sources: impl IntoIterator<Item = &'a SourceRef>,
) -> BTreeMap<String, Vec<String>> {
    let mut grouped: BTreeMap<String, BTreeSet<String>> = BTreeMap::new();
    for source in sources {
        grouped
            .entry(source.participant.clone())
            .or_default()
            .insert(source.resource.clone());
    }

    grouped
        .into_iter()
        .map(|(participant, resources)| (participant, resources.into_iter().collect()))
        .collect()
}
