//! Votes and outcomes of a commit transaction

use serde::{Deserialize, Serialize};
use std::fmt;

/// A participant's answer to a prepare request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Vote {
    /// Participant locked its resources and agrees to commit
    Accept,
    /// Participant cannot or will not contribute its resources
    Refuse,
}

impl Vote {
    pub fn is_accept(&self) -> bool {
        matches!(self, Vote::Accept)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Vote::Accept => "ACCEPT",
            Vote::Refuse => "REFUSE",
        }
    }
}

impl fmt::Display for Vote {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Global outcome of a transaction, fixed once the decision is logged
///
/// An undecided transaction is represented by the absence of an outcome
/// (`Option<Outcome>::None`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Outcome {
    Commit,
    Abort,
}

impl Outcome {
    /// Outcome implied by a complete set of votes
    ///
    /// An empty vote set is unanimous and commits.
    pub fn from_votes<'a>(votes: impl IntoIterator<Item = &'a Vote>) -> Self {
        if votes.into_iter().all(Vote::is_accept) {
            Outcome::Commit
        } else {
            Outcome::Abort
        }
    }

    pub fn is_commit(&self) -> bool {
        matches!(self, Outcome::Commit)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Outcome::Commit => "COMMIT",
            Outcome::Abort => "ABORT",
        }
    }
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
