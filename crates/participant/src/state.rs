//! In-memory state of a participant, rebuilt from the log on recovery

use crate::lock::LockTable;
use collage_common::{Outcome, Vote};
use std::collections::HashMap;

/// A vote that is waiting for (or applying) its decision
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct Pending {
    pub resources: Vec<String>,
    pub vote: Vote,
    /// Set once the decision is logged
    pub decision: Option<Outcome>,
}

#[derive(Debug, Default)]
pub(crate) struct ParticipantState {
    pub locks: LockTable,
    pub pending: HashMap<String, Pending>,
    /// Finished transactions and the vote they got, if any
    ///
    /// Never pruned: forgetting an entry would let a late duplicate PREPARE
    /// cast a second vote. It grows with the log, which keeps the same
    /// PREPARE and DONE records across compaction.
    pub resolved: HashMap<String, Option<Vote>>,
}

impl ParticipantState {
    /// Vote already cast on `txn`
    ///
    /// A transaction resolved without a vote (its decision overtook the
    /// PREPARE) counts as refused.
    pub fn recorded_vote(&self, txn: &str) -> Option<Vote> {
        if let Some(pending) = self.pending.get(txn) {
            return Some(pending.vote);
        }
        self.resolved
            .get(txn)
            .map(|vote| vote.unwrap_or(Vote::Refuse))
    }
}
