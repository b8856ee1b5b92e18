//! Log records written by the coordinator

use collage_common::{Outcome, SourceRef};
use collage_wal::Record;
use serde::{Deserialize, Serialize};

/// One entry of the coordinator's write-ahead log
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CoordinatorRecord {
    /// Transaction admitted with these sources; votes are being collected
    Prepare { txn: String, sources: Vec<SourceRef> },

    /// Outcome fixed; written before any participant hears of it
    Decision { txn: String, outcome: Outcome },

    /// Every participant acknowledged the decision
    Done { txn: String },
}

impl Record for CoordinatorRecord {
    fn txn(&self) -> &str {
        match self {
            Self::Prepare { txn, .. } | Self::Decision { txn, .. } | Self::Done { txn } => txn,
        }
    }

    fn is_terminal(&self) -> bool {
        matches!(self, Self::Done { .. })
    }
}
