//! Log records written by the participant

use collage_common::{Outcome, Vote};
use collage_wal::Record;
use serde::{Deserialize, Serialize};

/// One entry of the participant's write-ahead log
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ParticipantRecord {
    /// Vote cast on a prepare request; an ACCEPT means `resources` are locked
    Prepare {
        txn: String,
        resources: Vec<String>,
        vote: Vote,
    },

    /// Decision received from the coordinator, side effects not yet confirmed
    Decision { txn: String, outcome: Outcome },

    /// Decision applied and locks released
    Done { txn: String },
}

impl Record for ParticipantRecord {
    fn txn(&self) -> &str {
        match self {
            Self::Prepare { txn, .. } | Self::Decision { txn, .. } | Self::Done { txn } => txn,
        }
    }

    fn is_terminal(&self) -> bool {
        matches!(self, Self::Done { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use collage_wal::{decode_line, encode_line};

    #[test]
    fn test_line_layout() {
        let record = ParticipantRecord::Prepare {
            txn: "collage.jpg".into(),
            resources: vec!["a.jpg".into()],
            vote: Vote::Accept,
        };
        let line = encode_line(&record).unwrap();
        assert!(line.starts_with(r#"{"kind":"PREPARE","txn":"collage.jpg""#));
        assert_eq!(decode_line::<ParticipantRecord>(line.trim_end(), 1).unwrap(), record);

        let done = ParticipantRecord::Done { txn: "t".into() };
        assert!(done.is_terminal());
        assert_eq!(done.txn(), "t");
    }
}
