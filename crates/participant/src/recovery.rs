//! Participant recovery
//!
//! Runs once before the participant accepts traffic. The log is folded per
//! transaction into what was durably known before the crash:
//!
//! - PREPARE only: the vote stands and an ACCEPT re-takes its locks.
//! - PREPARE and DECISION: the decision is re-applied right away.
//! - DONE: the transaction is finished and only remembered for
//!   answering late duplicates.

use crate::error::Result;
use crate::lock::LockAttempt;
use crate::participant::Participant;
use crate::record::ParticipantRecord;
use crate::state::Pending;
use collage_common::{Outcome, Vote};
use collage_wal::Record;
use std::collections::{HashMap, HashSet};
use std::fmt;

/// What recovery found in the log
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RecoveryReport {
    /// Votes still waiting for a decision
    pub pending: usize,
    /// Logged decisions applied during recovery
    pub reapplied: usize,
    /// Transactions that were already finished
    pub completed: usize,
}

impl fmt::Display for RecoveryReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} pending, {} re-applied, {} completed",
            self.pending, self.reapplied, self.completed
        )
    }
}

#[derive(Default)]
struct Trace {
    prepare: Option<(Vec<String>, Vote)>,
    decision: Option<Outcome>,
    done: bool,
}

impl Participant {
    /// Rebuild locks and votes from the log and finish decided transactions
    pub(crate) fn recover(&self) -> Result<RecoveryReport> {
        let records = self
            .wal
            .replay()?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        let mut order = Vec::new();
        let mut traces: HashMap<String, Trace> = HashMap::new();
        for record in &records {
            let trace = traces.entry(record.txn().to_string()).or_insert_with(|| {
                order.push(record.txn().to_string());
                Trace::default()
            });
            match record {
                ParticipantRecord::Prepare {
                    resources, vote, ..
                } => trace.prepare = Some((resources.clone(), *vote)),
                ParticipantRecord::Decision { outcome, .. } => trace.decision = Some(*outcome),
                ParticipantRecord::Done { .. } => trace.done = true,
            }
        }

        if self.config.compact_on_recovery {
            self.wal.compact(&compacted(records))?;
        }

        let mut report = RecoveryReport::default();
        let mut decided = Vec::new();
        {
            let mut state = self.state.lock();
            for txn in order {
                let Some(trace) = traces.remove(&txn) else {
                    continue;
                };

                if trace.done {
                    let vote = trace.prepare.map(|(_, vote)| vote);
                    state.resolved.insert(txn, vote);
                    report.completed += 1;
                    continue;
                }

                let Some((resources, vote)) = trace.prepare else {
                    // Decision for an unknown transaction, DONE never made it
                    decided.push((txn, None));
                    continue;
                };

                if vote.is_accept()
                    && let LockAttempt::Conflict { resource, holder } =
                        state.locks.try_lock_all(&txn, &resources)
                {
                    // Two undecided ACCEPTs on one resource; the log is damaged
                    tracing::warn!(
                        "[{}] Cannot relock {} for {}, held by {}",
                        self.address(),
                        resource,
                        txn,
                        holder
                    );
                }
                let pending = Pending {
                    resources,
                    vote,
                    decision: trace.decision,
                };

                if trace.decision.is_some() {
                    decided.push((txn.clone(), Some(pending.clone())));
                } else {
                    report.pending += 1;
                }
                state.pending.insert(txn, pending);
            }
        }

        for (txn, pending) in decided {
            tracing::info!(
                "[{}] Re-applying logged decision for {}",
                self.address(),
                txn
            );
            match pending {
                Some(pending) => self.finish(&txn, &pending)?,
                None => {
                    self.wal.append(&ParticipantRecord::Done { txn: txn.clone() })?;
                    self.state.lock().resolved.insert(txn, None);
                }
            }
            report.reapplied += 1;
        }

        Ok(report)
    }
}

/// Records worth keeping across a compaction
///
/// Unfinished transactions keep everything. Finished ones keep their vote
/// and their DONE, which is all a late duplicate needs.
fn compacted(records: Vec<ParticipantRecord>) -> Vec<ParticipantRecord> {
    let finished: HashSet<String> = records
        .iter()
        .filter(|r| r.is_terminal())
        .map(|r| r.txn().to_string())
        .collect();

    records
        .into_iter()
        .filter(|r| {
            !finished.contains(r.txn()) || !matches!(r, ParticipantRecord::Decision { .. })
        })
        .collect()
}
