//! Coordinator recovery
//!
//! Runs once in [`Coordinator::start`] before new transactions are
//! admitted. Only the log is trusted:
//!
//! - DONE: the transaction is finished and forgotten.
//! - DECISION: the outcome is fixed; its engine resumes broadcasting it.
//! - PREPARE only: no outcome was fixed, so votes may be lost. The
//!   transaction is aborted without a second vote round. An artifact that
//!   was published just before the crash is retracted first.

use crate::coordinator::Coordinator;
use crate::error::{CoordinatorError, Result};
use crate::record::CoordinatorRecord;
use crate::transaction::TransactionEngine;
use collage_common::{Outcome, SourceRef};
use collage_wal::{Record, unfinished};
use std::collections::HashMap;
use std::fmt;

/// What recovery found in the log
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RecoveryReport {
    /// Transactions resumed with their logged decision
    pub resumed: Vec<String>,
    /// Undecided transactions forced to abort
    pub aborted: Vec<String>,
    /// Finished transactions skipped
    pub completed: usize,
}

impl fmt::Display for RecoveryReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} resumed, {} aborted, {} completed",
            self.resumed.len(),
            self.aborted.len(),
            self.completed
        )
    }
}

/// Latest durable knowledge about one transaction
#[derive(Default)]
struct Trace {
    sources: Option<Vec<SourceRef>>,
    decision: Option<Outcome>,
    done: bool,
}

impl Coordinator {
    pub(crate) fn recover(&self) -> Result<RecoveryReport> {
        let records = self
            .ctx
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
                CoordinatorRecord::Prepare { sources, .. } => trace.sources = Some(sources.clone()),
                CoordinatorRecord::Decision { outcome, .. } => trace.decision = Some(*outcome),
                CoordinatorRecord::Done { .. } => trace.done = true,
            }
        }

        if self.ctx.config.compact_on_recovery {
            self.ctx.wal.compact(&unfinished(records))?;
        }

        let mut report = RecoveryReport::default();
        for txn in order {
            let Some(trace) = traces.remove(&txn) else {
                continue;
            };

            if trace.done {
                report.completed += 1;
                continue;
            }

            let Some(sources) = trace.sources else {
                tracing::warn!(
                    "[{}] {} has a decision but no participant list, skipping",
                    self.address(),
                    txn
                );
                continue;
            };

            let outcome = match trace.decision {
                Some(outcome) => {
                    tracing::info!("[{}] Resuming {} with {}", self.address(), txn, outcome);
                    report.resumed.push(txn.clone());
                    outcome
                }
                None => {
                    tracing::info!("[{}] {} was never decided, aborting", self.address(), txn);
                    self.force_abort(&txn)?;
                    report.aborted.push(txn.clone());
                    Outcome::Abort
                }
            };

            let inbox = self.reserve(&txn)?;
            let engine = TransactionEngine::new(self.ctx.clone(), txn, Vec::new(), sources, inbox);
            self.launch(engine.resume(outcome));
        }

        Ok(report)
    }

    /// Retract any published artifact, then log ABORT
    fn force_abort(&self, txn: &str) -> Result<()> {
        self.ctx
            .publisher
            .retract(txn)
            .map_err(|source| CoordinatorError::Publish {
                name: txn.to_string(),
                source,
            })?;

        self.ctx.wal.append(&CoordinatorRecord::Decision {
            txn: txn.to_string(),
            outcome: Outcome::Abort,
        })?;
        Ok(())
    }
}
