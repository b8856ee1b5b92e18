//! Per-transaction commit engine
//!
//! One engine owns one transaction from admission (or recovery) until every
//! participant has acknowledged the outcome:
//!
//! 1. log PREPARE with the source list
//! 2. send PREPARE to each participant with only its own resources
//! 3. collect votes until all are in, one refuses, or the vote timeout hits
//! 4. publish the artifact if the votes allow a commit
//! 5. log the DECISION (the commit point)
//! 6. send the decision until every participant has ACKed
//! 7. log DONE and retire
//!
//! Recovery enters at step 6 with the logged decision. Once PREPARE has
//! been sent the engine never gives up: failed DECISION and DONE appends are
//! retried every retry interval, and the transaction stays in flight.

use crate::config::CoordinatorConfig;
use crate::error::Result;
use crate::publish::Publisher;
use crate::record::CoordinatorRecord;
use collage_common::{Outcome, SourceRef, Vote, group_by_participant};
use collage_demux::Inbox;
use collage_engine::MockClient;
use collage_protocol::{Envelope, Phase, ProtocolMessage};
use collage_wal::WriteAheadLog;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;
use tokio::time::Instant;

/// Everything an engine shares with the coordinator that started it
pub(crate) struct EngineContext {
    pub client: MockClient,
    pub wal: Arc<dyn WriteAheadLog<CoordinatorRecord>>,
    pub publisher: Publisher,
    pub config: CoordinatorConfig,
}

/// Lifecycle of a transaction on the coordinator
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionState {
    Init,
    Preparing,
    Committing,
    Aborting,
    Done,
}

/// Drives one transaction through both phases
pub(crate) struct TransactionEngine {
    ctx: Arc<EngineContext>,
    name: String,
    payload: Vec<u8>,
    sources: Vec<SourceRef>,
    /// Resources of each participant, sorted
    participants: BTreeMap<String, Vec<String>>,
    inbox: Inbox<Envelope>,
    state: TransactionState,
}

impl TransactionEngine {
    pub fn new(
        ctx: Arc<EngineContext>,
        name: String,
        payload: Vec<u8>,
        sources: Vec<SourceRef>,
        inbox: Inbox<Envelope>,
    ) -> Self {
        let participants = group_by_participant(&sources);
        Self {
            ctx,
            name,
            payload,
            sources,
            participants,
            inbox,
            state: TransactionState::Init,
        }
    }

    fn address(&self) -> &str {
        self.ctx.client.address()
    }

    fn transition(&mut self, next: TransactionState) {
        tracing::debug!(
            "[{}] {}: {:?} -> {:?}",
            self.address(),
            self.name,
            self.state,
            next
        );
        self.state = next;
    }

    /// Run a freshly admitted transaction to completion
    pub async fn run(mut self) -> Result<Outcome> {
        self.ctx.wal.append(&CoordinatorRecord::Prepare {
            txn: self.name.clone(),
            sources: self.sources.clone(),
        })?;

        self.transition(TransactionState::Preparing);
        for (participant, resources) in &self.participants {
            let message = ProtocolMessage::prepare(
                self.name.clone(),
                resources.clone(),
                self.payload.clone(),
            );
            self.ctx.client.send(participant, message.encode());
        }

        let mut outcome = self.collect_votes().await;

        if outcome.is_commit()
            && let Err(e) = self.ctx.publisher.publish(&self.name, &self.payload)
        {
            tracing::warn!(
                "[{}] Publishing {} failed, aborting: {}",
                self.address(),
                self.name,
                e
            );
            outcome = Outcome::Abort;
        }

        // Until this append succeeds a crash still means abort
        self.append_until_durable(CoordinatorRecord::Decision {
            txn: self.name.clone(),
            outcome,
        })
        .await;

        tracing::info!("[{}] Decided {} for {}", self.address(), outcome, self.name);
        self.resume(outcome).await
    }

    /// Disseminate a logged decision until every participant has ACKed
    pub async fn resume(mut self, outcome: Outcome) -> Result<Outcome> {
        self.transition(match outcome {
            Outcome::Commit => TransactionState::Committing,
            Outcome::Abort => TransactionState::Aborting,
        });

        self.broadcast_until_acked(outcome).await;

        self.append_until_durable(CoordinatorRecord::Done {
            txn: self.name.clone(),
        })
        .await;
        self.transition(TransactionState::Done);

        tracing::info!("[{}] {} finished with {}", self.address(), self.name, outcome);
        Ok(outcome)
    }

    /// Append `record`, retrying every retry interval until the log takes it
    ///
    /// The inbox stays open meanwhile; messages arriving in between are
    /// handled by the phase that follows.
    async fn append_until_durable(&self, record: CoordinatorRecord) {
        let mut attempt = 1u64;
        while let Err(e) = self.ctx.wal.append(&record) {
            tracing::warn!(
                "[{}] Logging {:?} failed (attempt {}), retrying: {}",
                self.address(),
                record,
                attempt,
                e
            );
            attempt += 1;
            tokio::time::sleep(self.ctx.config.retry_interval).await;
        }
    }

    /// Wait for votes; any refusal or a timeout means abort
    async fn collect_votes(&mut self) -> Outcome {
        let deadline = Instant::now() + self.ctx.config.vote_timeout;
        let mut votes: HashMap<String, Vote> = HashMap::new();

        while votes.len() < self.participants.len() {
            let remaining = deadline.saturating_duration_since(Instant::now());
            let Some(Envelope { from, message }) = self.inbox.recv_timeout(remaining).await else {
                let missing: Vec<&String> = self
                    .participants
                    .keys()
                    .filter(|p| !votes.contains_key(*p))
                    .collect();
                tracing::info!(
                    "[{}] Vote timeout for {}, missing {:?}",
                    self.address(),
                    self.name,
                    missing
                );
                return Outcome::Abort;
            };

            if !self.participants.contains_key(&from) {
                tracing::debug!(
                    "[{}] Ignoring message for {} from non-participant {}",
                    self.address(),
                    self.name,
                    from
                );
                continue;
            }

            let Some(vote) = message.phase.vote() else {
                tracing::debug!(
                    "[{}] Ignoring {} from {} while collecting votes for {}",
                    self.address(),
                    message.phase.as_str(),
                    from,
                    self.name
                );
                continue;
            };

            if votes.contains_key(&from) {
                tracing::debug!(
                    "[{}] Duplicate vote from {} on {}",
                    self.address(),
                    from,
                    self.name
                );
                continue;
            }

            tracing::debug!("[{}] {} voted {} on {}", self.address(), from, vote, self.name);
            votes.insert(from, vote);

            if !vote.is_accept() {
                return Outcome::Abort;
            }
        }

        Outcome::from_votes(votes.values())
    }

    /// Send the decision to everyone who has not ACKed, every retry interval
    async fn broadcast_until_acked(&mut self, outcome: Outcome) {
        let mut waiting: BTreeSet<String> = self.participants.keys().cloned().collect();
        let mut round = 0u64;

        while !waiting.is_empty() {
            round += 1;
            if round > 1 {
                tracing::debug!(
                    "[{}] Resending {} for {} to {:?} (round {})",
                    self.address(),
                    outcome,
                    self.name,
                    waiting,
                    round
                );
            }

            for participant in &waiting {
                let message = ProtocolMessage::decision(self.name.clone(), outcome);
                self.ctx.client.send(participant, message.encode());
            }

            let deadline = Instant::now() + self.ctx.config.retry_interval;
            while !waiting.is_empty() {
                let remaining = deadline.saturating_duration_since(Instant::now());
                let Some(Envelope { from, message }) = self.inbox.recv_timeout(remaining).await
                else {
                    break;
                };

                match message.phase {
                    Phase::Ack if waiting.remove(&from) => {
                        tracing::debug!("[{}] {} acknowledged {}", self.address(), from, self.name);
                    }
                    Phase::Ack => {
                        tracing::debug!(
                            "[{}] Ignoring repeated ACK from {} for {}",
                            self.address(),
                            from,
                            self.name
                        );
                    }
                    phase => {
                        tracing::debug!(
                            "[{}] Ignoring late {} from {} for {}",
                            self.address(),
                            phase.as_str(),
                            from,
                            self.name
                        );
                    }
                }
            }
        }
    }
}
