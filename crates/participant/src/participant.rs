//! Participant actor
//!
//! A participant owns local resources and votes on whether a transaction
//! may consume them. Its life per transaction is IDLE, then VOTED once a
//! PREPARE has been answered, then RESOLVED once the decision is applied.
//!
//! Inbound messages are split per transaction by a demultiplexer. Each
//! transaction with traffic gets a worker task that handles its messages in
//! arrival order, so one transaction waiting on the oracle never holds up
//! another.

use crate::config::ParticipantConfig;
use crate::error::Result;
use crate::lock::LockAttempt;
use crate::oracle::ApprovalOracle;
use crate::record::ParticipantRecord;
use crate::state::{ParticipantState, Pending};
use crate::store::ResourceStore;
use collage_common::{Outcome, Vote};
use collage_demux::{Demultiplexer, Inbox};
use collage_engine::{Message, MessageHandler, MockClient};
use collage_protocol::{Envelope, Phase, ProtocolMessage};
use collage_wal::WriteAheadLog;
use parking_lot::Mutex;
use std::sync::{Arc, Weak};
use tokio::task::AbortHandle;

/// Participant actor
pub struct Participant {
    /// Transport client bound to this participant's address
    client: MockClient,

    /// Durable log of votes and decisions
    pub(crate) wal: Arc<dyn WriteAheadLog<ParticipantRecord>>,

    /// Local resources
    store: Arc<dyn ResourceStore>,

    /// Consulted before voting ACCEPT
    oracle: Arc<dyn ApprovalOracle>,

    pub(crate) config: ParticipantConfig,

    /// Locks, undecided votes and finished transactions
    pub(crate) state: Mutex<ParticipantState>,

    /// Per-transaction routing of inbound messages
    demux: Demultiplexer<Envelope>,

    /// Running transaction workers
    workers: Mutex<Vec<AbortHandle>>,
}

impl Participant {
    /// Create a participant; call [`Participant::start`] to bring it online
    pub fn new(
        client: MockClient,
        wal: Arc<dyn WriteAheadLog<ParticipantRecord>>,
        store: Arc<dyn ResourceStore>,
        oracle: Arc<dyn ApprovalOracle>,
        config: ParticipantConfig,
    ) -> Self {
        Self {
            client,
            wal,
            store,
            oracle,
            config,
            state: Mutex::new(ParticipantState::default()),
            demux: Demultiplexer::new(),
            workers: Mutex::new(Vec::new()),
        }
    }

    /// Recover from the log, then start accepting messages
    pub fn start(self) -> Result<Arc<Self>> {
        let report = self.recover()?;
        tracing::info!("[{}] Recovered: {}", self.address(), report);

        let participant = Arc::new(self);
        participant.client.register(Arc::new(InboundHook {
            participant: Arc::downgrade(&participant),
        }))?;

        tracing::info!("[{}] Accepting protocol messages", participant.address());
        Ok(participant)
    }

    /// Stop receiving messages and cancel running workers
    ///
    /// Anything not yet logged is lost, exactly as in a crash.
    pub fn shutdown(&self) {
        if let Err(e) = self.client.unregister() {
            tracing::debug!("[{}] Shutdown: {}", self.address(), e);
        }
        for worker in self.workers.lock().drain(..) {
            worker.abort();
        }
    }

    pub fn address(&self) -> &str {
        self.client.address()
    }

    /// Answer a PREPARE
    ///
    /// A repeated request for a transaction that already has a vote gets
    /// that vote back without touching locks or the oracle.
    pub async fn handle_prepare(
        &self,
        txn: &str,
        resources: &[String],
        payload: &[u8],
    ) -> Result<Vote> {
        let recorded = self.state.lock().recorded_vote(txn);
        if let Some(vote) = recorded {
            tracing::debug!(
                "[{}] Repeated prepare for {}, answering {}",
                self.address(),
                txn,
                vote
            );
            return Ok(vote);
        }

        let locked = self.validate_and_lock(txn, resources);

        let vote = if locked && self.oracle.ask_approval(payload, resources).await {
            Vote::Accept
        } else {
            Vote::Refuse
        };

        // Only an ACCEPT keeps its locks
        if locked && !vote.is_accept() {
            self.state.lock().locks.release(txn, resources);
        }

        let record = ParticipantRecord::Prepare {
            txn: txn.to_string(),
            resources: resources.to_vec(),
            vote,
        };
        if let Err(e) = self.wal.append(&record) {
            if vote.is_accept() {
                self.state.lock().locks.release(txn, resources);
            }
            return Err(e.into());
        }

        self.state.lock().pending.insert(
            txn.to_string(),
            Pending {
                resources: resources.to_vec(),
                vote,
                decision: None,
            },
        );

        tracing::info!("[{}] Voted {} on {}", self.address(), vote, txn);
        Ok(vote)
    }

    /// Check that every resource exists and lock them all for `txn`
    fn validate_and_lock(&self, txn: &str, resources: &[String]) -> bool {
        if let Some(missing) = resources.iter().find(|r| !self.store.exists(r)) {
            tracing::info!(
                "[{}] Resource {} for {} does not exist",
                self.address(),
                missing,
                txn
            );
            return false;
        }

        match self.state.lock().locks.try_lock_all(txn, resources) {
            LockAttempt::Granted => true,
            LockAttempt::Conflict { resource, holder } => {
                tracing::info!(
                    "[{}] Resource {} for {} is locked by {}",
                    self.address(),
                    resource,
                    txn,
                    holder
                );
                false
            }
        }
    }

    /// Apply a COMMIT or ABORT decision
    ///
    /// Returns once the side effects are durable; the caller may then ACK.
    /// Redelivery after the decision was applied is a no-op.
    pub fn handle_decision(&self, txn: &str, outcome: Outcome) -> Result<()> {
        let pending = {
            let state = self.state.lock();
            if state.resolved.contains_key(txn) {
                tracing::debug!(
                    "[{}] {} already resolved, acknowledging {} again",
                    self.address(),
                    txn,
                    outcome
                );
                return Ok(());
            }
            state.pending.get(txn).cloned()
        };

        let Some(mut pending) = pending else {
            return self.resolve_unknown(txn, outcome);
        };

        match pending.decision {
            Some(logged) if logged != outcome => {
                tracing::warn!(
                    "[{}] Got {} for {} but {} is already logged",
                    self.address(),
                    outcome,
                    txn,
                    logged
                );
            }
            Some(_) => {}
            None => {
                self.wal.append(&ParticipantRecord::Decision {
                    txn: txn.to_string(),
                    outcome,
                })?;
                if let Some(entry) = self.state.lock().pending.get_mut(txn) {
                    entry.decision = Some(outcome);
                }
                pending.decision = Some(outcome);
            }
        }

        self.finish(txn, &pending)
    }

    /// Apply the logged decision of a pending transaction and retire it
    pub(crate) fn finish(&self, txn: &str, pending: &Pending) -> Result<()> {
        let Some(outcome) = pending.decision else {
            return Ok(());
        };

        if outcome.is_commit() {
            if pending.vote.is_accept() {
                for resource in &pending.resources {
                    self.store.delete(resource)?;
                }
            } else {
                tracing::warn!(
                    "[{}] COMMIT for {} which was voted REFUSE, keeping resources",
                    self.address(),
                    txn
                );
            }
        }

        self.wal.append(&ParticipantRecord::Done {
            txn: txn.to_string(),
        })?;

        let mut state = self.state.lock();
        state.locks.release(txn, &pending.resources);
        state.pending.remove(txn);
        state.resolved.insert(txn.to_string(), Some(pending.vote));
        drop(state);

        tracing::info!("[{}] Applied {} for {}", self.address(), outcome, txn);
        Ok(())
    }

    /// Decision for a transaction this participant never voted on
    ///
    /// Nothing to undo, but the transaction is remembered so that a PREPARE
    /// overtaken by its own decision is refused instead of locking forever.
    fn resolve_unknown(&self, txn: &str, outcome: Outcome) -> Result<()> {
        tracing::info!(
            "[{}] {} for unknown transaction {}, acknowledging",
            self.address(),
            outcome,
            txn
        );

        self.wal.append(&ParticipantRecord::Decision {
            txn: txn.to_string(),
            outcome,
        })?;
        self.wal.append(&ParticipantRecord::Done {
            txn: txn.to_string(),
        })?;
        self.state.lock().resolved.insert(txn.to_string(), None);
        Ok(())
    }

    /// Route one inbound transport message to its transaction's worker
    fn route(self: &Arc<Self>, message: Message) {
        let decoded = match ProtocolMessage::decode(&message.body) {
            Ok(decoded) => decoded,
            Err(e) => {
                tracing::warn!(
                    "[{}] Dropping undecodable message from {}: {}",
                    self.address(),
                    message.from,
                    e
                );
                return;
            }
        };

        self.route_envelope(Envelope::new(message.from, decoded));
    }

    fn route_envelope(self: &Arc<Self>, mut envelope: Envelope) {
        let txn = envelope.txn().to_string();
        loop {
            match self.demux.deliver(&txn, envelope) {
                Ok(()) => return,
                Err(rejected) => envelope = rejected,
            }

            // No worker for this transaction yet
            if let Some(inbox) = self.demux.create_inbox(&txn) {
                self.spawn_worker(inbox);
            }
        }
    }

    fn spawn_worker(self: &Arc<Self>, inbox: Inbox<Envelope>) {
        let handle = tokio::spawn(self.clone().run_worker(inbox));

        let mut workers = self.workers.lock();
        workers.retain(|worker| !worker.is_finished());
        workers.push(handle.abort_handle());
    }

    /// Handle one transaction's messages in order until it goes quiet
    async fn run_worker(self: Arc<Self>, mut inbox: Inbox<Envelope>) {
        tracing::debug!("[{}] Worker for {} started", self.address(), inbox.txn());

        while let Some(envelope) = inbox.recv_timeout(self.config.worker_idle_timeout).await {
            self.handle_envelope(envelope).await;
        }

        let txn = inbox.txn().to_string();
        let leftovers = inbox.close();
        tracing::debug!("[{}] Worker for {} retired", self.address(), txn);

        // Raced with retirement; a fresh worker picks these up
        for envelope in leftovers {
            self.route_envelope(envelope);
        }
    }

    async fn handle_envelope(&self, envelope: Envelope) {
        let Envelope { from, message } = envelope;
        let txn = message.txn;

        match message.phase {
            Phase::Prepare => {
                let payload = message.payload.unwrap_or_default();
                match self.handle_prepare(&txn, &message.resources, &payload).await {
                    Ok(vote) => self.reply(&from, ProtocolMessage::vote(txn, vote)),
                    Err(e) => {
                        tracing::error!(
                            "[{}] Failed to record vote on {}: {}",
                            self.address(),
                            txn,
                            e
                        );
                    }
                }
            }
            Phase::Commit | Phase::Abort => {
                let Some(outcome) = message.phase.outcome() else {
                    return;
                };
                match self.handle_decision(&txn, outcome) {
                    Ok(()) => self.reply(&from, ProtocolMessage::ack(txn)),
                    Err(e) => {
                        tracing::error!(
                            "[{}] Failed to apply {} for {}: {}",
                            self.address(),
                            outcome,
                            txn,
                            e
                        );
                    }
                }
            }
            phase => {
                tracing::warn!(
                    "[{}] Ignoring unexpected {} for {} from {}",
                    self.address(),
                    phase.as_str(),
                    txn,
                    from
                );
            }
        }
    }

    fn reply(&self, to: &str, message: ProtocolMessage) {
        self.client.send(to, message.encode());
    }

    /// Transaction currently locking `resource`
    pub fn lock_owner(&self, resource: &str) -> Option<String> {
        self.state.lock().locks.owner(resource).map(str::to_string)
    }

    /// Locked resources with their owning transactions
    pub fn locked_resources(&self) -> Vec<(String, String)> {
        self.state.lock().locks.locked()
    }

    /// Transactions that have voted but not yet applied a decision
    pub fn pending_transactions(&self) -> Vec<String> {
        let mut txns: Vec<String> = self.state.lock().pending.keys().cloned().collect();
        txns.sort();
        txns
    }

    /// Whether the decision for `txn` has been applied
    pub fn is_resolved(&self, txn: &str) -> bool {
        self.state.lock().resolved.contains_key(txn)
    }
}

/// Transport hook of a running participant
struct InboundHook {
    participant: Weak<Participant>,
}

impl MessageHandler for InboundHook {
    fn deliver(&self, message: Message) -> bool {
        match self.participant.upgrade() {
            Some(participant) => {
                participant.route(message);
                true
            }
            None => false,
        }
    }
}
