//! Core coordinator implementation

use crate::config::CoordinatorConfig;
use crate::error::{CoordinatorError, Result};
use crate::publish::Publisher;
use crate::record::CoordinatorRecord;
use crate::recovery::RecoveryReport;
use crate::transaction::{EngineContext, TransactionEngine};
use collage_common::{Outcome, SourceRef};
use collage_demux::{Demultiplexer, Inbox};
use collage_engine::{Message, MessageHandler, MockClient};
use collage_protocol::{Envelope, ProtocolMessage};
use collage_wal::WriteAheadLog;
use parking_lot::Mutex;
use std::sync::{Arc, Weak};
use tokio::sync::watch;
use tokio::task::{AbortHandle, JoinHandle};

/// Commit coordinator
///
/// Admits transactions, runs one engine task per transaction and
/// recovers unfinished ones from its log on [`Coordinator::start`].
/// Transactions admitted before recovery has finished wait for it.
pub struct Coordinator {
    /// Shared with every engine
    pub(crate) ctx: Arc<EngineContext>,

    /// Per-transaction routing of votes and ACKs; doubles as the in-flight set
    pub(crate) demux: Demultiplexer<Envelope>,

    /// Opened once recovery is complete
    gate: watch::Sender<bool>,

    /// Running engines
    engines: Mutex<Vec<AbortHandle>>,
}

impl Coordinator {
    /// Create a coordinator; it admits work only after [`Coordinator::start`]
    pub fn new(
        client: MockClient,
        wal: Arc<dyn WriteAheadLog<CoordinatorRecord>>,
        config: CoordinatorConfig,
    ) -> Arc<Self> {
        let (gate, _) = watch::channel(false);
        Arc::new(Self {
            ctx: Arc::new(EngineContext {
                client,
                wal,
                publisher: Publisher::new(config.publish_dir.clone()),
                config,
            }),
            demux: Demultiplexer::new(),
            gate,
            engines: Mutex::new(Vec::new()),
        })
    }

    /// Connect to the transport, recover unfinished transactions and open
    /// admission
    pub async fn start(self: &Arc<Self>) -> Result<RecoveryReport> {
        self.ctx.client.register(Arc::new(InboundHook {
            coordinator: Arc::downgrade(self),
        }))?;

        let report = self.recover()?;
        tracing::info!("[{}] Recovered: {}", self.address(), report);

        self.gate.send_replace(true);
        tracing::info!("[{}] Accepting transactions", self.address());
        Ok(report)
    }

    /// Stop receiving messages and cancel every running engine
    ///
    /// Whatever was not logged is lost, exactly as in a crash.
    pub fn shutdown(&self) {
        self.gate.send_replace(false);
        if let Err(e) = self.ctx.client.unregister() {
            tracing::debug!("[{}] Shutdown: {}", self.address(), e);
        }
        for engine in self.engines.lock().drain(..) {
            engine.abort();
        }
    }

    pub fn address(&self) -> &str {
        self.ctx.client.address()
    }

    pub fn config(&self) -> &CoordinatorConfig {
        &self.ctx.config
    }

    pub fn publisher(&self) -> &Publisher {
        &self.ctx.publisher
    }

    /// Commit `payload` under `name`, assembled from `sources`
    ///
    /// Each source is written `participant:resource`. Resolves to the final
    /// outcome once every participant has acknowledged it. Dropping the
    /// returned future does not cancel the transaction.
    pub async fn commit<S: AsRef<str>>(
        self: &Arc<Self>,
        name: &str,
        payload: Vec<u8>,
        sources: &[S],
    ) -> Result<Outcome> {
        let sources = parse_sources(sources)?;
        self.admit(name.to_string(), payload, sources).await?.await?
    }

    /// Like [`Coordinator::commit`], but runs in the background
    pub fn spawn_commit(
        self: &Arc<Self>,
        name: impl Into<String>,
        payload: Vec<u8>,
        sources: Vec<String>,
    ) -> JoinHandle<Result<Outcome>> {
        let coordinator = self.clone();
        let name = name.into();
        tokio::spawn(async move { coordinator.commit(&name, payload, &sources).await })
    }

    /// Transactions currently owned by an engine
    pub fn in_flight(&self) -> Vec<String> {
        self.demux.transactions()
    }

    /// Wait for recovery, reserve the name and launch a fresh engine
    async fn admit(
        self: &Arc<Self>,
        name: String,
        payload: Vec<u8>,
        sources: Vec<SourceRef>,
    ) -> Result<JoinHandle<Result<Outcome>>> {
        let mut gate = self.gate.subscribe();
        if !*gate.borrow() {
            tracing::debug!("[{}] {} waiting for recovery", self.address(), name);
        }
        // The sender lives in self, so this only returns once the gate opens
        let _ = gate.wait_for(|open| *open).await;

        let inbox = self.reserve(&name)?;
        tracing::info!(
            "[{}] Admitted {} with {} sources",
            self.address(),
            name,
            sources.len()
        );

        let engine = TransactionEngine::new(self.ctx.clone(), name, payload, sources, inbox);
        Ok(self.launch(engine.run()))
    }

    pub(crate) fn reserve(&self, name: &str) -> Result<Inbox<Envelope>> {
        self.demux
            .create_inbox(name)
            .ok_or_else(|| CoordinatorError::DuplicateTransaction(name.to_string()))
    }

    /// Spawn an engine task and keep a handle for shutdown
    pub(crate) fn launch<F>(&self, engine: F) -> JoinHandle<Result<Outcome>>
    where
        F: Future<Output = Result<Outcome>> + Send + 'static,
    {
        let handle = tokio::spawn(engine);

        let mut engines = self.engines.lock();
        engines.retain(|engine| !engine.is_finished());
        engines.push(handle.abort_handle());
        handle
    }

    /// Route an inbound message to the engine of its transaction
    ///
    /// Returns `false` for messages no engine wants, so the transport keeps
    /// them.
    fn route(&self, message: Message) -> bool {
        let decoded = match ProtocolMessage::decode(&message.body) {
            Ok(decoded) => decoded,
            Err(e) => {
                tracing::warn!(
                    "[{}] Dropping undecodable message from {}: {}",
                    self.address(),
                    message.from,
                    e
                );
                return true;
            }
        };

        let txn = decoded.txn.clone();
        match self.demux.deliver(&txn, Envelope::new(message.from, decoded)) {
            Ok(()) => true,
            Err(rejected) => {
                tracing::debug!(
                    "[{}] No transaction {} for {} from {}",
                    self.address(),
                    txn,
                    rejected.message.phase.as_str(),
                    rejected.from
                );
                false
            }
        }
    }
}

fn parse_sources<S: AsRef<str>>(sources: &[S]) -> Result<Vec<SourceRef>> {
    sources
        .iter()
        .map(|s| SourceRef::parse(s.as_ref()).map_err(CoordinatorError::from))
        .collect()
}

/// Transport hook of a running coordinator
struct InboundHook {
    coordinator: Weak<Coordinator>,
}

impl MessageHandler for InboundHook {
    fn deliver(&self, message: Message) -> bool {
        self.coordinator
            .upgrade()
            .is_some_and(|coordinator| coordinator.route(message))
    }
}
