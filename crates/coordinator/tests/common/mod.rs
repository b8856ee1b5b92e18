//! Test cluster: one coordinator and any number of participants over a
//! shared mock engine, with logs that survive simulated restarts

#![allow(dead_code)]

use collage_coordinator::{Coordinator, CoordinatorConfig, CoordinatorRecord, RecoveryReport};
use collage_engine::{MockClient, MockEngine};
use collage_participant::{
    ApprovalOracle, DirectoryStore, FixedOracle, Participant, ParticipantConfig,
    ParticipantRecord,
};
use collage_protocol::{Phase, ProtocolMessage};
use collage_wal_memory::MemoryWal;
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tempfile::{TempDir, tempdir};

pub const COORDINATOR: &str = "coordinator";

pub struct Node {
    pub dir: TempDir,
    pub wal: MemoryWal<ParticipantRecord>,
    pub participant: Arc<Participant>,
}

pub struct Cluster {
    pub engine: Arc<MockEngine>,
    pub publish: TempDir,
    pub wal: MemoryWal<CoordinatorRecord>,
    pub nodes: BTreeMap<String, Node>,
}

impl Cluster {
    pub fn new() -> Self {
        Self {
            engine: Arc::new(MockEngine::new()),
            publish: tempdir().unwrap(),
            wal: MemoryWal::new(),
            nodes: BTreeMap::new(),
        }
    }

    pub fn config(&self) -> CoordinatorConfig {
        CoordinatorConfig::new(self.publish.path())
            .with_vote_timeout(Duration::from_millis(300))
            .with_retry_interval(Duration::from_millis(50))
    }

    /// Start a coordinator over the cluster's log
    pub async fn start_coordinator(&self) -> (Arc<Coordinator>, RecoveryReport) {
        let coordinator = Coordinator::new(
            MockClient::new(COORDINATOR, self.engine.clone()),
            Arc::new(self.wal.clone()),
            self.config(),
        );
        let report = coordinator.start().await.unwrap();
        (coordinator, report)
    }

    /// Add a participant owning `files`
    pub fn add_node(
        &mut self,
        name: &str,
        files: &[&str],
        oracle: Arc<dyn ApprovalOracle>,
    ) -> Arc<Participant> {
        let dir = tempdir().unwrap();
        for file in files {
            std::fs::write(dir.path().join(file), file.as_bytes()).unwrap();
        }
        let wal = MemoryWal::new();
        let participant = start_participant(&self.engine, name, dir.path(), &wal, oracle);

        self.nodes.insert(
            name.to_string(),
            Node {
                dir,
                wal,
                participant: participant.clone(),
            },
        );
        participant
    }

    pub fn add_approving_node(&mut self, name: &str, files: &[&str]) -> Arc<Participant> {
        self.add_node(name, files, Arc::new(FixedOracle::approve()))
    }

    /// Crash a participant and start it again over the same log and files
    pub fn restart_node(&mut self, name: &str) -> Arc<Participant> {
        let node = self.nodes.get_mut(name).unwrap();
        node.participant.shutdown();
        node.participant = start_participant(
            &self.engine,
            name,
            node.dir.path(),
            &node.wal,
            Arc::new(FixedOracle::approve()),
        );
        node.participant.clone()
    }

    pub fn participant(&self, name: &str) -> &Arc<Participant> {
        &self.nodes[name].participant
    }

    pub fn has_file(&self, node: &str, file: &str) -> bool {
        self.nodes[node].dir.path().join(file).exists()
    }

    pub fn is_published(&self, name: &str) -> bool {
        self.publish.path().join(name).exists()
    }

    /// Phases of every message sent from one address to another
    pub fn sent_phases(&self, from: &str, to: &str) -> Vec<Phase> {
        self.engine
            .sent_messages()
            .into_iter()
            .filter(|m| m.from == from && m.to == to)
            .filter_map(|m| ProtocolMessage::decode(&m.body).ok())
            .map(|m| m.phase)
            .collect()
    }
}

fn start_participant(
    engine: &Arc<MockEngine>,
    name: &str,
    dir: &Path,
    wal: &MemoryWal<ParticipantRecord>,
    oracle: Arc<dyn ApprovalOracle>,
) -> Arc<Participant> {
    Participant::new(
        MockClient::new(name, engine.clone()),
        Arc::new(wal.clone()),
        Arc::new(DirectoryStore::new(dir)),
        oracle,
        ParticipantConfig::default(),
    )
    .start()
    .unwrap()
}

/// Poll `condition` until it holds, failing the test after a few seconds
pub async fn eventually(mut condition: impl FnMut() -> bool) {
    for _ in 0..500 {
        if condition() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("condition not reached in time");
}

/// Phase of a raw transport body, if it decodes
pub fn phase_of(body: &[u8]) -> Option<Phase> {
    ProtocolMessage::decode(body).ok().map(|m| m.phase)
}
