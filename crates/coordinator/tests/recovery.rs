//! Crash and restart of coordinator and participants

mod common;

use collage_common::{Outcome, SourceRef, Vote};
use collage_coordinator::{Coordinator, CoordinatorConfig, CoordinatorError, CoordinatorRecord};
use collage_engine::{Delivery, MockClient};
use collage_protocol::Phase;
use collage_wal::WriteAheadLog;
use collage_wal_file::FileWal;
use common::{COORDINATOR, Cluster, eventually, phase_of};
use std::sync::Arc;
use std::time::Duration;
use tempfile::tempdir;

fn names(names: &[&str]) -> Vec<String> {
    names.iter().map(|n| n.to_string()).collect()
}

/// Both participants vote ACCEPT on `txn` as if the coordinator had asked
async fn vote_accept(cluster: &Cluster, txn: &str) {
    let a = cluster.participant("node-a");
    let b = cluster.participant("node-b");
    assert_eq!(a.handle_prepare(txn, &names(&["a.jpg"]), b"").await.unwrap(), Vote::Accept);
    assert_eq!(b.handle_prepare(txn, &names(&["b.jpg"]), b"").await.unwrap(), Vote::Accept);
}

fn two_node_cluster() -> Cluster {
    let mut cluster = Cluster::new();
    cluster.add_approving_node("node-a", &["a.jpg"]);
    cluster.add_approving_node("node-b", &["b.jpg"]);
    cluster
}

fn prepare_record(txn: &str) -> CoordinatorRecord {
    CoordinatorRecord::Prepare {
        txn: txn.into(),
        sources: vec![
            SourceRef::new("node-a", "a.jpg"),
            SourceRef::new("node-b", "b.jpg"),
        ],
    }
}

#[tokio::test]
async fn test_logged_commit_is_resumed_without_new_votes() {
    let cluster = two_node_cluster();
    vote_accept(&cluster, "X").await;

    // Crash right after the decision hit the log
    cluster.wal.append(&prepare_record("X")).unwrap();
    cluster
        .wal
        .append(&CoordinatorRecord::Decision {
            txn: "X".into(),
            outcome: Outcome::Commit,
        })
        .unwrap();

    let (coordinator, report) = cluster.start_coordinator().await;
    assert_eq!(report.resumed, vec!["X".to_string()]);
    assert!(report.aborted.is_empty());

    eventually(|| coordinator.in_flight().is_empty()).await;
    assert!(!cluster.has_file("node-a", "a.jpg"));
    assert!(!cluster.has_file("node-b", "b.jpg"));
    assert_eq!(
        cluster.wal.records().unwrap().last(),
        Some(&CoordinatorRecord::Done { txn: "X".into() })
    );

    // No second vote round
    for node in ["node-a", "node-b"] {
        assert!(!cluster.sent_phases(COORDINATOR, node).contains(&Phase::Prepare));
    }
}

#[tokio::test]
async fn test_undecided_transaction_is_aborted() {
    let cluster = two_node_cluster();
    vote_accept(&cluster, "X").await;

    // Crash after publishing but before the decision was logged
    cluster.wal.append(&prepare_record("X")).unwrap();
    std::fs::write(cluster.publish.path().join("X"), b"half-done").unwrap();

    let (coordinator, report) = cluster.start_coordinator().await;
    assert_eq!(report.aborted, vec!["X".to_string()]);

    eventually(|| coordinator.in_flight().is_empty()).await;
    assert!(!cluster.is_published("X"));
    assert!(cluster.has_file("node-a", "a.jpg"));
    assert!(cluster.has_file("node-b", "b.jpg"));
    assert!(cluster.participant("node-a").locked_resources().is_empty());
    assert!(cluster.participant("node-b").locked_resources().is_empty());

    assert_eq!(
        cluster.wal.records().unwrap(),
        vec![
            prepare_record("X"),
            CoordinatorRecord::Decision {
                txn: "X".into(),
                outcome: Outcome::Abort,
            },
            CoordinatorRecord::Done { txn: "X".into() },
        ]
    );
}

#[tokio::test]
async fn test_coordinator_crash_during_broadcast() {
    let cluster = two_node_cluster();

    // B's ACKs never arrive, so the first coordinator keeps broadcasting
    cluster.engine.set_fault_plan(|message| {
        if message.from == "node-b" && phase_of(&message.body) == Some(Phase::Ack) {
            Delivery::Drop
        } else {
            Delivery::Deliver
        }
    });

    let (first, _) = cluster.start_coordinator().await;
    let commit = first.spawn_commit(
        "X",
        b"collage".to_vec(),
        vec!["node-a:a.jpg".into(), "node-b:b.jpg".into()],
    );
    eventually(|| cluster.participant("node-b").is_resolved("X")).await;
    assert!(cluster.is_published("X"));

    first.shutdown();
    assert!(matches!(
        commit.await.unwrap(),
        Err(CoordinatorError::Join(e)) if e.is_cancelled()
    ));
    cluster.engine.clear_fault_plan();

    let (second, report) = cluster.start_coordinator().await;
    assert_eq!(report.resumed, vec!["X".to_string()]);
    eventually(|| second.in_flight().is_empty()).await;

    assert!(cluster.is_published("X"));
    assert!(!cluster.has_file("node-a", "a.jpg"));
    assert!(!cluster.has_file("node-b", "b.jpg"));

    // One vote round in total, and B logged its decision only once
    let prepares = cluster
        .sent_phases(COORDINATOR, "node-b")
        .into_iter()
        .filter(|p| *p == Phase::Prepare)
        .count();
    assert_eq!(prepares, 1);
    assert_eq!(cluster.nodes["node-b"].wal.len(), 3);
}

#[tokio::test]
async fn test_participant_restart_before_decision() {
    let mut cluster = two_node_cluster();

    // Hold decisions for B back until it has restarted
    cluster.engine.set_fault_plan(|message| {
        if message.to == "node-b" && phase_of(&message.body) == Some(Phase::Commit) {
            Delivery::Drop
        } else {
            Delivery::Deliver
        }
    });

    let (coordinator, _) = cluster.start_coordinator().await;
    let commit = coordinator.spawn_commit(
        "X",
        b"collage".to_vec(),
        vec!["node-a:a.jpg".into(), "node-b:b.jpg".into()],
    );
    eventually(|| cluster.participant("node-a").is_resolved("X")).await;
    assert_eq!(
        cluster.participant("node-b").lock_owner("b.jpg").as_deref(),
        Some("X")
    );

    let b = cluster.restart_node("node-b");
    assert_eq!(b.lock_owner("b.jpg").as_deref(), Some("X"));
    assert_eq!(b.pending_transactions(), vec!["X".to_string()]);

    cluster.engine.clear_fault_plan();
    let outcome = tokio::time::timeout(Duration::from_secs(5), commit)
        .await
        .unwrap()
        .unwrap()
        .unwrap();

    assert_eq!(outcome, Outcome::Commit);
    assert!(!cluster.has_file("node-b", "b.jpg"));
    assert!(b.locked_resources().is_empty());
}

#[tokio::test]
async fn test_restart_over_file_log_compacts_finished_work() {
    let mut cluster = Cluster::new();
    cluster.add_approving_node("node-a", &["a.jpg"]);
    let logs = tempdir().unwrap();
    let config: CoordinatorConfig = cluster.config();

    {
        let wal: FileWal<CoordinatorRecord> = FileWal::open_in(logs.path()).unwrap();
        let coordinator = Coordinator::new(
            MockClient::new(COORDINATOR, cluster.engine.clone()),
            Arc::new(wal),
            config.clone(),
        );
        coordinator.start().await.unwrap();
        let outcome = coordinator
            .commit("collage.jpg", b"collage".to_vec(), &["node-a:a.jpg"])
            .await
            .unwrap();
        assert_eq!(outcome, Outcome::Commit);
        coordinator.shutdown();
    }

    let wal: FileWal<CoordinatorRecord> = FileWal::open_in(logs.path()).unwrap();
    let wal = Arc::new(wal);
    let coordinator = Coordinator::new(
        MockClient::new(COORDINATOR, cluster.engine.clone()),
        wal.clone(),
        config,
    );
    let report = coordinator.start().await.unwrap();

    assert_eq!(report.completed, 1);
    assert!(report.resumed.is_empty());
    assert!(coordinator.in_flight().is_empty());
    assert_eq!(wal.replay().unwrap().count(), 0);
}
