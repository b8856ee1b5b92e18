//! End-to-end commits over the mock engine

mod common;

use collage_common::{Outcome, SourceRef, Vote};
use collage_coordinator::{CoordinatorError, CoordinatorRecord};
use collage_engine::{Delivery, MockClient};
use collage_participant::FixedOracle;
use collage_protocol::{Phase, ProtocolMessage};
use common::{COORDINATOR, Cluster, eventually, phase_of};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

#[tokio::test]
async fn test_unanimous_accept_commits() {
    let mut cluster = Cluster::new();
    cluster.add_approving_node("node-a", &["a.jpg", "keep.jpg"]);
    cluster.add_approving_node("node-b", &["b1.jpg", "b2.jpg"]);
    let (coordinator, _) = cluster.start_coordinator().await;

    let outcome = coordinator
        .commit(
            "collage.jpg",
            b"collage".to_vec(),
            &["node-a:a.jpg", "node-b:b1.jpg", "node-b:b2.jpg"],
        )
        .await
        .unwrap();

    assert_eq!(outcome, Outcome::Commit);
    assert!(cluster.is_published("collage.jpg"));
    assert!(!cluster.has_file("node-a", "a.jpg"));
    assert!(cluster.has_file("node-a", "keep.jpg"));
    assert!(!cluster.has_file("node-b", "b1.jpg"));
    assert!(!cluster.has_file("node-b", "b2.jpg"));
    assert!(cluster.participant("node-a").locked_resources().is_empty());
    assert!(coordinator.in_flight().is_empty());

    assert_eq!(
        cluster.wal.records().unwrap(),
        vec![
            CoordinatorRecord::Prepare {
                txn: "collage.jpg".into(),
                sources: vec![
                    SourceRef::new("node-a", "a.jpg"),
                    SourceRef::new("node-b", "b1.jpg"),
                    SourceRef::new("node-b", "b2.jpg"),
                ],
            },
            CoordinatorRecord::Decision {
                txn: "collage.jpg".into(),
                outcome: Outcome::Commit,
            },
            CoordinatorRecord::Done {
                txn: "collage.jpg".into(),
            },
        ]
    );

    // One PREPARE per participant, carrying only that participant's files
    assert_eq!(
        cluster
            .sent_phases(COORDINATOR, "node-b")
            .iter()
            .filter(|p| **p == Phase::Prepare)
            .count(),
        1
    );
}

#[tokio::test]
async fn test_refusal_aborts() {
    let mut cluster = Cluster::new();
    cluster.add_approving_node("node-a", &["a.jpg"]);
    cluster.add_node("node-b", &["b.jpg"], Arc::new(FixedOracle::refuse()));
    let (coordinator, _) = cluster.start_coordinator().await;

    let outcome = coordinator
        .commit("collage.jpg", b"collage".to_vec(), &["node-a:a.jpg", "node-b:b.jpg"])
        .await
        .unwrap();

    assert_eq!(outcome, Outcome::Abort);
    assert!(!cluster.is_published("collage.jpg"));
    assert!(cluster.has_file("node-a", "a.jpg"));
    assert!(cluster.has_file("node-b", "b.jpg"));
    assert!(cluster.participant("node-a").locked_resources().is_empty());
}

#[tokio::test]
async fn test_silent_participant_times_out_to_abort() {
    let mut cluster = Cluster::new();
    let a = cluster.add_approving_node("node-a", &["a.jpg"]);
    cluster.add_approving_node("node-b", &["b.jpg"]);
    cluster.engine.partition("node-b");
    let (coordinator, _) = cluster.start_coordinator().await;

    let commit = coordinator.spawn_commit(
        "collage.jpg",
        b"collage".to_vec(),
        vec!["node-a:a.jpg".into(), "node-b:b.jpg".into()],
    );

    // A voted ACCEPT, then learns ABORT and unlocks without deleting
    eventually(|| a.is_resolved("collage.jpg")).await;
    assert!(cluster.has_file("node-a", "a.jpg"));
    assert!(a.locked_resources().is_empty());
    assert!(!cluster.is_published("collage.jpg"));
    assert!(cluster.wal.records().unwrap().contains(&CoordinatorRecord::Decision {
        txn: "collage.jpg".into(),
        outcome: Outcome::Abort,
    }));

    // The decision is retried until B is reachable again
    assert!(!commit.is_finished());
    cluster.engine.heal("node-b");

    let outcome = tokio::time::timeout(Duration::from_secs(5), commit)
        .await
        .unwrap()
        .unwrap()
        .unwrap();
    assert_eq!(outcome, Outcome::Abort);
    assert!(cluster.has_file("node-b", "b.jpg"));
}

#[tokio::test]
async fn test_duplicated_and_lost_messages() {
    let mut cluster = Cluster::new();
    cluster.add_approving_node("node-a", &["a.jpg"]);
    cluster.add_approving_node("node-b", &["b.jpg"]);

    // Everything is delivered twice, and the first COMMIT to A is lost
    let dropped = Arc::new(AtomicBool::new(false));
    let plan_dropped = dropped.clone();
    cluster.engine.set_fault_plan(move |message| {
        if message.to == "node-a"
            && phase_of(&message.body) == Some(Phase::Commit)
            && !plan_dropped.swap(true, Ordering::SeqCst)
        {
            return Delivery::Drop;
        }
        Delivery::Duplicate
    });

    let (coordinator, _) = cluster.start_coordinator().await;
    let outcome = coordinator
        .commit("collage.jpg", b"collage".to_vec(), &["node-a:a.jpg", "node-b:b.jpg"])
        .await
        .unwrap();

    assert_eq!(outcome, Outcome::Commit);
    assert!(dropped.load(Ordering::SeqCst));
    assert!(!cluster.has_file("node-a", "a.jpg"));
    assert!(!cluster.has_file("node-b", "b.jpg"));

    // Each side logged every step exactly once
    assert_eq!(cluster.wal.len(), 3);
    assert_eq!(cluster.nodes["node-a"].wal.len(), 3);
    assert_eq!(cluster.nodes["node-b"].wal.len(), 3);

    let commits_to_a = cluster
        .sent_phases(COORDINATOR, "node-a")
        .into_iter()
        .filter(|p| *p == Phase::Commit)
        .count();
    assert!(commits_to_a >= 2);
}

#[tokio::test]
async fn test_failed_decision_log_is_retried() {
    let mut cluster = Cluster::new();
    let a = cluster.add_approving_node("node-a", &["a.jpg"]);
    cluster.add_approving_node("node-b", &["b.jpg"]);

    // The log breaks once the first vote is on its way back
    let wal = cluster.wal.clone();
    cluster.engine.set_fault_plan(move |message| {
        if message.from == "node-a" && phase_of(&message.body) == Some(Phase::Accept) {
            wal.fail_appends(true);
        }
        Delivery::Deliver
    });

    let (coordinator, _) = cluster.start_coordinator().await;
    let commit = coordinator.spawn_commit(
        "X",
        b"collage".to_vec(),
        vec!["node-a:a.jpg".into(), "node-b:b.jpg".into()],
    );
    eventually(|| a.lock_owner("a.jpg").is_some()).await;
    tokio::time::sleep(Duration::from_millis(200)).await;

    // Still owned by its engine, and no participant heard a decision
    assert!(!commit.is_finished());
    assert_eq!(coordinator.in_flight(), vec!["X".to_string()]);
    assert_eq!(cluster.wal.len(), 1);
    assert_eq!(a.lock_owner("a.jpg").as_deref(), Some("X"));
    assert!(!cluster.sent_phases(COORDINATOR, "node-a").contains(&Phase::Commit));

    let again = coordinator.commit("X", b"x".to_vec(), &["node-a:a.jpg"]).await;
    assert!(matches!(again, Err(CoordinatorError::DuplicateTransaction(_))));

    cluster.engine.clear_fault_plan();
    cluster.wal.fail_appends(false);
    let outcome = tokio::time::timeout(Duration::from_secs(5), commit)
        .await
        .unwrap()
        .unwrap()
        .unwrap();

    assert_eq!(outcome, Outcome::Commit);
    assert!(cluster.is_published("X"));
    assert!(!cluster.has_file("node-a", "a.jpg"));
    assert!(a.locked_resources().is_empty());
    assert_eq!(cluster.wal.len(), 3);
}

#[tokio::test]
async fn test_concurrent_transactions_on_disjoint_resources() {
    let mut cluster = Cluster::new();
    cluster.add_approving_node("node-a", &["a1.jpg", "a2.jpg"]);
    cluster.add_approving_node("node-b", &["b1.jpg", "b2.jpg"]);
    let (coordinator, _) = cluster.start_coordinator().await;

    let first = coordinator.spawn_commit(
        "first.jpg",
        b"one".to_vec(),
        vec!["node-a:a1.jpg".into(), "node-b:b1.jpg".into()],
    );
    let second = coordinator.spawn_commit(
        "second.jpg",
        b"two".to_vec(),
        vec!["node-a:a2.jpg".into(), "node-b:b2.jpg".into()],
    );

    for commit in [first, second] {
        let outcome = tokio::time::timeout(Duration::from_secs(5), commit)
            .await
            .unwrap()
            .unwrap()
            .unwrap();
        assert_eq!(outcome, Outcome::Commit);
    }

    assert!(cluster.is_published("first.jpg"));
    assert!(cluster.is_published("second.jpg"));
    for (node, file) in [
        ("node-a", "a1.jpg"),
        ("node-a", "a2.jpg"),
        ("node-b", "b1.jpg"),
        ("node-b", "b2.jpg"),
    ] {
        assert!(!cluster.has_file(node, file));
    }
    assert_eq!(cluster.wal.len(), 6);
    assert!(coordinator.in_flight().is_empty());
}

#[tokio::test]
async fn test_locked_resource_aborts_second_transaction() {
    let mut cluster = Cluster::new();
    let a = cluster.add_approving_node("node-a", &["a.jpg"]);
    let (coordinator, _) = cluster.start_coordinator().await;

    let names = vec!["a.jpg".to_string()];
    assert_eq!(a.handle_prepare("X", &names, b"x").await.unwrap(), Vote::Accept);

    let outcome = coordinator
        .commit("Y", b"y".to_vec(), &["node-a:a.jpg"])
        .await
        .unwrap();

    assert_eq!(outcome, Outcome::Abort);
    assert_eq!(a.lock_owner("a.jpg").as_deref(), Some("X"));
    assert!(cluster.has_file("node-a", "a.jpg"));
}

#[tokio::test]
async fn test_no_sources_commits_immediately() {
    let cluster = Cluster::new();
    let (coordinator, _) = cluster.start_coordinator().await;

    let sources: [&str; 0] = [];
    let outcome = coordinator
        .commit("empty.jpg", b"blank".to_vec(), &sources)
        .await
        .unwrap();

    assert_eq!(outcome, Outcome::Commit);
    assert_eq!(
        std::fs::read(cluster.publish.path().join("empty.jpg")).unwrap(),
        b"blank"
    );
}

#[tokio::test]
async fn test_unpublishable_name_aborts() {
    let mut cluster = Cluster::new();
    cluster.add_approving_node("node-a", &["a.jpg"]);
    let (coordinator, _) = cluster.start_coordinator().await;

    let outcome = coordinator
        .commit("../outside.jpg", b"x".to_vec(), &["node-a:a.jpg"])
        .await
        .unwrap();

    assert_eq!(outcome, Outcome::Abort);
    assert!(cluster.has_file("node-a", "a.jpg"));
}

#[tokio::test]
async fn test_invalid_source_is_rejected() {
    let cluster = Cluster::new();
    let (coordinator, _) = cluster.start_coordinator().await;

    let result = coordinator
        .commit("collage.jpg", b"x".to_vec(), &["no-separator"])
        .await;

    assert!(matches!(result, Err(CoordinatorError::InvalidSource(_))));
    assert!(cluster.wal.is_empty());
}

#[tokio::test]
async fn test_duplicate_transaction_name_in_flight() {
    let mut cluster = Cluster::new();
    cluster.add_approving_node("node-a", &["a.jpg"]);
    cluster.engine.partition("node-a");
    let (coordinator, _) = cluster.start_coordinator().await;

    let first = coordinator.spawn_commit("X", b"x".to_vec(), vec!["node-a:a.jpg".into()]);
    eventually(|| coordinator.in_flight() == vec!["X".to_string()]).await;

    let second = coordinator.commit("X", b"x".to_vec(), &["node-a:a.jpg"]).await;
    assert!(matches!(second, Err(CoordinatorError::DuplicateTransaction(name)) if name == "X"));

    cluster.engine.heal("node-a");
    let outcome = tokio::time::timeout(Duration::from_secs(5), first)
        .await
        .unwrap()
        .unwrap()
        .unwrap();
    assert_eq!(outcome, Outcome::Abort);
}

#[tokio::test]
async fn test_admission_waits_for_recovery() {
    let cluster = Cluster::new();
    let coordinator = collage_coordinator::Coordinator::new(
        MockClient::new(COORDINATOR, cluster.engine.clone()),
        Arc::new(cluster.wal.clone()),
        cluster.config(),
    );

    let commit = coordinator.spawn_commit("early.jpg", b"x".to_vec(), Vec::new());
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(!commit.is_finished());
    assert!(cluster.wal.is_empty());

    coordinator.start().await.unwrap();
    let outcome = tokio::time::timeout(Duration::from_secs(5), commit)
        .await
        .unwrap()
        .unwrap()
        .unwrap();
    assert_eq!(outcome, Outcome::Commit);
}

#[tokio::test]
async fn test_inbound_message_handling() {
    let cluster = Cluster::new();
    let (_coordinator, _) = cluster.start_coordinator().await;
    let stranger = MockClient::new("stranger", cluster.engine.clone());

    // Unknown transaction: kept by the transport for later
    stranger.send(COORDINATOR, ProtocolMessage::ack("ghost").encode());
    // Undecodable: consumed and dropped
    stranger.send(COORDINATOR, b"\xff\xfe".to_vec());

    let retained = {
        let mut found = None;
        for _ in 0..100 {
            if let Some(message) = cluster.engine.next_retained(COORDINATOR) {
                found = Some(message);
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        found.unwrap()
    };
    assert_eq!(phase_of(&retained.body), Some(Phase::Ack));

    tokio::time::sleep(Duration::from_millis(20)).await;
    assert!(cluster.engine.next_retained(COORDINATOR).is_none());
}
