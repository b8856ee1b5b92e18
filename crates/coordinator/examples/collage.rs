//! Assemble a collage from two participants' files with two-phase commit
//!
//! Each participant owns a directory of images. The coordinator publishes
//! the collage only if both agree to give their images up, and each
//! participant deletes exactly the images it contributed.
//!
//! Run with: RUST_LOG=debug cargo run --example collage

use collage_coordinator::{Coordinator, CoordinatorConfig, CoordinatorRecord};
use collage_engine::{MockClient, MockEngine};
use collage_participant::{
    DirectoryStore, FixedOracle, Participant, ParticipantConfig, ParticipantRecord,
};
use collage_wal_file::FileWal;
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let root = tempfile::tempdir()?;
    let engine = Arc::new(MockEngine::new());

    // Two participants, each with its own images and log
    let mut participants = Vec::new();
    for (name, images) in [("alice", ["sun.jpg", "sea.jpg"]), ("bob", ["tree.jpg", "hill.jpg"])] {
        let dir = root.path().join(name);
        std::fs::create_dir_all(&dir)?;
        for image in images {
            std::fs::write(dir.join(image), image.as_bytes())?;
        }

        let wal: FileWal<ParticipantRecord> = FileWal::open_in(&dir)?;
        let participant = Participant::new(
            MockClient::new(name, engine.clone()),
            Arc::new(wal),
            Arc::new(DirectoryStore::new(&dir)),
            Arc::new(FixedOracle::approve()),
            ParticipantConfig::default(),
        )
        .start()?;
        participants.push(participant);
    }

    let coordinator_dir = root.path().join("coordinator");
    let wal: FileWal<CoordinatorRecord> = FileWal::open_in(&coordinator_dir)?;
    let coordinator = Coordinator::new(
        MockClient::new("coordinator", engine.clone()),
        Arc::new(wal),
        CoordinatorConfig::new(&coordinator_dir).with_retry_interval(Duration::from_millis(200)),
    );
    coordinator.start().await?;

    let outcome = coordinator
        .commit(
            "holiday.jpg",
            b"sun+sea+tree".to_vec(),
            &["alice:sun.jpg", "alice:sea.jpg", "bob:tree.jpg"],
        )
        .await?;
    println!("holiday.jpg: {outcome}");

    // bob:sun.jpg does not exist, so bob refuses
    let outcome = coordinator
        .commit(
            "broken.jpg",
            b"hill+sun".to_vec(),
            &["bob:hill.jpg", "bob:sun.jpg"],
        )
        .await?;
    println!("broken.jpg: {outcome}");

    for participant in &participants {
        participant.shutdown();
    }
    coordinator.shutdown();
    Ok(())
}
