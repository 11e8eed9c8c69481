//! Checkpoint store tests against an on-disk database
//!
//! The in-memory unit tests cover the CRUD surface; these verify the store
//! behaves the same through a real SQLite file, including reopening it the
//! way a resumed run or `tfprobe destroy` would.

use std::path::Path;

use tempfile::TempDir;
use tfprobe::state::{self, RunStatus};
use tfprobe::terraform;

#[tokio::test]
async fn checkpoints_survive_reopening_the_database() {
    let dir = TempDir::new().unwrap();
    let db_path = dir.path().join("state.db");

    let opts = terraform::configure(
        Path::new("/tmp/tfprobe-run/work"),
        "abc123def456",
        &["1.2.3.4".to_string()],
    );

    {
        let pool = state::open_db_at(&db_path).await.unwrap();
        state::insert_run(&pool, "run-persist", "us-east-1")
            .await
            .unwrap();
        state::save_checkpoint(&pool, "run-persist", "setup_restricted", &opts)
            .await
            .unwrap();
        pool.close().await;
    }

    // A second process (resume or destroy) reopens the same file
    let pool = state::open_db_at(&db_path).await.unwrap();
    assert_eq!(
        state::run_status(&pool, "run-persist").await.unwrap(),
        Some(RunStatus::Running)
    );
    let loaded = state::load_latest_checkpoint(&pool, "run-persist")
        .await
        .unwrap()
        .expect("checkpoint should survive reopening");
    assert_eq!(loaded, opts);
}

#[tokio::test]
async fn runs_are_isolated_by_run_id() {
    let dir = TempDir::new().unwrap();
    let pool = state::open_db_at(&dir.path().join("state.db"))
        .await
        .unwrap();

    let opts_a = terraform::configure(Path::new("/tmp/a"), "aaaaaaaaaaaa", &[]);
    let opts_b = terraform::configure(Path::new("/tmp/b"), "bbbbbbbbbbbb", &[]);

    state::insert_run(&pool, "run-a", "us-east-1").await.unwrap();
    state::insert_run(&pool, "run-b", "us-east-1").await.unwrap();
    state::save_checkpoint(&pool, "run-a", "setup_restricted", &opts_a)
        .await
        .unwrap();
    state::save_checkpoint(&pool, "run-b", "setup_restricted", &opts_b)
        .await
        .unwrap();

    state::mark_run_destroyed(&pool, "run-a").await.unwrap();

    assert!(state::run_destroyed(&pool, "run-a").await.unwrap());
    assert!(!state::run_destroyed(&pool, "run-b").await.unwrap());
    assert_eq!(
        state::load_latest_checkpoint(&pool, "run-b")
            .await
            .unwrap()
            .unwrap(),
        opts_b
    );
}
