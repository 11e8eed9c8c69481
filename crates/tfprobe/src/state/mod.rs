//! SQLite-backed run state and stage checkpoints
//!
//! Uses sqlx for async database access with a connection pool. Runs are
//! tracked through a status lifecycle; serialized Terraform options are
//! checkpointed per stage so later stages (and `tfprobe destroy`) can resume
//! without reconstructing state.

mod checkpoint;
mod db;

pub use checkpoint::{
    insert_run, load_checkpoint, load_latest_checkpoint, mark_run_destroyed, run_destroyed,
    run_status, save_checkpoint, update_run_status, RunStatus,
};
pub use db::{open_db, open_db_at, open_in_memory, DbPool};
