//! Run lifecycle and stage checkpoint operations

use anyhow::{Context, Result};
use chrono::Utc;

use super::db::DbPool;
use crate::terraform::TerraformOptions;

/// Run lifecycle status
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunStatus {
    Running,
    Completed,
    Failed,
}

impl RunStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RunStatus::Running => "running",
            RunStatus::Completed => "completed",
            RunStatus::Failed => "failed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "running" => Some(RunStatus::Running),
            "completed" => Some(RunStatus::Completed),
            "failed" => Some(RunStatus::Failed),
            _ => None,
        }
    }
}

/// Register a run. A no-op when the run already exists (resumed run).
pub async fn insert_run(pool: &DbPool, run_id: &str, region: &str) -> Result<()> {
    let now = Utc::now().to_rfc3339();

    sqlx::query(
        "INSERT INTO runs (run_id, region, status, created_at)
         VALUES (?, ?, ?, ?)
         ON CONFLICT(run_id) DO NOTHING",
    )
    .bind(run_id)
    .bind(region)
    .bind(RunStatus::Running.as_str())
    .bind(&now)
    .execute(pool)
    .await?;

    Ok(())
}

/// Update run status
pub async fn update_run_status(pool: &DbPool, run_id: &str, status: RunStatus) -> Result<()> {
    sqlx::query("UPDATE runs SET status = ? WHERE run_id = ?")
        .bind(status.as_str())
        .bind(run_id)
        .execute(pool)
        .await?;

    Ok(())
}

/// Fetch run status, if the run exists
pub async fn run_status(pool: &DbPool, run_id: &str) -> Result<Option<RunStatus>> {
    let status: Option<String> =
        sqlx::query_scalar("SELECT status FROM runs WHERE run_id = ?")
            .bind(run_id)
            .fetch_optional(pool)
            .await?;

    Ok(status.as_deref().and_then(RunStatus::parse))
}

/// Whether the run's infrastructure has already been destroyed
pub async fn run_destroyed(pool: &DbPool, run_id: &str) -> Result<bool> {
    let destroyed: Option<bool> =
        sqlx::query_scalar("SELECT destroyed_at IS NOT NULL FROM runs WHERE run_id = ?")
            .bind(run_id)
            .fetch_optional(pool)
            .await?;

    Ok(destroyed.unwrap_or(false))
}

/// Record that teardown destroyed the run's infrastructure.
///
/// Only the first call per run sets the timestamp.
pub async fn mark_run_destroyed(pool: &DbPool, run_id: &str) -> Result<()> {
    let now = Utc::now().to_rfc3339();

    sqlx::query("UPDATE runs SET destroyed_at = ? WHERE run_id = ? AND destroyed_at IS NULL")
        .bind(&now)
        .bind(run_id)
        .execute(pool)
        .await?;

    Ok(())
}

/// Persist the options produced by a stage, replacing any earlier
/// checkpoint from the same stage.
pub async fn save_checkpoint(
    pool: &DbPool,
    run_id: &str,
    stage: &str,
    options: &TerraformOptions,
) -> Result<()> {
    let payload = serde_json::to_string(options).context("Failed to serialize options")?;
    let now = Utc::now().to_rfc3339();

    sqlx::query(
        "INSERT INTO checkpoints (run_id, stage, payload, updated_at)
         VALUES (?, ?, ?, ?)
         ON CONFLICT(run_id, stage) DO UPDATE SET payload = excluded.payload,
                                                  updated_at = excluded.updated_at",
    )
    .bind(run_id)
    .bind(stage)
    .bind(&payload)
    .bind(&now)
    .execute(pool)
    .await?;

    Ok(())
}

/// Load the checkpoint a specific stage produced
pub async fn load_checkpoint(
    pool: &DbPool,
    run_id: &str,
    stage: &str,
) -> Result<Option<TerraformOptions>> {
    let payload: Option<String> = sqlx::query_scalar(
        "SELECT payload FROM checkpoints WHERE run_id = ? AND stage = ?",
    )
    .bind(run_id)
    .bind(stage)
    .fetch_optional(pool)
    .await?;

    parse_payload(payload)
}

/// Load the most recently written checkpoint for a run, whichever stage
/// produced it. This is what probe and teardown stages resume from.
pub async fn load_latest_checkpoint(
    pool: &DbPool,
    run_id: &str,
) -> Result<Option<TerraformOptions>> {
    let payload: Option<String> = sqlx::query_scalar(
        "SELECT payload FROM checkpoints WHERE run_id = ?
         ORDER BY updated_at DESC, rowid DESC LIMIT 1",
    )
    .bind(run_id)
    .fetch_optional(pool)
    .await?;

    parse_payload(payload)
}

fn parse_payload(payload: Option<String>) -> Result<Option<TerraformOptions>> {
    payload
        .map(|p| serde_json::from_str(&p).context("Failed to deserialize checkpointed options"))
        .transpose()
}
