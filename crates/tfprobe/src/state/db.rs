//! Database setup and schema management

use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use anyhow::{Context, Result};
use directories::ProjectDirs;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};

/// Database connection pool type alias
pub type DbPool = SqlitePool;

/// Get the default state database path
fn default_db_path() -> Result<PathBuf> {
    let proj_dirs =
        ProjectDirs::from("", "", "tfprobe").context("Failed to get project directories")?;

    let state_dir = proj_dirs.data_local_dir();
    fs::create_dir_all(state_dir).context("Failed to create state directory")?;

    Ok(state_dir.join("state.db"))
}

/// Open the state database at its default location, creating it if needed
pub async fn open_db() -> Result<DbPool> {
    open_db_at(&default_db_path()?).await
}

/// Open a state database at an explicit path
pub async fn open_db_at(path: &Path) -> Result<DbPool> {
    let db_url = format!("sqlite://{}?mode=rwc", path.display());
    let options = SqliteConnectOptions::from_str(&db_url)?.create_if_missing(true);

    let pool = SqlitePoolOptions::new()
        .max_connections(5)
        .connect_with(options)
        .await
        .context("Failed to open state database")?;

    setup_schema(&pool).await?;

    Ok(pool)
}

/// Open an in-memory database for tests.
///
/// A single connection keeps the in-memory schema alive for the pool's
/// lifetime.
pub async fn open_in_memory() -> Result<DbPool> {
    let options = SqliteConnectOptions::from_str("sqlite::memory:")?;
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .connect_with(options)
        .await
        .context("Failed to open in-memory database")?;

    setup_schema(&pool).await?;

    Ok(pool)
}

/// Setup database schema
async fn setup_schema(pool: &DbPool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS runs (
            run_id TEXT PRIMARY KEY,
            region TEXT NOT NULL,
            status TEXT NOT NULL,
            created_at TEXT NOT NULL,
            destroyed_at TEXT
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS checkpoints (
            run_id TEXT NOT NULL REFERENCES runs(run_id),
            stage TEXT NOT NULL,
            payload TEXT NOT NULL,
            updated_at TEXT NOT NULL,
            PRIMARY KEY (run_id, stage)
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_checkpoints_run ON checkpoints(run_id)")
        .execute(pool)
        .await?;

    Ok(())
}
