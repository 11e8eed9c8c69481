//! Named, skippable test stages
//!
//! A stage runs at most once per invocation and is terminal on its first
//! unrecovered failure. Setting `SKIP_<STAGE>` in the environment elides a
//! stage so a run can be resumed from its persisted checkpoints.

use std::future::Future;
use std::time::Instant;

use anyhow::{Context, Result};
use tracing::info;

/// Runs named stages in sequence for one run id
#[derive(Debug, Clone)]
pub struct StageRunner {
    run_id: String,
}

impl StageRunner {
    pub fn new(run_id: impl Into<String>) -> Self {
        Self {
            run_id: run_id.into(),
        }
    }

    /// Execute a stage unless its skip variable is set.
    ///
    /// The first failing stage aborts the remaining stages of the run; the
    /// caller is responsible for still running teardown.
    pub async fn run<F, Fut>(&self, name: &str, stage: F) -> Result<()>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<()>>,
    {
        if stage_skipped(name) {
            info!(stage = %name, run_id = %self.run_id, "Stage skipped via environment");
            return Ok(());
        }

        info!(stage = %name, run_id = %self.run_id, "Running stage");
        let started = Instant::now();

        stage()
            .await
            .with_context(|| format!("stage '{name}' failed"))?;

        info!(
            stage = %name,
            elapsed_secs = started.elapsed().as_secs(),
            "Stage complete"
        );
        Ok(())
    }
}

/// Environment variable that skips a stage
pub fn skip_env_var(name: &str) -> String {
    format!("SKIP_{}", name.to_ascii_uppercase())
}

/// Whether the environment requests skipping this stage.
///
/// Any non-empty value other than "0" counts as a skip.
pub fn stage_skipped(name: &str) -> bool {
    match std::env::var(skip_env_var(name)) {
        Ok(value) => !value.is_empty() && value != "0",
        Err(_) => false,
    }
}
