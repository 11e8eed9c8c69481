//! End-to-end verification flow
//!
//! Four stages in strict order, each resumable from the checkpoint store,
//! followed by a teardown that runs on both the success and the failure
//! path:
//!
//! 1. `setup_restricted` - apply the module with a decoy allow-list
//! 2. `validate_restricted` - the probe must be denied
//! 3. `setup_allowed` - re-apply with the caller's IP in the allow-list
//! 4. `validate_allowed` - the probe must succeed

use std::path::Path;

use anyhow::{Context, Result};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::aws::{AccessKeys, SqsProber};
use crate::config::RunConfig;
use crate::public_ip;
use crate::stage::{stage_skipped, StageRunner};
use crate::state::{self, DbPool, RunStatus};
use crate::terraform::{self, workspace, Terraform, TerraformOptions};

pub const STAGE_SETUP_RESTRICTED: &str = "setup_restricted";
pub const STAGE_VALIDATE_RESTRICTED: &str = "validate_restricted";
pub const STAGE_SETUP_ALLOWED: &str = "setup_allowed";
pub const STAGE_VALIDATE_ALLOWED: &str = "validate_allowed";
pub const STAGE_TEARDOWN: &str = "teardown";

/// Terraform output holding the provisioned access key id
pub const OUTPUT_ACCESS_KEY_ID: &str = "aws_iam_access_key_id";
/// Terraform output holding the provisioned secret access key
pub const OUTPUT_ACCESS_KEY_SECRET: &str = "aws_iam_access_key_secret";

/// Outcome of a completed verification run
#[derive(Debug, Clone)]
pub struct RunReport {
    pub run_id: String,
    pub caller_ip: String,
    /// The probe was denied while the allow-list excluded the caller
    pub denied_when_excluded: bool,
    /// The probe succeeded while the allow-list included the caller
    pub allowed_when_included: bool,
    /// Queue URLs visible to the successful probe
    pub visible_queues: Option<usize>,
}

/// Run the full verification flow.
///
/// The caller IP is resolved exactly once, up front, and threaded through
/// the stages; a discovery failure aborts the run before anything is
/// provisioned. Teardown runs regardless of which stage failed.
pub async fn run(config: &RunConfig) -> Result<RunReport> {
    let caller_ip = public_ip::discover()
        .await
        .context("Cannot determine the caller's public IP; every assertion depends on it")?;

    let run_id = config
        .run_id
        .clone()
        .unwrap_or_else(|| Uuid::now_v7().to_string());
    let unique_id = short_unique_id(&run_id);
    info!(
        run_id = %run_id,
        caller_ip = %caller_ip,
        region = %config.region,
        module = %config.module_dir.display(),
        "Starting verification run"
    );

    let db = state::open_db().await?;
    state::insert_run(&db, &run_id, &config.region).await?;

    let workdir = workspace::stage_module(&config.module_dir, &run_id)?;
    workspace::install_provider_config(&workdir, &config.region)?;

    let tf = Terraform::new();
    let stages = StageRunner::new(run_id.clone());
    let mut report = RunReport {
        run_id: run_id.clone(),
        caller_ip: caller_ip.clone(),
        denied_when_excluded: false,
        allowed_when_included: false,
        visible_queues: None,
    };

    let outcome = execute_stages(
        &stages,
        &tf,
        &db,
        config,
        &run_id,
        &unique_id,
        &workdir,
        &caller_ip,
        &mut report,
    )
    .await;

    let teardown_result = teardown(&db, &tf, &run_id, config.keep).await;

    let status = if outcome.is_ok() {
        RunStatus::Completed
    } else {
        RunStatus::Failed
    };
    if let Err(e) = state::update_run_status(&db, &run_id, status).await {
        warn!(error = ?e, "Failed to record final run status");
    }

    match (outcome, teardown_result) {
        (Ok(()), Ok(())) => Ok(report),
        (Ok(()), Err(e)) => Err(e.context("verification passed but teardown failed")),
        (Err(e), Ok(())) => Err(e),
        (Err(e), Err(teardown_err)) => {
            warn!(error = ?teardown_err, "Teardown failed after stage failure");
            Err(e)
        }
    }
}

#[allow(clippy::too_many_arguments)]
async fn execute_stages(
    stages: &StageRunner,
    tf: &Terraform,
    db: &DbPool,
    config: &RunConfig,
    run_id: &str,
    unique_id: &str,
    workdir: &Path,
    caller_ip: &str,
    report: &mut RunReport,
) -> Result<()> {
    stages
        .run(STAGE_SETUP_RESTRICTED, || async {
            let opts = terraform::configure(workdir, unique_id, &[config.decoy_ip.clone()]);
            state::save_checkpoint(db, run_id, STAGE_SETUP_RESTRICTED, &opts).await?;
            tf.init_and_apply(&opts).await
        })
        .await?;

    stages
        .run(STAGE_VALIDATE_RESTRICTED, || async {
            let opts = load_options(db, run_id).await?;
            let prober = build_prober(tf, &opts, &config.region).await?;
            match prober.list_queues(None).await {
                Ok(output) => {
                    let visible = output.queue_urls().len();
                    anyhow::bail!(
                        "ListQueues from {caller_ip} unexpectedly succeeded \
                         ({visible} queues visible) while the allow-list excludes it"
                    )
                }
                Err(e) => {
                    info!(error = %e, "ListQueues denied as expected");
                    report.denied_when_excluded = true;
                    Ok(())
                }
            }
        })
        .await?;

    stages
        .run(STAGE_SETUP_ALLOWED, || async {
            let mut opts = load_options(db, run_id).await?;
            opts.set_var("allowed_ips", serde_json::json!([caller_ip]));
            state::save_checkpoint(db, run_id, STAGE_SETUP_ALLOWED, &opts).await?;
            tf.init_and_apply(&opts).await
        })
        .await?;

    stages
        .run(STAGE_VALIDATE_ALLOWED, || async {
            let opts = load_options(db, run_id).await?;
            let prober = build_prober(tf, &opts, &config.region).await?;
            let output = prober.list_queues(None).await.with_context(|| {
                format!("ListQueues from {caller_ip} failed even though the allow-list includes it")
            })?;

            let visible = output.queue_urls().len();
            info!(queues = visible, "ListQueues succeeded as expected");
            report.allowed_when_included = true;
            report.visible_queues = Some(visible);
            Ok(())
        })
        .await?;

    Ok(())
}

/// Destroy whatever the run provisioned, driven from its latest checkpoint.
///
/// Idempotent and best-effort: a run with no checkpoint (nothing was ever
/// applied) or one already destroyed is a no-op. Also used by the `destroy`
/// subcommand to tear down a run from an earlier process.
pub async fn teardown(db: &DbPool, tf: &Terraform, run_id: &str, keep: bool) -> Result<()> {
    if keep {
        info!(run_id = %run_id, "Keeping infrastructure (--keep specified)");
        return Ok(());
    }
    if stage_skipped(STAGE_TEARDOWN) {
        info!(stage = STAGE_TEARDOWN, "Stage skipped via environment");
        return Ok(());
    }
    if state::run_destroyed(db, run_id).await? {
        info!(run_id = %run_id, "Infrastructure already destroyed");
        return Ok(());
    }

    let Some(opts) = state::load_latest_checkpoint(db, run_id).await? else {
        debug!(run_id = %run_id, "No checkpoint recorded, nothing to destroy");
        return Ok(());
    };

    info!(
        run_id = %run_id,
        dir = %opts.terraform_dir.display(),
        "Destroying infrastructure"
    );
    tf.destroy(&opts).await.context("terraform destroy failed")?;

    workspace::remove_provider_config(&opts.terraform_dir)?;
    workspace::remove_staged_module(&opts.terraform_dir);
    state::mark_run_destroyed(db, run_id).await?;

    info!(run_id = %run_id, "Teardown complete");
    Ok(())
}

async fn load_options(db: &DbPool, run_id: &str) -> Result<TerraformOptions> {
    state::load_latest_checkpoint(db, run_id)
        .await?
        .with_context(|| {
            format!("no checkpoint for run {run_id}; was a setup stage skipped without a prior run?")
        })
}

async fn build_prober(tf: &Terraform, opts: &TerraformOptions, region: &str) -> Result<SqsProber> {
    let keys = read_access_keys(tf, opts).await?;
    Ok(SqsProber::new(region, &keys))
}

/// Read the provisioned access key pair from the Terraform outputs.
async fn read_access_keys(tf: &Terraform, opts: &TerraformOptions) -> Result<AccessKeys> {
    let access_key_id = tf
        .output(opts, OUTPUT_ACCESS_KEY_ID)
        .await
        .context("Failed to read access key id output")?;
    let secret = tf
        .output(opts, OUTPUT_ACCESS_KEY_SECRET)
        .await
        .context("Failed to read secret access key output")?;
    let keys = AccessKeys::new(access_key_id, secret);
    debug!(access_key_id = %keys.access_key_id(), "Read provisioned access keys");
    Ok(keys)
}

/// Derive the short id used in resource names from a run id.
///
/// Takes the trailing alphanumerics so that v7 run ids generated in the
/// same instant still diverge (their shared prefix is the timestamp).
fn short_unique_id(run_id: &str) -> String {
    let alnum: String = run_id
        .chars()
        .filter(char::is_ascii_alphanumeric)
        .collect();
    let start = alnum.len().saturating_sub(12);
    alnum[start..].to_ascii_lowercase()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::open_in_memory;
    use std::path::PathBuf;

    #[test]
    fn short_unique_id_is_deterministic() {
        let id = "0192cafe-1234-7abc-8def-0123456789ab";
        assert_eq!(short_unique_id(id), short_unique_id(id));
        assert_eq!(short_unique_id(id), "0123456789ab");
    }

    #[test]
    fn short_unique_id_uses_the_random_tail() {
        // Same timestamp prefix, different random bits
        let a = short_unique_id("0192cafe-1234-7abc-8def-000000000001");
        let b = short_unique_id("0192cafe-1234-7abc-8def-000000000002");
        assert_ne!(a, b);
    }

    #[test]
    fn short_unique_id_handles_short_input() {
        assert_eq!(short_unique_id("ab"), "ab");
        assert_eq!(short_unique_id(""), "");
    }

    #[tokio::test]
    async fn teardown_without_checkpoint_is_a_noop() {
        let db = open_in_memory().await.unwrap();
        state::insert_run(&db, "run-empty", "us-east-1").await.unwrap();

        // No checkpoint was ever saved: nothing to destroy, no error
        teardown(&db, &Terraform::new(), "run-empty", false)
            .await
            .unwrap();
        assert!(!state::run_destroyed(&db, "run-empty").await.unwrap());
    }

    #[tokio::test]
    async fn teardown_skips_destroyed_runs() {
        let db = open_in_memory().await.unwrap();
        state::insert_run(&db, "run-done", "us-east-1").await.unwrap();

        let opts = terraform::configure(
            &PathBuf::from("/tmp/does-not-exist"),
            "abc123",
            &["1.2.3.4".to_string()],
        );
        state::save_checkpoint(&db, "run-done", STAGE_SETUP_RESTRICTED, &opts)
            .await
            .unwrap();
        state::mark_run_destroyed(&db, "run-done").await.unwrap();

        // Already destroyed: returns without invoking terraform at all
        teardown(&db, &Terraform::new(), "run-done", false)
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn teardown_honors_keep() {
        let db = open_in_memory().await.unwrap();
        state::insert_run(&db, "run-keep", "us-east-1").await.unwrap();

        let opts = terraform::configure(
            &PathBuf::from("/tmp/does-not-exist"),
            "abc123",
            &["1.2.3.4".to_string()],
        );
        state::save_checkpoint(&db, "run-keep", STAGE_SETUP_RESTRICTED, &opts)
            .await
            .unwrap();

        teardown(&db, &Terraform::new(), "run-keep", true)
            .await
            .unwrap();
        assert!(!state::run_destroyed(&db, "run-keep").await.unwrap());
    }
}
