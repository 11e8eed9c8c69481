//! tfprobe: staged verification of IP-restricted IAM policies
//!
//! Provisions a Terraform IAM user module, probes SQS with the provisioned
//! credentials under a denied and then an allowed IP configuration, and
//! tears everything down.

use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tfprobe::config::{RunConfig, DEFAULT_DECOY_IP, DEFAULT_REGION};
use tfprobe::runner::{self, RunReport};
use tfprobe::state;
use tfprobe::terraform::Terraform;
use tracing::info;

#[derive(Parser, Debug)]
#[command(name = "tfprobe")]
#[command(about = "Verify IP-restricted IAM policies provisioned with Terraform")]
#[command(version)]
struct Args {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the full verification flow against a module
    Run {
        /// Path to the Terraform module creating the restricted IAM user
        #[arg(long)]
        module_dir: PathBuf,

        /// AWS region for provisioning and the SQS probe
        #[arg(long, default_value = DEFAULT_REGION)]
        region: String,

        /// Allow-list entry for the restrictive stage (must not match the caller)
        #[arg(long, default_value = DEFAULT_DECOY_IP)]
        decoy_ip: String,

        /// Keep the provisioned infrastructure instead of destroying it
        #[arg(long)]
        keep: bool,

        /// Resume an existing run id instead of generating a fresh one
        /// (combine with SKIP_<STAGE> environment variables)
        #[arg(long, env = "TFPROBE_RUN_ID")]
        run_id: Option<String>,
    },

    /// Destroy the infrastructure of a persisted run
    Destroy {
        /// Run id to tear down
        #[arg(long)]
        run_id: String,
    },
}

#[tokio::main]
async fn main() {
    if let Err(e) = run().await {
        print_error(&e);
        std::process::exit(1);
    }
}

/// Print error in a user-friendly way
fn print_error(e: &anyhow::Error) {
    use std::io::Write;

    let mut stderr = std::io::stderr();

    let _ = writeln!(stderr, "\n\x1b[1;31mError:\x1b[0m {e}");

    let mut source = e.source();
    while let Some(cause) = source {
        let _ = writeln!(stderr, "  \x1b[33mCaused by:\x1b[0m {cause}");
        source = cause.source();
    }

    if std::env::var("RUST_BACKTRACE").is_err() {
        let _ = writeln!(
            stderr,
            "\n\x1b[2mSet RUST_BACKTRACE=1 for a detailed backtrace\x1b[0m"
        );
    }
}

async fn run() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .init();

    let args = Args::parse();

    match args.command {
        Command::Run {
            module_dir,
            region,
            decoy_ip,
            keep,
            run_id,
        } => {
            let config = RunConfig {
                module_dir,
                region,
                decoy_ip,
                keep,
                run_id,
            };
            let report = runner::run(&config).await?;
            print_report(&report);
        }

        Command::Destroy { run_id } => {
            info!(run_id = %run_id, "Destroying persisted run");
            let db = state::open_db().await?;
            runner::teardown(&db, &Terraform::new(), &run_id, false).await?;
        }
    }

    Ok(())
}

fn print_report(report: &RunReport) {
    let verdict = |ok: bool| if ok { "yes" } else { "NO" };

    println!("\n=== IP restriction verification ===");
    println!("Run:       {}", report.run_id);
    println!("Caller IP: {}", report.caller_ip);
    println!(
        "Denied while excluded:  {}",
        verdict(report.denied_when_excluded)
    );
    match report.visible_queues {
        Some(queues) => println!(
            "Allowed while included: {} ({} queue(s) visible)",
            verdict(report.allowed_when_included),
            queues
        ),
        None => println!(
            "Allowed while included: {}",
            verdict(report.allowed_when_included)
        ),
    }
}
