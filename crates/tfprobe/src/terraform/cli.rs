//! Async Terraform CLI execution
//!
//! Long-running commands (`init`, `apply`, `destroy`) stream their output
//! line-by-line into tracing while retaining the combined text for transient
//! error classification. `output` is a short read of a single value.

use std::path::Path;
use std::time::Duration;

use anyhow::Result;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::Command;
use tracing::{info, warn};

use super::error::TerraformError;
use super::options::TerraformOptions;
use crate::retry::{retry_with_policy, RetryPolicy};

/// Execution limits for one Terraform command
#[derive(Debug, Clone)]
pub struct CommandConfig {
    /// Command timeout (kills the process if exceeded)
    pub timeout: Duration,
    /// Time to wait for streaming tasks to flush after the command exits
    pub stream_flush_timeout: Duration,
}

impl CommandConfig {
    /// Limits for `init` (provider downloads, backend setup)
    pub fn for_init() -> Self {
        Self {
            timeout: Duration::from_secs(900),
            stream_flush_timeout: Duration::from_secs(2),
        }
    }

    /// Limits for `apply` and `destroy`
    pub fn for_apply() -> Self {
        Self {
            timeout: Duration::from_secs(3600),
            stream_flush_timeout: Duration::from_secs(5),
        }
    }
}

/// Result of one streamed command invocation
struct CommandOutput {
    success: bool,
    status: i32,
    output: String,
}

/// Terraform CLI driver
#[derive(Debug, Clone)]
pub struct Terraform {
    binary: String,
}

impl Default for Terraform {
    fn default() -> Self {
        Self::new()
    }
}

impl Terraform {
    pub fn new() -> Self {
        Self {
            binary: "terraform".to_string(),
        }
    }

    /// Use a non-default binary (e.g. `tofu`, or an absolute path).
    pub fn with_binary(binary: impl Into<String>) -> Self {
        Self {
            binary: binary.into(),
        }
    }

    /// Run `terraform init`, retrying transient failures per the options.
    pub async fn init(&self, opts: &TerraformOptions) -> Result<()> {
        self.run_retried(opts, "init", init_args(), CommandConfig::for_init())
            .await
    }

    /// Run `terraform apply`, retrying transient failures per the options.
    pub async fn apply(&self, opts: &TerraformOptions) -> Result<()> {
        self.run_retried(opts, "apply", apply_args(opts), CommandConfig::for_apply())
            .await
    }

    /// Run `terraform init` followed by `terraform apply`.
    pub async fn init_and_apply(&self, opts: &TerraformOptions) -> Result<()> {
        self.init(opts).await?;
        self.apply(opts).await
    }

    /// Run `terraform destroy`. Not retried: teardown is already best-effort
    /// at the call site and a second destroy of a half-destroyed state is
    /// handled by re-running `tfprobe destroy`.
    pub async fn destroy(&self, opts: &TerraformOptions) -> Result<(), TerraformError> {
        let result = self
            .run_streaming(opts, "destroy", destroy_args(opts), CommandConfig::for_apply())
            .await?;
        command_result("destroy", result)
    }

    /// Read a single output value with `terraform output -raw`.
    pub async fn output(&self, opts: &TerraformOptions, name: &str) -> Result<String, TerraformError> {
        let command = format!("output {name}");
        let result = Command::new(&self.binary)
            .args(output_args(name))
            .current_dir(&opts.terraform_dir)
            .output()
            .await
            .map_err(|e| TerraformError::Io {
                command: command.clone(),
                source: e,
            })?;

        if !result.status.success() {
            return Err(TerraformError::CommandFailed {
                command,
                status: result.status.code().unwrap_or(-1),
                output: String::from_utf8_lossy(&result.stderr).into_owned(),
            });
        }

        Ok(String::from_utf8_lossy(&result.stdout).trim().to_string())
    }

    /// Run a streamed command under the options' retry policy.
    async fn run_retried(
        &self,
        opts: &TerraformOptions,
        command: &str,
        args: Vec<String>,
        config: CommandConfig,
    ) -> Result<()> {
        let policy = RetryPolicy::new(
            opts.retry.max_attempts,
            Duration::from_secs(opts.retry.backoff_secs),
        );

        retry_with_policy(
            policy,
            None,
            |e: &TerraformError| e.is_transient(&opts.retry.retryable_errors),
            || async {
                let result = self
                    .run_streaming(opts, command, args.clone(), config.clone())
                    .await?;
                command_result(command, result)
            },
            &format!("terraform {command}"),
        )
        .await
    }

    /// Spawn a command in the working directory, streaming stdout and stderr
    /// lines into tracing and collecting them for classification.
    async fn run_streaming(
        &self,
        opts: &TerraformOptions,
        command: &str,
        args: Vec<String>,
        config: CommandConfig,
    ) -> Result<CommandOutput, TerraformError> {
        info!(
            command = %command,
            dir = %opts.terraform_dir.display(),
            timeout_secs = config.timeout.as_secs(),
            "Running terraform"
        );

        let io_err = |source| TerraformError::Io {
            command: command.to_string(),
            source,
        };

        let mut child = Command::new(&self.binary)
            .args(&args)
            .current_dir(&opts.terraform_dir)
            .stdout(std::process::Stdio::piped())
            .stderr(std::process::Stdio::piped())
            .spawn()
            .map_err(io_err)?;

        let stdout = child.stdout.take().ok_or_else(|| TerraformError::Io {
            command: command.to_string(),
            source: std::io::Error::other("failed to capture stdout"),
        })?;
        let stderr = child.stderr.take().ok_or_else(|| TerraformError::Io {
            command: command.to_string(),
            source: std::io::Error::other("failed to capture stderr"),
        })?;

        let stdout_handle = tokio::spawn(async move {
            let mut collected = Vec::new();
            let mut lines = BufReader::new(stdout).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                info!(target: "terraform", "{line}");
                collected.push(line);
            }
            collected
        });
        let stderr_handle = tokio::spawn(async move {
            let mut collected = Vec::new();
            let mut lines = BufReader::new(stderr).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                info!(target: "terraform", "{line}");
                collected.push(line);
            }
            collected
        });

        let wait_result = tokio::time::timeout(config.timeout, child.wait()).await;

        let status = match wait_result {
            Ok(Ok(status)) => status,
            Ok(Err(e)) => return Err(io_err(e)),
            Err(_) => {
                warn!(
                    command = %command,
                    timeout_secs = config.timeout.as_secs(),
                    "Terraform command timed out, killing process"
                );
                if let Err(e) = child.kill().await {
                    warn!(error = %e, "Failed to kill timed-out terraform process");
                }
                return Err(TerraformError::TimedOut {
                    command: command.to_string(),
                    timeout_secs: config.timeout.as_secs(),
                });
            }
        };

        // Give the streaming tasks a moment to drain remaining output
        let mut output = Vec::new();
        if let Ok(Ok(lines)) = tokio::time::timeout(config.stream_flush_timeout, stdout_handle).await
        {
            output.extend(lines);
        }
        if let Ok(Ok(lines)) = tokio::time::timeout(config.stream_flush_timeout, stderr_handle).await
        {
            output.extend(lines);
        }

        Ok(CommandOutput {
            success: status.success(),
            status: status.code().unwrap_or(-1),
            output: output.join("\n"),
        })
    }
}

fn command_result(command: &str, result: CommandOutput) -> Result<(), TerraformError> {
    if result.success {
        Ok(())
    } else {
        Err(TerraformError::CommandFailed {
            command: command.to_string(),
            status: result.status,
            output: result.output,
        })
    }
}

fn init_args() -> Vec<String> {
    to_args(&["init", "-input=false", "-no-color"])
}

fn apply_args(opts: &TerraformOptions) -> Vec<String> {
    let mut args = to_args(&["apply", "-input=false", "-auto-approve", "-no-color"]);
    args.extend(opts.var_args());
    args
}

fn destroy_args(opts: &TerraformOptions) -> Vec<String> {
    let mut args = to_args(&["destroy", "-input=false", "-auto-approve", "-no-color"]);
    args.extend(opts.var_args());
    args
}

fn output_args(name: &str) -> Vec<String> {
    to_args(&["output", "-no-color", "-raw", name])
}

fn to_args(args: &[&str]) -> Vec<String> {
    args.iter().map(|s| s.to_string()).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::Path;

    fn sample_opts() -> TerraformOptions {
        TerraformOptions::new(Path::new("/tmp/work"))
            .var("user_name", "user-abc")
            .var("allowed_ips", serde_json::json!(["1.2.3.4"]))
    }

    #[test]
    fn init_takes_no_vars() {
        assert_eq!(init_args(), vec!["init", "-input=false", "-no-color"]);
    }

    #[test]
    fn apply_args_include_rendered_vars() {
        let args = apply_args(&sample_opts());
        assert_eq!(
            args,
            vec![
                "apply",
                "-input=false",
                "-auto-approve",
                "-no-color",
                "-var",
                r#"allowed_ips=["1.2.3.4"]"#,
                "-var",
                "user_name=user-abc",
            ]
        );
    }

    #[test]
    fn destroy_args_include_rendered_vars() {
        let args = destroy_args(&sample_opts());
        assert_eq!(args[0], "destroy");
        assert!(args.contains(&"-auto-approve".to_string()));
        assert!(args.contains(&"user_name=user-abc".to_string()));
    }

    #[test]
    fn output_args_are_raw() {
        assert_eq!(
            output_args("aws_iam_access_key_id"),
            vec!["output", "-no-color", "-raw", "aws_iam_access_key_id"]
        );
    }
}
