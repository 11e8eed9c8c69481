//! Terraform command errors and transient-failure classification
//!
//! Classification is substring matching over the command's combined output,
//! mirroring how provisioning failures actually surface: provider and
//! backend errors are embedded in free-form CLI text, not exit codes.

use thiserror::Error;

/// Failures from running the Terraform CLI
#[derive(Debug, Error)]
pub enum TerraformError {
    /// Command ran and exited non-zero
    #[error("terraform {command} exited with status {status}")]
    CommandFailed {
        command: String,
        status: i32,
        output: String,
    },

    /// Command exceeded its timeout and was killed
    #[error("terraform {command} timed out after {timeout_secs}s")]
    TimedOut { command: String, timeout_secs: u64 },

    /// Command could not be spawned or waited on
    #[error("failed to run terraform {command}")]
    Io {
        command: String,
        #[source]
        source: std::io::Error,
    },
}

impl TerraformError {
    /// Check whether this failure matches a set of transient-error patterns.
    ///
    /// Only `CommandFailed` output is consulted: timeouts and spawn failures
    /// are never classified as transient.
    pub fn is_transient(&self, patterns: &[String]) -> bool {
        match self {
            TerraformError::CommandFailed { output, .. } => {
                patterns.iter().any(|p| output.contains(p.as_str()))
            }
            _ => false,
        }
    }
}
