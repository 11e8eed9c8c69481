//! Terraform run options
//!
//! `TerraformOptions` is the unit of state shared between stages: it is
//! constructed once per setup stage, checkpointed, and reloaded by the probe
//! and teardown stages. Everything in it is serializable for that reason.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Transient provisioning failures worth another `apply` attempt.
///
/// Matched as substrings against the combined command output.
pub const DEFAULT_RETRYABLE_ERRORS: &[&str] = &[
    "RequestError: send request failed",
    "connection reset by peer",
    "TLS handshake timeout",
    "unexpected EOF",
    "Throttling",
    "ThrottlingException",
    "RequestLimitExceeded",
    "ServiceUnavailable",
    "Client.Timeout exceeded while awaiting headers",
    "timeout while waiting for state to become",
    "Error acquiring the state lock",
];

/// Default apply/init attempts, including the first one
pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;

/// Default fixed backoff between apply/init attempts, in seconds
pub const DEFAULT_BACKOFF_SECS: u64 = 5;

/// Retry bounds and transient classification for provisioning commands
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RetrySettings {
    pub max_attempts: u32,
    pub backoff_secs: u64,
    /// Output substrings classified as transient
    pub retryable_errors: Vec<String>,
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            backoff_secs: DEFAULT_BACKOFF_SECS,
            retryable_errors: Vec::new(),
        }
    }
}

/// Options for running Terraform against a working directory
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct TerraformOptions {
    /// Working directory containing the staged module copy
    pub terraform_dir: PathBuf,
    /// Input variables passed as `-var` flags; BTreeMap keeps the rendered
    /// argument order deterministic
    pub vars: BTreeMap<String, Value>,
    /// Retry policy for `init` and `apply`
    pub retry: RetrySettings,
}

impl TerraformOptions {
    pub fn new(terraform_dir: impl Into<PathBuf>) -> Self {
        Self {
            terraform_dir: terraform_dir.into(),
            vars: BTreeMap::new(),
            retry: RetrySettings::default(),
        }
    }

    /// Set a variable, builder style.
    pub fn var(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.set_var(key, value);
        self
    }

    /// Set or replace a variable in place.
    pub fn set_var(&mut self, key: &str, value: impl Into<Value>) {
        self.vars.insert(key.to_string(), value.into());
    }

    /// Install the default transient-error classification.
    pub fn with_default_retryable_errors(mut self) -> Self {
        self.retry.retryable_errors = DEFAULT_RETRYABLE_ERRORS
            .iter()
            .map(|s| s.to_string())
            .collect();
        self
    }

    /// Render the variables as `-var key=value` CLI arguments.
    pub fn var_args(&self) -> Vec<String> {
        self.vars
            .iter()
            .flat_map(|(key, value)| ["-var".to_string(), format_var(key, value)])
            .collect()
    }
}

/// Render one variable for the CLI.
///
/// Strings are passed bare; lists and other structured values are rendered
/// as JSON, which the Terraform CLI accepts for non-string variables.
pub fn format_var(key: &str, value: &Value) -> String {
    match value {
        Value::String(s) => format!("{key}={s}"),
        other => format!("{key}={other}"),
    }
}

/// Resource names derived from a run's unique id.
///
/// Names are deterministic per id so re-applies within a run converge on the
/// same resources, and collision-free across runs with distinct ids.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResourceNames {
    pub user_name: String,
    pub policy_name: String,
}

impl ResourceNames {
    pub fn for_id(unique_id: &str) -> Self {
        Self {
            user_name: format!("user-{unique_id}"),
            policy_name: format!("iprestricted-{unique_id}"),
        }
    }
}

/// Build fully populated options for the IAM user module.
///
/// Input: the staged working directory, the run's unique id, and the
/// allow-list. Output carries the derived resource names and the default
/// transient classification. No side effects.
pub fn configure(terraform_dir: &Path, unique_id: &str, allowed_ips: &[String]) -> TerraformOptions {
    let names = ResourceNames::for_id(unique_id);
    TerraformOptions::new(terraform_dir)
        .var("user_name", names.user_name)
        .var("iam_policy_name", names.policy_name)
        .var("allowed_ips", serde_json::json!(allowed_ips))
        .with_default_retryable_errors()
}
