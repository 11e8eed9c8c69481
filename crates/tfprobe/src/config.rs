//! Configuration for verification runs

use std::path::PathBuf;

/// Default AWS region for the provisioned module and the SQS probe
pub const DEFAULT_REGION: &str = "us-east-1";

/// Default allow-list entry that cannot match any real caller
pub const DEFAULT_DECOY_IP: &str = "1.2.3.4";

/// Configuration for a verification run
#[derive(Debug, Clone)]
pub struct RunConfig {
    /// Path to the Terraform module that creates the restricted IAM user
    pub module_dir: PathBuf,
    /// AWS region for both provisioning and the guarded API call
    pub region: String,
    /// Allow-list entry used by the restrictive stage (must not be the caller)
    pub decoy_ip: String,
    /// Keep the provisioned infrastructure instead of destroying it
    pub keep: bool,
    /// Resume an existing run instead of generating a fresh id
    pub run_id: Option<String>,
}

impl RunConfig {
    pub fn new(module_dir: impl Into<PathBuf>) -> Self {
        Self {
            module_dir: module_dir.into(),
            region: DEFAULT_REGION.to_string(),
            decoy_ip: DEFAULT_DECOY_IP.to_string(),
            keep: false,
            run_id: None,
        }
    }
}
