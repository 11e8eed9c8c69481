//! Terraform integration
//!
//! This module wraps the Terraform CLI for the four operations the harness
//! needs (`init`, `apply`, `destroy`, `output`) and provides:
//! - options: serializable run options (working dir, variables, retry bounds)
//! - cli: async command execution with streamed output and transient retry
//! - error: typed command failures and transient classification
//! - workspace: per-run staging of the module source

pub mod cli;
pub mod error;
pub mod options;
pub mod workspace;

pub use cli::Terraform;
pub use error::TerraformError;
pub use options::{configure, ResourceNames, RetrySettings, TerraformOptions};
