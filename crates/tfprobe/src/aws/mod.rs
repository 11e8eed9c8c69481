//! AWS client plumbing for the guarded API probe
//!
//! The harness only talks to AWS directly for one thing: calling the guarded
//! SQS endpoint with the credentials Terraform provisioned. Everything else
//! (user, policy, access key lifecycle) is Terraform's job.

mod keys;
mod sqs;

pub use keys::AccessKeys;
pub use sqs::{SqsProber, PROBE_BACKOFF, PROBE_MAX_ATTEMPTS};
