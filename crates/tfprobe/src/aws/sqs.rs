//! Guarded-call prober for the SQS endpoint
//!
//! Freshly created access keys take a few seconds to start working, so the
//! probe retries every error under a fixed bound. The final result is
//! returned uninterpreted: during the restrictive stage a denial is the
//! expected outcome, and only the calling stage knows which verdict is
//! correct.

use std::time::Duration;

use anyhow::Result;
use aws_config::BehaviorVersion;
use aws_sdk_sqs::config::Region;
use aws_sdk_sqs::operation::list_queues::ListQueuesOutput;
use aws_sdk_sqs::Client;
use tokio_util::sync::CancellationToken;
use tracing::info;

use super::keys::AccessKeys;
use crate::retry::{retry_with_policy, RetryPolicy};

/// Probe attempts, including the first one
pub const PROBE_MAX_ATTEMPTS: u32 = 3;

/// Fixed backoff between probe attempts
pub const PROBE_BACKOFF: Duration = Duration::from_secs(5);

/// SQS client bound to the provisioned user's credentials
pub struct SqsProber {
    client: Client,
}

impl SqsProber {
    /// Build a client from a region and the access keys read from the
    /// Terraform outputs.
    pub fn new(region: &str, keys: &AccessKeys) -> Self {
        let config = aws_sdk_sqs::Config::builder()
            .behavior_version(BehaviorVersion::latest())
            .region(Region::new(region.to_string()))
            .credentials_provider(keys.to_credentials())
            .build();

        Self {
            client: Client::from_conf(config),
        }
    }

    /// Call `ListQueues` with no parameters under the probe retry policy.
    ///
    /// Every error is treated as retryable (the common failure here is
    /// credential propagation delay, which is indistinguishable from a
    /// policy denial at the API level); whatever the last attempt produced
    /// is returned.
    pub async fn list_queues(
        &self,
        cancel: Option<&CancellationToken>,
    ) -> Result<ListQueuesOutput> {
        info!(
            max_attempts = PROBE_MAX_ATTEMPTS,
            backoff_secs = PROBE_BACKOFF.as_secs(),
            "Probing SQS ListQueues"
        );

        retry_with_policy(
            RetryPolicy::new(PROBE_MAX_ATTEMPTS, PROBE_BACKOFF),
            cancel,
            |_| true,
            || self.client.list_queues().send(),
            "SQS ListQueues",
        )
        .await
    }
}

impl std::fmt::Debug for SqsProber {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SqsProber").finish_non_exhaustive()
    }
}
