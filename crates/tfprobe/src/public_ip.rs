//! Caller public IP discovery
//!
//! The verification hinges on knowing the caller's real public IP: the
//! restrictive stage must exclude it and the permissive stage must allow it.
//! Discovery is a single fail-fast attempt; a wrong or stale value would
//! silently invalidate every later assertion.

use std::time::Duration;

use anyhow::{Context, Result};
use tracing::debug;

/// Plain-text IP echo endpoint
pub const IP_ECHO_ENDPOINT: &str = "https://checkip.amazonaws.com";

const DISCOVERY_TIMEOUT: Duration = Duration::from_secs(10);

/// Discover the public IP address of the machine running the verification.
///
/// Single attempt, no retry: every subsequent stage depends on this value,
/// so a failure here aborts the whole run.
pub async fn discover() -> Result<String> {
    let client = reqwest::Client::builder()
        .timeout(DISCOVERY_TIMEOUT)
        .build()
        .context("Failed to build HTTP client")?;

    let response = client
        .get(IP_ECHO_ENDPOINT)
        .send()
        .await
        .with_context(|| format!("Failed to fetch public IP from {IP_ECHO_ENDPOINT}"))?;

    let body = response
        .text()
        .await
        .context("Failed to read IP echo response body")?;

    let ip = parse_ip_body(&body)?;
    debug!(public_ip = %ip, "Detected caller public IP");
    Ok(ip)
}

/// Trim and validate an IP echo response body.
fn parse_ip_body(body: &str) -> Result<String> {
    let ip = body.trim().to_string();
    if ip.parse::<std::net::IpAddr>().is_err() {
        anyhow::bail!("Invalid IP address received: {ip:?}");
    }
    Ok(ip)
}
