//! # Update Check
//!
//! Optional pre-start hook: fetches a plaintext version string from a fixed
//! URL and logs an advisory when a newer release exists. Any failure is
//! swallowed — the check never affects connection startup.

use std::time::Duration;
use tracing::{debug, info};

const UPDATE_URL: &str = "https://geometryamerica.xyz/updates/version.txt";
const VERSION_CHECK_TIMEOUT: Duration = Duration::from_secs(5);

/// This build's version.
pub const CURRENT_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Compares this build against the published version and logs the outcome.
pub async fn check_for_updates() {
    info!("checking for updates");
    match fetch_remote_version().await {
        Ok(remote) if remote == CURRENT_VERSION => info!("up to date"),
        Ok(remote) => {
            info!("new version available: {remote} (current: {CURRENT_VERSION})");
            info!("upgrade with: cargo install tunnel-agent --force");
        }
        Err(e) => debug!("update check failed: {e}"),
    }
}

async fn fetch_remote_version() -> Result<String, reqwest::Error> {
    let client = reqwest::Client::builder()
        .timeout(VERSION_CHECK_TIMEOUT)
        .user_agent(format!("tunnel-agent-update-checker/{CURRENT_VERSION}"))
        .build()?;
    let text = client.get(UPDATE_URL).send().await?.text().await?;
    Ok(text.trim().to_string())
}
