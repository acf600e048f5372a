use anyhow::{anyhow, Result};
use std::time::Duration;

/// Build a reqwest client for platform and agent calls.
///
/// System proxy discovery is opt-in through `CHEERBOT_ENABLE_SYSTEM_PROXY`
/// because it can panic on hosts with unusual proxy settings; when it fails
/// the client is rebuilt with `no_proxy`.
pub fn build_http_client(timeout: Option<Duration>) -> Result<reqwest::Client> {
    let allow_system_proxy = std::env::var("CHEERBOT_ENABLE_SYSTEM_PROXY")
        .map(|value| value == "1" || value.eq_ignore_ascii_case("true"))
        .unwrap_or(false);

    if allow_system_proxy {
        if let Ok(Ok(client)) = std::panic::catch_unwind(|| attempt_build(timeout, false)) {
            return Ok(client);
        }
        tracing::warn!("HTTP client with system proxy discovery failed; retrying with no_proxy");
    }

    match std::panic::catch_unwind(|| attempt_build(timeout, true)) {
        Ok(Ok(client)) => Ok(client),
        Ok(Err(error)) => Err(anyhow!("Failed to initialize HTTP client: {}", error)),
        Err(_) => Err(anyhow!("HTTP client initialization panicked")),
    }
}

fn attempt_build(
    timeout: Option<Duration>,
    no_proxy: bool,
) -> Result<reqwest::Client, reqwest::Error> {
    let mut builder = reqwest::Client::builder().user_agent("cheerbot/0.1");
    if let Some(timeout) = timeout {
        builder = builder.timeout(timeout);
    }
    if no_proxy {
        builder = builder.no_proxy();
    }
    builder.build()
}
