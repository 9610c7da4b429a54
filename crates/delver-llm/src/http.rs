//! Shared HTTP client construction.

use std::time::Duration;

/// HTTP client used by remote providers.
///
/// 10s connect timeout, 120s request timeout, `delver/{version}` user-agent.
/// Callers still wrap each request in their own deadline.
#[must_use]
pub fn default_client() -> reqwest::Client {
    reqwest::Client::builder()
        .connect_timeout(Duration::from_secs(10))
        .timeout(Duration::from_secs(120))
        .user_agent(concat!("delver/", env!("CARGO_PKG_VERSION")))
        .redirect(reqwest::redirect::Policy::limited(10))
        .build()
        .unwrap_or_else(|e| {
            tracing::warn!("falling back to default HTTP client: {e}");
            reqwest::Client::new()
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builds_client() {
        let _client = default_client();
    }
}
