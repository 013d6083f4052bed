use reqwest::{header::HeaderMap, Client, RequestBuilder, Response, StatusCode};
use std::time::Duration;
use tracing::warn;

use super::error::SourceError;

pub const USER_AGENT: &str = "steam-catalog-cache/0.1";

/// Waits between 429 retries; a larger `Retry-After` wins.
pub const RATE_LIMIT_LADDER: [Duration; 4] = [
    Duration::from_secs(5),
    Duration::from_secs(10),
    Duration::from_secs(15),
    Duration::from_secs(20),
];

/// Client with the configured timeout. Redirects are followed (reqwest default),
/// which removal detection relies on.
pub fn build_client(timeout_secs: u64) -> reqwest::Result<Client> {
    Client::builder()
        .user_agent(USER_AGENT)
        .timeout(Duration::from_secs(timeout_secs))
        .build()
}

fn retry_after(headers: &HeaderMap) -> Option<Duration> {
    headers
        .get("Retry-After")
        .and_then(|h| h.to_str().ok())
        .and_then(|s| s.trim().parse::<u64>().ok())
        .map(Duration::from_secs)
}

/// Sends the request built by `build`, retrying on HTTP 429 along `ladder`.
/// Network failures and exhausted retries are transient.
pub async fn send_with_backoff<F>(
    source_name: &'static str,
    ladder: &[Duration],
    build: F,
) -> Result<Response, SourceError>
where
    F: Fn() -> RequestBuilder,
{
    let mut attempt: usize = 0;
    loop {
        let resp = build()
            .send()
            .await
            .map_err(|e| SourceError::transient(source_name, e.to_string()))?;
        if resp.status() != StatusCode::TOO_MANY_REQUESTS {
            return Ok(resp);
        }
        let Some(step) = ladder.get(attempt) else {
            return Err(SourceError::transient(
                source_name,
                format!("rate limited after {attempt} retries"),
            ));
        };
        let wait = match retry_after(resp.headers()) {
            Some(hint) if hint > *step => hint,
            _ => *step,
        };
        warn!(
            source = source_name,
            attempt,
            wait_secs = wait.as_secs(),
            "rate limited; backing off"
        );
        attempt += 1;
        tokio::time::sleep(wait).await;
    }
}

/// Reads the body as text; a non-success status is transient.
pub async fn text_body(source_name: &'static str, resp: Response) -> Result<String, SourceError> {
    let status = resp.status();
    if !status.is_success() {
        return Err(SourceError::transient(source_name, format!("HTTP {status}")));
    }
    resp.text()
        .await
        .map_err(|e| SourceError::transient(source_name, format!("unreadable body: {e}")))
}
