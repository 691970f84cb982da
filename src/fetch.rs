//! Bounded-retry HTTP fetch shared by every upstream call.
//!
//! All upstream traffic (token exchanges, schedule data, playlists,
//! segments, decryption keys) goes through one `Fetcher` so the retry
//! policy lives in exactly one place: two attempts with a one second
//! backoff, retrying only network failures and 5xx responses. Semantic
//! failures (4xx) are returned to the caller untouched.

use bytes::Bytes;
use std::time::Duration;

use crate::error::{GatewayError, Result};

/// Number of attempts per fetch (initial + retries).
pub const FETCH_ATTEMPTS: u32 = 2;

/// Delay between attempts.
pub const FETCH_BACKOFF: Duration = Duration::from_secs(1);

const USER_AGENT: &str =
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) \
     Chrome/120.0.0.0 Safari/537.36";

/// Shared retrying HTTP client.
#[derive(Clone)]
pub struct Fetcher {
    client: reqwest::Client,
}

impl Fetcher {
    pub fn new() -> Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .timeout(Duration::from_secs(30))
            .build()?;
        Ok(Self { client })
    }

    /// Access the underlying client for building custom requests. Callers
    /// must hand the builder back to [`Fetcher::send`] so retries apply.
    pub fn client(&self) -> &reqwest::Client {
        &self.client
    }

    /// Send a request with the shared retry policy.
    ///
    /// The builder is cloned per attempt; a non-clonable builder (streaming
    /// body) gets a single attempt.
    pub async fn send(&self, builder: reqwest::RequestBuilder) -> Result<reqwest::Response> {
        let mut last_err: Option<GatewayError> = None;

        for attempt in 1..=FETCH_ATTEMPTS {
            let req = match builder.try_clone() {
                Some(req) => req,
                None if attempt == 1 => return Ok(builder.send().await?),
                None => break,
            };

            match req.send().await {
                Ok(resp) if resp.status().is_server_error() => {
                    tracing::warn!(
                        "Upstream {} returned {} (attempt {}/{})",
                        resp.url(),
                        resp.status(),
                        attempt,
                        FETCH_ATTEMPTS
                    );
                    last_err = Some(GatewayError::Upstream(format!(
                        "{} returned {}",
                        resp.url(),
                        resp.status()
                    )));
                }
                Ok(resp) => return Ok(resp),
                Err(e) => {
                    tracing::warn!("Fetch failed (attempt {}/{}): {}", attempt, FETCH_ATTEMPTS, e);
                    last_err = Some(GatewayError::Http(e));
                }
            }

            if attempt < FETCH_ATTEMPTS {
                tokio::time::sleep(FETCH_BACKOFF).await;
            }
        }

        Err(last_err.unwrap_or_else(|| GatewayError::Upstream("request not sent".to_string())))
    }

    /// GET a text body, returning it together with the final URL after
    /// redirects (needed to resolve relative playlist URIs).
    pub async fn get_text(&self, url: &str) -> Result<(String, String)> {
        let resp = self.send(self.client.get(url)).await?;
        let final_url = resp.url().to_string();
        let body = resp.text().await?;
        Ok((body, final_url))
    }

    /// GET a binary body.
    pub async fn get_bytes(&self, url: &str) -> Result<Bytes> {
        let resp = self.send(self.client.get(url)).await?;
        Ok(resp.bytes().await?)
    }

    /// GET a JSON body.
    pub async fn get_json(&self, url: &str) -> Result<serde_json::Value> {
        let resp = self.send(self.client.get(url)).await?;
        Ok(resp.json().await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fetcher_construction() {
        let fetcher = Fetcher::new().unwrap();
        // Clone shares the same underlying pool.
        let _clone = fetcher.clone();
    }

    #[tokio::test]
    async fn test_unreachable_host_exhausts_retries() {
        let fetcher = Fetcher::new().unwrap();
        // Port 1 on loopback refuses quickly, so both attempts run fast.
        let start = std::time::Instant::now();
        let result = fetcher.get_text("http://127.0.0.1:1/never").await;
        assert!(result.is_err());
        // One backoff between the two attempts.
        assert!(start.elapsed() >= FETCH_BACKOFF);
    }
}
