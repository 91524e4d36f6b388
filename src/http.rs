//! HTTP plumbing shared by the source adapters.
//!
//! Each adapter owns one [`SourceClient`]: a `reqwest` client plus a
//! [`RateLimiter`] enforcing that source's minimum inter-request interval.
//! Limiters are never shared between sources, so concurrent fetches to
//! different sources do not slow each other down.
//!
//! # Status classification
//!
//! - HTTP 429 and 5xx → retryable
//! - other 4xx → permanent
//! - network errors and timeouts → retryable
//! - undecodable bodies → permanent

use reqwest::{RequestBuilder, StatusCode};
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;

use crate::config::SourceSettings;
use crate::error::SourceError;

const USER_AGENT: &str = concat!("research-harness/", env!("CARGO_PKG_VERSION"));

/// Blocks callers until the source's minimum interval has elapsed since
/// the previous request slot.
///
/// Waiters are served one at a time; the lock is held across the sleep so
/// slots are handed out strictly in arrival order.
#[derive(Debug)]
pub struct RateLimiter {
    min_interval: Duration,
    last: Mutex<Option<Instant>>,
}

impl RateLimiter {
    pub fn new(min_interval: Duration) -> Self {
        Self {
            min_interval,
            last: Mutex::new(None),
        }
    }

    pub fn min_interval(&self) -> Duration {
        self.min_interval
    }

    /// Wait for the next request slot.
    pub async fn acquire(&self) {
        let mut last = self.last.lock().await;
        if let Some(prev) = *last {
            let ready_at = prev + self.min_interval;
            if ready_at > Instant::now() {
                tokio::time::sleep_until(ready_at).await;
            }
        }
        *last = Some(Instant::now());
    }
}

/// A rate-limited HTTP client bound to one source's base URL.
#[derive(Debug)]
pub struct SourceClient {
    client: reqwest::Client,
    limiter: RateLimiter,
    base_url: String,
}

impl SourceClient {
    pub fn new(settings: &SourceSettings) -> Result<Self, SourceError> {
        let client = reqwest::Client::builder()
            .timeout(settings.request_timeout)
            .user_agent(USER_AGENT)
            .build()
            .map_err(|e| SourceError::permanent(format!("cannot build HTTP client: {}", e)))?;

        Ok(Self {
            client,
            limiter: RateLimiter::new(settings.min_interval),
            base_url: settings.base_url.trim_end_matches('/').to_string(),
        })
    }

    pub fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path.trim_start_matches('/'))
    }

    pub fn get(&self, path: &str) -> RequestBuilder {
        self.client.get(self.url(path))
    }

    pub fn post(&self, path: &str) -> RequestBuilder {
        self.client.post(self.url(path))
    }

    /// Send after waiting for a rate-limit slot and return the body text.
    pub async fn send_text(&self, request: RequestBuilder) -> Result<String, SourceError> {
        self.limiter.acquire().await;
        let response = request.send().await?;
        let status = response.status();
        if let Some(err) = classify_status(status) {
            let body = response.text().await.unwrap_or_default();
            return Err(SourceError {
                message: format!("{}: {}", err.message, truncate(&body, 200)),
                ..err
            });
        }
        Ok(response.text().await?)
    }

    /// Like [`send_text`](Self::send_text), decoding the body as JSON.
    pub async fn send_json(&self, request: RequestBuilder) -> Result<serde_json::Value, SourceError> {
        let body = self.send_text(request).await?;
        serde_json::from_str(&body)
            .map_err(|e| SourceError::permanent(format!("invalid JSON response: {}", e)))
    }
}

/// Map a non-success status to a [`SourceError`]; `None` for 2xx.
pub fn classify_status(status: StatusCode) -> Option<SourceError> {
    if status.is_success() {
        return None;
    }
    let message = format!("HTTP {}", status);
    if status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error() {
        Some(SourceError::transient(message))
    } else {
        Some(SourceError::permanent(message))
    }
}

fn truncate(s: &str, max_chars: usize) -> &str {
    match s.char_indices().nth(max_chars) {
        Some((idx, _)) => &s[..idx],
        None => s,
    }
}
