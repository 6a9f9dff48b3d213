//! Byte fetching with bounded retry and rate-limit backoff.
//!
//! The document host enforces a rate limit it does not publish. Every network
//! read in a run goes through [`fetch_with_retry`], which applies one
//! [`RetryPolicy`]:
//!
//! ```text
//! attempt n fails with 429   → sleep Retry-After × n  (default hint if absent)
//! attempt n fails otherwise  → sleep base_delay × n
//! attempt max_attempts fails → CaptureError::Network
//! ```
//!
//! A 429 still consumes one attempt. Exhaustion is final at this layer:
//! callers treat it as a strategy failure and never retry it themselves.

use crate::config::RetryPolicy;
use crate::error::CaptureError;
use async_trait::async_trait;
use std::time::Duration;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Longest `Retry-After` hint honoured, in seconds.
pub const MAX_RETRY_AFTER_SECS: u64 = 60;

/// A completed HTTP exchange, successful or not.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransportResponse {
    pub status: u16,
    /// Raw `Retry-After` header value, if present.
    pub retry_after: Option<String>,
    pub body: Vec<u8>,
}

impl TransportResponse {
    /// A `200 OK` response with `body`.
    pub fn ok(body: impl Into<Vec<u8>>) -> Self {
        Self {
            status: 200,
            retry_after: None,
            body: body.into(),
        }
    }

    /// A bodiless response with `status`.
    pub fn status(status: u16) -> Self {
        Self {
            status,
            retry_after: None,
            body: Vec::new(),
        }
    }

    /// A `429 Too Many Requests` response with an optional `Retry-After` value.
    pub fn too_many_requests(retry_after: Option<&str>) -> Self {
        Self {
            status: 429,
            retry_after: retry_after.map(str::to_string),
            body: Vec::new(),
        }
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// Issues a single GET request.
///
/// Returns `Err` only for transport-level failures (DNS, TLS, timeout);
/// any HTTP status is an `Ok` response.
#[async_trait]
pub trait HttpTransport: Send + Sync {
    async fn get(&self, url: &str) -> Result<TransportResponse, String>;
}

/// Parse a `Retry-After` value given in seconds, capped at
/// [`MAX_RETRY_AFTER_SECS`].
///
/// HTTP-date values and garbage return `None`.
pub fn parse_retry_after(value: Option<&str>) -> Option<Duration> {
    value?
        .trim()
        .parse::<u64>()
        .ok()
        .map(|secs| Duration::from_secs(secs.min(MAX_RETRY_AFTER_SECS)))
}

/// GET `url` through `transport`, retrying per `policy`.
///
/// # Errors
/// [`CaptureError::Network`] once `policy.max_attempts` attempts have failed.
pub async fn fetch_with_retry(
    transport: &dyn HttpTransport,
    url: &str,
    policy: &RetryPolicy,
) -> Result<Vec<u8>, CaptureError> {
    fetch_with_retry_until(transport, url, policy, &CancellationToken::new()).await
}

/// [`fetch_with_retry`] that gives up as soon as `cancel` fires, whether a
/// request or a backoff wait is in progress.
///
/// # Errors
/// * [`CaptureError::Cancelled`]: `cancel` fired
/// * [`CaptureError::Network`]: every attempt failed
pub async fn fetch_with_retry_until(
    transport: &dyn HttpTransport,
    url: &str,
    policy: &RetryPolicy,
    cancel: &CancellationToken,
) -> Result<Vec<u8>, CaptureError> {
    let max_attempts = policy.max_attempts.max(1);
    let mut last_err = String::from("no attempt made");

    for attempt in 1..=max_attempts {
        let response = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(CaptureError::Cancelled),
            r = transport.get(url) => r,
        };
        let wait = match response {
            Ok(resp) if resp.is_success() => {
                debug!(
                    "GET {} → {} ({} bytes, attempt {})",
                    url,
                    resp.status,
                    resp.body.len(),
                    attempt
                );
                return Ok(resp.body);
            }
            Ok(resp) if resp.status == 429 => {
                let hint = parse_retry_after(resp.retry_after.as_deref());
                last_err = "HTTP 429 Too Many Requests".to_string();
                policy.rate_limit_delay(attempt, hint)
            }
            Ok(resp) => {
                last_err = format!("HTTP {}", resp.status);
                policy.failure_delay(attempt)
            }
            Err(e) => {
                last_err = e;
                policy.failure_delay(attempt)
            }
        };

        if attempt < max_attempts {
            warn!(
                "GET {}: attempt {}/{} failed ({}), retrying in {:?}",
                url, attempt, max_attempts, last_err, wait
            );
            tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    debug!("GET {}: cancelled during backoff", url);
                    return Err(CaptureError::Cancelled);
                }
                _ = sleep(wait) => {}
            }
        }
    }

    Err(CaptureError::Network {
        url: url.to_string(),
        attempts: max_attempts,
        detail: last_err,
    })
}

// ── reqwest transport ────────────────────────────────────────────────────

/// [`HttpTransport`] backed by a `reqwest` client with a cookie store.
#[derive(Debug, Clone)]
pub struct ReqwestTransport {
    client: reqwest::Client,
}

impl ReqwestTransport {
    /// Build a client with the given per-request timeout and user agent.
    pub fn new(timeout_secs: u64, user_agent: &str) -> Result<Self, CaptureError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .user_agent(user_agent)
            .cookie_store(true)
            .build()
            .map_err(|e| CaptureError::Internal(format!("HTTP client: {e}")))?;
        Ok(Self { client })
    }

    /// Wrap an existing client (shared cookies, custom proxy, …).
    pub fn from_client(client: reqwest::Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl HttpTransport for ReqwestTransport {
    async fn get(&self, url: &str) -> Result<TransportResponse, String> {
        let response = self.client.get(url).send().await.map_err(|e| {
            if e.is_timeout() {
                format!("timed out: {e}")
            } else {
                e.to_string()
            }
        })?;

        let status = response.status().as_u16();
        let retry_after = response
            .headers()
            .get(reqwest::header::RETRY_AFTER)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        let body = response.bytes().await.map_err(|e| e.to_string())?.to_vec();

        Ok(TransportResponse {
            status,
            retry_after,
            body,
        })
    }
}
