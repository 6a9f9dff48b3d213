//! Configuration types for a capture run.
//!
//! All capture behaviour is controlled through [`CaptureConfig`], built via its
//! [`CaptureConfigBuilder`]. The retry behaviour of every network fetch lives
//! in a separate, `Copy` [`RetryPolicy`] so strategies can hold their own copy
//! without borrowing the whole config.

use crate::error::CaptureError;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Field names searched, in order, for the page image URL in a page-metadata
/// response.
pub const DEFAULT_IMAGE_URL_FIELDS: &[&str] = &["directImageUrl", "imageUrl", "image_url", "url"];

/// File stem used when the document has no usable title.
pub const DEFAULT_FILENAME: &str = "presentation";

/// Configuration for a capture run.
///
/// Built via [`CaptureConfig::builder()`] or using [`CaptureConfig::default()`].
///
/// # Example
/// ```rust
/// use deck2pdf::CaptureConfig;
/// use std::time::Duration;
///
/// let config = CaptureConfig::builder()
///     .max_attempts(5)
///     .settle_delay(Duration::from_millis(800))
///     .use_direct_link(false)
///     .build()
///     .unwrap();
/// assert_eq!(config.retry.max_attempts, 5);
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CaptureConfig {
    /// Retry behaviour shared by every byte fetch in a run.
    pub retry: RetryPolicy,

    /// Fixed pause after a page reports ready and before it is rasterised.
    /// Default: 1000 ms.
    ///
    /// Applied on every page, including fast connections: the host throttles
    /// sessions that page through a document faster than a person would.
    pub settle_delay: Duration,

    /// Fixed pause after each viewport capture. Default: 600 ms.
    ///
    /// Viewport rasterisation is itself rate limited by browsers
    /// (roughly two captures per second).
    pub capture_cooldown: Duration,

    /// Upper bound on the per-page load wait in rendered capture. Default: 10 s.
    ///
    /// When it elapses the page is captured anyway; a view that never reports
    /// ready cannot hang the session.
    pub load_timeout: Duration,

    /// Interval between readiness checks during the load wait. Default: 200 ms.
    pub load_poll_interval: Duration,

    /// Per-request HTTP timeout in seconds. Default: 30.
    pub http_timeout_secs: u64,

    /// User agent sent with every HTTP request.
    pub user_agent: String,

    /// Ordered aliases for the image URL in page-metadata responses.
    pub image_url_fields: Vec<String>,

    /// Try the direct-link strategy before rendered capture. Default: true.
    pub use_direct_link: bool,

    /// File stem used when the document title is empty. Default: `presentation`.
    pub default_filename: String,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            retry: RetryPolicy::default(),
            settle_delay: Duration::from_millis(1000),
            capture_cooldown: Duration::from_millis(600),
            load_timeout: Duration::from_secs(10),
            load_poll_interval: Duration::from_millis(200),
            http_timeout_secs: 30,
            user_agent: concat!("deck2pdf/", env!("CARGO_PKG_VERSION")).to_string(),
            image_url_fields: DEFAULT_IMAGE_URL_FIELDS
                .iter()
                .map(|s| s.to_string())
                .collect(),
            use_direct_link: true,
            default_filename: DEFAULT_FILENAME.to_string(),
        }
    }
}

impl CaptureConfig {
    /// Create a new builder for `CaptureConfig`.
    pub fn builder() -> CaptureConfigBuilder {
        CaptureConfigBuilder {
            config: Self::default(),
        }
    }
}

/// Builder for [`CaptureConfig`].
#[derive(Debug)]
pub struct CaptureConfigBuilder {
    config: CaptureConfig,
}

impl CaptureConfigBuilder {
    pub fn retry(mut self, policy: RetryPolicy) -> Self {
        self.config.retry = policy;
        self
    }

    pub fn max_attempts(mut self, n: u32) -> Self {
        self.config.retry.max_attempts = n;
        self
    }

    pub fn base_delay(mut self, delay: Duration) -> Self {
        self.config.retry.base_delay = delay;
        self
    }

    pub fn default_retry_after(mut self, delay: Duration) -> Self {
        self.config.retry.default_retry_after = delay;
        self
    }

    pub fn honor_retry_after(mut self, v: bool) -> Self {
        self.config.retry.honor_retry_after = v;
        self
    }

    pub fn settle_delay(mut self, delay: Duration) -> Self {
        self.config.settle_delay = delay;
        self
    }

    pub fn capture_cooldown(mut self, delay: Duration) -> Self {
        self.config.capture_cooldown = delay;
        self
    }

    pub fn load_timeout(mut self, timeout: Duration) -> Self {
        self.config.load_timeout = timeout;
        self
    }

    pub fn load_poll_interval(mut self, interval: Duration) -> Self {
        self.config.load_poll_interval = interval;
        self
    }

    pub fn http_timeout_secs(mut self, secs: u64) -> Self {
        self.config.http_timeout_secs = secs.max(1);
        self
    }

    pub fn user_agent(mut self, ua: impl Into<String>) -> Self {
        self.config.user_agent = ua.into();
        self
    }

    pub fn image_url_fields<I, S>(mut self, fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.config.image_url_fields = fields.into_iter().map(Into::into).collect();
        self
    }

    pub fn use_direct_link(mut self, v: bool) -> Self {
        self.config.use_direct_link = v;
        self
    }

    pub fn default_filename(mut self, name: impl Into<String>) -> Self {
        self.config.default_filename = name.into();
        self
    }

    /// Build the configuration, validating constraints.
    pub fn build(self) -> Result<CaptureConfig, CaptureError> {
        let c = &self.config;
        if c.retry.max_attempts == 0 {
            return Err(CaptureError::InvalidConfig(
                "max_attempts must be ≥ 1".into(),
            ));
        }
        if c.image_url_fields.iter().all(|f| f.trim().is_empty()) {
            return Err(CaptureError::InvalidConfig(
                "at least one image URL field name is required".into(),
            ));
        }
        if c.load_poll_interval.is_zero() {
            return Err(CaptureError::InvalidConfig(
                "load_poll_interval must be greater than zero".into(),
            ));
        }
        if c.default_filename.trim().is_empty() {
            return Err(CaptureError::InvalidConfig(
                "default_filename must not be empty".into(),
            ));
        }
        Ok(self.config)
    }
}

// ── Retry policy ─────────────────────────────────────────────────────────

/// Retry behaviour for a single byte fetch.
///
/// Pure configuration: no counters live here, so one policy value is reused
/// for every fetch in a run.
///
/// | Response | Wait before attempt `n + 1` |
/// |----------|-----------------------------|
/// | HTTP 429 | `Retry-After` (or `default_retry_after`) × `n` |
/// | other failure | `base_delay` × `n` |
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Total attempts including the first. Default: 3.
    pub max_attempts: u32,

    /// Unit wait after a non-429 failure. Default: 1 s.
    pub base_delay: Duration,

    /// Unit wait after a 429 without a usable `Retry-After`. Default: 2 s.
    pub default_retry_after: Duration,

    /// Use the server's `Retry-After` hint on 429 responses. Default: true.
    pub honor_retry_after: bool,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_secs(1),
            default_retry_after: Duration::from_secs(2),
            honor_retry_after: true,
        }
    }
}

impl RetryPolicy {
    /// Wait after failed attempt `attempt` (1-based) that was not a 429.
    pub fn failure_delay(&self, attempt: u32) -> Duration {
        self.base_delay.saturating_mul(attempt)
    }

    /// Wait after a 429 on attempt `attempt` (1-based).
    pub fn rate_limit_delay(&self, attempt: u32, hint: Option<Duration>) -> Duration {
        let unit = match hint {
            Some(h) if self.honor_retry_after => h,
            _ => self.default_retry_after,
        };
        unit.saturating_mul(attempt)
    }
}
