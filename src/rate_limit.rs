//! Rate limiting on both sides of the wire.
//!
//! [`RateLimiter`] is the client-side sliding-window admission check run before
//! every request. [`RateLimitInfo`] captures the hints a server sends back when
//! it is throttling us, so retries can respect `Retry-After`.

use http::HeaderMap;
use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tokio::time::Instant;

/// Back-off hints a throttling server attached to its response.
#[derive(Debug, Clone)]
pub struct RateLimitInfo {
    /// Absolute reset time from `X-RateLimit-Reset` / `RateLimit-Reset`.
    pub reset_at: Option<SystemTime>,
    /// `Retry-After`, as seconds or an HTTP date.
    pub retry_after: Option<Duration>,
    /// `X-RateLimit-Remaining`.
    pub remaining: Option<u64>,
}

impl RateLimitInfo {
    /// Reads whichever hint headers are present. Unparseable values are ignored.
    ///
    /// # Examples
    ///
    /// ```
    /// use gridgate::rate_limit::RateLimitInfo;
    /// use http::{HeaderMap, HeaderValue};
    /// use std::time::Duration;
    ///
    /// let mut headers = HeaderMap::new();
    /// headers.insert("retry-after", HeaderValue::from_static("15"));
    ///
    /// let hints = RateLimitInfo::from_headers(&headers);
    /// assert_eq!(hints.retry_after, Some(Duration::from_secs(15)));
    /// assert!(hints.is_rate_limited());
    /// ```
    pub fn from_headers(headers: &HeaderMap) -> Self {
        let reset_at = ["x-ratelimit-reset", "ratelimit-reset"]
            .iter()
            .find_map(|name| header_str(headers, name)?.parse::<u64>().ok())
            .map(|epoch_secs| UNIX_EPOCH + Duration::from_secs(epoch_secs));

        Self {
            reset_at,
            retry_after: header_str(headers, "retry-after").and_then(retry_after_delay),
            remaining: header_str(headers, "x-ratelimit-remaining").and_then(|v| v.parse().ok()),
        }
    }

    /// How long the server wants us to wait, never more than `max_wait`.
    ///
    /// `Retry-After` wins over the reset time. A reset time already in the
    /// past yields `None`.
    pub fn delay(&self, max_wait: Duration) -> Option<Duration> {
        let wait = match (self.retry_after, self.reset_at) {
            (Some(retry_after), _) => retry_after,
            (None, Some(reset_at)) => reset_at.duration_since(SystemTime::now()).ok()?,
            (None, None) => return None,
        };
        Some(wait.min(max_wait))
    }

    /// `true` when the server asked for a pause or reported an exhausted quota.
    pub fn is_rate_limited(&self) -> bool {
        self.retry_after.is_some() || self.remaining == Some(0)
    }
}

fn header_str<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers.get(name)?.to_str().ok().map(str::trim)
}

/// `Retry-After` is either whole seconds or an HTTP date.
fn retry_after_delay(value: &str) -> Option<Duration> {
    match value.parse::<u64>() {
        Ok(secs) => Some(Duration::from_secs(secs)),
        Err(_) => httpdate::parse_http_date(value)
            .ok()?
            .duration_since(SystemTime::now())
            .ok(),
    }
}

/// Rate limiting configuration.
///
/// # Examples
///
/// ```
/// use gridgate::rate_limit::RateLimitConfig;
/// use std::time::Duration;
///
/// let config = RateLimitConfig::builder()
///     .window(Duration::from_secs(10))
///     .max_requests(20)
///     .max_wait(Duration::from_secs(30))
///     .build();
/// assert!(config.enabled);
/// ```
#[derive(Debug, Clone)]
pub struct RateLimitConfig {
    /// Global switch. When `false` every admission check passes.
    pub enabled: bool,

    /// Length of the sliding window.
    pub window: Duration,

    /// Requests admitted per identifier within one window.
    pub max_requests: usize,

    /// How often idle identifiers are swept out of the limiter.
    pub sweep_interval: Duration,

    /// Upper bound on a server-requested wait before retrying.
    pub max_wait: Duration,

    /// Whether `Retry-After` style hints stretch the retry delay.
    pub respect_retry_after: bool,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            window: Duration::from_millis(60_000),
            max_requests: 100,
            sweep_interval: Duration::from_secs(60),
            max_wait: Duration::from_secs(300),
            respect_retry_after: true,
        }
    }
}

impl RateLimitConfig {
    /// Creates a new builder.
    pub fn builder() -> RateLimitConfigBuilder {
        RateLimitConfigBuilder::default()
    }

    /// Creates a disabled configuration.
    pub fn disabled() -> Self {
        Self {
            enabled: false,
            ..Default::default()
        }
    }
}

/// Builder for [`RateLimitConfig`].
#[derive(Default)]
pub struct RateLimitConfigBuilder {
    enabled: Option<bool>,
    window: Option<Duration>,
    max_requests: Option<usize>,
    sweep_interval: Option<Duration>,
    max_wait: Option<Duration>,
    respect_retry_after: Option<bool>,
}

impl RateLimitConfigBuilder {
    /// Sets whether rate limiting is enabled.
    pub fn enabled(mut self, enabled: bool) -> Self {
        self.enabled = Some(enabled);
        self
    }

    /// Sets the sliding window length.
    pub fn window(mut self, window: Duration) -> Self {
        self.window = Some(window);
        self
    }

    /// Sets the per-identifier cap within one window.
    pub fn max_requests(mut self, max_requests: usize) -> Self {
        self.max_requests = Some(max_requests);
        self
    }

    /// Sets the idle-identifier sweep interval.
    pub fn sweep_interval(mut self, interval: Duration) -> Self {
        self.sweep_interval = Some(interval);
        self
    }

    /// Sets the maximum wait honoured for server hints.
    pub fn max_wait(mut self, max_wait: Duration) -> Self {
        self.max_wait = Some(max_wait);
        self
    }

    /// Sets whether to respect the Retry-After header.
    pub fn respect_retry_after(mut self, respect: bool) -> Self {
        self.respect_retry_after = Some(respect);
        self
    }

    /// Builds the `RateLimitConfig`.
    pub fn build(self) -> RateLimitConfig {
        let default = RateLimitConfig::default();
        RateLimitConfig {
            enabled: self.enabled.unwrap_or(default.enabled),
            window: self.window.unwrap_or(default.window),
            max_requests: self.max_requests.unwrap_or(default.max_requests),
            sweep_interval: self.sweep_interval.unwrap_or(default.sweep_interval),
            max_wait: self.max_wait.unwrap_or(default.max_wait),
            respect_retry_after: self
                .respect_retry_after
                .unwrap_or(default.respect_retry_after),
        }
    }
}

/// Sliding-window admission control keyed by endpoint identity.
///
/// Each identifier owns the timestamps of its admitted requests within the
/// window. The check never blocks; the caller decides what a denial means.
///
/// # Examples
///
/// ```
/// use gridgate::rate_limit::{RateLimitConfig, RateLimiter};
///
/// let limiter = RateLimiter::new(RateLimitConfig::builder().max_requests(2).build());
/// assert!(limiter.is_allowed("/sites"));
/// assert!(limiter.is_allowed("/sites"));
/// assert!(!limiter.is_allowed("/sites"));
/// assert!(limiter.is_allowed("/alerts"));
/// ```
#[derive(Debug)]
pub struct RateLimiter {
    config: RateLimitConfig,
    windows: Mutex<HashMap<String, VecDeque<Instant>>>,
}

impl RateLimiter {
    /// Creates a limiter with the given configuration.
    pub fn new(config: RateLimitConfig) -> Self {
        Self {
            config,
            windows: Mutex::new(HashMap::new()),
        }
    }

    /// Returns the limiter configuration.
    pub fn config(&self) -> &RateLimitConfig {
        &self.config
    }

    /// Admits or denies one request for `identifier`, recording it if admitted.
    pub fn is_allowed(&self, identifier: &str) -> bool {
        if !self.config.enabled {
            return true;
        }

        let now = Instant::now();
        let mut windows = self.windows.lock();
        let timestamps = windows.entry(identifier.to_string()).or_default();
        prune(timestamps, now, self.config.window);

        if timestamps.len() >= self.config.max_requests {
            tracing::warn!(
                identifier = identifier,
                max_requests = self.config.max_requests,
                window_ms = self.config.window.as_millis(),
                "Rate limit exceeded"
            );
            return false;
        }

        timestamps.push_back(now);
        true
    }

    /// Requests still available to `identifier` in the current window.
    pub fn remaining(&self, identifier: &str) -> usize {
        if !self.config.enabled {
            return self.config.max_requests;
        }

        let now = Instant::now();
        let mut windows = self.windows.lock();
        match windows.get_mut(identifier) {
            Some(timestamps) => {
                prune(timestamps, now, self.config.window);
                self.config.max_requests.saturating_sub(timestamps.len())
            }
            None => self.config.max_requests,
        }
    }

    /// Drops expired timestamps everywhere and forgets identifiers left empty.
    ///
    /// Idempotent; safe to run alongside admission checks.
    pub fn sweep(&self) -> usize {
        let now = Instant::now();
        let mut windows = self.windows.lock();
        let before = windows.len();
        windows.retain(|_, timestamps| {
            prune(timestamps, now, self.config.window);
            !timestamps.is_empty()
        });
        let removed = before - windows.len();
        if removed > 0 {
            tracing::debug!(removed = removed, "Swept idle rate limit windows");
        }
        removed
    }

    /// Number of identifiers currently tracked.
    pub fn tracked_identifiers(&self) -> usize {
        self.windows.lock().len()
    }
}

/// Drops timestamps `<= now - window`.
fn prune(timestamps: &mut VecDeque<Instant>, now: Instant, window: Duration) {
    while let Some(oldest) = timestamps.front() {
        if now.duration_since(*oldest) >= window {
            timestamps.pop_front();
        } else {
            break;
        }
    }
}
