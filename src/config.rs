//! Gateway configuration.
//!
//! [`GatewayConfig::default`] carries the stock policy; [`GatewayConfig::from_env`]
//! overlays `GRIDGATE_*` environment variables on top of it.

use crate::rate_limit::RateLimitConfig;
use crate::{Error, Result};
use std::path::PathBuf;
use std::time::Duration;
use url::Url;

/// Active health probing of candidate endpoints.
#[derive(Debug, Clone)]
pub struct HealthCheckConfig {
    /// When `false`, candidates are assumed healthy and never probed.
    pub enabled: bool,
    /// Probe path, relative to each candidate base URL.
    pub path: String,
    /// Per-probe timeout.
    pub timeout: Duration,
    /// Probe results older than this are refreshed.
    pub interval: Duration,
}

impl Default for HealthCheckConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            path: "/health".to_string(),
            timeout: Duration::from_secs(5),
            interval: Duration::from_secs(30),
        }
    }
}

/// Everything the gateway needs to know up front.
#[derive(Debug, Clone)]
pub struct GatewayConfig {
    /// Candidate base URLs in priority order.
    pub endpoints: Vec<Url>,
    /// Serve from the simulated backend when no candidate is healthy.
    pub offline_fallback: bool,
    /// Default per-attempt timeout.
    pub request_timeout: Duration,
    pub max_retries: usize,
    /// Delay before the first retry; doubles on each further retry.
    pub retry_base_delay: Duration,
    pub max_retry_delay: Duration,
    pub cache_ttl: Duration,
    pub cache_max_entries: usize,
    pub rate_limit: RateLimitConfig,
    /// Ring buffer size for request metrics.
    pub metrics_capacity: usize,
    pub health_check: HealthCheckConfig,
    /// Sent as `X-Client-Version`.
    pub client_version: String,
    pub login_path: String,
    pub refresh_path: String,
    pub logout_path: String,
    /// Durable session file; `None` keeps the session in memory.
    pub credentials_path: Option<PathBuf>,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            endpoints: Vec::new(),
            offline_fallback: true,
            request_timeout: Duration::from_millis(30_000),
            max_retries: 3,
            retry_base_delay: Duration::from_millis(1_000),
            max_retry_delay: Duration::from_secs(30),
            cache_ttl: Duration::from_millis(300_000),
            cache_max_entries: 100,
            rate_limit: RateLimitConfig::default(),
            metrics_capacity: 100,
            health_check: HealthCheckConfig::default(),
            client_version: env!("CARGO_PKG_VERSION").to_string(),
            login_path: "/auth/login".to_string(),
            refresh_path: "/auth/refresh".to_string(),
            logout_path: "/auth/logout".to_string(),
            credentials_path: None,
        }
    }
}

impl GatewayConfig {
    /// Create GatewayConfig from environment variables.
    ///
    /// Environment variables (all optional):
    /// - `GRIDGATE_API_URLS`: Comma-separated candidate base URLs
    /// - `GRIDGATE_TIMEOUT_MS`: Request timeout (default: 30000)
    /// - `GRIDGATE_MAX_RETRIES`: Retries for transient failures (default: 3)
    /// - `GRIDGATE_RETRY_DELAY_MS`: Base backoff delay (default: 1000)
    /// - `GRIDGATE_CACHE_TTL_MS`: Response cache TTL (default: 300000)
    /// - `GRIDGATE_CACHE_MAX_ENTRIES`: Response cache capacity (default: 100)
    /// - `GRIDGATE_RATE_LIMIT_ENABLED`: "true" or "false" (default: true)
    /// - `GRIDGATE_RATE_LIMIT_WINDOW_MS`: Sliding window length (default: 60000)
    /// - `GRIDGATE_RATE_LIMIT_MAX_REQUESTS`: Requests per window per endpoint (default: 100)
    /// - `GRIDGATE_METRICS_BUFFER_SIZE`: Metrics ring buffer size (default: 100)
    /// - `GRIDGATE_HEALTH_CHECK_ENABLED`: "true" or "false" (default: true)
    /// - `GRIDGATE_OFFLINE_FALLBACK`: "true" or "false" (default: true)
    /// - `GRIDGATE_CREDENTIALS_PATH`: Session file path (default: in-memory)
    /// - `GRIDGATE_CLIENT_VERSION`: Value for `X-Client-Version`
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Like [`from_env`](Self::from_env) with a custom variable source.
    ///
    /// # Examples
    ///
    /// ```
    /// use gridgate::GatewayConfig;
    /// use std::time::Duration;
    ///
    /// let config = GatewayConfig::from_lookup(|key| match key {
    ///     "GRIDGATE_API_URLS" => Some("http://primary:8080, http://backup:8080".to_string()),
    ///     "GRIDGATE_MAX_RETRIES" => Some("5".to_string()),
    ///     _ => None,
    /// })
    /// .unwrap();
    ///
    /// assert_eq!(config.endpoints.len(), 2);
    /// assert_eq!(config.max_retries, 5);
    /// assert_eq!(config.request_timeout, Duration::from_secs(30));
    /// ```
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();
        let var = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        if let Some(urls) = var("GRIDGATE_API_URLS") {
            config.endpoints = urls
                .split(',')
                .map(str::trim)
                .filter(|u| !u.is_empty())
                .map(Url::parse)
                .collect::<std::result::Result<_, _>>()?;
        }
        if let Some(ms) = parse_var(&var, "GRIDGATE_TIMEOUT_MS")? {
            config.request_timeout = Duration::from_millis(ms);
        }
        if let Some(retries) = parse_var(&var, "GRIDGATE_MAX_RETRIES")? {
            config.max_retries = retries;
        }
        if let Some(ms) = parse_var(&var, "GRIDGATE_RETRY_DELAY_MS")? {
            config.retry_base_delay = Duration::from_millis(ms);
        }
        if let Some(ms) = parse_var(&var, "GRIDGATE_CACHE_TTL_MS")? {
            config.cache_ttl = Duration::from_millis(ms);
        }
        if let Some(entries) = parse_var(&var, "GRIDGATE_CACHE_MAX_ENTRIES")? {
            config.cache_max_entries = entries;
        }
        if let Some(enabled) = var("GRIDGATE_RATE_LIMIT_ENABLED") {
            config.rate_limit.enabled = enabled.to_lowercase() != "false";
        }
        if let Some(ms) = parse_var(&var, "GRIDGATE_RATE_LIMIT_WINDOW_MS")? {
            config.rate_limit.window = Duration::from_millis(ms);
        }
        if let Some(max) = parse_var(&var, "GRIDGATE_RATE_LIMIT_MAX_REQUESTS")? {
            config.rate_limit.max_requests = max;
        }
        if let Some(size) = parse_var(&var, "GRIDGATE_METRICS_BUFFER_SIZE")? {
            config.metrics_capacity = size;
        }
        if let Some(enabled) = var("GRIDGATE_HEALTH_CHECK_ENABLED") {
            config.health_check.enabled = enabled.to_lowercase() != "false";
        }
        if let Some(enabled) = var("GRIDGATE_OFFLINE_FALLBACK") {
            config.offline_fallback = enabled.to_lowercase() != "false";
        }
        if let Some(path) = var("GRIDGATE_CREDENTIALS_PATH") {
            config.credentials_path = Some(PathBuf::from(path));
        }
        if let Some(version) = var("GRIDGATE_CLIENT_VERSION") {
            config.client_version = version;
        }

        config.validate()?;
        Ok(config)
    }

    /// Rejects settings the gateway cannot run with.
    pub fn validate(&self) -> Result<()> {
        let checks = [
            (self.request_timeout.is_zero(), "request_timeout must be > 0"),
            (self.cache_max_entries == 0, "cache_max_entries must be > 0"),
            (self.metrics_capacity == 0, "metrics_capacity must be > 0"),
            (
                self.rate_limit.window.is_zero(),
                "rate_limit.window must be > 0",
            ),
            (
                self.rate_limit.max_requests == 0,
                "rate_limit.max_requests must be > 0",
            ),
            (
                self.health_check.timeout.is_zero(),
                "health_check.timeout must be > 0",
            ),
        ];

        match checks.iter().find(|(failed, _)| *failed) {
            Some((_, reason)) => Err(Error::ConfigurationError(reason.to_string())),
            None => Ok(()),
        }
    }
}

fn parse_var<T, F>(var: &F, key: &str) -> Result<Option<T>>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
    F: Fn(&str) -> Option<String>,
{
    var(key)
        .map(|raw| {
            raw.parse::<T>()
                .map_err(|e| Error::ConfigurationError(format!("Invalid {}={:?}: {}", key, raw, e)))
        })
        .transpose()
}
