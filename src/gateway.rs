//! The request pipeline.
//!
//! [`Gateway`] is the single entry point for backend calls. Each
//! [`ApiRequest`] goes through, in order: local rate limiting, the response
//! cache (GET only), endpoint selection, request construction, execution with
//! a timeout, classification with retry or refresh-and-replay, cache
//! write-through and metrics.
//!
//! Build one gateway at startup and hand clones of it to whoever needs it.
//! Clones share all state.

use crate::cache::{CacheStats, CachedPayload, ResponseCache};
use crate::config::{GatewayConfig, HealthCheckConfig};
use crate::credentials::{CredentialStore, FileCredentialStore, MemoryCredentialStore};
use crate::metrics::{MetricsRecorder, MetricsStats, RequestMetric};
use crate::rate_limit::{RateLimitConfig, RateLimiter};
use crate::resolver::{EndpointCandidate, EndpointKind, EndpointResolver};
use crate::simulated::SimulatedTransport;
use crate::transport::{classify, LiveTransport, OutboundRequest, Outcome, RawResponse, Transport};
use crate::{ApiRequest, Error, Response, ResponseSource, Result, RetryStrategy};
use http::header::{AUTHORIZATION, CONTENT_TYPE};
use http::{HeaderMap, HeaderName, HeaderValue};
use parking_lot::RwLock;
use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime};
use tokio::task::JoinHandle;
use url::Url;

pub(crate) const REQUEST_ID_HEADER: &str = "x-request-id";
pub(crate) const CLIENT_VERSION_HEADER: &str = "x-client-version";
pub(crate) const CSRF_HEADER: &str = "x-csrf-token";

/// Client-side request gateway.
///
/// # Examples
///
/// ```no_run
/// use gridgate::{ApiRequest, Gateway};
/// use std::time::Duration;
///
/// # async fn example() -> Result<(), gridgate::Error> {
/// let gateway = Gateway::builder()
///     .base_url("https://primary.example.com")?
///     .base_url("https://backup.example.com")?
///     .timeout(Duration::from_secs(10))
///     .build()?;
///
/// let sites = gateway
///     .execute(ApiRequest::get("/sites").requires_auth(true))
///     .await?;
/// println!("{} (from {:?})", sites.data, sites.source);
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct Gateway {
    pub(crate) inner: Arc<GatewayInner>,
}

pub(crate) struct GatewayInner {
    pub(crate) config: GatewayConfig,
    http_client: reqwest::Client,
    default_headers: HeaderMap,
    retry_strategy: RetryStrategy,
    limiter: Arc<RateLimiter>,
    cache: ResponseCache,
    resolver: Arc<EndpointResolver>,
    pub(crate) credentials: Arc<dyn CredentialStore>,
    simulated: Arc<SimulatedTransport>,
    metrics: MetricsRecorder,
    csrf_token: RwLock<Option<String>>,
    pub(crate) refresh_lock: tokio::sync::Mutex<()>,
    background: Vec<JoinHandle<()>>,
}

impl Drop for GatewayInner {
    fn drop(&mut self) {
        for task in &self.background {
            task.abort();
        }
    }
}

impl Gateway {
    /// Creates a new `GatewayBuilder`.
    pub fn builder() -> GatewayBuilder {
        GatewayBuilder::new()
    }

    /// Runs one logical request through the pipeline.
    ///
    /// Every call, successful or not, leaves one entry in the metrics buffer.
    pub async fn execute(&self, request: ApiRequest) -> Result<Response<serde_json::Value>> {
        let request_id = uuid::Uuid::new_v4().to_string();
        let start_time = SystemTime::now();
        let started = Instant::now();
        let mut attempts = 0;

        let result = self
            .run(&request, &request_id, started, &mut attempts)
            .await;

        let duration = started.elapsed();
        let (status_code, error, from_cache) = match &result {
            Ok(response) => (Some(response.status.as_u16()), None, response.is_cached()),
            Err(e) => (e.status().map(|s| s.as_u16()), Some(e.to_string()), false),
        };
        self.inner.metrics.record(RequestMetric {
            request_id,
            endpoint: request.endpoint.clone(),
            method: request.method.clone(),
            start_time,
            end_time: start_time + duration,
            duration,
            status_code,
            error,
            attempts,
            from_cache,
        });

        result
    }

    async fn run(
        &self,
        request: &ApiRequest,
        request_id: &str,
        started: Instant,
        attempts: &mut usize,
    ) -> Result<Response<serde_json::Value>> {
        let identifier = request.rate_limit_key();
        if !self.inner.limiter.is_allowed(identifier) {
            return Err(Error::RateLimited {
                identifier: identifier.to_string(),
            });
        }

        let cache_key = request.is_cacheable().then(|| request.cache_key());
        if let Some(key) = &cache_key {
            if let Some(cached) = self.inner.cache.get(key) {
                tracing::debug!(
                    request_id = request_id,
                    path = %request.endpoint,
                    "Serving response from cache"
                );
                return Ok(Response {
                    data: cached.data,
                    raw_body: cached.raw_body,
                    status: cached.status,
                    headers: HeaderMap::new(),
                    latency: started.elapsed(),
                    attempts: 0,
                    source: ResponseSource::Cache,
                    request_id: request_id.to_string(),
                });
            }
        }

        let endpoint = self.inner.resolver.find_healthy_endpoint().await;
        let transport = self.transport_for(&endpoint);
        let source = match endpoint.kind {
            EndpointKind::Live => ResponseSource::Network,
            EndpointKind::Simulated => ResponseSource::Simulated,
        };
        let timeout = request.timeout.unwrap_or(self.inner.config.request_timeout);

        let mut retries = 0;
        let mut replayed = false;

        loop {
            *attempts += 1;

            let token = if request.requires_auth {
                self.bearer_token().await?
            } else {
                None
            };
            let outbound = self.build_outbound(request, request_id, token.as_deref())?;

            tracing::debug!(
                request_id = request_id,
                method = %request.method,
                path = %request.endpoint,
                endpoint = %endpoint.url,
                attempt = *attempts,
                "Executing request"
            );

            match self.attempt(transport.as_ref(), &outbound, timeout).await {
                Outcome::Success(raw) => {
                    self.capture_csrf_token(&raw.headers);
                    let response =
                        parse_response(raw, request_id, started.elapsed(), *attempts, source)?;

                    if let Some(key) = &cache_key {
                        self.inner.cache.set(
                            key,
                            &request.endpoint,
                            CachedPayload {
                                data: response.data.clone(),
                                raw_body: response.raw_body.clone(),
                                status: response.status,
                            },
                            self.inner.config.cache_ttl,
                        );
                    }
                    return Ok(response);
                }
                Outcome::Unauthorized(_) if request.requires_auth => {
                    if replayed {
                        tracing::warn!(
                            request_id = request_id,
                            path = %request.endpoint,
                            "Refreshed credentials rejected, signing out"
                        );
                        self.discard_session();
                        return Err(Error::AuthenticationFailed {
                            reason: "credentials rejected after refresh".to_string(),
                        });
                    }

                    tracing::info!(
                        request_id = request_id,
                        path = %request.endpoint,
                        "Received 401, refreshing credentials"
                    );
                    replayed = true;
                    self.refresh_credentials(token.as_deref()).await?;
                }
                Outcome::Unauthorized(error) | Outcome::Fatal(error) => return Err(error),
                Outcome::Retryable(error) => {
                    tracing::warn!(
                        error = %error,
                        attempt = *attempts,
                        method = %request.method,
                        path = %request.endpoint,
                        "Request failed"
                    );

                    retries += 1;
                    match self.retry_delay(&error, retries) {
                        Some(delay) => {
                            tracing::info!(
                                delay_ms = delay.as_millis(),
                                attempt = *attempts,
                                "Retrying request after delay"
                            );
                            tokio::time::sleep(delay).await;
                        }
                        None => {
                            if matches!(error, Error::Network(_)) && !endpoint.is_simulated() {
                                self.inner.resolver.report_failure(&endpoint.url);
                            }
                            return Err(error);
                        }
                    }
                }
            }
        }
    }

    /// Executes one attempt bounded by `timeout`, dropping it when time runs out.
    pub(crate) async fn attempt(
        &self,
        transport: &dyn Transport,
        outbound: &OutboundRequest,
        timeout: Duration,
    ) -> Outcome {
        let result = match tokio::time::timeout(timeout, transport.execute(outbound)).await {
            Ok(result) => result,
            Err(_) => {
                tracing::warn!(
                    path = %outbound.path,
                    timeout_ms = timeout.as_millis(),
                    "Request timed out"
                );
                Err(Error::Timeout)
            }
        };
        classify(result)
    }

    fn retry_delay(&self, error: &Error, retry: usize) -> Option<Duration> {
        let backoff = self.inner.retry_strategy.delay_for_attempt(retry)?;
        let rate_limit = &self.inner.config.rate_limit;

        if rate_limit.respect_retry_after {
            if let Some(hint) = error.rate_limit_delay(rate_limit.max_wait) {
                tracing::info!(
                    rate_limit_delay_ms = hint.as_millis(),
                    max_wait_secs = rate_limit.max_wait.as_secs(),
                    "Server asked us to back off"
                );
                return Some(backoff.max(hint));
            }
        }
        Some(backoff)
    }

    pub(crate) fn transport_for(&self, endpoint: &EndpointCandidate) -> Arc<dyn Transport> {
        match endpoint.kind {
            EndpointKind::Live => Arc::new(LiveTransport::new(
                self.inner.http_client.clone(),
                endpoint.url.clone(),
            )),
            EndpointKind::Simulated => self.inner.simulated.clone(),
        }
    }

    /// Headers every attempt carries: defaults, then `extra`, then ours.
    pub(crate) fn base_headers(&self, request_id: &str, extra: &HeaderMap) -> Result<HeaderMap> {
        let mut headers = self.inner.default_headers.clone();
        headers.extend(extra.clone());
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        headers.insert(
            HeaderName::from_static(REQUEST_ID_HEADER),
            header_value(request_id)?,
        );
        headers.insert(
            HeaderName::from_static(CLIENT_VERSION_HEADER),
            header_value(&self.inner.config.client_version)?,
        );
        Ok(headers)
    }

    fn build_outbound(
        &self,
        request: &ApiRequest,
        request_id: &str,
        token: Option<&str>,
    ) -> Result<OutboundRequest> {
        let mut headers = self.base_headers(request_id, &request.headers)?;

        if let Some(token) = token {
            headers.insert(AUTHORIZATION, header_value(&format!("Bearer {}", token))?);
        }
        if request.is_mutation() {
            if let Some(csrf) = self.csrf_token() {
                headers.insert(HeaderName::from_static(CSRF_HEADER), header_value(&csrf)?);
            }
        }

        Ok(OutboundRequest {
            method: request.method.clone(),
            path: request.endpoint.clone(),
            query_params: request.query_params.clone(),
            headers,
            body: request.body.clone(),
        })
    }

    fn capture_csrf_token(&self, headers: &HeaderMap) {
        if let Some(token) = headers.get(CSRF_HEADER).and_then(|v| v.to_str().ok()) {
            let mut current = self.inner.csrf_token.write();
            if current.as_deref() != Some(token) {
                tracing::debug!("Stored CSRF token from response");
                *current = Some(token.to_string());
            }
        }
    }

    /// Sets (or with `None`, forgets) the CSRF token sent on mutating requests.
    pub fn set_csrf_token(&self, token: Option<String>) {
        *self.inner.csrf_token.write() = token;
    }

    pub fn csrf_token(&self) -> Option<String> {
        self.inner.csrf_token.read().clone()
    }

    /// The session store shared with other consumers (e.g. a live-update socket).
    pub fn credentials(&self) -> Arc<dyn CredentialStore> {
        self.inner.credentials.clone()
    }

    pub fn config(&self) -> &GatewayConfig {
        &self.inner.config
    }

    pub fn cache_stats(&self) -> CacheStats {
        self.inner.cache.stats()
    }

    pub fn clear_cache(&self) {
        self.inner.cache.clear();
    }

    /// Drops every cached GET for `endpoint`.
    pub fn invalidate_endpoint(&self, endpoint: &str) -> usize {
        self.inner.cache.invalidate_endpoint(endpoint)
    }

    pub fn metrics(&self) -> &MetricsRecorder {
        &self.inner.metrics
    }

    pub fn recent_metrics(&self) -> Vec<RequestMetric> {
        self.inner.metrics.recent()
    }

    pub fn metrics_stats(&self) -> MetricsStats {
        self.inner.metrics.stats()
    }

    pub fn rate_limiter(&self) -> &RateLimiter {
        &self.inner.limiter
    }

    pub fn resolver(&self) -> &EndpointResolver {
        &self.inner.resolver
    }

    /// The endpoint the next request would use.
    pub async fn find_healthy_endpoint(&self) -> EndpointCandidate {
        self.inner.resolver.find_healthy_endpoint().await
    }
}

impl std::fmt::Debug for Gateway {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Gateway")
            .field("config", &self.inner.config)
            .field("resolver", &self.inner.resolver)
            .finish()
    }
}

fn header_value(value: &str) -> Result<HeaderValue> {
    HeaderValue::try_from(value)
        .map_err(|e| Error::ConfigurationError(format!("Invalid header value: {}", e)))
}

/// Parses a 2xx body as JSON. An empty body (e.g. 204) becomes `null`.
fn parse_response(
    raw: RawResponse,
    request_id: &str,
    latency: Duration,
    attempts: usize,
    source: ResponseSource,
) -> Result<Response<serde_json::Value>> {
    tracing::info!(
        request_id = request_id,
        status = raw.status.as_u16(),
        latency_ms = latency.as_millis(),
        attempts = attempts,
        "Received HTTP response"
    );

    let data = if raw.body.trim().is_empty() {
        serde_json::Value::Null
    } else {
        match serde_json::from_str(&raw.body) {
            Ok(data) => data,
            Err(e) => {
                tracing::error!(
                    error = %e,
                    raw_response = %raw.body,
                    "Failed to deserialize response"
                );
                return Err(Error::DeserializationFailed {
                    raw_response: raw.body,
                    serde_error: e.to_string(),
                    status: raw.status,
                });
            }
        }
    };

    Ok(Response {
        data,
        raw_body: raw.body,
        status: raw.status,
        headers: raw.headers,
        latency,
        attempts,
        source,
        request_id: request_id.to_string(),
    })
}

/// Builder for configuring and creating a [`Gateway`].
///
/// # Examples
///
/// ```no_run
/// use gridgate::{GatewayBuilder, GatewayConfig, RetryStrategy};
/// use std::time::Duration;
///
/// # async fn example() -> Result<(), gridgate::Error> {
/// let gateway = GatewayBuilder::new()
///     .config(GatewayConfig::from_env()?)
///     .retry_strategy(RetryStrategy::ExponentialBackoff {
///         initial_delay: Duration::from_millis(250),
///         max_delay: Duration::from_secs(5),
///         max_retries: 4,
///         jitter: false,
///     })
///     .default_header("User-Agent", "energy-dashboard/2.1")?
///     .build()?;
/// # Ok(())
/// # }
/// ```
pub struct GatewayBuilder {
    config: GatewayConfig,
    default_headers: HeaderMap,
    retry_strategy: Option<RetryStrategy>,
    credential_store: Option<Arc<dyn CredentialStore>>,
    simulated: SimulatedTransport,
    background_tasks: bool,
}

impl GatewayBuilder {
    /// Creates a new `GatewayBuilder` with default settings.
    pub fn new() -> Self {
        Self {
            config: GatewayConfig::default(),
            default_headers: HeaderMap::new(),
            retry_strategy: None,
            credential_store: None,
            simulated: SimulatedTransport::default(),
            background_tasks: true,
        }
    }

    /// Replaces the whole configuration.
    pub fn config(mut self, config: GatewayConfig) -> Self {
        self.config = config;
        self
    }

    /// Appends a candidate base URL. Earlier URLs are preferred.
    ///
    /// # Errors
    ///
    /// Returns an error if the URL is invalid.
    pub fn base_url(mut self, url: impl AsRef<str>) -> Result<Self> {
        self.config.endpoints.push(Url::parse(url.as_ref())?);
        Ok(self)
    }

    /// Adds a default header that will be included in all requests.
    ///
    /// # Errors
    ///
    /// Returns an error if the header name or value is invalid.
    pub fn default_header(mut self, name: impl AsRef<str>, value: impl AsRef<str>) -> Result<Self> {
        let name = HeaderName::try_from(name.as_ref())
            .map_err(|e| Error::ConfigurationError(format!("Invalid header name: {}", e)))?;
        self.default_headers.insert(name, header_value(value.as_ref())?);
        Ok(self)
    }

    /// Sets the default per-attempt timeout.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.config.request_timeout = timeout;
        self
    }

    /// Overrides the backoff derived from `max_retries` and `retry_base_delay`.
    pub fn retry_strategy(mut self, strategy: RetryStrategy) -> Self {
        self.retry_strategy = Some(strategy);
        self
    }

    pub fn rate_limit_config(mut self, config: RateLimitConfig) -> Self {
        self.config.rate_limit = config;
        self
    }

    pub fn cache_ttl(mut self, ttl: Duration) -> Self {
        self.config.cache_ttl = ttl;
        self
    }

    pub fn metrics_capacity(mut self, capacity: usize) -> Self {
        self.config.metrics_capacity = capacity;
        self
    }

    /// Turns active health probing on or off.
    pub fn health_checks(mut self, enabled: bool) -> Self {
        self.config.health_check.enabled = enabled;
        self
    }

    pub fn health_check_config(mut self, config: HealthCheckConfig) -> Self {
        self.config.health_check = config;
        self
    }

    /// Whether to fall back to the simulated backend when nothing is healthy.
    pub fn offline_fallback(mut self, enabled: bool) -> Self {
        self.config.offline_fallback = enabled;
        self
    }

    /// Uses `store` for the session instead of the configured default.
    pub fn credential_store(mut self, store: Arc<dyn CredentialStore>) -> Self {
        self.credential_store = Some(store);
        self
    }

    /// Replaces the offline responder.
    pub fn simulated_transport(mut self, transport: SimulatedTransport) -> Self {
        self.simulated = transport;
        self
    }

    /// Whether to spawn the rate-limiter sweep and health monitor.
    ///
    /// Tasks are only spawned when `build` runs inside a tokio runtime.
    pub fn background_tasks(mut self, enabled: bool) -> Self {
        self.background_tasks = enabled;
        self
    }

    /// Builds the configured `Gateway`.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration is invalid or the HTTP client
    /// cannot be created.
    pub fn build(self) -> Result<Gateway> {
        let config = self.config;
        config.validate()?;

        let http_client = reqwest::Client::builder().build().map_err(|e| {
            Error::ConfigurationError(format!("Failed to build HTTP client: {}", e))
        })?;

        let retry_strategy = self
            .retry_strategy
            .unwrap_or_else(|| RetryStrategy::ExponentialBackoff {
                initial_delay: config.retry_base_delay,
                max_delay: config.max_retry_delay,
                max_retries: config.max_retries,
                jitter: false,
            });

        let credentials: Arc<dyn CredentialStore> = match (self.credential_store, &config.credentials_path) {
            (Some(store), _) => store,
            (None, Some(path)) => Arc::new(FileCredentialStore::open(path)),
            (None, None) => Arc::new(MemoryCredentialStore::new()),
        };

        let limiter = Arc::new(RateLimiter::new(config.rate_limit.clone()));
        let resolver = Arc::new(EndpointResolver::new(
            config.endpoints.clone(),
            config.health_check.clone(),
            config.offline_fallback,
            http_client.clone(),
        ));

        let background = if self.background_tasks {
            spawn_background_tasks(&limiter, &resolver, config.rate_limit.sweep_interval)
        } else {
            Vec::new()
        };

        tracing::info!(
            endpoints = config.endpoints.len(),
            offline_fallback = config.offline_fallback,
            max_retries = retry_strategy.max_retries(),
            "Gateway ready"
        );

        Ok(Gateway {
            inner: Arc::new(GatewayInner {
                http_client,
                default_headers: self.default_headers,
                retry_strategy,
                limiter,
                cache: ResponseCache::new(config.cache_max_entries),
                resolver,
                credentials,
                simulated: Arc::new(self.simulated),
                metrics: MetricsRecorder::new(config.metrics_capacity),
                csrf_token: RwLock::new(None),
                refresh_lock: tokio::sync::Mutex::new(()),
                background,
                config,
            }),
        })
    }
}

impl Default for GatewayBuilder {
    fn default() -> Self {
        Self::new()
    }
}

fn spawn_background_tasks(
    limiter: &Arc<RateLimiter>,
    resolver: &Arc<EndpointResolver>,
    sweep_interval: Duration,
) -> Vec<JoinHandle<()>> {
    let Ok(runtime) = tokio::runtime::Handle::try_current() else {
        tracing::warn!("No tokio runtime, background sweeps and health monitor not started");
        return Vec::new();
    };

    let limiter = limiter.clone();
    let sweep = runtime.spawn(async move {
        let mut ticker = tokio::time::interval(sweep_interval);
        ticker.tick().await;
        loop {
            ticker.tick().await;
            limiter.sweep();
        }
    });

    let monitor = runtime.spawn(resolver.clone().run_health_monitor());

    vec![sweep, monitor]
}
