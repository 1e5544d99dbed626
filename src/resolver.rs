//! Health-based endpoint selection.
//!
//! # Data Flow
//! ```text
//! Active probing (probe_all):
//!     Stale probe state or periodic timer
//!     → GET <candidate>/health with a short timeout
//!     → 2xx marks healthy, anything else unhealthy
//!
//! Passive reporting (report_failure):
//!     Network failure observed by the pipeline
//!     → candidate unhealthy until the next probe
//!
//! Selection (find_healthy_endpoint):
//!     First healthy candidate in configured order
//!     → otherwise the simulated offline endpoint
//! ```
//!
//! Health is advisory. A selected endpoint may still fail the request.

use crate::config::HealthCheckConfig;
use parking_lot::Mutex;
use std::time::SystemTime;
use tokio::time::Instant;
use url::Url;

/// How requests to an endpoint are served.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EndpointKind {
    /// A real backend reached over HTTP.
    Live,
    /// The in-process simulated responder.
    Simulated,
}

/// One backend address the gateway may route to.
#[derive(Debug, Clone, PartialEq)]
pub struct EndpointCandidate {
    pub url: Url,
    pub kind: EndpointKind,
    pub last_health_check: Option<SystemTime>,
    pub is_healthy: bool,
}

impl EndpointCandidate {
    pub fn live(url: Url) -> Self {
        Self {
            url,
            kind: EndpointKind::Live,
            last_health_check: None,
            is_healthy: false,
        }
    }

    /// The sentinel used when nothing live is reachable.
    pub fn offline() -> Self {
        Self {
            url: offline_url(),
            kind: EndpointKind::Simulated,
            last_health_check: None,
            is_healthy: true,
        }
    }

    pub fn is_simulated(&self) -> bool {
        self.kind == EndpointKind::Simulated
    }
}

fn offline_url() -> Url {
    Url::parse("simulated://offline/").expect("static URL is valid")
}

/// Picks the first healthy candidate, probing when state has gone stale.
pub struct EndpointResolver {
    candidates: Mutex<Vec<EndpointCandidate>>,
    config: HealthCheckConfig,
    offline_fallback: bool,
    http_client: reqwest::Client,
    last_probe: Mutex<Option<Instant>>,
    probe_lock: tokio::sync::Mutex<()>,
}

impl EndpointResolver {
    /// Creates a resolver over `urls`, in priority order.
    ///
    /// With probing disabled every candidate is assumed healthy.
    pub fn new(
        urls: Vec<Url>,
        config: HealthCheckConfig,
        offline_fallback: bool,
        http_client: reqwest::Client,
    ) -> Self {
        let candidates = urls
            .into_iter()
            .map(|mut url| {
                // Keep a trailing slash so joining the probe path extends the base.
                if !url.path().ends_with('/') {
                    let path = format!("{}/", url.path());
                    url.set_path(&path);
                }
                EndpointCandidate {
                    is_healthy: !config.enabled,
                    ..EndpointCandidate::live(url)
                }
            })
            .collect();

        Self {
            candidates: Mutex::new(candidates),
            config,
            offline_fallback,
            http_client,
            last_probe: Mutex::new(None),
            probe_lock: tokio::sync::Mutex::new(()),
        }
    }

    /// Snapshot of the live candidates and their health.
    pub fn candidates(&self) -> Vec<EndpointCandidate> {
        self.candidates.lock().clone()
    }

    /// Returns the endpoint the next request should use.
    ///
    /// Probes first if the last probe is older than the probe interval.
    /// Concurrent callers share a single probe round.
    pub async fn find_healthy_endpoint(&self) -> EndpointCandidate {
        if self.config.enabled && self.probe_is_stale() {
            let _probing = self.probe_lock.lock().await;
            if self.probe_is_stale() {
                self.probe_all().await;
            }
        }

        self.select()
    }

    fn select(&self) -> EndpointCandidate {
        let candidates = self.candidates.lock();
        if let Some(candidate) = candidates.iter().find(|c| c.is_healthy) {
            return candidate.clone();
        }

        match candidates.first() {
            Some(first) if !self.offline_fallback => first.clone(),
            _ => {
                tracing::warn!(
                    candidates = candidates.len(),
                    "No healthy endpoint, using simulated backend"
                );
                EndpointCandidate::offline()
            }
        }
    }

    fn probe_is_stale(&self) -> bool {
        match *self.last_probe.lock() {
            Some(at) => at.elapsed() >= self.config.interval,
            None => true,
        }
    }

    /// Probes every candidate and records the results.
    pub async fn probe_all(&self) {
        let urls: Vec<Url> = self.candidates.lock().iter().map(|c| c.url.clone()).collect();

        for url in urls {
            let healthy = self.probe(&url).await;
            let mut candidates = self.candidates.lock();
            if let Some(candidate) = candidates.iter_mut().find(|c| c.url == url) {
                if candidate.is_healthy != healthy {
                    tracing::info!(url = %url, healthy = healthy, "Endpoint health changed");
                }
                candidate.is_healthy = healthy;
                candidate.last_health_check = Some(SystemTime::now());
            }
        }

        *self.last_probe.lock() = Some(Instant::now());
    }

    async fn probe(&self, base: &Url) -> bool {
        let url = match base.join(self.config.path.trim_start_matches('/')) {
            Ok(url) => url,
            Err(e) => {
                tracing::error!(url = %base, error = %e, "Failed to build health check URL");
                return false;
            }
        };

        let request = self
            .http_client
            .get(url.clone())
            .header(http::header::USER_AGENT, "gridgate-health-check")
            .send();

        match tokio::time::timeout(self.config.timeout, request).await {
            Ok(Ok(response)) => {
                let success = response.status().is_success();
                if !success {
                    tracing::warn!(url = %url, status = %response.status(), "Health check failed: non-success status");
                }
                success
            }
            Ok(Err(e)) => {
                tracing::warn!(url = %url, error = %e, "Health check failed: connection error");
                false
            }
            Err(_) => {
                tracing::warn!(url = %url, "Health check failed: timeout");
                false
            }
        }
    }

    /// Marks a live candidate unhealthy after a network failure.
    ///
    /// No-op when probing is disabled, since nothing would restore it.
    pub fn report_failure(&self, url: &Url) {
        if !self.config.enabled {
            return;
        }

        let mut candidates = self.candidates.lock();
        if let Some(candidate) = candidates.iter_mut().find(|c| &c.url == url) {
            if candidate.is_healthy {
                tracing::warn!(url = %url, "Marking endpoint unhealthy after network failure");
                candidate.is_healthy = false;
            }
        }
    }

    /// Runs probes on the configured interval until the task is aborted.
    pub async fn run_health_monitor(self: std::sync::Arc<Self>) {
        if !self.config.enabled {
            tracing::info!("Active health checks disabled");
            return;
        }

        tracing::info!(
            interval_ms = self.config.interval.as_millis(),
            path = %self.config.path,
            "Health monitor starting"
        );

        let mut ticker = tokio::time::interval(self.config.interval);
        loop {
            ticker.tick().await;
            let _probing = self.probe_lock.lock().await;
            self.probe_all().await;
        }
    }
}

impl std::fmt::Debug for EndpointResolver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EndpointResolver")
            .field("candidates", &*self.candidates.lock())
            .field("offline_fallback", &self.offline_fallback)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn probing(interval: Duration) -> HealthCheckConfig {
        HealthCheckConfig {
            enabled: true,
            path: "/health".to_string(),
            timeout: Duration::from_millis(500),
            interval,
        }
    }

    fn unreachable_url() -> Url {
        Url::parse("http://127.0.0.1:1").unwrap()
    }

    #[tokio::test]
    async fn test_no_candidates_falls_back_to_offline() {
        let resolver = EndpointResolver::new(
            vec![],
            probing(Duration::from_secs(30)),
            true,
            reqwest::Client::new(),
        );

        assert!(resolver.find_healthy_endpoint().await.is_simulated());
    }

    #[tokio::test]
    async fn test_picks_first_healthy_candidate() {
        let healthy = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/health"))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&healthy)
            .await;

        let resolver = EndpointResolver::new(
            vec![unreachable_url(), Url::parse(&healthy.uri()).unwrap()],
            probing(Duration::from_secs(30)),
            true,
            reqwest::Client::new(),
        );

        let selected = resolver.find_healthy_endpoint().await;
        assert_eq!(selected.kind, EndpointKind::Live);
        assert_eq!(selected.url, Url::parse(&healthy.uri()).unwrap());

        // Cached probe state: no second health request.
        let again = resolver.find_healthy_endpoint().await;
        assert_eq!(again.url, selected.url);

        let candidates = resolver.candidates();
        assert!(!candidates[0].is_healthy);
        assert!(candidates[0].last_health_check.is_some());
    }

    #[tokio::test]
    async fn test_non_success_probe_is_unhealthy() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/health"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&server)
            .await;

        let resolver = EndpointResolver::new(
            vec![Url::parse(&server.uri()).unwrap()],
            probing(Duration::from_secs(30)),
            true,
            reqwest::Client::new(),
        );

        assert!(resolver.find_healthy_endpoint().await.is_simulated());
    }

    #[tokio::test]
    async fn test_without_fallback_returns_first_candidate() {
        let resolver = EndpointResolver::new(
            vec![unreachable_url()],
            probing(Duration::from_secs(30)),
            false,
            reqwest::Client::new(),
        );

        let selected = resolver.find_healthy_endpoint().await;
        assert_eq!(selected.kind, EndpointKind::Live);
        assert!(!selected.is_healthy);
    }

    #[tokio::test]
    async fn test_disabled_probing_trusts_candidates() {
        let resolver = EndpointResolver::new(
            vec![unreachable_url()],
            HealthCheckConfig {
                enabled: false,
                ..probing(Duration::from_secs(30))
            },
            true,
            reqwest::Client::new(),
        );

        let selected = resolver.find_healthy_endpoint().await;
        assert_eq!(selected.url, unreachable_url());

        resolver.report_failure(&unreachable_url());
        assert!(resolver.candidates()[0].is_healthy);
    }

    #[tokio::test]
    async fn test_reported_failure_fails_over_until_next_probe() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/health"))
            .respond_with(ResponseTemplate::new(200))
            .mount(&server)
            .await;
        let url = Url::parse(&server.uri()).unwrap();

        let resolver = EndpointResolver::new(
            vec![url.clone()],
            probing(Duration::from_millis(100)),
            true,
            reqwest::Client::new(),
        );

        assert_eq!(resolver.find_healthy_endpoint().await.url, url);
        resolver.report_failure(&url);
        assert!(resolver.find_healthy_endpoint().await.is_simulated());

        tokio::time::sleep(Duration::from_millis(150)).await;
        assert_eq!(resolver.find_healthy_endpoint().await.url, url);
    }
}
