//! Logical request description handed to the gateway.

use http::{HeaderMap, HeaderName, HeaderValue, Method};
use serde::Serialize;
use std::collections::BTreeMap;
use std::time::Duration;

/// One logical request: endpoint, method, payload and policy flags.
///
/// The same `ApiRequest` may turn into several network attempts (retries,
/// a token-refresh replay) or none at all (cache hit, local rate limit).
///
/// # Examples
///
/// ```
/// use gridgate::ApiRequest;
/// use std::time::Duration;
///
/// let request = ApiRequest::get("/sites")
///     .with_query_param("page", "2")
///     .requires_auth(true)
///     .timeout(Duration::from_secs(5));
///
/// assert!(request.is_cacheable());
/// assert!(!ApiRequest::delete("/sites/7").is_cacheable());
/// ```
#[derive(Debug, Clone)]
pub struct ApiRequest {
    /// The HTTP method (GET, POST, etc.).
    pub method: Method,

    /// The endpoint path, relative to whichever base URL gets selected.
    pub endpoint: String,

    /// JSON body, if any.
    pub body: Option<serde_json::Value>,

    /// Additional headers for this request.
    pub headers: HeaderMap,

    /// Query parameters, kept sorted so cache keys are stable.
    pub query_params: BTreeMap<String, String>,

    /// Attach a bearer token and recover from 401 with a refresh.
    pub requires_auth: bool,

    /// Bypass the response cache for this GET.
    pub skip_cache: bool,

    /// Per-attempt timeout; the gateway default applies when `None`.
    pub timeout: Option<Duration>,
}

impl ApiRequest {
    /// Creates a request with the given method and endpoint.
    pub fn new(method: Method, endpoint: impl Into<String>) -> Self {
        Self {
            method,
            endpoint: endpoint.into(),
            body: None,
            headers: HeaderMap::new(),
            query_params: BTreeMap::new(),
            requires_auth: false,
            skip_cache: false,
            timeout: None,
        }
    }

    pub fn get(endpoint: impl Into<String>) -> Self {
        Self::new(Method::GET, endpoint)
    }

    pub fn post(endpoint: impl Into<String>) -> Self {
        Self::new(Method::POST, endpoint)
    }

    pub fn put(endpoint: impl Into<String>) -> Self {
        Self::new(Method::PUT, endpoint)
    }

    pub fn patch(endpoint: impl Into<String>) -> Self {
        Self::new(Method::PATCH, endpoint)
    }

    pub fn delete(endpoint: impl Into<String>) -> Self {
        Self::new(Method::DELETE, endpoint)
    }

    /// Adds a header to the request.
    ///
    /// # Errors
    ///
    /// Returns an error if the header name or value is invalid.
    pub fn with_header(
        mut self,
        name: impl AsRef<str>,
        value: impl AsRef<str>,
    ) -> Result<Self, crate::Error> {
        let name = HeaderName::try_from(name.as_ref())
            .map_err(|e| crate::Error::ConfigurationError(format!("Invalid header name: {}", e)))?;
        let value = HeaderValue::try_from(value.as_ref())
            .map_err(|e| crate::Error::ConfigurationError(format!("Invalid header value: {}", e)))?;
        self.headers.insert(name, value);
        Ok(self)
    }

    /// Adds a query parameter to the request.
    pub fn with_query_param(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.query_params.insert(key.into(), value.into());
        self
    }

    /// Adds multiple query parameters to the request.
    pub fn with_query_params(mut self, params: impl IntoIterator<Item = (String, String)>) -> Self {
        self.query_params.extend(params);
        self
    }

    /// Serializes `body` as the JSON payload.
    ///
    /// # Errors
    ///
    /// Returns [`Error::SerializationFailed`](crate::Error::SerializationFailed)
    /// if the body cannot be represented as JSON.
    pub fn with_body<B: Serialize + ?Sized>(mut self, body: &B) -> Result<Self, crate::Error> {
        let value = serde_json::to_value(body)
            .map_err(|e| crate::Error::SerializationFailed(e.to_string()))?;
        self.body = Some(value);
        Ok(self)
    }

    /// Sets an already-built JSON payload.
    pub fn json(mut self, body: serde_json::Value) -> Self {
        self.body = Some(body);
        self
    }

    pub fn requires_auth(mut self, requires_auth: bool) -> Self {
        self.requires_auth = requires_auth;
        self
    }

    pub fn skip_cache(mut self, skip_cache: bool) -> Self {
        self.skip_cache = skip_cache;
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// `true` for POST, PUT, PATCH and DELETE.
    pub fn is_mutation(&self) -> bool {
        matches!(
            self.method,
            Method::POST | Method::PUT | Method::PATCH | Method::DELETE
        )
    }

    /// Only GETs that did not opt out ever touch the cache.
    pub fn is_cacheable(&self) -> bool {
        self.method == Method::GET && !self.skip_cache
    }

    /// Identity used by the local rate limiter.
    pub fn rate_limit_key(&self) -> &str {
        &self.endpoint
    }

    /// The response cache key for this request.
    pub fn cache_key(&self) -> String {
        crate::cache::cache_key(&self.method, &self.endpoint, &self.query_params)
    }
}

impl Default for ApiRequest {
    fn default() -> Self {
        Self::new(Method::GET, "")
    }
}
