//! Response wrapper that preserves both parsed data and transport details.

use http::{HeaderMap, StatusCode};
use std::time::Duration;

/// Where a response came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseSource {
    /// A live backend answered.
    Network,
    /// Served from the response cache without a network call.
    Cache,
    /// Synthesized by the offline responder.
    Simulated,
}

/// A successful gateway response.
///
/// # Examples
///
/// ```no_run
/// use gridgate::{Client, Gateway};
/// use serde::Deserialize;
///
/// #[derive(Deserialize)]
/// struct Site {
///     id: u64,
///     name: String,
/// }
///
/// # async fn example() -> Result<(), gridgate::ApiError> {
/// let client = Client::new(Gateway::builder().base_url("https://api.example.com")?.build()?);
///
/// let response = client.get::<Site>("/sites/1").await?;
/// println!("Site: {}", response.data.name);
/// println!("Request took {:?} over {} attempts", response.latency, response.attempts);
/// if response.is_cached() {
///     println!("(cached)");
/// }
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone)]
pub struct Response<T> {
    /// The deserialized response data.
    pub data: T,

    /// The raw response body as a string.
    pub raw_body: String,

    /// The HTTP status code of the response.
    pub status: StatusCode,

    /// The response headers. Empty for cached responses.
    pub headers: HeaderMap,

    /// Total latency including retries and backoff.
    pub latency: Duration,

    /// Network attempts made; `0` for cache hits.
    pub attempts: usize,

    /// Where the data came from.
    pub source: ResponseSource,

    /// The `X-Request-Id` sent with this request.
    pub request_id: String,
}

impl<T> Response<T> {
    /// Maps the response data to a different type, keeping the metadata.
    ///
    /// # Examples
    ///
    /// ```
    /// # use gridgate::{Response, ResponseSource};
    /// # use http::{HeaderMap, StatusCode};
    /// # use std::time::Duration;
    /// let response = Response {
    ///     data: 42,
    ///     raw_body: "42".to_string(),
    ///     status: StatusCode::OK,
    ///     headers: HeaderMap::new(),
    ///     latency: Duration::from_millis(100),
    ///     attempts: 1,
    ///     source: ResponseSource::Network,
    ///     request_id: "req-1".to_string(),
    /// };
    ///
    /// let string_response = response.map(|n| n.to_string());
    /// assert_eq!(string_response.data, "42");
    /// ```
    pub fn map<U, F>(self, f: F) -> Response<U>
    where
        F: FnOnce(T) -> U,
    {
        Response {
            data: f(self.data),
            raw_body: self.raw_body,
            status: self.status,
            headers: self.headers,
            latency: self.latency,
            attempts: self.attempts,
            source: self.source,
            request_id: self.request_id,
        }
    }

    /// Like [`map`](Self::map) for fallible conversions.
    pub fn try_map<U, E, F>(self, f: F) -> Result<Response<U>, E>
    where
        F: FnOnce(T) -> Result<U, E>,
    {
        Ok(Response {
            data: f(self.data)?,
            raw_body: self.raw_body,
            status: self.status,
            headers: self.headers,
            latency: self.latency,
            attempts: self.attempts,
            source: self.source,
            request_id: self.request_id,
        })
    }

    /// Returns `true` if the request required retries.
    pub fn was_retried(&self) -> bool {
        self.attempts > 1
    }

    /// Returns `true` if the data came from the response cache.
    pub fn is_cached(&self) -> bool {
        self.source == ResponseSource::Cache
    }

    /// Returns a header value by name.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name)?.to_str().ok()
    }
}

impl<T> AsRef<T> for Response<T> {
    fn as_ref(&self) -> &T {
        &self.data
    }
}

impl<T> std::ops::Deref for Response<T> {
    type Target = T;

    fn deref(&self) -> &Self::Target {
        &self.data
    }
}
