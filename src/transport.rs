//! Transports: the only place bytes leave the process.
//!
//! The pipeline builds an [`OutboundRequest`], hands it to a [`Transport`] and
//! turns the result into an [`Outcome`] with [`classify`]. Retry decisions are
//! made on that value, not on control flow.

use crate::rate_limit::RateLimitInfo;
use crate::{Error, Result};
use async_trait::async_trait;
use http::{HeaderMap, Method, StatusCode};
use std::collections::BTreeMap;
use url::Url;

/// A fully built request, ready for one attempt.
#[derive(Debug, Clone)]
pub struct OutboundRequest {
    pub method: Method,
    pub path: String,
    pub query_params: BTreeMap<String, String>,
    pub headers: HeaderMap,
    pub body: Option<serde_json::Value>,
}

/// What came back over the wire, before interpretation.
#[derive(Debug, Clone)]
pub struct RawResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: String,
}

impl RawResponse {
    pub fn new(status: StatusCode, body: impl Into<String>) -> Self {
        Self {
            status,
            headers: HeaderMap::new(),
            body: body.into(),
        }
    }

    /// A response with a JSON body.
    pub fn json(status: StatusCode, value: &serde_json::Value) -> Self {
        let mut headers = HeaderMap::new();
        headers.insert(
            http::header::CONTENT_TYPE,
            http::HeaderValue::from_static("application/json"),
        );
        Self {
            status,
            headers,
            body: value.to_string(),
        }
    }
}

/// Sends one attempt somewhere and reports what happened.
///
/// Implementations return `Err` only for failures below HTTP (connect, reset,
/// DNS). Non-2xx statuses are ordinary responses. Timeouts are applied by the
/// caller, which drops the future when the deadline passes.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn execute(&self, request: &OutboundRequest) -> Result<RawResponse>;
}

/// Transport over HTTP to one live base URL.
#[derive(Debug, Clone)]
pub struct LiveTransport {
    http_client: reqwest::Client,
    base_url: Url,
}

impl LiveTransport {
    pub fn new(http_client: reqwest::Client, base_url: Url) -> Self {
        Self {
            http_client,
            base_url,
        }
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    fn url_for(&self, request: &OutboundRequest) -> Url {
        let mut url = self.base_url.clone();
        let prefix = url.path().trim_end_matches('/').to_string();
        let path = request.path.trim_start_matches('/');
        url.set_path(&format!("{}/{}", prefix, path));

        if !request.query_params.is_empty() {
            let mut pairs = url.query_pairs_mut();
            for (key, value) in &request.query_params {
                pairs.append_pair(key, value);
            }
        }
        url
    }
}

#[async_trait]
impl Transport for LiveTransport {
    async fn execute(&self, request: &OutboundRequest) -> Result<RawResponse> {
        let url = self.url_for(request);
        tracing::debug!(method = %request.method, url = %url, "Sending HTTP request");

        let mut builder = self
            .http_client
            .request(request.method.clone(), url)
            .headers(request.headers.clone());
        if let Some(body) = &request.body {
            builder = builder.json(body);
        }

        let response = builder.send().await?;
        let status = response.status();
        let headers = response.headers().clone();
        let body = response.text().await?;

        Ok(RawResponse {
            status,
            headers,
            body,
        })
    }
}

/// Classification of a single attempt.
#[derive(Debug)]
pub enum Outcome {
    /// 2xx.
    Success(RawResponse),
    /// 401: eligible for one refresh-and-replay.
    Unauthorized(Error),
    /// 5xx, 429, network failure or timeout.
    Retryable(Error),
    /// Everything else; surfaced immediately.
    Fatal(Error),
}

/// Turns an attempt's result into an [`Outcome`].
pub fn classify(result: Result<RawResponse>) -> Outcome {
    let raw = match result {
        Ok(raw) => raw,
        Err(e) if e.is_retryable() => return Outcome::Retryable(e),
        Err(e) => return Outcome::Fatal(e),
    };

    if raw.status.is_success() {
        return Outcome::Success(raw);
    }

    let rate_limit_info = Some(RateLimitInfo::from_headers(&raw.headers))
        .filter(RateLimitInfo::is_rate_limited);

    if raw.status.is_client_error() {
        tracing::error!(status = raw.status.as_u16(), response = %raw.body, "Client error (4xx)");
    } else if raw.status.is_server_error() {
        tracing::warn!(status = raw.status.as_u16(), response = %raw.body, "Server error (5xx)");
    }

    let status = raw.status;
    let error = Error::HttpError {
        status,
        raw_response: raw.body,
        headers: raw.headers,
        rate_limit_info,
    };

    if status == StatusCode::UNAUTHORIZED {
        Outcome::Unauthorized(error)
    } else if error.is_retryable() {
        Outcome::Retryable(error)
    } else {
        Outcome::Fatal(error)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classify_statuses() {
        let outcome = |status: u16| classify(Ok(RawResponse::new(StatusCode::from_u16(status).unwrap(), "")));

        assert!(matches!(outcome(200), Outcome::Success(_)));
        assert!(matches!(outcome(204), Outcome::Success(_)));
        assert!(matches!(outcome(401), Outcome::Unauthorized(_)));
        assert!(matches!(outcome(429), Outcome::Retryable(_)));
        assert!(matches!(outcome(503), Outcome::Retryable(_)));
        assert!(matches!(outcome(400), Outcome::Fatal(_)));
        assert!(matches!(outcome(404), Outcome::Fatal(_)));
    }

    #[test]
    fn test_classify_transport_errors() {
        assert!(matches!(classify(Err(Error::Timeout)), Outcome::Retryable(_)));
        assert!(matches!(
            classify(Err(Error::Network("connection reset".into()))),
            Outcome::Retryable(_)
        ));
        assert!(matches!(
            classify(Err(Error::SerializationFailed("bad".into()))),
            Outcome::Fatal(_)
        ));
    }

    #[test]
    fn test_classify_keeps_rate_limit_hints() {
        let mut raw = RawResponse::new(StatusCode::TOO_MANY_REQUESTS, "slow down");
        raw.headers
            .insert("retry-after", http::HeaderValue::from_static("2"));

        match classify(Ok(raw)) {
            Outcome::Retryable(error) => {
                let info = error.rate_limit_info().unwrap();
                assert_eq!(info.retry_after, Some(std::time::Duration::from_secs(2)));
            }
            other => panic!("Expected Retryable, got {:?}", other),
        }
    }

    #[test]
    fn test_url_joins_base_path() {
        let transport = LiveTransport::new(
            reqwest::Client::new(),
            Url::parse("http://localhost:8080/api/v1/").unwrap(),
        );
        let mut query_params = BTreeMap::new();
        query_params.insert("page".to_string(), "2".to_string());
        let request = OutboundRequest {
            method: Method::GET,
            path: "/sites".to_string(),
            query_params,
            headers: HeaderMap::new(),
            body: None,
        };

        assert_eq!(
            transport.url_for(&request).as_str(),
            "http://localhost:8080/api/v1/sites?page=2"
        );
    }
}
