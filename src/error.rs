//! Error types for gateway calls.
//!
//! [`Error`] is the internal taxonomy the request pipeline works with. Every
//! variant is distinguishable so callers can pick their own retry or UI policy.
//! The typed [`Client`](crate::Client) flattens it into [`ApiError`] for uniform
//! handling at call sites.

use http::{HeaderMap, StatusCode};
use std::fmt;

/// The main error type for gateway calls.
///
/// # Examples
///
/// ```no_run
/// use gridgate::{Error, Gateway, ApiRequest};
///
/// # async fn example() -> Result<(), Error> {
/// let gateway = Gateway::builder()
///     .base_url("https://api.example.com")?
///     .build()?;
///
/// match gateway.execute(ApiRequest::get("/sites")).await {
///     Ok(response) => println!("Sites: {}", response.data),
///     Err(Error::RateLimited { identifier }) => eprintln!("Slow down on {}", identifier),
///     Err(Error::HttpError { status, raw_response, .. }) => {
///         eprintln!("HTTP error {}: {}", status, raw_response);
///     }
///     Err(e) => eprintln!("Other error: {}", e),
/// }
/// # Ok(())
/// # }
/// ```
#[derive(thiserror::Error, Debug)]
pub enum Error {
    /// The local rate limiter refused the request. Never retried.
    #[error("Rate limit exceeded for {identifier}")]
    RateLimited {
        /// The limiter key that was at capacity
        identifier: String,
    },

    /// The request did not complete within its timeout.
    #[error("Request timed out")]
    Timeout,

    /// A network-level error occurred (connection refused or reset, DNS failure, etc.).
    #[error("Network error: {0}")]
    Network(String),

    /// The backend rejected the credentials and a refresh could not recover them.
    #[error("Authentication failed: {reason}")]
    AuthenticationFailed {
        /// Why the session could not be recovered
        reason: String,
    },

    /// The backend answered with a non-2xx status.
    ///
    /// Body and headers are kept verbatim for diagnostics.
    #[error("HTTP error {status}: {raw_response}")]
    HttpError {
        status: StatusCode,
        raw_response: String,
        headers: HeaderMap,
        /// Back-off hints, present only when the server sent some
        rate_limit_info: Option<crate::rate_limit::RateLimitInfo>,
    },

    /// A 2xx body was not valid JSON of the expected shape.
    #[error("Failed to deserialize response (status {status}): {serde_error}")]
    DeserializationFailed {
        raw_response: String,
        serde_error: String,
        status: StatusCode,
    },

    #[error("Configuration error: {0}")]
    ConfigurationError(String),

    /// A request body could not be encoded as JSON.
    #[error("Failed to serialize request: {0}")]
    SerializationFailed(String),

    #[error("Invalid URL: {0}")]
    InvalidUrl(#[from] url::ParseError),

    /// The credential store could not persist its state.
    #[error("Credential storage error: {0}")]
    Storage(String),
}

impl From<reqwest::Error> for Error {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            Error::Timeout
        } else {
            Error::Network(err.to_string())
        }
    }
}

impl Error {
    /// Returns `true` if this error is transient and worth retrying.
    ///
    /// Network errors, timeouts, 5xx and 429 responses are retryable. Everything
    /// else (other 4xx, parse failures, local denials) is not.
    ///
    /// # Examples
    ///
    /// ```
    /// use gridgate::Error;
    /// use http::StatusCode;
    ///
    /// let err = Error::HttpError {
    ///     status: StatusCode::SERVICE_UNAVAILABLE,
    ///     raw_response: "down".to_string(),
    ///     headers: http::HeaderMap::new(),
    ///     rate_limit_info: None,
    /// };
    /// assert!(err.is_retryable());
    ///
    /// let err = Error::HttpError {
    ///     status: StatusCode::UNPROCESSABLE_ENTITY,
    ///     raw_response: r#"{"message":"capacity_kw must be positive"}"#.to_string(),
    ///     headers: http::HeaderMap::new(),
    ///     rate_limit_info: None,
    /// };
    /// assert!(!err.is_retryable());
    /// assert!(!Error::RateLimited { identifier: "/sites".into() }.is_retryable());
    /// ```
    pub fn is_retryable(&self) -> bool {
        match self {
            Error::Network(_) => true,
            Error::Timeout => true,
            Error::HttpError { status, .. } => {
                status.is_server_error() || *status == StatusCode::TOO_MANY_REQUESTS
            }
            Error::RateLimited { .. } => false,
            Error::AuthenticationFailed { .. } => false,
            Error::DeserializationFailed { .. } => false,
            Error::ConfigurationError(_) => false,
            Error::SerializationFailed(_) => false,
            Error::InvalidUrl(_) => false,
            Error::Storage(_) => false,
        }
    }

    /// Returns the HTTP status code if this error has one.
    pub fn status(&self) -> Option<StatusCode> {
        match self {
            Error::HttpError { status, .. } => Some(*status),
            Error::DeserializationFailed { status, .. } => Some(*status),
            Error::AuthenticationFailed { .. } => Some(StatusCode::UNAUTHORIZED),
            Error::RateLimited { .. } => Some(StatusCode::TOO_MANY_REQUESTS),
            _ => None,
        }
    }

    /// Returns the raw response body if this error has one.
    pub fn raw_response(&self) -> Option<&str> {
        match self {
            Error::HttpError { raw_response, .. } => Some(raw_response),
            Error::DeserializationFailed { raw_response, .. } => Some(raw_response),
            _ => None,
        }
    }

    /// Returns server rate limit hints if available.
    pub fn rate_limit_info(&self) -> Option<&crate::rate_limit::RateLimitInfo> {
        match self {
            Error::HttpError {
                rate_limit_info, ..
            } => rate_limit_info.as_ref(),
            _ => None,
        }
    }

    /// Returns the server-recommended delay, capped by `max_wait`.
    pub fn rate_limit_delay(&self, max_wait: std::time::Duration) -> Option<std::time::Duration> {
        self.rate_limit_info()?.delay(max_wait)
    }

    /// Returns the machine-readable code for this error.
    pub fn code(&self) -> ErrorCode {
        match self {
            Error::RateLimited { .. } => ErrorCode::RateLimited,
            Error::Timeout => ErrorCode::Timeout,
            Error::Network(_) => ErrorCode::NetworkError,
            Error::AuthenticationFailed { .. } => ErrorCode::AuthenticationFailed,
            Error::HttpError { .. } => ErrorCode::HttpError,
            Error::DeserializationFailed { .. } => ErrorCode::ParseError,
            Error::ConfigurationError(_) | Error::InvalidUrl(_) => ErrorCode::ConfigurationError,
            Error::SerializationFailed(_) => ErrorCode::SerializationError,
            Error::Storage(_) => ErrorCode::StorageError,
        }
    }
}

/// A specialized `Result` type for gateway calls.
pub type Result<T> = std::result::Result<T, Error>;

/// Machine-readable error category carried by [`ApiError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCode {
    RateLimited,
    Timeout,
    NetworkError,
    AuthenticationFailed,
    HttpError,
    ParseError,
    ConfigurationError,
    SerializationError,
    StorageError,
}

impl ErrorCode {
    /// Returns the wire form, e.g. `"RATE_LIMITED"`.
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCode::RateLimited => "RATE_LIMITED",
            ErrorCode::Timeout => "TIMEOUT",
            ErrorCode::NetworkError => "NETWORK_ERROR",
            ErrorCode::AuthenticationFailed => "AUTHENTICATION_FAILED",
            ErrorCode::HttpError => "HTTP_ERROR",
            ErrorCode::ParseError => "PARSE_ERROR",
            ErrorCode::ConfigurationError => "CONFIGURATION_ERROR",
            ErrorCode::SerializationError => "SERIALIZATION_ERROR",
            ErrorCode::StorageError => "STORAGE_ERROR",
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The single error shape the typed [`Client`](crate::Client) surfaces.
///
/// Callers branch on `status` and `code`; `source` keeps the original
/// [`Error`] for anyone who needs the raw response or headers.
///
/// # Examples
///
/// ```
/// use gridgate::{ApiError, Error, ErrorCode};
///
/// let api_error = ApiError::from(Error::Timeout);
/// assert_eq!(api_error.code, ErrorCode::Timeout);
/// assert_eq!(api_error.status, None);
/// ```
#[derive(thiserror::Error, Debug)]
#[error("{message}")]
pub struct ApiError {
    /// Human-readable message
    pub message: String,
    /// HTTP status, when the failure maps to one
    pub status: Option<u16>,
    /// Error category
    pub code: ErrorCode,
    /// The pipeline error this was built from
    #[source]
    pub source: Error,
}

impl ApiError {
    /// Returns `true` for failures a caller may reasonably retry later.
    pub fn is_retryable(&self) -> bool {
        self.source.is_retryable() || self.code == ErrorCode::RateLimited
    }
}

impl From<Error> for ApiError {
    fn from(error: Error) -> Self {
        let message = match &error {
            Error::HttpError { raw_response, .. } => {
                server_message(raw_response).unwrap_or_else(|| error.to_string())
            }
            _ => error.to_string(),
        };

        ApiError {
            message,
            status: error.status().map(|s| s.as_u16()),
            code: error.code(),
            source: error,
        }
    }
}

/// Pulls a `message` (or `error`) string out of a JSON error body.
fn server_message(raw: &str) -> Option<String> {
    let value: serde_json::Value = serde_json::from_str(raw).ok()?;
    ["message", "error"]
        .iter()
        .find_map(|field| value.get(*field)?.as_str().map(str::to_string))
}
