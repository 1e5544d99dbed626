//! Deterministic offline responder.
//!
//! Used when no live endpoint is healthy, so caching, retries and metrics run
//! the same code paths without a backend. Identical requests always produce
//! identical responses.

use crate::credentials::now_epoch_ms;
use crate::transport::{OutboundRequest, RawResponse, Transport};
use crate::Result;
use async_trait::async_trait;
use http::{Method, StatusCode};
use serde_json::{json, Value};
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::time::Duration;

/// Session lifetime handed out by the simulated login and refresh endpoints.
const SIMULATED_SESSION_SECS: u64 = 3600;

/// In-process [`Transport`] producing mock responses.
///
/// Registered fixtures win; otherwise a built-in default is produced:
///
/// | request                 | response                                  |
/// |-------------------------|-------------------------------------------|
/// | `GET /health`           | `200 {"status":"ok"}`                     |
/// | `POST …/auth/login`     | `200` session payload                     |
/// | `POST …/auth/refresh`   | `200` session payload                     |
/// | `POST …/auth/logout`    | `204`                                     |
/// | other `GET`             | `200 {"data":[],"total":0}`               |
/// | `POST`                  | `201` body echoed with a derived `id`     |
/// | `PUT` / `PATCH`         | `200` body echoed                         |
/// | `DELETE`                | `204`                                     |
///
/// # Examples
///
/// ```
/// use gridgate::simulated::SimulatedTransport;
/// use http::Method;
/// use serde_json::json;
/// use std::time::Duration;
///
/// let transport = SimulatedTransport::new()
///     .with_latency(Duration::from_millis(5))
///     .with_fixture(Method::GET, "/sites", json!([{ "id": 1, "name": "North Farm" }]));
/// ```
#[derive(Debug, Clone)]
pub struct SimulatedTransport {
    latency: Duration,
    fixtures: HashMap<(Method, String), Value>,
}

impl Default for SimulatedTransport {
    fn default() -> Self {
        Self {
            latency: Duration::from_millis(50),
            fixtures: HashMap::new(),
        }
    }
}

impl SimulatedTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Delay applied before every response.
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    /// Serves `body` with `200` for `method path`.
    pub fn with_fixture(mut self, method: Method, path: impl Into<String>, body: Value) -> Self {
        self.fixtures.insert((method, normalize(&path.into())), body);
        self
    }

    fn respond(&self, request: &OutboundRequest) -> RawResponse {
        let path = normalize(&request.path);

        if let Some(body) = self.fixtures.get(&(request.method.clone(), path.clone())) {
            return RawResponse::json(StatusCode::OK, &with_marker(body.clone()));
        }

        match request.method {
            Method::GET if path == "/health" => {
                RawResponse::json(StatusCode::OK, &json!({ "status": "ok", "simulated": true }))
            }
            Method::POST if path.ends_with("/auth/login") || path.ends_with("/auth/refresh") => {
                RawResponse::json(StatusCode::OK, &session_payload(request))
            }
            Method::POST if path.ends_with("/auth/logout") => {
                RawResponse::new(StatusCode::NO_CONTENT, "")
            }
            Method::GET => RawResponse::json(
                StatusCode::OK,
                &json!({ "data": [], "total": 0, "simulated": true }),
            ),
            Method::POST => {
                let mut body = request.body.clone().unwrap_or_else(|| json!({}));
                if let Value::Object(fields) = &mut body {
                    fields
                        .entry("id")
                        .or_insert_with(|| Value::String(derived_id(request)));
                }
                RawResponse::json(StatusCode::CREATED, &with_marker(body))
            }
            Method::PUT | Method::PATCH => {
                let body = request.body.clone().unwrap_or_else(|| json!({}));
                RawResponse::json(StatusCode::OK, &with_marker(body))
            }
            Method::DELETE => RawResponse::new(StatusCode::NO_CONTENT, ""),
            _ => RawResponse::new(StatusCode::METHOD_NOT_ALLOWED, "method not simulated"),
        }
    }
}

#[async_trait]
impl Transport for SimulatedTransport {
    async fn execute(&self, request: &OutboundRequest) -> Result<RawResponse> {
        tracing::debug!(
            method = %request.method,
            path = %request.path,
            latency_ms = self.latency.as_millis(),
            "Serving simulated response"
        );
        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }
        Ok(self.respond(request))
    }
}

fn normalize(path: &str) -> String {
    format!("/{}", path.trim_matches('/'))
}

fn with_marker(mut body: Value) -> Value {
    if let Value::Object(fields) = &mut body {
        fields.insert("simulated".to_string(), Value::Bool(true));
    }
    body
}

/// Stable identifier derived from the request content.
fn derived_id(request: &OutboundRequest) -> String {
    let mut hasher = Sha256::new();
    hasher.update(request.method.as_str().as_bytes());
    hasher.update(request.path.as_bytes());
    if let Some(body) = &request.body {
        hasher.update(body.to_string().as_bytes());
    }
    hex::encode(&hasher.finalize()[..6])
}

fn session_payload(request: &OutboundRequest) -> Value {
    let email = request
        .body
        .as_ref()
        .and_then(|body| body.get("email"))
        .and_then(Value::as_str)
        .unwrap_or("demo@example.com");

    json!({
        "accessToken": format!("simulated-access-{}", derived_id(request)),
        "refreshToken": "simulated-refresh",
        "expiresAtEpochMs": now_epoch_ms() + SIMULATED_SESSION_SECS * 1000,
        "user": {
            "id": "simulated-user",
            "email": email,
            "displayName": "Demo Operator",
            "role": "viewer",
            "permissions": ["read"],
        },
    })
}
