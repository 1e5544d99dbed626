//! Integration tests using wiremock to simulate backends.

use gridgate::credentials::now_epoch_ms;
use gridgate::{
    ApiRequest, AuthenticatedUser, Client, CredentialStore, Credentials, Error, ErrorCode, Gateway,
    GatewayBuilder, GatewayConfig, HealthCheckConfig, MemoryCredentialStore, RateLimitConfig,
    ResponseSource, RetryStrategy,
};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::Arc;
use std::time::{Duration, Instant};
use wiremock::matchers::{body_json, header, header_exists, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

#[derive(Debug, Serialize, Deserialize, PartialEq)]
struct Site {
    id: u32,
    name: String,
}

fn fast_retries(max_retries: usize) -> RetryStrategy {
    RetryStrategy::ExponentialBackoff {
        initial_delay: Duration::from_millis(10),
        max_delay: Duration::from_millis(100),
        max_retries,
        jitter: false,
    }
}

fn gateway_for(server: &MockServer) -> GatewayBuilder {
    Gateway::builder()
        .base_url(server.uri())
        .unwrap()
        .health_checks(false)
        .background_tasks(false)
        .retry_strategy(fast_retries(3))
}

fn user() -> AuthenticatedUser {
    AuthenticatedUser {
        id: "u-1".into(),
        email: "operator@example.com".into(),
        display_name: "Operator".into(),
        role: "admin".into(),
        permissions: vec!["sites:write".into()],
    }
}

fn signed_in(access_token: &str, expires_at_epoch_ms: u64) -> Arc<MemoryCredentialStore> {
    let store = Arc::new(MemoryCredentialStore::new());
    store
        .set(
            Credentials {
                access_token: access_token.into(),
                refresh_token: "refresh-1".into(),
                expires_at_epoch_ms,
            },
            user(),
        )
        .unwrap();
    store
}

fn session_body(access_token: &str) -> serde_json::Value {
    json!({
        "accessToken": access_token,
        "refreshToken": "refresh-2",
        "expiresIn": 3600,
    })
}

#[tokio::test]
async fn test_get_is_served_from_cache() {
    let mock_server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/sites/1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "id": 1, "name": "North" })))
        .expect(1)
        .mount(&mock_server)
        .await;

    let gateway = gateway_for(&mock_server).build().unwrap();

    let first = gateway.execute(ApiRequest::get("/sites/1")).await.unwrap();
    assert_eq!(first.source, ResponseSource::Network);
    assert_eq!(first.attempts, 1);

    let second = gateway.execute(ApiRequest::get("/sites/1")).await.unwrap();
    assert_eq!(second.source, ResponseSource::Cache);
    assert_eq!(second.attempts, 0);
    assert_eq!(second.data, first.data);

    let stats = gateway.cache_stats();
    assert_eq!(stats.hits, 1);
    assert_eq!(stats.misses, 1);
}

#[tokio::test]
async fn test_cache_entry_expires_after_ttl() {
    let mock_server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/sites"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
        .expect(2)
        .mount(&mock_server)
        .await;

    let gateway = gateway_for(&mock_server)
        .cache_ttl(Duration::from_millis(50))
        .build()
        .unwrap();

    gateway.execute(ApiRequest::get("/sites")).await.unwrap();
    tokio::time::sleep(Duration::from_millis(80)).await;
    let again = gateway.execute(ApiRequest::get("/sites")).await.unwrap();

    assert_eq!(again.source, ResponseSource::Network);
    assert_eq!(gateway.cache_stats().misses, 2);
}

#[tokio::test]
async fn test_query_params_are_part_of_cache_key() {
    let mock_server = MockServer::start().await;

    for page in ["1", "2"] {
        Mock::given(method("GET"))
            .and(path("/sites"))
            .and(query_param("page", page))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "page": page })))
            .expect(1)
            .mount(&mock_server)
            .await;
    }

    let gateway = gateway_for(&mock_server).build().unwrap();

    let first = gateway
        .execute(ApiRequest::get("/sites").with_query_param("page", "1"))
        .await
        .unwrap();
    let second = gateway
        .execute(ApiRequest::get("/sites").with_query_param("page", "2"))
        .await
        .unwrap();

    assert_eq!(first.data["page"], "1");
    assert_eq!(second.data["page"], "2");
    assert_eq!(second.source, ResponseSource::Network);
}

#[tokio::test]
async fn test_mutations_never_touch_cache() {
    let mock_server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/alerts"))
        .respond_with(ResponseTemplate::new(201).set_body_json(json!({ "id": "a-1" })))
        .expect(2)
        .mount(&mock_server)
        .await;

    let gateway = gateway_for(&mock_server).build().unwrap();

    for _ in 0..2 {
        let response = gateway
            .execute(ApiRequest::post("/alerts").json(json!({ "level": "high" })))
            .await
            .unwrap();
        assert_eq!(response.status.as_u16(), 201);
    }

    assert_eq!(gateway.cache_stats().entries, 0);
}

#[tokio::test]
async fn test_invalidate_endpoint_forces_refetch() {
    let mock_server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/sites"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
        .expect(2)
        .mount(&mock_server)
        .await;

    let gateway = gateway_for(&mock_server).build().unwrap();

    gateway.execute(ApiRequest::get("/sites")).await.unwrap();
    assert_eq!(gateway.invalidate_endpoint("/sites"), 1);
    let again = gateway.execute(ApiRequest::get("/sites")).await.unwrap();
    assert_eq!(again.source, ResponseSource::Network);
}

#[tokio::test]
async fn test_local_rate_limit_denies_without_network() {
    let mock_server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/readings"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
        .expect(2)
        .mount(&mock_server)
        .await;

    let gateway = gateway_for(&mock_server)
        .rate_limit_config(
            RateLimitConfig::builder()
                .max_requests(2)
                .window(Duration::from_secs(60))
                .build(),
        )
        .build()
        .unwrap();

    for _ in 0..2 {
        gateway
            .execute(ApiRequest::get("/readings").skip_cache(true))
            .await
            .unwrap();
    }

    match gateway
        .execute(ApiRequest::get("/readings").skip_cache(true))
        .await
    {
        Err(Error::RateLimited { identifier }) => assert_eq!(identifier, "/readings"),
        other => panic!("Expected RateLimited error, got {:?}", other),
    }

    let last = gateway.recent_metrics().pop().unwrap();
    assert_eq!(last.status_code, Some(429));
    assert_eq!(last.attempts, 0);
}

#[tokio::test]
async fn test_server_errors_retried_then_surfaced() {
    let mock_server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/sites"))
        .respond_with(ResponseTemplate::new(500).set_body_string("boom"))
        .expect(3)
        .mount(&mock_server)
        .await;

    let gateway = gateway_for(&mock_server)
        .retry_strategy(fast_retries(2))
        .build()
        .unwrap();

    match gateway.execute(ApiRequest::get("/sites")).await {
        Err(Error::HttpError {
            status,
            raw_response,
            ..
        }) => {
            assert_eq!(status.as_u16(), 500);
            assert_eq!(raw_response, "boom");
        }
        other => panic!("Expected HttpError, got {:?}", other),
    }

    let metric = gateway.recent_metrics().pop().unwrap();
    assert_eq!(metric.attempts, 3);
    assert_eq!(metric.status_code, Some(500));
    assert!(metric.is_error());
}

#[tokio::test]
async fn test_client_errors_not_retried() {
    let mock_server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/sites"))
        .respond_with(ResponseTemplate::new(400).set_body_string("Bad Request"))
        .expect(1)
        .mount(&mock_server)
        .await;

    let gateway = gateway_for(&mock_server).build().unwrap();

    let result = gateway.execute(ApiRequest::get("/sites")).await;
    assert!(matches!(result, Err(Error::HttpError { status, .. }) if status.as_u16() == 400));
}

#[tokio::test]
async fn test_recovers_after_transient_failures() {
    let mock_server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/status"))
        .respond_with(ResponseTemplate::new(503))
        .up_to_n_times(2)
        .mount(&mock_server)
        .await;

    Mock::given(method("GET"))
        .and(path("/status"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "ok": true })))
        .mount(&mock_server)
        .await;

    let gateway = gateway_for(&mock_server)
        .retry_strategy(RetryStrategy::exponential(Duration::from_millis(100), 2))
        .build()
        .unwrap();

    let start = Instant::now();
    let response = gateway.execute(ApiRequest::get("/status")).await.unwrap();

    assert_eq!(response.data, json!({ "ok": true }));
    assert_eq!(response.attempts, 3);
    assert!(response.was_retried());
    // 100ms + 200ms of backoff
    assert!(start.elapsed() >= Duration::from_millis(300));
}

#[tokio::test]
async fn test_retry_after_hint_stretches_backoff() {
    let mock_server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/readings"))
        .respond_with(ResponseTemplate::new(429).insert_header("retry-after", "1"))
        .up_to_n_times(1)
        .mount(&mock_server)
        .await;

    Mock::given(method("GET"))
        .and(path("/readings"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
        .mount(&mock_server)
        .await;

    let gateway = gateway_for(&mock_server).build().unwrap();

    let start = Instant::now();
    let response = gateway.execute(ApiRequest::get("/readings")).await.unwrap();

    assert_eq!(response.attempts, 2);
    assert!(start.elapsed() >= Duration::from_secs(1));
}

#[tokio::test]
async fn test_slow_response_times_out() {
    let mock_server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/slow"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(json!({}))
                .set_delay(Duration::from_millis(500)),
        )
        .mount(&mock_server)
        .await;

    let gateway = gateway_for(&mock_server)
        .retry_strategy(fast_retries(1))
        .build()
        .unwrap();

    let result = gateway
        .execute(ApiRequest::get("/slow").timeout(Duration::from_millis(50)))
        .await;

    assert!(matches!(result, Err(Error::Timeout)));
    assert_eq!(gateway.recent_metrics()[0].attempts, 2);
}

#[tokio::test]
async fn test_unauthorized_triggers_single_refresh_and_replay() {
    let mock_server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/secure"))
        .and(header("authorization", "Bearer old"))
        .respond_with(ResponseTemplate::new(401))
        .mount(&mock_server)
        .await;

    Mock::given(method("GET"))
        .and(path("/secure"))
        .and(header("authorization", "Bearer new"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "secret": 42 })))
        .mount(&mock_server)
        .await;

    Mock::given(method("POST"))
        .and(path("/auth/refresh"))
        .and(body_json(json!({ "refreshToken": "refresh-1" })))
        .respond_with(ResponseTemplate::new(200).set_body_json(session_body("new")))
        .expect(1)
        .mount(&mock_server)
        .await;

    let store = signed_in("old", now_epoch_ms() + 60_000);
    let gateway = gateway_for(&mock_server)
        .credential_store(store.clone())
        .build()
        .unwrap();

    let request = || ApiRequest::get("/secure").requires_auth(true).skip_cache(true);
    let (first, second) = tokio::join!(gateway.execute(request()), gateway.execute(request()));

    assert_eq!(first.unwrap().data["secret"], 42);
    assert_eq!(second.unwrap().data["secret"], 42);

    let session = store.load().unwrap();
    assert_eq!(session.credentials.access_token, "new");
    assert_eq!(session.credentials.refresh_token, "refresh-2");
    // The refresh response had no user, so the stored profile is kept.
    assert_eq!(session.user, user());
}

#[tokio::test]
async fn test_rejection_after_refresh_signs_out() {
    let mock_server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/secure"))
        .respond_with(ResponseTemplate::new(401))
        .expect(2)
        .mount(&mock_server)
        .await;

    Mock::given(method("POST"))
        .and(path("/auth/refresh"))
        .respond_with(ResponseTemplate::new(200).set_body_json(session_body("new")))
        .expect(1)
        .mount(&mock_server)
        .await;

    let store = signed_in("old", now_epoch_ms() + 60_000);
    let gateway = gateway_for(&mock_server)
        .credential_store(store.clone())
        .build()
        .unwrap();

    let result = gateway
        .execute(ApiRequest::get("/secure").requires_auth(true))
        .await;

    assert!(matches!(result, Err(Error::AuthenticationFailed { .. })));
    assert!(store.load().is_none());
}

#[tokio::test]
async fn test_failed_refresh_clears_session() {
    let mock_server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/secure"))
        .respond_with(ResponseTemplate::new(401))
        .expect(1)
        .mount(&mock_server)
        .await;

    Mock::given(method("POST"))
        .and(path("/auth/refresh"))
        .respond_with(ResponseTemplate::new(400).set_body_json(json!({ "error": "invalid_grant" })))
        .expect(1)
        .mount(&mock_server)
        .await;

    let store = signed_in("old", now_epoch_ms() + 60_000);
    let gateway = gateway_for(&mock_server)
        .credential_store(store.clone())
        .build()
        .unwrap();

    let result = gateway
        .execute(ApiRequest::get("/secure").requires_auth(true))
        .await;

    match result {
        Err(e @ Error::AuthenticationFailed { .. }) => {
            assert_eq!(e.status().map(|s| s.as_u16()), Some(401));
        }
        other => panic!("Expected AuthenticationFailed, got {:?}", other),
    }
    assert!(store.load().is_none());
}

#[tokio::test]
async fn test_expired_token_refreshed_before_sending() {
    let mock_server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/auth/refresh"))
        .respond_with(ResponseTemplate::new(200).set_body_json(session_body("new")))
        .expect(1)
        .mount(&mock_server)
        .await;

    Mock::given(method("GET"))
        .and(path("/secure"))
        .and(header("authorization", "Bearer new"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "ok": true })))
        .expect(1)
        .mount(&mock_server)
        .await;

    let store = signed_in("stale", now_epoch_ms() - 1_000);
    let gateway = gateway_for(&mock_server)
        .credential_store(store.clone())
        .build()
        .unwrap();

    let response = gateway
        .execute(ApiRequest::get("/secure").requires_auth(true))
        .await
        .unwrap();

    assert_eq!(response.attempts, 1);
    assert_eq!(gateway.bearer_token().await.unwrap().as_deref(), Some("new"));
}

#[tokio::test]
async fn test_unauthorized_on_public_request_is_plain_http_error() {
    let mock_server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/public"))
        .respond_with(ResponseTemplate::new(401))
        .expect(1)
        .mount(&mock_server)
        .await;

    Mock::given(method("POST"))
        .and(path("/auth/refresh"))
        .respond_with(ResponseTemplate::new(200).set_body_json(session_body("new")))
        .expect(0)
        .mount(&mock_server)
        .await;

    let store = signed_in("old", now_epoch_ms() + 60_000);
    let gateway = gateway_for(&mock_server)
        .credential_store(store.clone())
        .build()
        .unwrap();

    let result = gateway.execute(ApiRequest::get("/public")).await;
    assert!(matches!(result, Err(Error::HttpError { status, .. }) if status.as_u16() == 401));
    assert!(store.get().is_some());
}

#[tokio::test]
async fn test_standard_headers_attached() {
    let mock_server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/sites"))
        .and(header_exists("x-request-id"))
        .and(header("x-client-version", "dashboard-9.9"))
        .and(header("content-type", "application/json"))
        .and(header("x-tenant", "north"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
        .expect(1)
        .mount(&mock_server)
        .await;

    let gateway = gateway_for(&mock_server)
        .config(GatewayConfig {
            endpoints: vec![mock_server.uri().parse().unwrap()],
            client_version: "dashboard-9.9".into(),
            health_check: HealthCheckConfig {
                enabled: false,
                ..Default::default()
            },
            ..Default::default()
        })
        .default_header("X-Tenant", "north")
        .unwrap()
        .build()
        .unwrap();

    let response = gateway.execute(ApiRequest::get("/sites")).await.unwrap();

    let received = mock_server.received_requests().await.unwrap();
    let sent_id = received[0].headers.get("x-request-id").unwrap();
    assert_eq!(sent_id.to_str().unwrap(), response.request_id);
    assert!(received[0].headers.get("authorization").is_none());
}

#[tokio::test]
async fn test_csrf_token_captured_and_sent_on_mutations() {
    let mock_server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/session"))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("x-csrf-token", "csrf-abc")
                .set_body_json(json!({})),
        )
        .mount(&mock_server)
        .await;

    Mock::given(method("POST"))
        .and(path("/alerts"))
        .and(header("x-csrf-token", "csrf-abc"))
        .respond_with(ResponseTemplate::new(201).set_body_json(json!({ "id": "a-1" })))
        .expect(1)
        .mount(&mock_server)
        .await;

    let gateway = gateway_for(&mock_server).build().unwrap();

    gateway.execute(ApiRequest::get("/session")).await.unwrap();
    assert_eq!(gateway.csrf_token().as_deref(), Some("csrf-abc"));

    let created = gateway
        .execute(ApiRequest::post("/alerts").json(json!({ "level": "low" })))
        .await
        .unwrap();
    assert_eq!(created.data["id"], "a-1");
}

#[tokio::test]
async fn test_metrics_buffer_is_bounded() {
    let mock_server = MockServer::start().await;

    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({})))
        .mount(&mock_server)
        .await;

    let gateway = gateway_for(&mock_server)
        .metrics_capacity(3)
        .build()
        .unwrap();

    for i in 0..5 {
        gateway
            .execute(ApiRequest::get(format!("/sites/{}", i)))
            .await
            .unwrap();
    }
    gateway.execute(ApiRequest::get("/sites/4")).await.unwrap();

    let recent = gateway.recent_metrics();
    assert_eq!(recent.len(), 3);
    assert_eq!(recent[0].endpoint, "/sites/3");
    assert_eq!(recent[1].endpoint, "/sites/4");

    let cached = &recent[2];
    assert_eq!(cached.endpoint, "/sites/4");
    assert!(cached.from_cache);
    assert_eq!(cached.attempts, 0);
    assert!(cached.end_time >= cached.start_time);
}

#[tokio::test]
async fn test_offline_fallback_serves_simulated_responses() {
    let gateway = Gateway::builder()
        .base_url("http://127.0.0.1:1")
        .unwrap()
        .health_check_config(HealthCheckConfig {
            timeout: Duration::from_millis(500),
            ..Default::default()
        })
        .background_tasks(false)
        .simulated_transport(
            gridgate::simulated::SimulatedTransport::new().with_latency(Duration::from_millis(1)),
        )
        .build()
        .unwrap();

    let response = gateway.execute(ApiRequest::get("/sites")).await.unwrap();
    assert_eq!(response.source, ResponseSource::Simulated);
    assert_eq!(response.data["simulated"], true);

    let client = Client::new(gateway.clone());
    let user = client.login("demo@example.com", "anything").await.unwrap();
    assert_eq!(user.display_name, "Demo Operator");
    assert!(gateway.bearer_token().await.unwrap().is_some());
}

#[tokio::test]
async fn test_no_fallback_surfaces_network_error() {
    let gateway = Gateway::builder()
        .base_url("http://127.0.0.1:1")
        .unwrap()
        .offline_fallback(false)
        .health_check_config(HealthCheckConfig {
            timeout: Duration::from_millis(500),
            ..Default::default()
        })
        .background_tasks(false)
        .retry_strategy(fast_retries(1))
        .build()
        .unwrap();

    let result = gateway.execute(ApiRequest::get("/sites")).await;
    assert!(matches!(result, Err(Error::Network(_))));
}

#[tokio::test]
async fn test_fails_over_to_healthy_endpoint() {
    let primary = MockServer::start().await;
    let backup = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/health"))
        .respond_with(ResponseTemplate::new(503))
        .mount(&primary)
        .await;
    Mock::given(method("GET"))
        .and(path("/sites"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!(["primary"])))
        .expect(0)
        .mount(&primary)
        .await;

    Mock::given(method("GET"))
        .and(path("/health"))
        .respond_with(ResponseTemplate::new(200))
        .mount(&backup)
        .await;
    Mock::given(method("GET"))
        .and(path("/sites"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!(["backup"])))
        .expect(1)
        .mount(&backup)
        .await;

    let gateway = Gateway::builder()
        .base_url(primary.uri())
        .unwrap()
        .base_url(backup.uri())
        .unwrap()
        .background_tasks(false)
        .build()
        .unwrap();

    let response = gateway.execute(ApiRequest::get("/sites")).await.unwrap();
    assert_eq!(response.data, json!(["backup"]));
    assert_eq!(response.source, ResponseSource::Network);
}

#[tokio::test]
async fn test_client_maps_errors_to_api_error() {
    let mock_server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/sites/404"))
        .respond_with(ResponseTemplate::new(404).set_body_json(json!({ "message": "Site not found" })))
        .mount(&mock_server)
        .await;

    let client = Client::new(gateway_for(&mock_server).build().unwrap());

    let error = client.get::<Site>("/sites/404").await.unwrap_err();
    assert_eq!(error.message, "Site not found");
    assert_eq!(error.status, Some(404));
    assert_eq!(error.code, ErrorCode::HttpError);
    assert!(!error.is_retryable());
}

#[tokio::test]
async fn test_client_reports_deserialization_failure() {
    let mock_server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/sites/1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "id": "not-a-number" })))
        .mount(&mock_server)
        .await;

    let client = Client::new(gateway_for(&mock_server).build().unwrap());

    let error = client.get::<Site>("/sites/1").await.unwrap_err();
    assert_eq!(error.code, ErrorCode::ParseError);
    assert_eq!(error.status, Some(200));
    match error.source {
        Error::DeserializationFailed { raw_response, .. } => {
            assert!(raw_response.contains("not-a-number"));
        }
        other => panic!("Expected DeserializationFailed, got {:?}", other),
    }
}

#[tokio::test]
async fn test_client_session_lifecycle() {
    let mock_server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/auth/login"))
        .and(body_json(json!({ "email": "operator@example.com", "password": "hunter2" })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "accessToken": "token-1",
            "refreshToken": "refresh-1",
            "expiresIn": 3600,
            "user": {
                "id": "u-1",
                "email": "operator@example.com",
                "displayName": "Operator",
                "role": "admin",
                "permissions": ["sites:write"],
            },
        })))
        .expect(1)
        .mount(&mock_server)
        .await;

    Mock::given(method("GET"))
        .and(path("/sites/1"))
        .and(header("authorization", "Bearer token-1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "id": 1, "name": "North" })))
        .expect(1)
        .mount(&mock_server)
        .await;

    Mock::given(method("PUT"))
        .and(path("/sites/1"))
        .and(header("authorization", "Bearer token-1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "id": 1, "name": "North Farm" })))
        .expect(1)
        .mount(&mock_server)
        .await;

    Mock::given(method("POST"))
        .and(path("/auth/logout"))
        .respond_with(ResponseTemplate::new(204))
        .expect(1)
        .mount(&mock_server)
        .await;

    let client = Client::new(gateway_for(&mock_server).build().unwrap());

    let profile = client
        .login("operator@example.com", "hunter2")
        .await
        .unwrap();
    assert_eq!(profile, user());
    assert_eq!(client.current_user(), Some(user()));

    let site = client.get::<Site>("/sites/1").await.unwrap();
    assert_eq!(site.data.name, "North");

    let update = Site {
        id: 1,
        name: "North Farm".into(),
    };
    let updated = client.put::<_, Site>("/sites/1", &update).await.unwrap();
    assert_eq!(updated.data, update);

    client.logout().await.unwrap();
    assert!(client.current_user().is_none());
    assert_eq!(client.gateway().cache_stats().entries, 0);
}

#[tokio::test]
async fn test_session_survives_restart_with_file_store() {
    let mock_server = MockServer::start().await;
    let dir = tempfile::tempdir().unwrap();
    let credentials_path = dir.path().join("session.json");

    Mock::given(method("POST"))
        .and(path("/auth/login"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "accessToken": "token-1",
            "refreshToken": "refresh-1",
            "expiresAtEpochMs": now_epoch_ms() + 60_000,
            "user": user(),
        })))
        .mount(&mock_server)
        .await;

    let build = || {
        gateway_for(&mock_server)
            .config(GatewayConfig {
                endpoints: vec![mock_server.uri().parse().unwrap()],
                credentials_path: Some(credentials_path.clone()),
                health_check: HealthCheckConfig {
                    enabled: false,
                    ..Default::default()
                },
                ..Default::default()
            })
            .build()
            .unwrap()
    };

    build().login("operator@example.com", "hunter2").await.unwrap();

    let restarted = build();
    assert_eq!(restarted.current_user(), Some(user()));
    assert_eq!(
        restarted.bearer_token().await.unwrap().as_deref(),
        Some("token-1")
    );
}

#[tokio::test]
async fn test_invalid_configuration_is_rejected() {
    let result = Gateway::builder()
        .timeout(Duration::ZERO)
        .background_tasks(false)
        .build();
    assert!(matches!(result, Err(Error::ConfigurationError(_))));
}
