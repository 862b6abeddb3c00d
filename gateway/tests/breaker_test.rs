// ============================================================================
// Circuit Breaker Tests
// ============================================================================

use axum::http::StatusCode;
use portico_config::CircuitBreakerConfig;
use serde_json::{json, Value};
use serial_test::serial;
use std::sync::Arc;
use std::time::Duration;

use test_utils::{
    http_client, spawn_gateway, spawn_upstream, test_config, StubValidator, TEST_API_KEY,
};

#[tokio::test]
#[serial]
async fn breaker_opens_after_consecutive_upstream_failures() {
    // First three calls fail with 500, everything after succeeds
    let upstream = spawn_upstream(Arc::new(|hit, _| {
        if hit < 3 {
            (StatusCode::INTERNAL_SERVER_ERROR, json!({"oops": true}))
        } else {
            (StatusCode::OK, json!({"success": true, "data": []}))
        }
    }))
    .await;

    let mut config = test_config(&upstream.base_url, &upstream.base_url, &upstream.base_url);
    config.upstreams.circuit_breaker = CircuitBreakerConfig {
        failure_threshold: 3,
        reset_timeout_secs: 1,
        half_open_attempts: 2,
    };
    let app = spawn_gateway(config, Arc::new(StubValidator::new())).await;
    let client = http_client();

    let send = |client: reqwest::Client, url: String| async move {
        client
            .get(url)
            .header("x-api-key", TEST_API_KEY)
            .header("x-user-role", "user")
            .send()
            .await
            .unwrap()
    };

    // Three failures pass through with the upstream's translated status
    for _ in 0..3 {
        let response = send(client.clone(), app.url("/api/service-b/reports")).await;
        assert_eq!(
            response.status(),
            reqwest::StatusCode::INTERNAL_SERVER_ERROR
        );
    }
    assert_eq!(upstream.hit_count(), 3);

    // The breaker is now open: rejected without contacting the upstream
    let response = send(client.clone(), app.url("/api/service-b/reports")).await;
    assert_eq!(response.status(), reqwest::StatusCode::SERVICE_UNAVAILABLE);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["error"], "ServiceUnavailable");
    assert_eq!(body["errorCode"], "ERR_SERVICE_UNAVAILABLE");
    assert_eq!(upstream.hit_count(), 3);

    // After the reset timeout the probe is admitted; two successes close
    tokio::time::sleep(Duration::from_millis(1200)).await;
    for _ in 0..2 {
        let response = send(client.clone(), app.url("/api/service-b/reports")).await;
        assert_eq!(response.status(), reqwest::StatusCode::OK);
    }
    assert_eq!(upstream.hit_count(), 5);

    // Normal traffic resumes
    let response = send(client.clone(), app.url("/api/service-b/reports")).await;
    assert_eq!(response.status(), reqwest::StatusCode::OK);
}

#[tokio::test]
#[serial]
async fn connect_refused_translates_to_service_unavailable() {
    let upstream = spawn_upstream(Arc::new(|_, _| {
        (StatusCode::OK, json!({"success": true, "data": []}))
    }))
    .await;

    // service-b points at a port nothing listens on
    let mut config = test_config(&upstream.base_url, "http://127.0.0.1:1", &upstream.base_url);
    config.upstreams.circuit_breaker = CircuitBreakerConfig {
        failure_threshold: 3,
        reset_timeout_secs: 30,
        half_open_attempts: 2,
    };
    let app = spawn_gateway(config, Arc::new(StubValidator::new())).await;
    let client = http_client();

    for _ in 0..3 {
        let response = client
            .get(app.url("/api/service-b/reports"))
            .header("x-api-key", TEST_API_KEY)
            .header("x-user-role", "user")
            .send()
            .await
            .unwrap();
        assert_eq!(response.status(), reqwest::StatusCode::SERVICE_UNAVAILABLE);

        let body: Value = response.json().await.unwrap();
        assert_eq!(body["errorCode"], "ERR_SERVICE_UNAVAILABLE");
    }

    // Breakers are per-upstream: service-a still serves
    let response = client
        .get(app.url("/api/service-a/items"))
        .header("x-api-key", TEST_API_KEY)
        .header("x-user-role", "user")
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), reqwest::StatusCode::OK);
}

#[tokio::test]
#[serial]
async fn failed_probe_reopens_the_breaker() {
    // Fails until hit 5, then recovers
    let upstream = spawn_upstream(Arc::new(|hit, _| {
        if hit < 5 {
            (StatusCode::INTERNAL_SERVER_ERROR, json!({"oops": true}))
        } else {
            (StatusCode::OK, json!({"success": true, "data": []}))
        }
    }))
    .await;

    let mut config = test_config(&upstream.base_url, &upstream.base_url, &upstream.base_url);
    config.upstreams.circuit_breaker = CircuitBreakerConfig {
        failure_threshold: 2,
        reset_timeout_secs: 1,
        half_open_attempts: 1,
    };
    let app = spawn_gateway(config, Arc::new(StubValidator::new())).await;
    let client = http_client();

    let send = |client: reqwest::Client, url: String| async move {
        client
            .get(url)
            .header("x-api-key", TEST_API_KEY)
            .header("x-user-role", "user")
            .send()
            .await
            .unwrap()
    };

    // Two failures open the breaker (hits 0, 1)
    for _ in 0..2 {
        send(client.clone(), app.url("/api/service-b/reports")).await;
    }
    assert_eq!(upstream.hit_count(), 2);

    // Probe after the reset timeout still fails (hit 2) -> re-open
    tokio::time::sleep(Duration::from_millis(1200)).await;
    let response = send(client.clone(), app.url("/api/service-b/reports")).await;
    assert_eq!(
        response.status(),
        reqwest::StatusCode::INTERNAL_SERVER_ERROR
    );
    assert_eq!(upstream.hit_count(), 3);

    // Immediately rejected again without an upstream call
    let response = send(client.clone(), app.url("/api/service-b/reports")).await;
    assert_eq!(response.status(), reqwest::StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(upstream.hit_count(), 3);
}
