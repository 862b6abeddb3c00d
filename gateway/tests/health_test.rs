// ============================================================================
// Health and System-Check Endpoint Tests
// ============================================================================

use serde_json::{json, Value};

use test_utils::{http_client, spawn_simple_gateway, TEST_API_KEY};

#[tokio::test]
async fn health_is_public_and_enveloped() {
    let (app, _upstream) = spawn_simple_gateway(json!({})).await;
    let client = http_client();

    let response = client.get(app.url("/health")).send().await.unwrap();
    assert_eq!(response.status(), reqwest::StatusCode::OK);

    // Correlation id generated even for public endpoints
    assert!(response.headers().get("x-request-id").is_some());

    let body: Value = response.json().await.unwrap();
    assert_eq!(body["success"], true);
    assert_eq!(body["data"]["status"], "ok");
}

#[tokio::test]
async fn health_echoes_supplied_request_id() {
    let (app, _upstream) = spawn_simple_gateway(json!({})).await;
    let client = http_client();

    let response = client
        .get(app.url("/api/health"))
        .header("x-request-id", "trace-me-123")
        .send()
        .await
        .unwrap();

    assert_eq!(
        response.headers().get("x-request-id").unwrap(),
        "trace-me-123"
    );
}

#[tokio::test]
async fn health_never_authenticates_or_throttles() {
    let (app, _upstream) = spawn_simple_gateway(json!({})).await;
    let client = http_client();

    // Well past any limit, with no credentials at all
    for _ in 0..10 {
        let response = client.get(app.url("/health")).send().await.unwrap();
        assert_eq!(response.status(), reqwest::StatusCode::OK);
        assert!(response.headers().get("x-ratelimit-limit").is_none());
    }
}

#[tokio::test]
async fn system_check_is_public() {
    let (app, _upstream) = spawn_simple_gateway(json!({})).await;
    let client = http_client();

    let response = client
        .get(app.url("/api/system-check"))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), reqwest::StatusCode::OK);
}

#[tokio::test]
async fn system_check_key_requires_credentials() {
    let (app, _upstream) = spawn_simple_gateway(json!({})).await;
    let client = http_client();

    let response = client
        .get(app.url("/api/system-check-key"))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), reqwest::StatusCode::UNAUTHORIZED);

    let body: Value = response.json().await.unwrap();
    assert_eq!(body["error"], "Unauthorized");
    assert_eq!(body["errorCode"], "ERR_AUTHENTICATION_FAILED");
    assert_eq!(body["path"], "/api/system-check-key");
    assert!(body["requestId"].is_string());

    let response = client
        .get(app.url("/api/system-check-key"))
        .header("x-api-key", TEST_API_KEY)
        .header("x-user-role", "user")
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), reqwest::StatusCode::OK);
}

#[tokio::test]
async fn unknown_route_gets_not_found_envelope() {
    let (app, _upstream) = spawn_simple_gateway(json!({})).await;
    let client = http_client();

    let response = client
        .get(app.url("/api/service-x/widgets"))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), reqwest::StatusCode::NOT_FOUND);

    let body: Value = response.json().await.unwrap();
    assert_eq!(body["error"], "NotFound");
    assert_eq!(body["errorCode"], "ERR_RESOURCE_NOT_FOUND");
    assert_eq!(body["path"], "/api/service-x/widgets");
    assert!(body["timestamp"].is_string());
}

#[tokio::test]
async fn metrics_endpoint_serves_prometheus_text() {
    let (app, _upstream) = spawn_simple_gateway(json!({})).await;
    let client = http_client();

    // At least one request so the counters exist
    client.get(app.url("/health")).send().await.unwrap();

    let response = client.get(app.url("/metrics")).send().await.unwrap();
    assert_eq!(response.status(), reqwest::StatusCode::OK);

    let content_type = response
        .headers()
        .get("content-type")
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default()
        .to_string();
    assert!(content_type.starts_with("text/plain"));

    let text = response.text().await.unwrap();
    assert!(text.contains("gateway_requests_total"));
}
