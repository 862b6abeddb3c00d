// ============================================================================
// Response Cache Tests
// ============================================================================

use axum::http::StatusCode;
use serde_json::{json, Value};
use std::sync::Arc;

use test_utils::{http_client, spawn_gateway, spawn_upstream, test_config, StubValidator, TEST_API_KEY};

async fn get(client: &reqwest::Client, url: String, tenant: &str) -> reqwest::Response {
    client
        .get(url)
        .header("x-api-key", TEST_API_KEY)
        .header("x-user-role", "user")
        .header("x-tenant-id", tenant)
        .send()
        .await
        .unwrap()
}

#[tokio::test]
async fn repeated_get_hits_the_cache_once() {
    let upstream = spawn_upstream(Arc::new(|hit, _| {
        (
            StatusCode::OK,
            json!({"success": true, "data": [{"hit": hit}]}),
        )
    }))
    .await;
    let config = test_config(&upstream.base_url, &upstream.base_url, &upstream.base_url);
    let app = spawn_gateway(config, Arc::new(StubValidator::new())).await;
    let client = http_client();

    let first: Value = get(&client, app.url("/api/service-a/items"), "t1")
        .await
        .json()
        .await
        .unwrap();
    let second: Value = get(&client, app.url("/api/service-a/items"), "t1")
        .await
        .json()
        .await
        .unwrap();

    // Same body, exactly one upstream call
    assert_eq!(first, second);
    assert_eq!(upstream.hit_count(), 1);
}

#[tokio::test]
async fn cache_is_tenant_scoped() {
    let upstream = spawn_upstream(Arc::new(|_, _| {
        (StatusCode::OK, json!({"success": true, "data": []}))
    }))
    .await;
    let config = test_config(&upstream.base_url, &upstream.base_url, &upstream.base_url);
    let app = spawn_gateway(config, Arc::new(StubValidator::new())).await;
    let client = http_client();

    get(&client, app.url("/api/service-a/items"), "t1").await;
    get(&client, app.url("/api/service-a/items"), "t2").await;

    assert_eq!(upstream.hit_count(), 2);
}

#[tokio::test]
async fn writes_invalidate_the_list_and_aggregates() {
    let upstream = spawn_upstream(Arc::new(|_, req: &test_utils::RecordedRequest| {
        if req.method == "POST" {
            (StatusCode::CREATED, json!({"success": true, "data": {"id": "i9"}}))
        } else {
            (StatusCode::OK, json!({"success": true, "data": []}))
        }
    }))
    .await;
    let config = test_config(&upstream.base_url, &upstream.base_url, &upstream.base_url);
    let app = spawn_gateway(config, Arc::new(StubValidator::new())).await;
    let client = http_client();

    // Warm the list and the statistics aggregate
    get(&client, app.url("/api/service-a/items"), "t1").await;
    get(&client, app.url("/api/service-a/statistics"), "t1").await;
    assert_eq!(upstream.hit_count(), 2);

    get(&client, app.url("/api/service-a/items"), "t1").await;
    assert_eq!(upstream.hit_count(), 2);

    // A create invalidates both
    let response = client
        .post(app.url("/api/service-a/items"))
        .header("x-api-key", TEST_API_KEY)
        .header("x-user-role", "user")
        .header("x-tenant-id", "t1")
        .json(&json!({"name": "new"}))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), reqwest::StatusCode::CREATED);

    get(&client, app.url("/api/service-a/items"), "t1").await;
    get(&client, app.url("/api/service-a/statistics"), "t1").await;
    assert_eq!(upstream.hit_count(), 5);
}

#[tokio::test]
async fn item_reads_are_cached_per_id() {
    let upstream = spawn_upstream(Arc::new(|_, _| {
        (StatusCode::OK, json!({"success": true, "data": {"id": "i1"}}))
    }))
    .await;
    let config = test_config(&upstream.base_url, &upstream.base_url, &upstream.base_url);
    let app = spawn_gateway(config, Arc::new(StubValidator::new())).await;
    let client = http_client();

    get(&client, app.url("/api/service-a/items/i1"), "t1").await;
    get(&client, app.url("/api/service-a/items/i1"), "t1").await;
    assert_eq!(upstream.hit_count(), 1);

    get(&client, app.url("/api/service-a/items/i2"), "t1").await;
    assert_eq!(upstream.hit_count(), 2);
}

#[tokio::test]
async fn query_variants_are_cached_separately() {
    let upstream = spawn_upstream(Arc::new(|_, _| {
        (StatusCode::OK, json!({"success": true, "data": []}))
    }))
    .await;
    let config = test_config(&upstream.base_url, &upstream.base_url, &upstream.base_url);
    let app = spawn_gateway(config, Arc::new(StubValidator::new())).await;
    let client = http_client();

    get(&client, app.url("/api/service-a/items?page=1"), "t1").await;
    get(&client, app.url("/api/service-a/items?page=2"), "t1").await;
    assert_eq!(upstream.hit_count(), 2);

    // Repeats of either variant come from the cache
    get(&client, app.url("/api/service-a/items?page=1"), "t1").await;
    get(&client, app.url("/api/service-a/items?page=2"), "t1").await;
    assert_eq!(upstream.hit_count(), 2);
}

#[tokio::test]
async fn uncached_routes_always_reach_the_upstream() {
    let upstream = spawn_upstream(Arc::new(|_, _| {
        (StatusCode::OK, json!({"success": true, "data": []}))
    }))
    .await;
    let config = test_config(&upstream.base_url, &upstream.base_url, &upstream.base_url);
    let app = spawn_gateway(config, Arc::new(StubValidator::new())).await;
    let client = http_client();

    get(&client, app.url("/api/service-b/reports"), "t1").await;
    get(&client, app.url("/api/service-b/reports"), "t1").await;
    assert_eq!(upstream.hit_count(), 2);
}
