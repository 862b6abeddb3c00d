// ============================================================================
// Dispatcher - turns a validated request into an upstream call
// ============================================================================
//
// Builds the outbound URL (upstream base + inbound path minus the gateway
// prefix), re-encodes query parameters, stamps the outbound headers
// (including the correlation id), and invokes the upstream inside its
// circuit breaker. GET responses are memoized through the response cache
// when the route opts in; writes invalidate the related keys.
//
// Transport failures are translated into gateway kinds here, so the
// exception mapper never sees a raw reqwest error.
//
// ============================================================================

use axum::body::Body;
use axum::http::{header, HeaderMap, HeaderValue, Method, StatusCode};
use axum::response::Response;
use portico_config::UpstreamsConfig;
use portico_error::{GatewayError, SuccessEnvelope};
use serde_json::{Map, Value};
use std::sync::Arc;
use std::time::Duration;

use crate::breaker::BreakerRegistry;
use crate::cache::ResponseCache;
use crate::context::{
    RequestContext, HEADER_ACCEPT_LANGUAGE, HEADER_REQUEST_ID, HEADER_SOURCE_SERVICE,
    HEADER_TENANT_ID, HEADER_TENANT_NAME, HEADER_USER_EMAIL, HEADER_USER_ROLE,
};
use crate::routes::table::RouteSpec;
use crate::uploads::SpooledFile;

/// Pagination keys recognized at the top level of an unenveloped body
const PAGINATION_KEYS: [&str; 5] = ["page", "limit", "total", "totalPages", "hasMore"];

/// Outcome of a proxied call: the upstream status plus the normalized
/// envelope (absent for bodyless replies such as 204)
pub struct UpstreamReply {
    pub status: StatusCode,
    pub envelope: Option<SuccessEnvelope>,
}

pub struct Dispatcher {
    client: reqwest::Client,
    upstreams: UpstreamsConfig,
    breakers: BreakerRegistry,
    cache: ResponseCache,
    timeout: Duration,
}

impl Dispatcher {
    pub fn new(
        client: reqwest::Client,
        upstreams: UpstreamsConfig,
        breakers: BreakerRegistry,
        cache: ResponseCache,
    ) -> Self {
        let timeout = Duration::from_secs(upstreams.timeout_secs);
        Self {
            client,
            upstreams,
            breakers,
            cache,
            timeout,
        }
    }

    /// Proxy a JSON request to the route's upstream
    pub async fn dispatch_json(
        &self,
        ctx: &RequestContext,
        route: &RouteSpec,
        raw_query: Option<&str>,
        body: Option<Value>,
    ) -> Result<UpstreamReply, GatewayError> {
        let upstream = self.upstream_for(route)?;
        let tenant = ctx.tenant_id().unwrap_or_default();
        let is_get = route.method == Method::GET;

        let cache_key = route.cache.filter(|_| is_get).map(|_| {
            let mut key = ResponseCache::key(
                &upstream.name,
                &tenant,
                route.resource.unwrap_or("unknown"),
                route.path_id(&ctx.path),
            );
            // Query variants (page, limit, filters) are distinct entries
            let mut pairs = filtered_query_pairs(raw_query);
            pairs.sort();
            for (name, value) in &pairs {
                key.push_str(&format!(":{}={}", name, value));
            }
            key
        });

        if let Some(key) = &cache_key {
            if let Some(cached) = self.cache.get(key).await {
                if let Ok(envelope) = serde_json::from_value::<SuccessEnvelope>(cached) {
                    tracing::debug!(key = %key, "serving upstream response from cache");
                    return Ok(UpstreamReply {
                        status: StatusCode::OK,
                        envelope: Some(envelope),
                    });
                }
            }
        }

        let breaker = self
            .breakers
            .get(&upstream.name)
            .ok_or_else(|| GatewayError::internal("no breaker registered for upstream"))?;
        breaker.try_acquire()?;

        let url = build_upstream_url(&upstream.base_url, &upstream.name, &ctx.path, raw_query, &tenant)?;

        let mut request = self
            .client
            .request(route.method.clone(), url)
            .headers(self.outbound_headers(ctx, &upstream.api_key, &tenant))
            .timeout(self.timeout);
        if let Some(body) = &body {
            request = request.json(body);
        }

        let response = match request.send().await {
            Ok(response) => response,
            Err(e) => {
                let translated = translate_transport(&upstream.name, &e);
                breaker.record_failure(&e.to_string());
                return Err(translated);
            }
        };

        let status = response.status();
        if status.is_server_error() {
            breaker.record_failure(&format!("upstream returned {}", status));
        } else {
            breaker.record_success();
        }

        if status.is_success() {
            let reply = self.success_reply(status, response).await?;

            if let (Some(key), Some(envelope)) = (&cache_key, &reply.envelope) {
                if status == StatusCode::OK {
                    if let (Some(tier), Ok(value)) = (route.cache, serde_json::to_value(envelope)) {
                        self.cache.put(key, &value, tier).await;
                    }
                }
            }

            if !is_get {
                if let Some(resource) = route.resource {
                    self.cache
                        .invalidate(
                            &upstream.name,
                            &tenant,
                            resource,
                            route.path_id(&ctx.path),
                            route.invalidates,
                        )
                        .await;
                }
            }

            return Ok(reply);
        }

        Err(self.error_reply(status, response, route, ctx).await)
    }

    /// Forward a spooled multipart upload to the route's upstream
    pub async fn dispatch_upload(
        &self,
        ctx: &RequestContext,
        route: &RouteSpec,
        file: &SpooledFile,
        fields: Vec<(String, String)>,
    ) -> Result<UpstreamReply, GatewayError> {
        let upstream = self.upstream_for(route)?;
        let tenant = ctx.tenant_id().unwrap_or_default();

        let breaker = self
            .breakers
            .get(&upstream.name)
            .ok_or_else(|| GatewayError::internal("no breaker registered for upstream"))?;
        breaker.try_acquire()?;

        let url = build_upstream_url(&upstream.base_url, &upstream.name, &ctx.path, None, &tenant)?;

        let bytes = tokio::fs::read(&file.path)
            .await
            .map_err(|e| GatewayError::internal(format!("failed to read spooled upload: {}", e)))?;

        let part = reqwest::multipart::Part::bytes(bytes)
            .file_name(file.file_name.clone())
            .mime_str(&file.content_type)
            .map_err(|e| GatewayError::internal(format!("invalid upload content type: {}", e)))?;

        let mut form = reqwest::multipart::Form::new().part("file", part);
        for (name, value) in fields {
            form = form.text(name, value);
        }

        let response = match self
            .client
            .post(url)
            .headers(self.outbound_headers(ctx, &upstream.api_key, &tenant))
            .multipart(form)
            .timeout(self.timeout)
            .send()
            .await
        {
            Ok(response) => response,
            Err(e) => {
                let translated = translate_transport(&upstream.name, &e);
                breaker.record_failure(&e.to_string());
                return Err(translated);
            }
        };

        let status = response.status();
        if status.is_server_error() {
            breaker.record_failure(&format!("upstream returned {}", status));
        } else {
            breaker.record_success();
        }

        if status.is_success() {
            if let Some(resource) = route.resource {
                self.cache
                    .invalidate(&upstream.name, &tenant, resource, None, route.invalidates)
                    .await;
            }
            return self.success_reply(status, response).await;
        }

        Err(self.error_reply(status, response, route, ctx).await)
    }

    /// Stream a file download back to the client verbatim. File name and
    /// content type come from a metadata call made first.
    pub async fn dispatch_download(
        &self,
        ctx: &RequestContext,
        route: &RouteSpec,
    ) -> Result<Response, GatewayError> {
        let upstream = self.upstream_for(route)?;
        let tenant = ctx.tenant_id().unwrap_or_default();
        let id = route.path_id(&ctx.path).unwrap_or("unknown").to_string();

        let breaker = self
            .breakers
            .get(&upstream.name)
            .ok_or_else(|| GatewayError::internal("no breaker registered for upstream"))?;
        breaker.try_acquire()?;

        // Metadata first: the stream call cannot name the attachment
        let metadata_path = ctx
            .path
            .strip_suffix("/download")
            .unwrap_or(&ctx.path)
            .to_string();
        let metadata_url =
            build_upstream_url(&upstream.base_url, &upstream.name, &metadata_path, None, &tenant)?;

        let metadata = match self
            .client
            .get(metadata_url)
            .headers(self.outbound_headers(ctx, &upstream.api_key, &tenant))
            .timeout(self.timeout)
            .send()
            .await
        {
            Ok(response) => response,
            Err(e) => {
                let translated = translate_transport(&upstream.name, &e);
                breaker.record_failure(&e.to_string());
                return Err(translated);
            }
        };

        let status = metadata.status();
        if !status.is_success() {
            if status.is_server_error() {
                breaker.record_failure(&format!("upstream returned {}", status));
            } else {
                breaker.record_success();
            }
            return Err(self.error_reply(status, metadata, route, ctx).await);
        }

        let metadata_body: Value = metadata.json().await.unwrap_or(Value::Null);
        let (file_name, content_type) = file_metadata(&metadata_body, &id);

        let url = build_upstream_url(&upstream.base_url, &upstream.name, &ctx.path, None, &tenant)?;
        let response = match self
            .client
            .get(url)
            .headers(self.outbound_headers(ctx, &upstream.api_key, &tenant))
            .timeout(self.timeout)
            .send()
            .await
        {
            Ok(response) => response,
            Err(e) => {
                let translated = translate_transport(&upstream.name, &e);
                breaker.record_failure(&e.to_string());
                return Err(translated);
            }
        };

        let status = response.status();
        if status.is_server_error() {
            breaker.record_failure(&format!("upstream returned {}", status));
        } else {
            breaker.record_success();
        }
        if !status.is_success() {
            return Err(self.error_reply(status, response, route, ctx).await);
        }

        let stream = response.bytes_stream();
        let mut builder = Response::builder()
            .status(StatusCode::OK)
            .header(header::CONTENT_TYPE, content_type)
            .header(
                header::CONTENT_DISPOSITION,
                format!("attachment; filename=\"{}\"", file_name),
            );
        if let Ok(value) = HeaderValue::from_str(&ctx.request_id) {
            builder = builder.header(HEADER_REQUEST_ID, value);
        }
        builder
            .body(Body::from_stream(stream))
            .map_err(|e| GatewayError::internal(format!("failed to build download response: {}", e)))
    }

    fn upstream_for<'a>(
        &'a self,
        route: &RouteSpec,
    ) -> Result<&'a portico_config::UpstreamConfig, GatewayError> {
        route
            .upstream
            .and_then(|name| self.upstreams.get(name))
            .ok_or_else(|| GatewayError::internal("route has no configured upstream"))
    }

    fn outbound_headers(&self, ctx: &RequestContext, api_key: &str, tenant: &str) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(
            header::CONTENT_TYPE,
            HeaderValue::from_static("application/json"),
        );
        if let Ok(value) = HeaderValue::from_str(api_key) {
            headers.insert("x-api-key", value);
        }
        if let Ok(value) = HeaderValue::from_str(tenant) {
            headers.insert(HEADER_TENANT_ID, value);
        }
        if let Ok(value) = HeaderValue::from_str(&ctx.request_id) {
            headers.insert(HEADER_REQUEST_ID, value);
        }

        // Forwarded identity headers, when present on the inbound request
        for name in [
            HEADER_USER_EMAIL,
            HEADER_USER_ROLE,
            HEADER_TENANT_NAME,
            HEADER_SOURCE_SERVICE,
            HEADER_ACCEPT_LANGUAGE,
        ] {
            if let Some(value) = ctx.headers.get(name) {
                headers.insert(
                    axum::http::HeaderName::from_bytes(name.as_bytes())
                        .expect("static header name"),
                    value.clone(),
                );
            }
        }

        headers
    }

    async fn success_reply(
        &self,
        status: StatusCode,
        response: reqwest::Response,
    ) -> Result<UpstreamReply, GatewayError> {
        if status == StatusCode::NO_CONTENT {
            return Ok(UpstreamReply {
                status,
                envelope: None,
            });
        }

        let body: Value = response.json().await.unwrap_or(Value::Null);
        Ok(UpstreamReply {
            status,
            envelope: Some(normalize_envelope(body)),
        })
    }

    async fn error_reply(
        &self,
        status: StatusCode,
        response: reqwest::Response,
        route: &RouteSpec,
        ctx: &RequestContext,
    ) -> GatewayError {
        if status == StatusCode::NOT_FOUND {
            let resource = route.resource.unwrap_or("resource");
            let id = route.path_id(&ctx.path).unwrap_or("unknown");
            return GatewayError::not_found(resource, id);
        }

        let body: Option<Value> = response.json().await.ok();

        // A well-formed upstream error envelope passes through verbatim
        if let Some(Value::Object(map)) = &body {
            if map.contains_key("error") {
                return GatewayError::UpstreamPassthrough {
                    status: status.as_u16(),
                    body: body.unwrap_or(Value::Null),
                };
            }
        }

        let message = body
            .as_ref()
            .and_then(|v| v.get("message"))
            .and_then(|v| v.as_str())
            .map(str::to_string)
            .unwrap_or_else(|| format!("upstream returned status {}", status.as_u16()));

        synthesize_for_status(status, message)
    }
}

/// Upstream URL: base + inbound path minus the `/api/<upstream>` prefix,
/// original query pairs re-encoded with null-ish values dropped, and
/// `tenantId` always appended.
pub fn build_upstream_url(
    base_url: &str,
    upstream_name: &str,
    path: &str,
    raw_query: Option<&str>,
    tenant: &str,
) -> Result<url::Url, GatewayError> {
    let prefix = format!("/api/{}", upstream_name);
    let suffix = path.strip_prefix(&prefix).unwrap_or(path);
    let suffix = if suffix.is_empty() { "/" } else { suffix };

    let mut url = url::Url::parse(&format!("{}{}", base_url.trim_end_matches('/'), suffix))
        .map_err(|e| GatewayError::internal(format!("invalid upstream url: {}", e)))?;

    {
        let mut pairs = url.query_pairs_mut();
        for (name, value) in filtered_query_pairs(raw_query) {
            pairs.append_pair(&name, &value);
        }
        pairs.append_pair("tenantId", tenant);
    }

    Ok(url)
}

/// Decoded query pairs with null-ish values dropped
fn filtered_query_pairs(raw_query: Option<&str>) -> Vec<(String, String)> {
    raw_query
        .map(|raw| {
            url::form_urlencoded::parse(raw.as_bytes())
                .filter(|(_, value)| value != "undefined" && value != "null")
                .map(|(name, value)| (name.into_owned(), value.into_owned()))
                .collect()
        })
        .unwrap_or_default()
}

/// Wrap the upstream body in the success envelope unless it already is one
pub fn normalize_envelope(body: Value) -> SuccessEnvelope {
    if let Value::Object(map) = &body {
        if map.get("success").is_some_and(Value::is_boolean) && map.contains_key("data") {
            return SuccessEnvelope {
                success: map.get("success").and_then(Value::as_bool).unwrap_or(true),
                data: map.get("data").cloned().unwrap_or(Value::Null),
                metadata: map
                    .get("metadata")
                    .or_else(|| map.get("meta"))
                    .cloned()
                    .filter(|v| !v.is_null()),
            };
        }
    }

    let metadata = detect_pagination(&body);
    SuccessEnvelope {
        success: true,
        data: body,
        metadata,
    }
}

/// Pagination detection order: a top-level metadata/meta/pagination object,
/// then any subset of the well-known pagination keys at the top level.
fn detect_pagination(body: &Value) -> Option<Value> {
    let map = body.as_object()?;

    for key in ["metadata", "meta", "pagination"] {
        if let Some(value) = map.get(key) {
            if value.is_object() {
                return Some(value.clone());
            }
        }
    }

    let mut found = Map::new();
    for key in PAGINATION_KEYS {
        if let Some(value) = map.get(key) {
            found.insert(key.to_string(), value.clone());
        }
    }
    if found.is_empty() {
        None
    } else {
        Some(Value::Object(found))
    }
}

/// Translate a transport-level failure into a gateway kind
fn translate_transport(upstream: &str, error: &reqwest::Error) -> GatewayError {
    if error.is_timeout() {
        GatewayError::GatewayTimeout(format!("{} did not respond in time", upstream))
    } else {
        // Connect refused, DNS failure, TLS and protocol errors
        GatewayError::service_unavailable(format!("{} is unreachable", upstream))
    }
}

/// Synthesize a gateway error whose kind matches a bare upstream status
fn synthesize_for_status(status: StatusCode, message: String) -> GatewayError {
    match status {
        StatusCode::BAD_REQUEST => GatewayError::BadRequest(message),
        StatusCode::UNAUTHORIZED => GatewayError::Unauthorized(message),
        StatusCode::FORBIDDEN => GatewayError::Forbidden(message),
        StatusCode::CONFLICT => GatewayError::Conflict(message),
        StatusCode::PAYLOAD_TOO_LARGE => GatewayError::PayloadTooLarge(message),
        StatusCode::UNPROCESSABLE_ENTITY => GatewayError::Validation(Vec::new()),
        StatusCode::TOO_MANY_REQUESTS => GatewayError::TooManyRequests(message),
        StatusCode::GATEWAY_TIMEOUT => GatewayError::GatewayTimeout(message),
        StatusCode::BAD_GATEWAY | StatusCode::SERVICE_UNAVAILABLE => {
            GatewayError::ServiceUnavailable(message)
        }
        s if s.is_server_error() => GatewayError::Internal(message),
        _ => GatewayError::BadRequest(message),
    }
}

fn file_metadata(body: &Value, id: &str) -> (String, String) {
    let data = body.get("data").unwrap_or(body);

    let file_name = ["fileName", "filename", "name"]
        .iter()
        .find_map(|key| data.get(*key).and_then(Value::as_str))
        .map(str::to_string)
        .unwrap_or_else(|| id.to_string());

    let content_type = ["contentType", "mimeType"]
        .iter()
        .find_map(|key| data.get(*key).and_then(Value::as_str))
        .map(str::to_string)
        .unwrap_or_else(|| "application/octet-stream".to_string());

    (file_name, content_type)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn url_strips_gateway_prefix_and_appends_tenant() {
        let url = build_upstream_url(
            "http://svc-a:3002",
            "service-a",
            "/api/service-a/items",
            Some("page=2&limit=5"),
            "t1",
        )
        .unwrap();

        assert_eq!(url.path(), "/items");
        let query: Vec<(String, String)> = url
            .query_pairs()
            .map(|(k, v)| (k.into_owned(), v.into_owned()))
            .collect();
        assert_eq!(
            query,
            vec![
                ("page".to_string(), "2".to_string()),
                ("limit".to_string(), "5".to_string()),
                ("tenantId".to_string(), "t1".to_string()),
            ]
        );
    }

    #[test]
    fn url_drops_nullish_query_values() {
        let url = build_upstream_url(
            "http://svc-a:3002",
            "service-a",
            "/api/service-a/items",
            Some("sort=undefined&filter=null&q=ok"),
            "t1",
        )
        .unwrap();

        let query = url.query().unwrap();
        assert!(!query.contains("sort"));
        assert!(!query.contains("filter"));
        assert!(query.contains("q=ok"));
    }

    #[test]
    fn enveloped_body_passes_through() {
        let envelope = normalize_envelope(json!({
            "success": true,
            "data": [1, 2, 3],
            "metadata": {"page": 2, "limit": 5}
        }));
        assert_eq!(envelope.data, json!([1, 2, 3]));
        assert_eq!(envelope.metadata, Some(json!({"page": 2, "limit": 5})));
    }

    #[test]
    fn bare_body_is_wrapped() {
        let envelope = normalize_envelope(json!({"id": "42", "title": "x"}));
        assert!(envelope.success);
        assert_eq!(envelope.data, json!({"id": "42", "title": "x"}));
        assert!(envelope.metadata.is_none());
    }

    #[test]
    fn pagination_detected_from_top_level_keys() {
        let envelope = normalize_envelope(json!({
            "rows": [],
            "page": 2,
            "limit": 5,
            "total": 40
        }));
        assert_eq!(
            envelope.metadata,
            Some(json!({"page": 2, "limit": 5, "total": 40}))
        );
    }

    #[test]
    fn pagination_object_takes_precedence() {
        let envelope = normalize_envelope(json!({
            "rows": [],
            "pagination": {"page": 1, "hasMore": false},
            "page": 9
        }));
        assert_eq!(envelope.metadata, Some(json!({"page": 1, "hasMore": false})));
    }

    #[test]
    fn synthesized_kinds_match_status() {
        assert_eq!(
            synthesize_for_status(StatusCode::CONFLICT, "dup".into()).error_code(),
            "ERR_CONFLICT"
        );
        assert_eq!(
            synthesize_for_status(StatusCode::INTERNAL_SERVER_ERROR, "boom".into()).error_code(),
            "ERR_INTERNAL_SERVER_ERROR"
        );
        assert_eq!(
            synthesize_for_status(StatusCode::SERVICE_UNAVAILABLE, "down".into()).error_code(),
            "ERR_SERVICE_UNAVAILABLE"
        );
    }

    #[test]
    fn file_metadata_falls_back_to_id() {
        let (name, ct) = file_metadata(&json!({"data": {"fileName": "a.pdf", "contentType": "application/pdf"}}), "f1");
        assert_eq!(name, "a.pdf");
        assert_eq!(ct, "application/pdf");

        let (name, ct) = file_metadata(&Value::Null, "f1");
        assert_eq!(name, "f1");
        assert_eq!(ct, "application/octet-stream");
    }
}
