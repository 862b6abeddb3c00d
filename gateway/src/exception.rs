// ============================================================================
// Exception Mapper - the single error-to-envelope sink
// ============================================================================
//
// Every failure path ends here: the error is logged with a severity
// matching its status class and rendered as an ErrorEnvelope stamped with
// the RFC3339 timestamp, the request path and the correlation id. Upstream
// error envelopes pass through verbatim with their status.
//
// There is no ambient catch-all; middleware and the terminal handlers call
// `render` explicitly.
//
// ============================================================================

use axum::http::{header, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Json, Response};
use chrono::Utc;
use portico_error::{ErrorEnvelope, GatewayError};
use serde_json::Value;

use crate::context::{RequestContext, HEADER_REQUEST_ID};

/// Render a gateway error as the client-visible response
pub fn render(err: &GatewayError, ctx: &RequestContext) -> Response {
    err.log();

    let status = err.status_code();

    let mut response = match err {
        GatewayError::UpstreamPassthrough { body, .. } => {
            (status, Json(body.clone())).into_response()
        }
        _ => {
            let envelope = ErrorEnvelope {
                error: err.kind().to_string(),
                message: err.user_message(),
                error_code: Some(err.error_code().to_string()),
                validation_errors: match err {
                    GatewayError::Validation(fields) if !fields.is_empty() => {
                        Some(fields.clone())
                    }
                    _ => None,
                },
                timestamp: Utc::now(),
                path: ctx.path.clone(),
                request_id: Some(ctx.request_id.clone()),
            };
            (status, Json(envelope)).into_response()
        }
    };

    if let Ok(value) = HeaderValue::from_str(&ctx.request_id) {
        response.headers_mut().insert(HEADER_REQUEST_ID, value);
    }
    response
        .headers_mut()
        .entry(header::CONTENT_TYPE)
        .or_insert(HeaderValue::from_static("application/json"));

    response
}

/// Replace secret-bearing fields with a placeholder before a body reaches
/// the logs. Applied recursively; the response sent to the client is never
/// touched.
pub fn sanitize_for_logging(value: &Value) -> Value {
    const REDACTED_FIELDS: [&str; 4] = ["password", "apiKey", "api_key", "data_base64"];

    match value {
        Value::Object(map) => Value::Object(
            map.iter()
                .map(|(key, inner)| {
                    if REDACTED_FIELDS.contains(&key.as_str()) {
                        (key.clone(), Value::String("[REDACTED]".to_string()))
                    } else {
                        (key.clone(), sanitize_for_logging(inner))
                    }
                })
                .collect(),
        ),
        Value::Array(items) => Value::Array(items.iter().map(sanitize_for_logging).collect()),
        other => other.clone(),
    }
}

/// Status-classed request completion log, emitted once per request
pub fn log_completion(ctx: &RequestContext, status: StatusCode, elapsed_ms: u128) {
    if status.is_server_error() {
        tracing::error!(
            request_id = %ctx.request_id,
            method = %ctx.method,
            path = %ctx.path,
            status = status.as_u16(),
            elapsed_ms = elapsed_ms,
            "request failed"
        );
    } else if status.is_client_error() {
        tracing::warn!(
            request_id = %ctx.request_id,
            method = %ctx.method,
            path = %ctx.path,
            status = status.as_u16(),
            elapsed_ms = elapsed_ms,
            "request rejected"
        );
    } else {
        tracing::info!(
            request_id = %ctx.request_id,
            method = %ctx.method,
            path = %ctx.path,
            status = status.as_u16(),
            elapsed_ms = elapsed_ms,
            "request completed"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderMap;
    use serde_json::json;

    fn ctx() -> RequestContext {
        let mut headers = HeaderMap::new();
        headers.insert(HEADER_REQUEST_ID, HeaderValue::from_static("req-1"));
        RequestContext::new(
            "GET".into(),
            "/api/service-a/items".into(),
            headers,
            None,
            None,
        )
    }

    #[test]
    fn sanitizer_redacts_nested_secret_fields() {
        let body = json!({
            "name": "report",
            "password": "hunter2",
            "nested": {"api_key": "sk-123", "keep": true},
            "items": [{"apiKey": "k", "data_base64": "AAAA"}]
        });

        let clean = sanitize_for_logging(&body);
        assert_eq!(clean["password"], "[REDACTED]");
        assert_eq!(clean["nested"]["api_key"], "[REDACTED]");
        assert_eq!(clean["nested"]["keep"], true);
        assert_eq!(clean["items"][0]["apiKey"], "[REDACTED]");
        assert_eq!(clean["items"][0]["data_base64"], "[REDACTED]");
        assert_eq!(clean["name"], "report");
    }

    #[tokio::test]
    async fn rendered_envelope_carries_path_and_request_id() {
        let err = GatewayError::unauthorized("Missing credentials");
        let response = render(&err, &ctx());
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(
            response.headers().get(HEADER_REQUEST_ID).unwrap(),
            "req-1"
        );

        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let body: Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(body["error"], "Unauthorized");
        assert_eq!(body["errorCode"], "ERR_AUTHENTICATION_FAILED");
        assert_eq!(body["path"], "/api/service-a/items");
        assert_eq!(body["requestId"], "req-1");
        assert!(body["timestamp"].is_string());
    }

    #[tokio::test]
    async fn passthrough_body_is_verbatim() {
        let err = GatewayError::UpstreamPassthrough {
            status: 409,
            body: json!({"error": "Conflict", "message": "duplicate name"}),
        };
        let response = render(&err, &ctx());
        assert_eq!(response.status(), StatusCode::CONFLICT);

        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let body: Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(body, json!({"error": "Conflict", "message": "duplicate name"}));
    }
}
