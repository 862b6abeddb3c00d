// ============================================================================
// Pipeline - ordered middleware composition
// ============================================================================
//
// Strict stage order for every request:
//   ingress -> correlation id -> AuthN -> AuthZ -> RateLimiter -> handler
//
// A failure at any stage short-circuits to the exception mapper; the
// response writer runs exactly once. Rate-limit headers are written on
// every response that reaches the limiter, pass or block. The correlation
// id is stamped on the request (for downstream calls) and on the response.
//
// ============================================================================

use axum::extract::{ConnectInfo, Request, State};
use axum::http::{HeaderName, HeaderValue};
use axum::middleware::Next;
use axum::response::Response;
use portico_error::GatewayError;
use std::net::SocketAddr;

use crate::authz;
use crate::context::{
    extract_client_ip, is_health_path, RequestContext, HEADER_API_KEY, HEADER_REQUEST_ID,
};
use crate::exception;
use crate::rate_limit::{derive_identity, RateLimitDecision};
use crate::AppState;

/// Ingress stage: build the request context, stamp the correlation id,
/// observe latency and emit the completion log.
pub async fn context_middleware(
    State(state): State<AppState>,
    mut request: Request,
    next: Next,
) -> Response {
    let method = request.method().clone();
    let path = request.uri().path().to_string();
    let headers = request.headers().clone();

    let direct_ip = request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|info| info.0.ip());
    let client_ip = extract_client_ip(&headers, direct_ip);

    let route = state.routes.match_route(&method, &path);
    let ctx = RequestContext::new(method.to_string(), path, headers, client_ip, route);

    // Stamp the correlation id onto the request so every downstream call
    // and log line sees the same value.
    if let Ok(value) = HeaderValue::from_str(&ctx.request_id) {
        request
            .headers_mut()
            .insert(HeaderName::from_static(HEADER_REQUEST_ID), value);
    }

    tracing::debug!(
        request_id = %ctx.request_id,
        method = %ctx.method,
        path = %ctx.path,
        "request received"
    );

    let service_label = ctx
        .route
        .as_ref()
        .and_then(|route| route.upstream)
        .unwrap_or("gateway")
        .to_string();
    let log_ctx = ctx.clone();

    request.extensions_mut().insert(ctx);
    let mut response = next.run(request).await;

    if !response.headers().contains_key(HEADER_REQUEST_ID) {
        if let Ok(value) = HeaderValue::from_str(&log_ctx.request_id) {
            response
                .headers_mut()
                .insert(HeaderName::from_static(HEADER_REQUEST_ID), value);
        }
    }

    let elapsed = log_ctx.started_at.elapsed();
    portico_metrics::GATEWAY_REQUESTS_TOTAL
        .with_label_values(&[service_label.as_str(), response.status().as_str()])
        .inc();
    portico_metrics::GATEWAY_REQUEST_DURATION_SECONDS
        .with_label_values(&[service_label.as_str()])
        .observe(elapsed.as_secs_f64());

    exception::log_completion(&log_ctx, response.status(), elapsed.as_millis());

    response
}

/// AuthN + AuthZ stage. Public routes and health endpoints pass through
/// without a principal.
pub async fn auth_middleware(
    State(state): State<AppState>,
    mut request: Request,
    next: Next,
) -> Response {
    let ctx = match request.extensions().get::<RequestContext>() {
        Some(ctx) => ctx.clone(),
        None => return next.run(request).await,
    };

    let route = match &ctx.route {
        Some(route) => route.clone(),
        // Unmatched paths fall through to the 404 fallback
        None => return next.run(request).await,
    };

    if route.public || is_health_path(&ctx.path) {
        return next.run(request).await;
    }

    let principal = match state.authenticator.authenticate(&ctx).await {
        Ok(principal) => principal,
        Err(err) => return exception::render(&err, &ctx),
    };

    if let Err(err) = authz::authorize(&state.policy, &principal, &route) {
        return exception::render(&err, &ctx);
    }

    if let Some(stored) = request.extensions_mut().get_mut::<RequestContext>() {
        stored.principal = Some(principal);
    }

    next.run(request).await
}

/// RateLimiter stage: sliding fixed-window per identity, opt-in tenant
/// window, headers on pass and on block.
pub async fn throttle_middleware(
    State(state): State<AppState>,
    request: Request,
    next: Next,
) -> Response {
    let ctx = match request.extensions().get::<RequestContext>() {
        Some(ctx) => ctx.clone(),
        None => return next.run(request).await,
    };

    let route = match &ctx.route {
        Some(route) => route.clone(),
        None => return next.run(request).await,
    };

    if route.public || route.skip_throttle || is_health_path(&ctx.path) {
        return next.run(request).await;
    }

    let identity = derive_identity(
        ctx.header(HEADER_API_KEY),
        ctx.principal.as_ref(),
        ctx.client_ip.as_deref(),
    );
    let resource = route.resource.unwrap_or("unknown");

    let decision = state.limiter.check(&identity, &ctx.method, resource).await;

    let tenant = ctx.tenant_id().unwrap_or_default();
    let tenant_decision = state
        .limiter
        .check_tenant(&tenant, &ctx.method, resource)
        .await;

    let blocked = decision.limited || tenant_decision.is_some_and(|d| d.limited);
    if blocked {
        portico_metrics::GATEWAY_RATE_LIMITED_TOTAL
            .with_label_values(&[ctx.method.as_str(), resource])
            .inc();

        let err = GatewayError::TooManyRequests("Rate limit exceeded".to_string());
        let mut response = exception::render(&err, &ctx);
        write_rate_limit_headers(&mut response, &decision, "x-ratelimit");
        if let Some(tenant_decision) = &tenant_decision {
            write_rate_limit_headers(&mut response, tenant_decision, "x-tenant-ratelimit");
        }
        return response;
    }

    let mut response = next.run(request).await;
    write_rate_limit_headers(&mut response, &decision, "x-ratelimit");
    if let Some(tenant_decision) = &tenant_decision {
        write_rate_limit_headers(&mut response, tenant_decision, "x-tenant-ratelimit");
    }
    response
}

fn write_rate_limit_headers(response: &mut Response, decision: &RateLimitDecision, prefix: &str) {
    let headers = response.headers_mut();
    let entries = [
        (format!("{}-limit", prefix), decision.limit.to_string()),
        (format!("{}-remaining", prefix), decision.remaining.to_string()),
        (format!("{}-reset", prefix), decision.reset_epoch_secs.to_string()),
    ];
    for (name, value) in entries {
        if let (Ok(name), Ok(value)) = (
            HeaderName::from_bytes(name.as_bytes()),
            HeaderValue::from_str(&value),
        ) {
            headers.insert(name, value);
        }
    }
}
