// ============================================================================
// Routes - router construction and terminal handlers
// ============================================================================
//
// Every route record in the table is mounted on the axum router with a
// single entry handler that dispatches on the record's kind. Unknown paths
// fall back to a 404 envelope. Middleware order (outermost first):
// TraceLayer -> CORS -> context -> AuthN/AuthZ -> RateLimiter -> handler.
//
// ============================================================================

pub mod table;

use axum::extract::{FromRequest, Multipart, Request, State};
use axum::http::{header, HeaderValue, Method, StatusCode};
use axum::middleware;
use axum::response::{IntoResponse, Json, Response};
use axum::routing::{MethodFilter, MethodRouter};
use axum::Router;
use chrono::Utc;
use portico_error::{FieldError, GatewayError, SuccessEnvelope};
use serde_json::{json, Value};
use std::collections::BTreeMap;
use tower::ServiceBuilder;
use tower_http::cors::{AllowOrigin, Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::context::RequestContext;
use crate::exception;
use crate::pipeline;
use crate::routes::table::HandlerKind;
use crate::AppState;

/// JSON proxy bodies are bounded well below the upload cap
const JSON_BODY_LIMIT: usize = 2 * 1024 * 1024;

/// Build the full gateway router with the pipeline layered on
pub fn build_router(state: AppState) -> Router {
    let mut by_pattern: BTreeMap<&'static str, MethodRouter<AppState>> = BTreeMap::new();
    for route in state.routes.iter() {
        let entry = by_pattern.remove(route.pattern).unwrap_or_default();
        by_pattern.insert(route.pattern, entry.on(method_filter(&route.method), serve_route));
    }

    let mut router = Router::new();
    for (pattern, method_router) in by_pattern {
        router = router.route(pattern, method_router);
    }

    // The spool manager enforces the real upload cap; axum's framework
    // limit only needs to sit above it.
    let body_limit = state.config.uploads.max_size_bytes + 1024 * 1024;

    router
        .fallback(fallback_handler)
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(axum::extract::DefaultBodyLimit::max(body_limit))
                .layer(cors_layer(&state.config.cors.allowed_origins))
                .layer(middleware::from_fn_with_state(
                    state.clone(),
                    pipeline::context_middleware,
                ))
                .layer(middleware::from_fn_with_state(
                    state.clone(),
                    pipeline::auth_middleware,
                ))
                .layer(middleware::from_fn_with_state(
                    state.clone(),
                    pipeline::throttle_middleware,
                )),
        )
        .with_state(state)
}

fn method_filter(method: &Method) -> MethodFilter {
    match *method {
        Method::GET => MethodFilter::GET,
        Method::POST => MethodFilter::POST,
        Method::PUT => MethodFilter::PUT,
        Method::DELETE => MethodFilter::DELETE,
        Method::PATCH => MethodFilter::PATCH,
        _ => MethodFilter::GET,
    }
}

fn cors_layer(allowed_origins: &[String]) -> CorsLayer {
    if allowed_origins.is_empty() {
        CorsLayer::new()
            .allow_origin(Any)
            .allow_methods(Any)
            .allow_headers(Any)
    } else {
        let origins: Vec<HeaderValue> = allowed_origins
            .iter()
            .filter_map(|origin| HeaderValue::from_str(origin).ok())
            .collect();
        CorsLayer::new()
            .allow_origin(AllowOrigin::list(origins))
            .allow_methods(Any)
            .allow_headers(Any)
    }
}

/// Single entry handler: dispatches on the matched route record's kind
async fn serve_route(State(state): State<AppState>, request: Request) -> Response {
    let ctx = match request.extensions().get::<RequestContext>() {
        Some(ctx) => ctx.clone(),
        None => {
            let ctx = RequestContext::new(
                request.method().to_string(),
                request.uri().path().to_string(),
                request.headers().clone(),
                None,
                None,
            );
            let err = GatewayError::internal("request context missing");
            return exception::render(&err, &ctx);
        }
    };

    let route = match &ctx.route {
        Some(route) => route.clone(),
        None => {
            let err = GatewayError::not_found("route", ctx.path.clone());
            return exception::render(&err, &ctx);
        }
    };

    match route.kind {
        HandlerKind::Health => health_response(&ctx),
        HandlerKind::Metrics => metrics_response(&ctx),
        HandlerKind::Proxy => proxy(state, ctx, &route, request).await,
        HandlerKind::Upload => upload(state, ctx, &route, request).await,
        HandlerKind::Download => match state.dispatcher.dispatch_download(&ctx, &route).await {
            Ok(response) => response,
            Err(err) => exception::render(&err, &ctx),
        },
    }
}

fn health_response(ctx: &RequestContext) -> Response {
    let mut data = json!({
        "status": "ok",
        "timestamp": Utc::now().to_rfc3339(),
    });
    if let Some(principal) = &ctx.principal {
        data["principal"] = json!(principal.id);
    }
    (StatusCode::OK, Json(SuccessEnvelope::new(data))).into_response()
}

fn metrics_response(ctx: &RequestContext) -> Response {
    match portico_metrics::gather_metrics() {
        Ok(text) => (
            StatusCode::OK,
            [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
            text,
        )
            .into_response(),
        Err(e) => {
            let err = GatewayError::internal(format!("failed to gather metrics: {}", e));
            exception::render(&err, ctx)
        }
    }
}

async fn proxy(
    state: AppState,
    ctx: RequestContext,
    route: &table::RouteSpec,
    request: Request,
) -> Response {
    let raw_query = request.uri().query().map(str::to_string);

    let body = match read_json_body(&route.method, request).await {
        Ok(body) => body,
        Err(err) => return exception::render(&err, &ctx),
    };

    if let Some(body) = &body {
        tracing::debug!(
            request_id = %ctx.request_id,
            body = %exception::sanitize_for_logging(body),
            "forwarding request body"
        );
    }

    match state
        .dispatcher
        .dispatch_json(&ctx, route, raw_query.as_deref(), body)
        .await
    {
        Ok(reply) => match reply.envelope {
            Some(envelope) => (reply.status, Json(envelope)).into_response(),
            None => reply.status.into_response(),
        },
        Err(err) => exception::render(&err, &ctx),
    }
}

async fn read_json_body(method: &Method, request: Request) -> Result<Option<Value>, GatewayError> {
    if !matches!(*method, Method::POST | Method::PUT | Method::PATCH) {
        return Ok(None);
    }

    let bytes = axum::body::to_bytes(request.into_body(), JSON_BODY_LIMIT)
        .await
        .map_err(|_| {
            GatewayError::PayloadTooLarge(format!(
                "Request body exceeds the {} byte limit",
                JSON_BODY_LIMIT
            ))
        })?;

    if bytes.is_empty() {
        return Ok(None);
    }

    serde_json::from_slice(&bytes).map(Some).map_err(|_| {
        GatewayError::Validation(vec![FieldError::new("body", "must be valid JSON")])
    })
}

async fn upload(
    state: AppState,
    ctx: RequestContext,
    route: &table::RouteSpec,
    request: Request,
) -> Response {
    let tenant = ctx.tenant_id().unwrap_or_default();

    let mut multipart = match Multipart::from_request(request, &()).await {
        Ok(multipart) => multipart,
        Err(_) => {
            let err = GatewayError::BadRequest("Expected a multipart/form-data body".into());
            return exception::render(&err, &ctx);
        }
    };

    let mut spooled = None;
    let mut fields = Vec::new();

    loop {
        let field = match multipart.next_field().await {
            Ok(Some(field)) => field,
            Ok(None) => break,
            Err(e) => {
                let err = GatewayError::BadRequest(format!("Malformed multipart body: {}", e));
                return exception::render(&err, &ctx);
            }
        };

        if field.name() == Some("file") {
            match state.uploads.spool(&tenant, field).await {
                Ok(file) => spooled = Some(file),
                Err(err) => return exception::render(&err, &ctx),
            }
        } else {
            let name = field.name().unwrap_or_default().to_string();
            match field.text().await {
                Ok(value) => fields.push((name, value)),
                Err(e) => {
                    let err = GatewayError::BadRequest(format!("Malformed multipart body: {}", e));
                    return exception::render(&err, &ctx);
                }
            }
        }
    }

    let Some(file) = spooled else {
        let err = GatewayError::Validation(vec![FieldError::new("file", "file part is required")]);
        return exception::render(&err, &ctx);
    };

    tracing::info!(
        request_id = %ctx.request_id,
        tenant = %tenant,
        file = %file.file_name,
        size = file.size,
        "forwarding upload"
    );

    let result = state
        .dispatcher
        .dispatch_upload(&ctx, route, &file, fields)
        .await;

    // The spool guard drops here, removing the temporary file
    match result {
        Ok(reply) => match reply.envelope {
            Some(envelope) => (reply.status, Json(envelope)).into_response(),
            None => reply.status.into_response(),
        },
        Err(err) => exception::render(&err, &ctx),
    }
}

async fn fallback_handler(request: Request) -> Response {
    let ctx = request
        .extensions()
        .get::<RequestContext>()
        .cloned()
        .unwrap_or_else(|| {
            RequestContext::new(
                request.method().to_string(),
                request.uri().path().to_string(),
                request.headers().clone(),
                None,
                None,
            )
        });

    let err = GatewayError::not_found("route", ctx.path.clone());
    exception::render(&err, &ctx)
}
