// ============================================================================
// Request Context - everything known about the in-flight request
// ============================================================================
//
// Created at ingress by the pipeline, carried through every stage as a
// request extension, and destroyed after the response is written. The
// correlation id is always present: either the caller's X-Request-Id or a
// freshly generated UUID.
//
// ============================================================================

use axum::http::HeaderMap;
use std::collections::HashSet;
use std::net::IpAddr;
use std::sync::Arc;
use std::time::Instant;
use uuid::Uuid;

use crate::routes::table::RouteSpec;

pub const HEADER_REQUEST_ID: &str = "x-request-id";
pub const HEADER_API_KEY: &str = "x-api-key";
pub const HEADER_TENANT_ID: &str = "x-tenant-id";
pub const HEADER_TENANT_NAME: &str = "x-tenant-name";
pub const HEADER_USER_EMAIL: &str = "x-user-email";
pub const HEADER_USER_ROLE: &str = "x-user-role";
pub const HEADER_SOURCE_SERVICE: &str = "x-source-service";
pub const HEADER_ACCEPT_LANGUAGE: &str = "x-accept-language";

/// What kind of caller the principal represents
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PrincipalKind {
    ApiKey,
    User,
    Service,
}

/// Authenticated caller identity. Immutable once resolved by AuthN.
#[derive(Debug, Clone)]
pub struct Principal {
    pub kind: PrincipalKind,
    pub id: String,
    pub tenant_id: Option<String>,
    pub tenant_name: Option<String>,
    /// Never null; the empty set denies all role-gated actions
    pub roles: HashSet<String>,
    pub email: Option<String>,
    pub source_service: Option<String>,
}

impl Principal {
    pub fn has_role(&self, role: &str) -> bool {
        self.roles.contains(role)
    }

    pub fn is_admin(&self) -> bool {
        self.has_role("admin")
    }
}

/// Everything the pipeline knows about one request
#[derive(Debug, Clone)]
pub struct RequestContext {
    pub request_id: String,
    pub method: String,
    pub path: String,
    pub client_ip: Option<String>,
    /// Inbound headers snapshot taken at ingress
    pub headers: HeaderMap,
    pub principal: Option<Principal>,
    pub route: Option<Arc<RouteSpec>>,
    pub started_at: Instant,
}

impl RequestContext {
    pub fn new(
        method: String,
        path: String,
        headers: HeaderMap,
        client_ip: Option<String>,
        route: Option<Arc<RouteSpec>>,
    ) -> Self {
        let request_id = headers
            .get(HEADER_REQUEST_ID)
            .and_then(|v| v.to_str().ok())
            .filter(|v| !v.is_empty())
            .map(|v| v.to_string())
            .unwrap_or_else(|| Uuid::new_v4().to_string());

        Self {
            request_id,
            method,
            path,
            client_ip,
            headers,
            principal: None,
            route,
            started_at: Instant::now(),
        }
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }

    /// Tenant for this request: the principal's tenant when resolved,
    /// otherwise the raw tenant header.
    pub fn tenant_id(&self) -> Option<String> {
        self.principal
            .as_ref()
            .and_then(|p| p.tenant_id.clone())
            .or_else(|| self.header(HEADER_TENANT_ID).map(|v| v.to_string()))
    }
}

/// Fixed health paths never authenticate or rate-limit
pub fn is_health_path(path: &str) -> bool {
    path == "/health" || path == "/api/health" || path.ends_with("/health")
}

/// Extracts the client IP from proxy headers, falling back to the direct
/// connection address.
///
/// X-Forwarded-For can be spoofed by clients; in production the reverse
/// proxy must set it and strip untrusted values.
pub fn extract_client_ip(headers: &HeaderMap, direct_ip: Option<IpAddr>) -> Option<String> {
    if let Some(forwarded_for) = headers.get("x-forwarded-for").and_then(|v| v.to_str().ok()) {
        // "client, proxy1, proxy2" - the first entry is the original client
        let first_ip = forwarded_for.split(',').next().unwrap_or("").trim();
        if let Ok(ip) = first_ip.parse::<IpAddr>() {
            return Some(normalize_ip(ip));
        }
    }

    if let Some(real_ip) = headers.get("x-real-ip").and_then(|v| v.to_str().ok()) {
        if let Ok(ip) = real_ip.trim().parse::<IpAddr>() {
            return Some(normalize_ip(ip));
        }
    }

    direct_ip.map(normalize_ip)
}

fn normalize_ip(ip: IpAddr) -> String {
    ip.to_string()
        .trim_start_matches('[')
        .trim_end_matches(']')
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    #[test]
    fn request_id_echoed_when_present() {
        let mut headers = HeaderMap::new();
        headers.insert(HEADER_REQUEST_ID, HeaderValue::from_static("req-abc"));

        let ctx = RequestContext::new("GET".into(), "/api/health".into(), headers, None, None);
        assert_eq!(ctx.request_id, "req-abc");
    }

    #[test]
    fn request_id_generated_when_absent() {
        let ctx = RequestContext::new(
            "GET".into(),
            "/api/health".into(),
            HeaderMap::new(),
            None,
            None,
        );
        assert!(Uuid::parse_str(&ctx.request_id).is_ok());
    }

    #[test]
    fn health_paths() {
        assert!(is_health_path("/health"));
        assert!(is_health_path("/api/health"));
        assert!(is_health_path("/api/service-a/health"));
        assert!(!is_health_path("/api/service-a/items"));
    }

    #[test]
    fn client_ip_prefers_forwarded_for() {
        let mut headers = HeaderMap::new();
        headers.insert(
            "x-forwarded-for",
            HeaderValue::from_static("203.0.113.7, 10.0.0.1"),
        );
        headers.insert("x-real-ip", HeaderValue::from_static("10.0.0.1"));

        assert_eq!(
            extract_client_ip(&headers, None),
            Some("203.0.113.7".to_string())
        );
    }

    #[test]
    fn client_ip_falls_back_to_direct() {
        let headers = HeaderMap::new();
        let direct = "192.0.2.1".parse().ok();
        assert_eq!(extract_client_ip(&headers, direct), Some("192.0.2.1".into()));
        assert_eq!(extract_client_ip(&headers, None), None);
    }

    #[test]
    fn empty_roles_deny() {
        let principal = Principal {
            kind: PrincipalKind::ApiKey,
            id: "api-key".into(),
            tenant_id: None,
            tenant_name: None,
            roles: HashSet::new(),
            email: None,
            source_service: None,
        };
        assert!(!principal.is_admin());
        assert!(!principal.has_role("user"));
    }
}
