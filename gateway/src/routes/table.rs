// ============================================================================
// Route Table - static policy attached to every route
// ============================================================================
//
// One record per route, registered at startup. The pipeline matches the
// inbound method + path against this table and reads authorization,
// throttling and caching policy from the matched record. Routing is
// path-segment matching only; `{param}` segments match any single segment.
//
// ============================================================================

use axum::http::Method;
use std::sync::Arc;

/// How the matched route is served
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandlerKind {
    /// Status endpoint answered by the gateway itself
    Health,
    /// Prometheus text endpoint
    Metrics,
    /// JSON proxy to the route's upstream
    Proxy,
    /// Multipart upload forwarded to the upstream
    Upload,
    /// Streamed download from the upstream
    Download,
}

/// Cache tier for idempotent GETs
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheTier {
    /// Per-item and list reads
    Item,
    /// Reference data (categories, statistics)
    Reference,
}

/// Static policy attached to a route, read by the pipeline on every request
#[derive(Debug, Clone)]
pub struct RouteSpec {
    pub method: Method,
    /// Segment pattern, e.g. `/api/service-a/items/{id}`
    pub pattern: &'static str,
    /// Upstream name for proxied routes
    pub upstream: Option<&'static str>,
    pub resource: Option<&'static str>,
    pub action: Option<&'static str>,
    /// Required-role shortcut: any match allows without a policy lookup
    pub roles: &'static [&'static str],
    pub public: bool,
    pub skip_throttle: bool,
    pub kind: HandlerKind,
    pub cache: Option<CacheTier>,
    /// Aggregate resources whose cache entries a write invalidates
    pub invalidates: &'static [&'static str],
}

impl RouteSpec {
    fn proxy(
        method: Method,
        pattern: &'static str,
        upstream: &'static str,
        resource: &'static str,
        action: &'static str,
    ) -> Self {
        Self {
            method,
            pattern,
            upstream: Some(upstream),
            resource: Some(resource),
            action: Some(action),
            roles: &[],
            public: false,
            skip_throttle: false,
            kind: HandlerKind::Proxy,
            cache: None,
            invalidates: &[],
        }
    }

    fn cached(mut self, tier: CacheTier) -> Self {
        self.cache = Some(tier);
        self
    }

    fn invalidating(mut self, resources: &'static [&'static str]) -> Self {
        self.invalidates = resources;
        self
    }

    fn kind(mut self, kind: HandlerKind) -> Self {
        self.kind = kind;
        self
    }

    /// Extract the value of the `{id}` segment from a concrete path, if the
    /// pattern declares one.
    pub fn path_id<'p>(&self, path: &'p str) -> Option<&'p str> {
        let pattern_segments: Vec<&str> = self.pattern.split('/').collect();
        let path_segments: Vec<&str> = path.split('/').collect();
        pattern_segments
            .iter()
            .zip(path_segments.iter())
            .find(|(pat, _)| **pat == "{id}")
            .map(|(_, actual)| *actual)
    }
}

/// All routes the gateway serves, matched by method + path segments
pub struct RouteTable {
    routes: Vec<Arc<RouteSpec>>,
}

impl RouteTable {
    pub fn new(routes: Vec<RouteSpec>) -> Self {
        Self {
            routes: routes.into_iter().map(Arc::new).collect(),
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = &Arc<RouteSpec>> {
        self.routes.iter()
    }

    pub fn match_route(&self, method: &Method, path: &str) -> Option<Arc<RouteSpec>> {
        self.routes
            .iter()
            .find(|route| route.method == *method && pattern_matches(route.pattern, path))
            .cloned()
    }
}

fn pattern_matches(pattern: &str, path: &str) -> bool {
    let mut pattern_segments = pattern.split('/');
    let mut path_segments = path.split('/');

    loop {
        match (pattern_segments.next(), path_segments.next()) {
            (None, None) => return true,
            (Some(pat), Some(actual)) => {
                let is_param = pat.starts_with('{') && pat.ends_with('}');
                if !is_param && pat != actual {
                    return false;
                }
            }
            _ => return false,
        }
    }
}

/// The gateway's full route registry
pub fn route_table() -> RouteTable {
    use axum::http::Method as M;

    let status = |pattern: &'static str| RouteSpec {
        method: M::GET,
        pattern,
        upstream: None,
        resource: None,
        action: None,
        roles: &[],
        public: true,
        skip_throttle: true,
        kind: HandlerKind::Health,
        cache: None,
        invalidates: &[],
    };

    let mut routes = vec![
        status("/health"),
        status("/api/health"),
        status("/api/system-check"),
        RouteSpec {
            // Authenticated variant of the system check
            public: false,
            roles: &["admin", "user"],
            ..status("/api/system-check-key")
        },
        RouteSpec {
            kind: HandlerKind::Metrics,
            ..status("/metrics")
        },
    ];

    // service-a: items, categories, statistics
    routes.extend([
        RouteSpec::proxy(M::GET, "/api/service-a/items", "service-a", "item", "read")
            .cached(CacheTier::Item),
        RouteSpec::proxy(M::POST, "/api/service-a/items", "service-a", "item", "create")
            .invalidating(&["statistics"]),
        RouteSpec::proxy(
            M::GET,
            "/api/service-a/items/{id}",
            "service-a",
            "item",
            "read",
        )
        .cached(CacheTier::Item),
        RouteSpec::proxy(
            M::PUT,
            "/api/service-a/items/{id}",
            "service-a",
            "item",
            "update",
        )
        .invalidating(&["statistics"]),
        RouteSpec::proxy(
            M::DELETE,
            "/api/service-a/items/{id}",
            "service-a",
            "item",
            "delete",
        )
        .invalidating(&["statistics"]),
        RouteSpec::proxy(
            M::GET,
            "/api/service-a/categories",
            "service-a",
            "category",
            "read",
        )
        .cached(CacheTier::Reference),
        RouteSpec::proxy(
            M::GET,
            "/api/service-a/statistics",
            "service-a",
            "statistics",
            "read",
        )
        .cached(CacheTier::Reference),
    ]);

    // service-b: reports, notifications
    routes.extend([
        RouteSpec::proxy(M::GET, "/api/service-b/reports", "service-b", "report", "read"),
        RouteSpec::proxy(
            M::POST,
            "/api/service-b/reports",
            "service-b",
            "report",
            "create",
        ),
        RouteSpec::proxy(
            M::GET,
            "/api/service-b/reports/{id}",
            "service-b",
            "report",
            "read",
        ),
        RouteSpec::proxy(
            M::DELETE,
            "/api/service-b/reports/{id}",
            "service-b",
            "report",
            "delete",
        ),
        RouteSpec::proxy(
            M::GET,
            "/api/service-b/notifications",
            "service-b",
            "notification",
            "read",
        ),
        RouteSpec::proxy(
            M::POST,
            "/api/service-b/notifications",
            "service-b",
            "notification",
            "create",
        ),
        RouteSpec::proxy(
            M::PUT,
            "/api/service-b/notifications/{id}",
            "service-b",
            "notification",
            "update",
        ),
    ]);

    // service-c: files, folders
    routes.extend([
        RouteSpec::proxy(M::GET, "/api/service-c/files", "service-c", "file", "read"),
        RouteSpec::proxy(
            M::DELETE,
            "/api/service-c/files/{id}",
            "service-c",
            "file",
            "delete",
        ),
        RouteSpec::proxy(
            M::POST,
            "/api/service-c/files/upload",
            "service-c",
            "file",
            "create",
        )
        .kind(HandlerKind::Upload),
        RouteSpec::proxy(
            M::GET,
            "/api/service-c/files/{id}/download",
            "service-c",
            "file",
            "read",
        )
        .kind(HandlerKind::Download),
        RouteSpec::proxy(M::GET, "/api/service-c/folders", "service-c", "folder", "read"),
        RouteSpec::proxy(
            M::POST,
            "/api/service-c/folders",
            "service-c",
            "folder",
            "create",
        ),
        RouteSpec::proxy(
            M::DELETE,
            "/api/service-c/folders/{id}",
            "service-c",
            "folder",
            "delete",
        ),
    ]);

    RouteTable::new(routes)
}
