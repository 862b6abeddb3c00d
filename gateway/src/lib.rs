// ============================================================================
// Portico Gateway - multi-tenant API gateway
// ============================================================================
//
// Fronts three backend services with authentication, authorization,
// per-identity rate limiting, per-upstream circuit breaking, response
// caching and a uniform response envelope. All wiring is explicit: `AppState`
// is built once at startup and handed to the router.
//
// ============================================================================

pub mod auth;
pub mod authz;
pub mod breaker;
pub mod cache;
pub mod context;
pub mod dispatch;
pub mod exception;
pub mod pipeline;
pub mod rate_limit;
pub mod routes;
pub mod uploads;

use anyhow::{Context, Result};
use portico_config::Config;
use portico_kv::KvStore;
use std::sync::Arc;

use crate::auth::{Authenticator, TokenValidator};
use crate::authz::PolicyTable;
use crate::breaker::BreakerRegistry;
use crate::cache::ResponseCache;
use crate::dispatch::Dispatcher;
use crate::rate_limit::RateLimiter;
use crate::routes::table::{route_table, RouteTable};
use crate::uploads::SpoolManager;

/// Shared per-process state, built once at startup
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub routes: Arc<RouteTable>,
    pub authenticator: Arc<Authenticator>,
    pub policy: Arc<PolicyTable>,
    pub limiter: Arc<RateLimiter>,
    pub dispatcher: Arc<Dispatcher>,
    pub uploads: Arc<SpoolManager>,
}

impl AppState {
    /// Explicit constructor wiring: every collaborator is built here and
    /// handed into the pipeline.
    pub fn new(
        config: Arc<Config>,
        kv: Arc<dyn KvStore>,
        validator: Arc<dyn TokenValidator>,
        http_client: reqwest::Client,
    ) -> Result<Self> {
        let breakers = BreakerRegistry::new(
            &config.upstreams.names(),
            config.upstreams.circuit_breaker,
        );
        let cache = ResponseCache::new(kv.clone(), config.cache.clone());
        let dispatcher = Dispatcher::new(
            http_client,
            config.upstreams.clone(),
            breakers,
            cache,
        );

        let authenticator = Authenticator::new(
            config.static_api_tokens.clone(),
            config.internal_services.clone(),
            validator,
        );

        let limiter = RateLimiter::new(kv, config.throttle.clone());
        let uploads = SpoolManager::new(&config.uploads);

        Ok(Self {
            routes: Arc::new(route_table()),
            authenticator: Arc::new(authenticator),
            policy: Arc::new(PolicyTable::default_policies()),
            limiter: Arc::new(limiter),
            dispatcher: Arc::new(dispatcher),
            uploads: Arc::new(uploads),
            config,
        })
    }

    /// Shared outbound HTTP client: pooled connections, no global timeout
    /// (each call site sets its own).
    pub fn build_http_client() -> Result<reqwest::Client> {
        reqwest::Client::builder()
            .build()
            .context("Failed to create HTTP client")
    }
}
