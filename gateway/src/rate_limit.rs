// ============================================================================
// Rate Limiter - fixed-window counters in the shared KV
// ============================================================================
//
// One window per (identity, method, resource, windowIndex) where
// windowIndex = floor(now / ttl). Each request atomically increments the
// counter; expiry is applied only on the first increment of a window. The
// only cross-request synchronization is the KV's atomic INCR.
//
// KV failures are fail-open: the limiter reports not-limited with the full
// budget remaining and logs the failure. A narrow abuse window is preferred
// over an availability loss.
//
// ============================================================================

use portico_config::{ThrottleConfig, ThrottleRule};
use portico_kv::KvStore;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use crate::context::Principal;

/// Outcome of one limit check
#[derive(Debug, Clone, Copy)]
pub struct RateLimitDecision {
    pub limited: bool,
    pub limit: u32,
    pub remaining: u32,
    pub reset_epoch_secs: u64,
    pub current: i64,
}

pub struct RateLimiter {
    kv: Arc<dyn KvStore>,
    config: ThrottleConfig,
}

impl RateLimiter {
    pub fn new(kv: Arc<dyn KvStore>, config: ThrottleConfig) -> Self {
        Self { kv, config }
    }

    pub fn config(&self) -> &ThrottleConfig {
        &self.config
    }

    /// Check and count one request for the caller identity
    pub async fn check(&self, identity: &str, method: &str, resource: &str) -> RateLimitDecision {
        let rule = self.config.resolve(method, resource);
        let key_prefix = format!("throttle:{}:{}:{}", identity, method, resource);
        self.check_window(&key_prefix, rule).await
    }

    /// Tenant-scoped check for resource-intensive operations, when enabled
    pub async fn check_tenant(
        &self,
        tenant_id: &str,
        method: &str,
        resource: &str,
    ) -> Option<RateLimitDecision> {
        if !self.config.is_tenant_limited(method, resource) || tenant_id.is_empty() {
            return None;
        }
        let rule = self.config.tenant_rule;
        let key_prefix = format!("throttle:tenant:{}:{}:{}", tenant_id, method, resource);
        Some(self.check_window(&key_prefix, rule).await)
    }

    async fn check_window(&self, key_prefix: &str, rule: ThrottleRule) -> RateLimitDecision {
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or(0);
        let ttl = rule.ttl_secs.max(1);
        let window_index = now / ttl;
        let reset_epoch_secs = (window_index + 1) * ttl;
        let key = format!("{}:{}", key_prefix, window_index);

        match self.kv.incr(&key, ttl).await {
            Ok(current) => {
                let limited = current > rule.limit as i64;
                let remaining = (rule.limit as i64 - current).max(0) as u32;
                RateLimitDecision {
                    limited,
                    limit: rule.limit,
                    remaining,
                    reset_epoch_secs,
                    current,
                }
            }
            Err(e) => {
                // Fail open: availability over strict enforcement
                tracing::warn!(error = %e, key = %key, "rate limit check failed, allowing request");
                RateLimitDecision {
                    limited: false,
                    limit: rule.limit,
                    remaining: rule.limit,
                    reset_epoch_secs,
                    current: 0,
                }
            }
        }
    }
}

/// Derive the caller identity string for rate limiting.
///
/// API-key callers are bucketed by key plus the client address (or resolved
/// user), everyone else by principal id, then client address, then the
/// shared anonymous bucket.
pub fn derive_identity(
    api_key: Option<&str>,
    principal: Option<&Principal>,
    client_ip: Option<&str>,
) -> String {
    let raw = if let Some(key) = api_key {
        let suffix = client_ip
            .map(str::to_string)
            .or_else(|| principal.map(|p| p.id.clone()))
            .unwrap_or_else(|| "anonymous".to_string());
        format!("api-key:{}:{}", key, suffix)
    } else if let Some(principal) = principal {
        principal.id.clone()
    } else if let Some(ip) = client_ip {
        ip.to_string()
    } else {
        "anonymous".to_string()
    };

    normalize_identity(&raw)
}

/// Collapse `:` runs, strip leading/trailing `:`, and drop the `ffff`
/// token that IPv4-mapped IPv6 addresses insert.
fn normalize_identity(raw: &str) -> String {
    raw.split(':')
        .filter(|token| !token.is_empty() && !token.eq_ignore_ascii_case("ffff"))
        .collect::<Vec<_>>()
        .join(":")
}
