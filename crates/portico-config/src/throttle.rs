//! Rate-limit tuning: the default window plus the static per-route rule table.

use crate::{env_bool, env_parse, split_csv};

const DEFAULT_THROTTLE_TTL_SECS: u64 = 60;
const DEFAULT_THROTTLE_LIMIT: u32 = 60;
const DEFAULT_TENANT_THROTTLE_LIMIT: u32 = 600;

/// One `(limit, window)` pair
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ThrottleRule {
    pub limit: u32,
    pub ttl_secs: u64,
}

/// Rate limiter configuration
///
/// The rule table is static per process: per-(method,resource) overrides,
/// per-method overrides, and the default rule. Tenant-scoped limiting is
/// opt-in and applies only to the configured resource-intensive operations.
#[derive(Clone, Debug)]
pub struct ThrottleConfig {
    pub default_rule: ThrottleRule,
    /// `(METHOD, resource)` overrides, e.g. `("POST", "item")`
    pub per_operation: Vec<(String, String, ThrottleRule)>,
    /// Per-method overrides, e.g. `("DELETE", ...)`
    pub per_method: Vec<(String, ThrottleRule)>,
    pub tenant_limits_enabled: bool,
    pub tenant_rule: ThrottleRule,
    /// `METHOD:resource` pairs subject to tenant-scoped limiting
    pub tenant_operations: Vec<(String, String)>,
}

impl ThrottleConfig {
    pub(crate) fn from_env() -> Self {
        let default_rule = ThrottleRule {
            limit: env_parse("THROTTLE_LIMIT", DEFAULT_THROTTLE_LIMIT),
            ttl_secs: env_parse("THROTTLE_TTL", DEFAULT_THROTTLE_TTL_SECS),
        };

        let tenant_rule = ThrottleRule {
            limit: env_parse("TENANT_THROTTLE_LIMIT", DEFAULT_TENANT_THROTTLE_LIMIT),
            ttl_secs: default_rule.ttl_secs,
        };

        let tenant_operations = split_csv(
            &std::env::var("TENANT_RATE_LIMIT_OPERATIONS")
                .unwrap_or_else(|_| "POST:item,POST:report,POST:file".to_string()),
        )
        .into_iter()
        .filter_map(|pair| {
            let (method, resource) = pair.split_once(':')?;
            Some((method.to_uppercase(), resource.to_string()))
        })
        .collect();

        Self {
            default_rule,
            per_operation: Vec::new(),
            per_method: Vec::new(),
            tenant_limits_enabled: env_bool("ENABLE_TENANT_RATE_LIMITS"),
            tenant_rule,
            tenant_operations,
        }
    }

    /// Resolve the rule for `(method, resource)`:
    /// operation override, then method override, then the default.
    pub fn resolve(&self, method: &str, resource: &str) -> ThrottleRule {
        if let Some((_, _, rule)) = self
            .per_operation
            .iter()
            .find(|(m, r, _)| m == method && r == resource)
        {
            return *rule;
        }
        if let Some((_, rule)) = self.per_method.iter().find(|(m, _)| m == method) {
            return *rule;
        }
        self.default_rule
    }

    /// Whether `(method, resource)` is subject to the tenant-scoped rule
    pub fn is_tenant_limited(&self, method: &str, resource: &str) -> bool {
        self.tenant_limits_enabled
            && self
                .tenant_operations
                .iter()
                .any(|(m, r)| m == method && r == resource)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> ThrottleConfig {
        ThrottleConfig {
            default_rule: ThrottleRule {
                limit: 60,
                ttl_secs: 60,
            },
            per_operation: vec![(
                "POST".into(),
                "item".into(),
                ThrottleRule {
                    limit: 5,
                    ttl_secs: 60,
                },
            )],
            per_method: vec![(
                "DELETE".into(),
                ThrottleRule {
                    limit: 10,
                    ttl_secs: 60,
                },
            )],
            tenant_limits_enabled: true,
            tenant_rule: ThrottleRule {
                limit: 600,
                ttl_secs: 60,
            },
            tenant_operations: vec![("POST".into(), "item".into())],
        }
    }

    #[test]
    fn resolve_prefers_operation_over_method_over_default() {
        let cfg = config();
        assert_eq!(cfg.resolve("POST", "item").limit, 5);
        assert_eq!(cfg.resolve("DELETE", "item").limit, 10);
        assert_eq!(cfg.resolve("GET", "item").limit, 60);
    }

    #[test]
    fn tenant_limiting_only_for_configured_operations() {
        let cfg = config();
        assert!(cfg.is_tenant_limited("POST", "item"));
        assert!(!cfg.is_tenant_limited("GET", "item"));

        let mut disabled = config();
        disabled.tenant_limits_enabled = false;
        assert!(!disabled.is_tenant_limited("POST", "item"));
    }
}
