//! Upstream service endpoints and circuit-breaker tuning.

use crate::env_parse;

const DEFAULT_UPSTREAM_TIMEOUT_SECS: u64 = 30;
const DEFAULT_FAILURE_THRESHOLD: u32 = 3;
const DEFAULT_RESET_TIMEOUT_SECS: u64 = 30;
const DEFAULT_HALF_OPEN_ATTEMPTS: u32 = 2;

/// Circuit breaker tuning shared by all upstream breakers
#[derive(Clone, Copy, Debug)]
pub struct CircuitBreakerConfig {
    /// Consecutive failures before the circuit opens
    pub failure_threshold: u32,
    /// Seconds an open circuit rejects before admitting a probe
    pub reset_timeout_secs: u64,
    /// Consecutive half-open successes required to close
    pub half_open_attempts: u32,
}

impl CircuitBreakerConfig {
    pub(crate) fn from_env() -> Self {
        Self {
            failure_threshold: env_parse(
                "CIRCUIT_BREAKER_FAILURE_THRESHOLD",
                DEFAULT_FAILURE_THRESHOLD,
            )
            .max(1),
            reset_timeout_secs: env_parse(
                "CIRCUIT_BREAKER_RESET_TIMEOUT_SECS",
                DEFAULT_RESET_TIMEOUT_SECS,
            ),
            half_open_attempts: env_parse(
                "CIRCUIT_BREAKER_HALF_OPEN_ATTEMPTS",
                DEFAULT_HALF_OPEN_ATTEMPTS,
            )
            .max(1),
        }
    }
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: DEFAULT_FAILURE_THRESHOLD,
            reset_timeout_secs: DEFAULT_RESET_TIMEOUT_SECS,
            half_open_attempts: DEFAULT_HALF_OPEN_ATTEMPTS,
        }
    }
}

/// One backend service the gateway fronts
#[derive(Clone, Debug)]
pub struct UpstreamConfig {
    /// Stable upstream name (`service-a`, `service-b`, `service-c`)
    pub name: String,
    pub base_url: String,
    /// Outbound API key presented to the upstream
    pub api_key: String,
}

/// All configured upstreams plus shared dispatch tuning
#[derive(Clone, Debug)]
pub struct UpstreamsConfig {
    pub service_a: UpstreamConfig,
    pub service_b: UpstreamConfig,
    pub service_c: UpstreamConfig,
    pub timeout_secs: u64,
    pub circuit_breaker: CircuitBreakerConfig,
}

impl UpstreamsConfig {
    pub(crate) fn from_env() -> Self {
        Self {
            service_a: upstream_from_env("service-a", "SERVICE_A", 3002),
            service_b: upstream_from_env("service-b", "SERVICE_B", 3003),
            service_c: upstream_from_env("service-c", "SERVICE_C", 3004),
            timeout_secs: env_parse("UPSTREAM_TIMEOUT_SECS", DEFAULT_UPSTREAM_TIMEOUT_SECS),
            circuit_breaker: CircuitBreakerConfig::from_env(),
        }
    }

    pub fn get(&self, name: &str) -> Option<&UpstreamConfig> {
        match name {
            "service-a" => Some(&self.service_a),
            "service-b" => Some(&self.service_b),
            "service-c" => Some(&self.service_c),
            _ => None,
        }
    }

    pub fn names(&self) -> [&str; 3] {
        ["service-a", "service-b", "service-c"]
    }
}

fn upstream_from_env(name: &str, prefix: &str, default_port: u16) -> UpstreamConfig {
    UpstreamConfig {
        name: name.to_string(),
        base_url: std::env::var(format!("{}_URL", prefix))
            .unwrap_or_else(|_| format!("http://localhost:{}", default_port)),
        api_key: std::env::var(format!("{}_API_KEY", prefix)).unwrap_or_default(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lookup_by_name() {
        let cfg = UpstreamsConfig {
            service_a: UpstreamConfig {
                name: "service-a".into(),
                base_url: "http://a".into(),
                api_key: "ka".into(),
            },
            service_b: UpstreamConfig {
                name: "service-b".into(),
                base_url: "http://b".into(),
                api_key: "kb".into(),
            },
            service_c: UpstreamConfig {
                name: "service-c".into(),
                base_url: "http://c".into(),
                api_key: "kc".into(),
            },
            timeout_secs: 30,
            circuit_breaker: CircuitBreakerConfig::default(),
        };

        assert_eq!(cfg.get("service-b").unwrap().base_url, "http://b");
        assert!(cfg.get("service-x").is_none());
    }
}
