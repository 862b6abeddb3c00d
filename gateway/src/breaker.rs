// ============================================================================
// Circuit Breaker - per-upstream failure isolation
// ============================================================================
//
// Prevents cascading failures when an upstream is slow or unavailable:
// after `failure_threshold` consecutive failures the circuit opens and
// rejects immediately; after `reset_timeout` a probe is admitted
// (half-open); `half_open_attempts` consecutive successes close it again.
//
// Only transport errors, timeouts and HTTP 5xx count as failures - an
// upstream 4xx is a well-formed answer, not ill health.
//
// State is process-local and guarded by one mutex per upstream record.
// Two concurrent probes may both observe the open->half-open transition;
// `half_open_attempts` tolerates that small burst.
//
// ============================================================================

use portico_config::CircuitBreakerConfig;
use portico_error::GatewayError;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

/// Breaker state as exposed for monitoring
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum State {
    Closed,
    Open,
    HalfOpen,
}

#[derive(Debug)]
struct CircuitState {
    state: State,
    consecutive_failures: u32,
    open_until: Option<Instant>,
    half_open_successes: u32,
    last_error: Option<String>,
}

impl CircuitState {
    fn new() -> Self {
        Self {
            state: State::Closed,
            consecutive_failures: 0,
            open_until: None,
            half_open_successes: 0,
            last_error: None,
        }
    }
}

/// One breaker per upstream name
pub struct CircuitBreaker {
    name: String,
    config: CircuitBreakerConfig,
    inner: Mutex<CircuitState>,
}

impl CircuitBreaker {
    pub fn new(name: impl Into<String>, config: CircuitBreakerConfig) -> Self {
        Self {
            name: name.into(),
            config,
            inner: Mutex::new(CircuitState::new()),
        }
    }

    fn reset_timeout(&self) -> Duration {
        Duration::from_secs(self.config.reset_timeout_secs)
    }

    /// Admission check before an upstream call. An open circuit whose
    /// reset timeout has elapsed transitions to half-open and admits the
    /// probe; otherwise it rejects immediately.
    pub fn try_acquire(&self) -> Result<(), GatewayError> {
        let mut inner = self.inner.lock().expect("breaker mutex poisoned");

        if inner.state == State::Open {
            let expired = inner
                .open_until
                .is_none_or(|until| Instant::now() >= until);
            if expired {
                inner.state = State::HalfOpen;
                inner.half_open_successes = 0;
                self.publish_state(&inner);
                tracing::info!(upstream = %self.name, "circuit breaker half-open, admitting probe");
            } else {
                tracing::warn!(upstream = %self.name, "circuit breaker open, rejecting request");
                return Err(GatewayError::service_unavailable(format!(
                    "{} is temporarily unavailable",
                    self.name
                )));
            }
        }

        Ok(())
    }

    pub fn record_success(&self) {
        let mut inner = self.inner.lock().expect("breaker mutex poisoned");

        match inner.state {
            State::HalfOpen => {
                inner.half_open_successes += 1;
                if inner.half_open_successes >= self.config.half_open_attempts {
                    inner.state = State::Closed;
                    inner.consecutive_failures = 0;
                    inner.half_open_successes = 0;
                    inner.open_until = None;
                    inner.last_error = None;
                    self.publish_state(&inner);
                    tracing::info!(upstream = %self.name, "circuit breaker closed, upstream recovered");
                }
            }
            _ => {
                inner.consecutive_failures = 0;
            }
        }
    }

    pub fn record_failure(&self, error: &str) {
        let mut inner = self.inner.lock().expect("breaker mutex poisoned");
        inner.last_error = Some(error.to_string());

        match inner.state {
            State::HalfOpen => {
                self.trip(&mut inner);
                tracing::warn!(
                    upstream = %self.name,
                    error = %error,
                    "probe failed, circuit breaker re-opened"
                );
            }
            State::Closed => {
                inner.consecutive_failures += 1;
                if inner.consecutive_failures >= self.config.failure_threshold {
                    self.trip(&mut inner);
                    tracing::error!(
                        upstream = %self.name,
                        failures = inner.consecutive_failures,
                        error = %error,
                        "failure threshold reached, circuit breaker opened"
                    );
                } else {
                    tracing::warn!(
                        upstream = %self.name,
                        failures = inner.consecutive_failures,
                        threshold = self.config.failure_threshold,
                        "upstream failure recorded"
                    );
                }
            }
            State::Open => {}
        }
    }

    fn trip(&self, inner: &mut CircuitState) {
        inner.state = State::Open;
        inner.open_until = Some(Instant::now() + self.reset_timeout());
        inner.half_open_successes = 0;
        self.publish_state(inner);
    }

    pub fn state(&self) -> State {
        self.inner.lock().expect("breaker mutex poisoned").state
    }

    pub fn last_error(&self) -> Option<String> {
        self.inner
            .lock()
            .expect("breaker mutex poisoned")
            .last_error
            .clone()
    }

    fn publish_state(&self, inner: &CircuitState) {
        let value = match inner.state {
            State::Closed => 0.0,
            State::Open => 1.0,
            State::HalfOpen => 2.0,
        };
        portico_metrics::GATEWAY_CIRCUIT_BREAKER_STATE
            .with_label_values(&[self.name.as_str()])
            .set(value);
    }
}

/// Process-scoped registry keyed by upstream name, built at startup
pub struct BreakerRegistry {
    breakers: HashMap<String, Arc<CircuitBreaker>>,
}

impl BreakerRegistry {
    pub fn new(names: &[&str], config: CircuitBreakerConfig) -> Self {
        let breakers = names
            .iter()
            .map(|name| {
                (
                    name.to_string(),
                    Arc::new(CircuitBreaker::new(*name, config)),
                )
            })
            .collect();
        Self { breakers }
    }

    pub fn get(&self, name: &str) -> Option<Arc<CircuitBreaker>> {
        self.breakers.get(name).cloned()
    }
}
