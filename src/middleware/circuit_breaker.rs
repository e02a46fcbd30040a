use parking_lot::Mutex;
use serde::Serialize;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{info, warn};

/// Circuit state as seen by callers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CircuitState {
    /// Calls go through
    Closed,
    /// Remote engine considered down, calls fail fast
    Open,
    /// Cool-down elapsed, probing calls allowed
    HalfOpen,
}

#[derive(Debug, Clone)]
pub struct CircuitBreakerConfig {
    /// Consecutive failures that open the circuit
    pub failure_threshold: u32,
    /// Time spent open before probing again
    pub cooldown: Duration,
    /// Consecutive probe successes needed to close again
    pub success_threshold: u32,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            cooldown: Duration::from_secs(60),
            success_threshold: 2,
        }
    }
}

#[derive(Debug)]
enum Phase {
    Closed { failures: u32 },
    Open { since: Instant },
    HalfOpen { successes: u32 },
}

#[derive(Debug, Default)]
struct Counters {
    successes: u64,
    failures: u64,
    rejected: u64,
}

/// Fail-fast guard around one remote engine (detection or translation).
///
/// Shared by clones; each remote service gets its own named breaker so a
/// translation outage never blocks detection and vice versa.
#[derive(Clone)]
pub struct CircuitBreaker {
    name: &'static str,
    config: CircuitBreakerConfig,
    inner: Arc<Mutex<(Phase, Counters)>>,
}

impl CircuitBreaker {
    pub fn new(name: &'static str) -> Self {
        Self::with_config(name, CircuitBreakerConfig::default())
    }

    pub fn with_config(name: &'static str, config: CircuitBreakerConfig) -> Self {
        Self {
            name,
            config,
            inner: Arc::new(Mutex::new((Phase::Closed { failures: 0 }, Counters::default()))),
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Whether a call may proceed now. Moves Open to HalfOpen once the cooldown has passed.
    pub fn allow_request(&self) -> bool {
        let mut guard = self.inner.lock();
        let (phase, counters) = &mut *guard;
        match phase {
            Phase::Closed { .. } | Phase::HalfOpen { .. } => true,
            Phase::Open { since } if since.elapsed() >= self.config.cooldown => {
                info!("Circuit '{}' half-open, probing remote service", self.name);
                *phase = Phase::HalfOpen { successes: 0 };
                true
            }
            Phase::Open { .. } => {
                counters.rejected += 1;
                false
            }
        }
    }

    pub fn record_success(&self) {
        let mut guard = self.inner.lock();
        let (phase, counters) = &mut *guard;
        counters.successes += 1;
        match phase {
            Phase::Closed { failures } => *failures = 0,
            Phase::HalfOpen { successes } => {
                *successes += 1;
                if *successes >= self.config.success_threshold {
                    info!("Circuit '{}' closed, remote service recovered", self.name);
                    *phase = Phase::Closed { failures: 0 };
                }
            }
            // A call admitted before the circuit opened finished late
            Phase::Open { .. } => {}
        }
    }

    pub fn record_failure(&self) {
        let mut guard = self.inner.lock();
        let (phase, counters) = &mut *guard;
        counters.failures += 1;
        match phase {
            Phase::Closed { failures } => {
                *failures += 1;
                if *failures >= self.config.failure_threshold {
                    warn!(
                        "Circuit '{}' opened after {} consecutive failures",
                        self.name, failures
                    );
                    *phase = Phase::Open {
                        since: Instant::now(),
                    };
                }
            }
            Phase::HalfOpen { .. } => {
                warn!("Circuit '{}' probe failed, reopening", self.name);
                *phase = Phase::Open {
                    since: Instant::now(),
                };
            }
            Phase::Open { since } => *since = Instant::now(),
        }
    }

    pub fn state(&self) -> CircuitState {
        match self.inner.lock().0 {
            Phase::Closed { .. } => CircuitState::Closed,
            Phase::Open { .. } => CircuitState::Open,
            Phase::HalfOpen { .. } => CircuitState::HalfOpen,
        }
    }

    pub fn stats(&self) -> CircuitBreakerStats {
        let guard = self.inner.lock();
        let (phase, counters) = &*guard;
        CircuitBreakerStats {
            name: self.name,
            state: match phase {
                Phase::Closed { .. } => CircuitState::Closed,
                Phase::Open { .. } => CircuitState::Open,
                Phase::HalfOpen { .. } => CircuitState::HalfOpen,
            },
            total_successes: counters.successes,
            total_failures: counters.failures,
            rejected: counters.rejected,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct CircuitBreakerStats {
    pub name: &'static str,
    pub state: CircuitState,
    pub total_successes: u64,
    pub total_failures: u64,
    pub rejected: u64,
}
