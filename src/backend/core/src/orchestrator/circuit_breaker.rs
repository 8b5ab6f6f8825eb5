//! Per-backend circuit breaker.
//!
//! Stops calling a backend after too many consecutive failed executions and
//! fails fast until a recovery window has passed. One probe is then let through
//! (half-open); its outcome closes or re-opens the circuit.

use metrics::gauge;
use parking_lot::RwLock;
use serde::Serialize;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::time::Duration;
use tokio::time::Instant;

use crate::backend::BackendKind;

/// Circuit breaker states.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CircuitState {
    /// Calls flow normally
    Closed,
    /// Calls fail fast
    Open,
    /// A probe call is allowed through
    HalfOpen,
}

impl CircuitState {
    fn gauge_value(&self) -> f64 {
        match self {
            Self::Closed => 0.0,
            Self::HalfOpen => 1.0,
            Self::Open => 2.0,
        }
    }
}

/// Circuit breaker guarding one backend.
pub struct CircuitBreaker {
    backend: BackendKind,

    state: RwLock<CircuitState>,

    /// Consecutive failed executions
    failure_count: AtomicU32,

    /// Failures that trip the breaker
    failure_threshold: u32,

    opened_at: RwLock<Option<Instant>>,

    /// How long the circuit stays open before a probe
    recovery_timeout: Duration,

    total_successes: AtomicU64,
    total_failures: AtomicU64,
    total_rejections: AtomicU64,
}

impl CircuitBreaker {
    pub fn new(backend: BackendKind, failure_threshold: u32) -> Self {
        Self {
            backend,
            state: RwLock::new(CircuitState::Closed),
            failure_count: AtomicU32::new(0),
            failure_threshold: failure_threshold.max(1),
            opened_at: RwLock::new(None),
            recovery_timeout: Duration::from_secs(30),
            total_successes: AtomicU64::new(0),
            total_failures: AtomicU64::new(0),
            total_rejections: AtomicU64::new(0),
        }
    }

    pub fn with_recovery_timeout(mut self, timeout: Duration) -> Self {
        self.recovery_timeout = timeout;
        self
    }

    /// Check if a call may proceed. Open circuits past their recovery window
    /// move to half-open.
    pub fn can_execute(&self) -> bool {
        match self.state() {
            CircuitState::Closed | CircuitState::HalfOpen => true,
            CircuitState::Open => {
                let opened_at = *self.opened_at.read();
                let recovered = opened_at
                    .map(|at| at.elapsed() >= self.recovery_timeout)
                    .unwrap_or(true);
                if recovered {
                    self.transition(CircuitState::HalfOpen);
                    tracing::info!(backend = %self.backend, "Circuit breaker half-open, probing backend");
                    return true;
                }
                self.total_rejections.fetch_add(1, Ordering::Relaxed);
                false
            }
        }
    }

    /// Time left before an open circuit allows a probe.
    pub fn retry_after(&self) -> Duration {
        let opened_at = *self.opened_at.read();
        opened_at
            .map(|at| self.recovery_timeout.saturating_sub(at.elapsed()))
            .unwrap_or_default()
    }

    pub fn record_success(&self) {
        self.total_successes.fetch_add(1, Ordering::Relaxed);
        self.failure_count.store(0, Ordering::Relaxed);

        if self.state() == CircuitState::HalfOpen {
            *self.opened_at.write() = None;
            self.transition(CircuitState::Closed);
            tracing::info!(backend = %self.backend, "Circuit breaker closed after successful probe");
        }
    }

    pub fn record_failure(&self) {
        self.total_failures.fetch_add(1, Ordering::Relaxed);

        match self.state() {
            CircuitState::HalfOpen => {
                *self.opened_at.write() = Some(Instant::now());
                self.transition(CircuitState::Open);
                tracing::warn!(backend = %self.backend, "Circuit breaker re-opened after failed probe");
            }
            CircuitState::Closed => {
                let failures = self.failure_count.fetch_add(1, Ordering::Relaxed) + 1;
                if failures >= self.failure_threshold {
                    *self.opened_at.write() = Some(Instant::now());
                    self.transition(CircuitState::Open);
                    tracing::warn!(
                        backend = %self.backend,
                        failures = failures,
                        threshold = self.failure_threshold,
                        "Circuit breaker opened due to consecutive failures"
                    );
                }
            }
            CircuitState::Open => {}
        }
    }

    fn transition(&self, to: CircuitState) {
        *self.state.write() = to;
        gauge!("catalog_circuit_state", "backend" => self.backend.as_str()).set(to.gauge_value());
    }

    pub fn state(&self) -> CircuitState {
        *self.state.read()
    }

    pub fn backend(&self) -> BackendKind {
        self.backend
    }

    pub fn metrics(&self) -> CircuitBreakerMetrics {
        CircuitBreakerMetrics {
            backend: self.backend,
            state: self.state(),
            failure_count: self.failure_count.load(Ordering::Relaxed),
            failure_threshold: self.failure_threshold,
            total_successes: self.total_successes.load(Ordering::Relaxed),
            total_failures: self.total_failures.load(Ordering::Relaxed),
            total_rejections: self.total_rejections.load(Ordering::Relaxed),
        }
    }

    /// Force the circuit closed.
    pub fn reset(&self) {
        self.failure_count.store(0, Ordering::Relaxed);
        *self.opened_at.write() = None;
        self.transition(CircuitState::Closed);
        tracing::info!(backend = %self.backend, "Circuit breaker manually reset");
    }
}

/// Snapshot of a breaker's counters.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CircuitBreakerMetrics {
    pub backend: BackendKind,
    pub state: CircuitState,
    pub failure_count: u32,
    pub failure_threshold: u32,
    pub total_successes: u64,
    pub total_failures: u64,
    pub total_rejections: u64,
}
