//! Retry, timeout and circuit breaking around backend calls.

use metrics::{counter, histogram};
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, warn};

use super::circuit_breaker::{CircuitBreaker, CircuitBreakerMetrics};
use crate::backend::BackendKind;
use crate::error::{CatalogError, ErrorCode, Result};

/// Backend executor configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutorConfig {
    /// Retries after the first attempt
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    /// Delay before the first retry; doubles for each following one
    #[serde(with = "humantime_serde", default = "default_base_delay")]
    pub base_delay: Duration,

    /// Deadline for one backend call, retries included
    #[serde(with = "humantime_serde", default = "default_call_timeout")]
    pub call_timeout: Duration,

    /// Consecutive failed calls that open a backend's circuit
    #[serde(default = "default_circuit_breaker_threshold")]
    pub circuit_breaker_threshold: u32,

    #[serde(with = "humantime_serde", default = "default_circuit_recovery")]
    pub circuit_recovery: Duration,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            base_delay: default_base_delay(),
            call_timeout: default_call_timeout(),
            circuit_breaker_threshold: default_circuit_breaker_threshold(),
            circuit_recovery: default_circuit_recovery(),
        }
    }
}

fn default_max_retries() -> u32 {
    2
}

fn default_base_delay() -> Duration {
    Duration::from_millis(100)
}

fn default_call_timeout() -> Duration {
    Duration::from_secs(3)
}

fn default_circuit_breaker_threshold() -> u32 {
    5
}

fn default_circuit_recovery() -> Duration {
    Duration::from_secs(30)
}

// ═══════════════════════════════════════════════════════════════════════════════
// Primitives
// ═══════════════════════════════════════════════════════════════════════════════

/// Delay before retry `retry` (1-based): `base * 2^(retry - 1)`.
pub fn backoff_delay(base: Duration, retry: u32) -> Duration {
    let exponent = retry.saturating_sub(1).min(31);
    base.saturating_mul(1u32 << exponent)
}

/// Run `op` until it succeeds, fails with a non-retryable error, or has been
/// retried `max_retries` times. An `Ok` is never retried, whatever it contains.
pub async fn run<T, F, Fut>(mut op: F, max_retries: u32, base_delay: Duration) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let mut retries = 0;
    loop {
        match op().await {
            Ok(value) => return Ok(value),
            Err(e) if e.is_retryable() && retries < max_retries => {
                retries += 1;
                let delay = backoff_delay(base_delay, retries);
                debug!(
                    retry = retries,
                    max_retries = max_retries,
                    delay_ms = delay.as_millis() as u64,
                    error = %e,
                    "Retrying backend call"
                );
                counter!("catalog_backend_retries_total").increment(1);
                tokio::time::sleep(delay).await;
            }
            Err(e) => return Err(e),
        }
    }
}

/// Race `fut` against a timer. On expiry the future is dropped and a timeout
/// error naming `operation` is returned.
pub async fn with_timeout<T, Fut>(fut: Fut, limit: Duration, operation: &str) -> Result<T>
where
    Fut: Future<Output = Result<T>>,
{
    match tokio::time::timeout(limit, fut).await {
        Ok(result) => result,
        Err(_) => Err(CatalogError::timeout(operation, limit)),
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Executor
// ═══════════════════════════════════════════════════════════════════════════════

/// Executes backend calls behind a circuit breaker, with retries and a deadline.
pub struct RetryingExecutor {
    config: ExecutorConfig,
    primary: CircuitBreaker,
    search: CircuitBreaker,
}

impl RetryingExecutor {
    pub fn new(config: ExecutorConfig) -> Self {
        let breaker = |backend| {
            CircuitBreaker::new(backend, config.circuit_breaker_threshold)
                .with_recovery_timeout(config.circuit_recovery)
        };
        Self {
            primary: breaker(BackendKind::PrimaryStore),
            search: breaker(BackendKind::SearchIndex),
            config,
        }
    }

    pub fn config(&self) -> &ExecutorConfig {
        &self.config
    }

    pub fn breaker(&self, backend: BackendKind) -> &CircuitBreaker {
        match backend {
            BackendKind::PrimaryStore => &self.primary,
            BackendKind::SearchIndex => &self.search,
        }
    }

    /// Execute one logical backend call.
    pub async fn execute<T, F, Fut>(&self, backend: BackendKind, operation: &str, op: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let breaker = self.breaker(backend);
        if !breaker.can_execute() {
            counter!(
                "catalog_backend_calls_total",
                "backend" => backend.as_str(),
                "outcome" => "circuit_open",
            )
            .increment(1);
            return Err(CatalogError::backend_unavailable(
                backend.as_str(),
                breaker.retry_after(),
            ));
        }

        let started = Instant::now();
        let label = format!("{} {}", backend, operation);
        let result = with_timeout(
            run(op, self.config.max_retries, self.config.base_delay),
            self.config.call_timeout,
            &label,
        )
        .await;

        histogram!(
            "catalog_backend_call_duration_seconds",
            "backend" => backend.as_str(),
            "operation" => operation.to_string(),
        )
        .record(started.elapsed().as_secs_f64());

        let outcome = match &result {
            Ok(_) => {
                breaker.record_success();
                "success"
            }
            Err(e) => {
                if trips_breaker(e) {
                    breaker.record_failure();
                }
                warn!(
                    backend = %backend,
                    operation = operation,
                    error_code = %e.code(),
                    error = %e,
                    "Backend call failed"
                );
                if e.is_timeout() {
                    "timeout"
                } else {
                    "error"
                }
            }
        };
        counter!(
            "catalog_backend_calls_total",
            "backend" => backend.as_str(),
            "outcome" => outcome,
        )
        .increment(1);

        result
    }

    pub fn breaker_metrics(&self) -> Vec<CircuitBreakerMetrics> {
        vec![self.primary.metrics(), self.search.metrics()]
    }
}

/// Failures that say something about backend health.
fn trips_breaker(error: &CatalogError) -> bool {
    error.is_retryable() || error.code() == ErrorCode::Timeout
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backoff_doubles() {
        let base = Duration::from_millis(100);
        assert_eq!(backoff_delay(base, 1), Duration::from_millis(100));
        assert_eq!(backoff_delay(base, 2), Duration::from_millis(200));
        assert_eq!(backoff_delay(base, 4), Duration::from_millis(800));
    }

    #[tokio::test(start_paused = true)]
    async fn test_with_timeout_names_operation() {
        let err = with_timeout(
            async {
                tokio::time::sleep(Duration::from_secs(5)).await;
                Ok(())
            },
            Duration::from_millis(250),
            "search_index search",
        )
        .await
        .unwrap_err();

        assert_eq!(err.code(), ErrorCode::Timeout);
        assert!(err.user_message().contains("search_index search"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_empty_success_is_not_retried() {
        let mut calls = 0;
        let result: Result<Vec<u32>> = run(
            || {
                calls += 1;
                async { Ok(Vec::new()) }
            },
            3,
            Duration::from_millis(10),
        )
        .await;

        assert!(result.unwrap().is_empty());
        assert_eq!(calls, 1);
    }
}
