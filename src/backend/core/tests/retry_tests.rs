//! Integration tests for the retrying executor.
//!
//! Tests cover:
//! - Exponential backoff between attempts
//! - Attempt counts for transient, permanent and exhausted failures
//! - The per-call deadline
//! - Circuit breaking per backend

use catalog_core::backend::BackendKind;
use catalog_core::error::{CatalogError, ErrorCode, Result};
use catalog_core::orchestrator::{retry, CircuitState, ExecutorConfig, RetryingExecutor};
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;
use tokio::time::Instant;

fn executor(max_retries: u32) -> RetryingExecutor {
    RetryingExecutor::new(ExecutorConfig {
        max_retries,
        base_delay: Duration::from_millis(100),
        call_timeout: Duration::from_secs(10),
        circuit_breaker_threshold: 3,
        circuit_recovery: Duration::from_secs(30),
    })
}

fn transient() -> CatalogError {
    CatalogError::transient_backend("search_index", "connection reset")
}

// ============================================================================
// Retries
// ============================================================================

#[tokio::test(start_paused = true)]
async fn test_two_failures_then_success() {
    let attempts = AtomicU32::new(0);
    let started = Instant::now();

    let result = executor(2)
        .execute(BackendKind::SearchIndex, "search", || async {
            if attempts.fetch_add(1, Ordering::SeqCst) < 2 {
                Err(transient())
            } else {
                Ok(42)
            }
        })
        .await;

    assert_eq!(result.unwrap(), 42);
    assert_eq!(attempts.load(Ordering::SeqCst), 3);
    // 100ms + 200ms of backoff
    assert!(started.elapsed() >= Duration::from_millis(300));
}

#[tokio::test(start_paused = true)]
async fn test_always_failing_makes_exactly_three_attempts() {
    let attempts = AtomicU32::new(0);

    let result: Result<()> = executor(2)
        .execute(BackendKind::PrimaryStore, "query", || async {
            attempts.fetch_add(1, Ordering::SeqCst);
            Err(transient())
        })
        .await;

    assert_eq!(result.unwrap_err().code(), ErrorCode::TransientBackendError);
    assert_eq!(attempts.load(Ordering::SeqCst), 3);
}

#[tokio::test(start_paused = true)]
async fn test_permanent_errors_are_not_retried() {
    let attempts = AtomicU32::new(0);

    let result: Result<()> = executor(5)
        .execute(BackendKind::SearchIndex, "search", || async {
            attempts.fetch_add(1, Ordering::SeqCst);
            Err(CatalogError::backend_rejected("search_index", "bad filter syntax"))
        })
        .await;

    assert_eq!(result.unwrap_err().code(), ErrorCode::BackendRejected);
    assert_eq!(attempts.load(Ordering::SeqCst), 1);
}

#[tokio::test(start_paused = true)]
async fn test_run_backoff_doubles() {
    let attempts = AtomicU32::new(0);
    let started = Instant::now();

    let _: Result<()> = retry::run(
        || async {
            attempts.fetch_add(1, Ordering::SeqCst);
            Err(transient())
        },
        3,
        Duration::from_millis(50),
    )
    .await;

    assert_eq!(attempts.load(Ordering::SeqCst), 4);
    // 50 + 100 + 200
    assert!(started.elapsed() >= Duration::from_millis(350));
    assert!(started.elapsed() < Duration::from_millis(400));
}

// ============================================================================
// Deadline
// ============================================================================

#[tokio::test(start_paused = true)]
async fn test_call_timeout_covers_retries() {
    let executor = RetryingExecutor::new(ExecutorConfig {
        call_timeout: Duration::from_millis(500),
        ..ExecutorConfig::default()
    });

    let result: Result<()> = executor
        .execute(BackendKind::SearchIndex, "search", || async {
            tokio::time::sleep(Duration::from_secs(2)).await;
            Ok(())
        })
        .await;

    let err = result.unwrap_err();
    assert!(err.is_timeout());
    assert!(!err.is_retryable());
}

// ============================================================================
// Circuit Breaking
// ============================================================================

#[tokio::test(start_paused = true)]
async fn test_circuit_opens_after_consecutive_failures() {
    let executor = executor(0);
    let attempts = AtomicU32::new(0);

    for _ in 0..3 {
        let _: Result<()> = executor
            .execute(BackendKind::SearchIndex, "search", || async {
                attempts.fetch_add(1, Ordering::SeqCst);
                Err(transient())
            })
            .await;
    }
    assert_eq!(
        executor.breaker(BackendKind::SearchIndex).state(),
        CircuitState::Open
    );

    let result: Result<()> = executor
        .execute(BackendKind::SearchIndex, "search", || async {
            attempts.fetch_add(1, Ordering::SeqCst);
            Ok(())
        })
        .await;
    assert_eq!(result.unwrap_err().code(), ErrorCode::BackendUnavailable);
    assert_eq!(attempts.load(Ordering::SeqCst), 3);

    // The other backend is unaffected.
    assert_eq!(
        executor.breaker(BackendKind::PrimaryStore).state(),
        CircuitState::Closed
    );
}

#[tokio::test(start_paused = true)]
async fn test_rejections_do_not_trip_the_breaker() {
    let executor = executor(0);

    for _ in 0..5 {
        let _: Result<()> = executor
            .execute(BackendKind::PrimaryStore, "query", || async {
                Err(CatalogError::backend_rejected("primary_store", "bad token"))
            })
            .await;
    }

    assert_eq!(
        executor.breaker(BackendKind::PrimaryStore).state(),
        CircuitState::Closed
    );
}
