//! Error handling for the catalog query service.
//!
//! This module provides:
//! - A single error type carrying a machine-readable [`ErrorCode`]
//! - HTTP status code mapping for API responses
//! - Retry classification used by the backend executor
//! - Severity-aware logging and an error counter metric
//!
//! Errors are cheap to clone so that every caller coalesced onto one backend
//! computation observes the same failure.
//!
//! # Usage
//!
//! ```rust,ignore
//! use catalog_core::error::{CatalogError, ErrorContext, Result};
//!
//! fn parse_page(raw: &str) -> Result<u32> {
//!     raw.parse::<u32>().with_error_code(ErrorCode::InvalidFormat)
//! }
//! ```

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use metrics::counter;
use serde::{Deserialize, Serialize};
use std::borrow::Cow;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{error, warn};

// ═══════════════════════════════════════════════════════════════════════════════
// Result Type Alias
// ═══════════════════════════════════════════════════════════════════════════════

/// A specialized Result type for catalog operations.
pub type Result<T> = std::result::Result<T, CatalogError>;

// ═══════════════════════════════════════════════════════════════════════════════
// Error Codes
// ═══════════════════════════════════════════════════════════════════════════════

/// Machine-readable error codes for API responses.
///
/// These codes are stable and can be used by clients for programmatic error handling.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    // Validation Errors (1000-1099)
    ValidationError,
    InvalidInput,
    InvalidFormat,
    InvalidRange,

    // Backend Errors (2000-2099)
    TransientBackendError,
    BackendUnavailable,
    BackendRejected,

    // Timeout Errors (2100-2199)
    Timeout,

    // Capacity Errors (2200-2299)
    CapacityExceeded,

    // Serialization Errors (2300-2399)
    SerializationError,

    // Configuration Errors (5000-5099)
    ConfigurationError,
    InvalidConfiguration,

    // Internal Errors (9000-9099)
    InternalError,
    UnknownError,
}

impl ErrorCode {
    /// Get the numeric code for this error.
    pub const fn numeric_code(&self) -> u32 {
        match self {
            Self::ValidationError => 1000,
            Self::InvalidInput => 1001,
            Self::InvalidFormat => 1002,
            Self::InvalidRange => 1003,

            Self::TransientBackendError => 2000,
            Self::BackendUnavailable => 2001,
            Self::BackendRejected => 2002,

            Self::Timeout => 2100,

            Self::CapacityExceeded => 2200,

            Self::SerializationError => 2300,

            Self::ConfigurationError => 5000,
            Self::InvalidConfiguration => 5001,

            Self::InternalError => 9000,
            Self::UnknownError => 9099,
        }
    }

    /// Get the HTTP status code for this error.
    pub const fn http_status(&self) -> StatusCode {
        match self {
            // Unprocessable Entity (422)
            Self::ValidationError
            | Self::InvalidInput
            | Self::InvalidFormat
            | Self::InvalidRange => StatusCode::UNPROCESSABLE_ENTITY,

            // Gateway Timeout (504)
            Self::Timeout => StatusCode::GATEWAY_TIMEOUT,

            // Service Unavailable (503)
            Self::BackendUnavailable | Self::CapacityExceeded => StatusCode::SERVICE_UNAVAILABLE,

            // Bad Gateway (502)
            Self::TransientBackendError | Self::BackendRejected => StatusCode::BAD_GATEWAY,

            // Internal Server Error (500)
            Self::SerializationError
            | Self::ConfigurationError
            | Self::InvalidConfiguration
            | Self::InternalError
            | Self::UnknownError => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Check if this error is retryable by the backend executor.
    ///
    /// Timeouts are deliberately excluded: the deadline covers the whole retry loop.
    pub const fn is_retryable(&self) -> bool {
        matches!(self, Self::TransientBackendError | Self::BackendUnavailable)
    }

    /// Get the error category for grouping.
    pub const fn category(&self) -> &'static str {
        match self.numeric_code() {
            1000..=1099 => "validation",
            2000..=2099 => "backend",
            2100..=2199 => "timeout",
            2200..=2299 => "capacity",
            2300..=2399 => "serialization",
            5000..=5099 => "configuration",
            9000..=9099 => "internal",
            _ => "unknown",
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self)
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Error Severity
// ═══════════════════════════════════════════════════════════════════════════════

/// Severity level for errors (affects logging).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ErrorSeverity {
    /// User errors (bad query parameters)
    Low,
    /// Operational issues (timeouts, transient backend failures)
    Medium,
    /// System errors (misconfiguration, rejected backend calls)
    High,
    /// Critical errors requiring immediate attention
    Critical,
}

impl ErrorSeverity {
    /// Get severity based on error code.
    pub const fn from_code(code: &ErrorCode) -> Self {
        match code {
            ErrorCode::ValidationError
            | ErrorCode::InvalidInput
            | ErrorCode::InvalidFormat
            | ErrorCode::InvalidRange => Self::Low,

            ErrorCode::TransientBackendError
            | ErrorCode::BackendUnavailable
            | ErrorCode::Timeout
            | ErrorCode::CapacityExceeded => Self::Medium,

            ErrorCode::BackendRejected
            | ErrorCode::SerializationError
            | ErrorCode::ConfigurationError
            | ErrorCode::InvalidConfiguration => Self::High,

            ErrorCode::InternalError | ErrorCode::UnknownError => Self::Critical,
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Error Details
// ═══════════════════════════════════════════════════════════════════════════════

/// Additional structured details about an error.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ErrorDetails {
    /// Additional context key-value pairs
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub context: HashMap<String, serde_json::Value>,

    /// Offending query parameter, for validation errors
    #[serde(skip_serializing_if = "Option::is_none")]
    pub field: Option<String>,

    /// Backend involved, for backend errors
    #[serde(skip_serializing_if = "Option::is_none")]
    pub backend: Option<String>,

    /// Retry information
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retry_after_secs: Option<u64>,
}

impl ErrorDetails {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_field(mut self, field: impl Into<String>) -> Self {
        self.field = Some(field.into());
        self
    }

    pub fn with_backend(mut self, backend: impl Into<String>) -> Self {
        self.backend = Some(backend.into());
        self
    }

    pub fn with_context(mut self, key: impl Into<String>, value: impl Serialize) -> Self {
        if let Ok(v) = serde_json::to_value(value) {
            self.context.insert(key.into(), v);
        }
        self
    }

    pub fn with_retry_after(mut self, seconds: u64) -> Self {
        self.retry_after_secs = Some(seconds);
        self
    }

    fn is_empty(&self) -> bool {
        self.context.is_empty()
            && self.field.is_none()
            && self.backend.is_none()
            && self.retry_after_secs.is_none()
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Main Error Type
// ═══════════════════════════════════════════════════════════════════════════════

/// The main error type for the catalog service.
#[derive(Error, Debug, Clone)]
#[error("[{code}] {user_message}")]
pub struct CatalogError {
    /// Machine-readable error code
    code: ErrorCode,

    /// User-friendly error message (safe to expose to clients)
    user_message: Cow<'static, str>,

    /// Detailed internal message (for logging only)
    internal_message: Option<String>,

    /// Additional structured details
    details: ErrorDetails,

    /// The source error that caused this error
    #[source]
    source: Option<Arc<dyn std::error::Error + Send + Sync + 'static>>,
}

impl CatalogError {
    // ─────────────────────────────────────────────────────────────────────────
    // Constructors
    // ─────────────────────────────────────────────────────────────────────────

    /// Create a new error with code and user message.
    pub fn new(code: ErrorCode, user_message: impl Into<Cow<'static, str>>) -> Self {
        let error = Self {
            code,
            user_message: user_message.into(),
            internal_message: None,
            details: ErrorDetails::default(),
            source: None,
        };
        error.record_metrics();
        error
    }

    /// Create an error with both user and internal messages.
    pub fn with_internal(
        code: ErrorCode,
        user_message: impl Into<Cow<'static, str>>,
        internal_message: impl Into<String>,
    ) -> Self {
        let mut error = Self::new(code, user_message);
        error.internal_message = Some(internal_message.into());
        error
    }

    /// Create an internal error (500).
    pub fn internal(message: impl Into<String>) -> Self {
        Self::with_internal(ErrorCode::InternalError, "An internal error occurred", message)
    }

    /// Create a validation error.
    pub fn validation(message: impl Into<Cow<'static, str>>) -> Self {
        Self::new(ErrorCode::ValidationError, message)
    }

    /// Create a validation error pinned to one query parameter.
    pub fn invalid_field(
        code: ErrorCode,
        field: impl Into<String>,
        message: impl Into<Cow<'static, str>>,
    ) -> Self {
        Self::new(code, message).with_details(ErrorDetails::new().with_field(field))
    }

    /// Create a retryable backend error.
    pub fn transient_backend(backend: impl Into<String>, message: impl Into<String>) -> Self {
        let backend = backend.into();
        Self::with_internal(
            ErrorCode::TransientBackendError,
            "The catalog backend failed to answer",
            message,
        )
        .with_details(ErrorDetails::new().with_backend(backend))
    }

    /// Create a non-retryable backend error (the backend rejected the request).
    pub fn backend_rejected(backend: impl Into<String>, message: impl Into<String>) -> Self {
        let backend = backend.into();
        Self::with_internal(
            ErrorCode::BackendRejected,
            "The catalog backend rejected the request",
            message,
        )
        .with_details(ErrorDetails::new().with_backend(backend))
    }

    /// Create an error for a backend whose circuit is open.
    pub fn backend_unavailable(backend: impl Into<String>, retry_after: Duration) -> Self {
        let backend = backend.into();
        Self::new(
            ErrorCode::BackendUnavailable,
            format!("Backend {} is temporarily unavailable", backend),
        )
        .with_details(
            ErrorDetails::new()
                .with_backend(backend)
                .with_retry_after(retry_after.as_secs().max(1)),
        )
    }

    /// Create a timeout error.
    pub fn timeout(operation: impl Into<String>, limit: Duration) -> Self {
        let operation = operation.into();
        Self::new(
            ErrorCode::Timeout,
            format!("{} timed out after {}ms", operation, limit.as_millis()),
        )
        .with_context("timeout_ms", limit.as_millis() as u64)
    }

    /// Create a capacity error.
    pub fn capacity(resource: impl Into<String>, limit: usize) -> Self {
        let resource = resource.into();
        Self::new(
            ErrorCode::CapacityExceeded,
            format!("{} is at capacity ({})", resource, limit),
        )
        .with_context("limit", limit)
    }

    /// Create a configuration error.
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::with_internal(
            ErrorCode::InvalidConfiguration,
            "Invalid configuration",
            message,
        )
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Builder Methods
    // ─────────────────────────────────────────────────────────────────────────

    /// Add a source error.
    pub fn with_source<E>(mut self, source: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        self.source = Some(Arc::new(source));
        self
    }

    /// Add error details.
    pub fn with_details(mut self, details: ErrorDetails) -> Self {
        self.details = details;
        self
    }

    /// Add internal message.
    pub fn with_internal_message(mut self, message: impl Into<String>) -> Self {
        self.internal_message = Some(message.into());
        self
    }

    /// Add context to details.
    pub fn with_context(mut self, key: impl Into<String>, value: impl Serialize) -> Self {
        if let Ok(v) = serde_json::to_value(value) {
            self.details.context.insert(key.into(), v);
        }
        self
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Accessors
    // ─────────────────────────────────────────────────────────────────────────

    pub fn code(&self) -> ErrorCode {
        self.code
    }

    pub fn user_message(&self) -> &str {
        &self.user_message
    }

    pub fn internal_message(&self) -> Option<&str> {
        self.internal_message.as_deref()
    }

    pub fn details(&self) -> &ErrorDetails {
        &self.details
    }

    pub fn http_status(&self) -> StatusCode {
        self.code.http_status()
    }

    pub fn is_retryable(&self) -> bool {
        self.code.is_retryable()
    }

    pub fn is_timeout(&self) -> bool {
        self.code == ErrorCode::Timeout
    }

    pub fn severity(&self) -> ErrorSeverity {
        ErrorSeverity::from_code(&self.code)
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Logging
    // ─────────────────────────────────────────────────────────────────────────

    /// Log this error with appropriate severity.
    pub fn log(&self) {
        let code = self.code.to_string();
        let category = self.code.category();
        let status = self.http_status().as_u16();

        match self.severity() {
            ErrorSeverity::Critical => {
                error!(
                    error_code = %code,
                    category = category,
                    http_status = status,
                    user_message = %self.user_message,
                    internal_message = ?self.internal_message,
                    details = ?self.details,
                    source = ?self.source,
                    "CRITICAL ERROR"
                );
            }
            ErrorSeverity::High => {
                error!(
                    error_code = %code,
                    category = category,
                    http_status = status,
                    user_message = %self.user_message,
                    internal_message = ?self.internal_message,
                    "High severity error"
                );
            }
            ErrorSeverity::Medium => {
                warn!(
                    error_code = %code,
                    category = category,
                    http_status = status,
                    user_message = %self.user_message,
                    internal_message = ?self.internal_message,
                    "Medium severity error"
                );
            }
            ErrorSeverity::Low => {
                tracing::debug!(
                    error_code = %code,
                    category = category,
                    http_status = status,
                    user_message = %self.user_message,
                    "Low severity error"
                );
            }
        }
    }

    fn record_metrics(&self) {
        counter!(
            "catalog_errors_total",
            "code" => self.code.to_string(),
            "category" => self.code.category().to_string(),
            "severity" => format!("{:?}", self.severity()),
            "retryable" => self.is_retryable().to_string(),
        )
        .increment(1);
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// API Response
// ═══════════════════════════════════════════════════════════════════════════════

/// Error response for API clients.
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    /// Whether the request was successful (always false for errors)
    pub success: bool,

    /// Error information
    pub error: ErrorInfo,
}

/// Detailed error information, embedded both in [`ErrorResponse`] and in
/// degraded catalog responses.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorInfo {
    /// Machine-readable error code
    pub code: ErrorCode,

    /// Numeric error code
    pub numeric_code: u32,

    /// User-friendly error message
    pub message: String,

    /// Additional details
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<ErrorDetails>,

    /// Timestamp
    pub timestamp: chrono::DateTime<chrono::Utc>,
}

impl From<&CatalogError> for ErrorInfo {
    fn from(error: &CatalogError) -> Self {
        Self {
            code: error.code,
            numeric_code: error.code.numeric_code(),
            message: error.user_message.to_string(),
            details: if error.details.is_empty() {
                None
            } else {
                Some(error.details.clone())
            },
            timestamp: chrono::Utc::now(),
        }
    }
}

impl From<&CatalogError> for ErrorResponse {
    fn from(error: &CatalogError) -> Self {
        Self {
            success: false,
            error: ErrorInfo::from(error),
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Axum Integration
// ═══════════════════════════════════════════════════════════════════════════════

impl IntoResponse for CatalogError {
    fn into_response(self) -> Response {
        self.log();

        let status = self.http_status();
        let response = ErrorResponse::from(&self);

        (status, Json(response)).into_response()
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Error Context Extension Trait
// ═══════════════════════════════════════════════════════════════════════════════

/// Extension trait for adding context to errors.
pub trait ErrorContext<T> {
    /// Add context to an error.
    fn context(self, message: impl Into<String>) -> Result<T>;

    /// Add context with error code.
    fn with_error_code(self, code: ErrorCode) -> Result<T>;
}

impl<T, E> ErrorContext<T> for std::result::Result<T, E>
where
    E: std::error::Error + Send + Sync + 'static,
{
    fn context(self, message: impl Into<String>) -> Result<T> {
        self.map_err(|e| CatalogError::internal(message.into()).with_source(e))
    }

    fn with_error_code(self, code: ErrorCode) -> Result<T> {
        self.map_err(|e| CatalogError::new(code, e.to_string()).with_source(e))
    }
}

impl<T> ErrorContext<T> for Option<T> {
    fn context(self, message: impl Into<String>) -> Result<T> {
        self.ok_or_else(|| CatalogError::internal(message.into()))
    }

    fn with_error_code(self, code: ErrorCode) -> Result<T> {
        self.ok_or_else(|| CatalogError::new(code, "Missing value"))
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// From Implementations for Common Error Types
// ═══════════════════════════════════════════════════════════════════════════════

impl From<tokio::time::error::Elapsed> for CatalogError {
    fn from(error: tokio::time::error::Elapsed) -> Self {
        Self::new(ErrorCode::Timeout, "Operation timed out").with_source(error)
    }
}

impl From<serde_json::Error> for CatalogError {
    fn from(error: serde_json::Error) -> Self {
        Self::with_internal(
            ErrorCode::SerializationError,
            "Failed to process data",
            error.to_string(),
        )
        .with_source(error)
    }
}

impl From<config::ConfigError> for CatalogError {
    fn from(error: config::ConfigError) -> Self {
        Self::with_internal(
            ErrorCode::ConfigurationError,
            "Configuration error",
            error.to_string(),
        )
        .with_source(error)
    }
}

impl From<anyhow::Error> for CatalogError {
    fn from(error: anyhow::Error) -> Self {
        Self::internal(format!("{:#}", error))
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Tests
// ═══════════════════════════════════════════════════════════════════════════════
