//! Error types for the delivery pipeline.
//!
//! The adapter boundary is typed: the error variant decides whether a
//! failed send walks the retry ladder or is dropped on the first attempt.

use std::time::Duration;
use thiserror::Error;

/// Errors returned by a [`DeliveryProvider`](crate::provider::DeliveryProvider).
#[derive(Debug, Error)]
pub enum DeliveryError {
    /// Temporary failure (connection refused, 4xx greylisting, provider
    /// hiccup); retried with exponential backoff.
    #[error("transient delivery failure: {0}")]
    Transient(String),

    /// Unrecoverable rejection (invalid recipient, malformed message,
    /// missing template); never retried.
    #[error("permanent delivery failure: {0}")]
    Permanent(String),

    /// The provider call exceeded the configured send timeout.
    /// Treated as transient.
    #[error("delivery attempt timed out after {0:?}")]
    Timeout(Duration),
}

impl DeliveryError {
    /// Create a transient delivery error.
    pub fn transient(message: impl Into<String>) -> Self {
        Self::Transient(message.into())
    }

    /// Create a permanent delivery error.
    pub fn permanent(message: impl Into<String>) -> Self {
        Self::Permanent(message.into())
    }

    /// Whether this failure is worth another attempt.
    pub fn is_retryable(&self) -> bool {
        !matches!(self, Self::Permanent(_))
    }
}

/// Errors surfaced by the preference and history stores.
///
/// Callers in the delivery path never propagate these: the preference gate
/// and the history ledger both fail open on store trouble.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(String),
}

impl From<sea_orm::DbErr> for StoreError {
    fn from(err: sea_orm::DbErr) -> Self {
        Self::Database(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryability() {
        assert!(DeliveryError::transient("connection reset").is_retryable());
        assert!(DeliveryError::Timeout(Duration::from_secs(30)).is_retryable());
        assert!(!DeliveryError::permanent("mailbox does not exist").is_retryable());
    }

    #[test]
    fn test_display() {
        let err = DeliveryError::transient("451 try again later");
        assert!(err.to_string().contains("451 try again later"));

        let err = StoreError::Database("connection pool exhausted".to_string());
        assert!(err.to_string().contains("connection pool exhausted"));
    }
}
