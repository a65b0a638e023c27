//! Outbound delivery providers.

pub mod mock;
pub mod smtp;

pub use mock::MockProvider;
pub use smtp::{SmtpConfig, SmtpProvider};

use crate::error::DeliveryError;
use crate::job::Job;
use async_trait::async_trait;

/// Result of a successful send.
#[derive(Debug)]
pub struct SendResult {
    /// Provider-specific message ID.
    pub message_id: String,
}

/// Trait for outbound delivery providers.
///
/// The pipeline treats the provider as opaque: it turns a job's params
/// into a message and transmits it. The error variant is the only signal
/// the dispatcher interprets — it decides whether a retry is worth it.
#[async_trait]
pub trait DeliveryProvider: Send + Sync {
    /// Send the notification described by `job`.
    async fn send(&self, job: &Job) -> Result<SendResult, DeliveryError>;

    /// Check if the provider is reachable.
    async fn health_check(&self) -> Result<(), DeliveryError> {
        Ok(())
    }

    /// Provider name for logging.
    fn name(&self) -> &'static str;
}
