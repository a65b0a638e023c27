//! Mock delivery provider for testing.

use super::{DeliveryProvider, SendResult};
use crate::error::DeliveryError;
use crate::job::Job;
use async_trait::async_trait;
use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;

/// Mock delivery provider that captures sent jobs.
///
/// Failures can be scripted (always, permanently, or for the first N
/// calls), and an in-flight gauge records the peak number of concurrent
/// sends for concurrency assertions.
pub struct MockProvider {
    sent: Arc<Mutex<Vec<Job>>>,
    attempts: AtomicUsize,
    /// Remaining sends that should fail; `u32::MAX` means every send.
    fail_remaining: AtomicU32,
    permanent: bool,
    failure_message: Option<String>,
    latency: Option<Duration>,
    in_flight: AtomicUsize,
    peak_in_flight: AtomicUsize,
}

impl MockProvider {
    /// Create a provider where every send succeeds.
    pub fn new() -> Self {
        Self {
            sent: Arc::new(Mutex::new(Vec::new())),
            attempts: AtomicUsize::new(0),
            fail_remaining: AtomicU32::new(0),
            permanent: false,
            failure_message: None,
            latency: None,
            in_flight: AtomicUsize::new(0),
            peak_in_flight: AtomicUsize::new(0),
        }
    }

    /// Create a provider where every send fails transiently.
    pub fn failing(message: impl Into<String>) -> Self {
        Self {
            fail_remaining: AtomicU32::new(u32::MAX),
            failure_message: Some(message.into()),
            ..Self::new()
        }
    }

    /// Create a provider where every send fails permanently.
    pub fn failing_permanently(message: impl Into<String>) -> Self {
        Self {
            fail_remaining: AtomicU32::new(u32::MAX),
            permanent: true,
            failure_message: Some(message.into()),
            ..Self::new()
        }
    }

    /// Create a provider that fails the first `count` sends transiently,
    /// then succeeds.
    pub fn fail_times(count: u32, message: impl Into<String>) -> Self {
        Self {
            fail_remaining: AtomicU32::new(count),
            failure_message: Some(message.into()),
            ..Self::new()
        }
    }

    /// Add artificial latency to each send.
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = Some(latency);
        self
    }

    /// All successfully sent jobs.
    pub async fn sent_jobs(&self) -> Vec<Job> {
        self.sent.lock().await.clone()
    }

    /// Count of successful sends.
    pub async fn sent_count(&self) -> usize {
        self.sent.lock().await.len()
    }

    /// Count of send calls, successful or not.
    pub fn attempt_count(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }

    /// Peak number of concurrent sends observed.
    pub fn peak_in_flight(&self) -> usize {
        self.peak_in_flight.load(Ordering::SeqCst)
    }

    /// Check if a job was sent to a specific address.
    pub async fn was_sent_to(&self, email: &str) -> bool {
        self.sent
            .lock()
            .await
            .iter()
            .any(|job| job.recipient() == Some(email))
    }

    /// Clear captured jobs.
    pub async fn clear(&self) {
        self.sent.lock().await.clear();
    }
}

impl Default for MockProvider {
    fn default() -> Self {
        Self::new()
    }
}

/// Decrements the gauge even when a send future is dropped mid-flight
/// (the dispatcher's timeout cancels hung calls).
struct InFlightGuard<'a>(&'a AtomicUsize);

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

#[async_trait]
impl DeliveryProvider for MockProvider {
    async fn send(&self, job: &Job) -> Result<SendResult, DeliveryError> {
        self.attempts.fetch_add(1, Ordering::SeqCst);

        let current = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak_in_flight.fetch_max(current, Ordering::SeqCst);
        let guard = InFlightGuard(&self.in_flight);
        if let Some(latency) = self.latency {
            tokio::time::sleep(latency).await;
        }
        drop(guard);

        let remaining = self.fail_remaining.load(Ordering::SeqCst);
        if remaining > 0 {
            if remaining != u32::MAX {
                self.fail_remaining.fetch_sub(1, Ordering::SeqCst);
            }
            let message = self
                .failure_message
                .clone()
                .unwrap_or_else(|| "mock failure".to_string());
            return Err(if self.permanent {
                DeliveryError::Permanent(message)
            } else {
                DeliveryError::Transient(message)
            });
        }

        self.sent.lock().await.push(job.clone());

        Ok(SendResult {
            message_id: format!("mock-{}", job.id),
        })
    }

    async fn health_check(&self) -> Result<(), DeliveryError> {
        if self.fail_remaining.load(Ordering::SeqCst) == u32::MAX {
            return Err(DeliveryError::transient("mock health check failed"));
        }
        Ok(())
    }

    fn name(&self) -> &'static str {
        "mock"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::job::{EnqueueRequest, NotificationType};
    use serde_json::json;

    fn job(to_email: &str) -> Job {
        Job::from_request(EnqueueRequest::new(
            NotificationType::Welcome,
            json!({"to_email": to_email}),
        ))
    }

    #[tokio::test]
    async fn test_mock_captures_sent_jobs() {
        let provider = MockProvider::new();

        provider.send(&job("one@example.com")).await.unwrap();
        provider.send(&job("two@example.com")).await.unwrap();

        assert_eq!(provider.sent_count().await, 2);
        assert_eq!(provider.attempt_count(), 2);
        assert!(provider.was_sent_to("one@example.com").await);
        assert!(!provider.was_sent_to("three@example.com").await);
    }

    #[tokio::test]
    async fn test_mock_failing() {
        let provider = MockProvider::failing("relay down");

        let err = provider.send(&job("a@example.com")).await.unwrap_err();
        assert!(err.is_retryable());
        assert!(err.to_string().contains("relay down"));
        assert_eq!(provider.sent_count().await, 0);
        assert!(provider.health_check().await.is_err());
    }

    #[tokio::test]
    async fn test_mock_fail_times_then_succeeds() {
        let provider = MockProvider::fail_times(2, "flaky");
        let job = job("a@example.com");

        assert!(provider.send(&job).await.is_err());
        assert!(provider.send(&job).await.is_err());
        assert!(provider.send(&job).await.is_ok());
        assert_eq!(provider.attempt_count(), 3);
        assert_eq!(provider.sent_count().await, 1);
    }

    #[tokio::test]
    async fn test_mock_permanent_failure() {
        let provider = MockProvider::failing_permanently("mailbox gone");
        let err = provider.send(&job("a@example.com")).await.unwrap_err();
        assert!(!err.is_retryable());
    }
}
