//! High-level facade for queueing common notifications.
//!
//! Route handlers and admin tooling talk to this service rather than
//! assembling params by hand; each helper builds the payload the
//! corresponding template expects and enqueues it.

use crate::dispatcher::Dispatcher;
use crate::history::{HistoryLedger, DEFAULT_DEDUP_WINDOW_HOURS};
use crate::job::{EnqueueRequest, NotificationType};
use crate::models::{DedupFilter, EmailCategory};
use crate::preferences::{ConsentDecision, PreferenceGate};
use serde_json::json;
use std::sync::Arc;
use tracing::info;
use uuid::Uuid;

/// Configuration for the notification service.
#[derive(Debug, Clone)]
pub struct NotificationServiceConfig {
    /// Base URL for the frontend application.
    pub frontend_url: String,
    /// Email verification token expiry in hours.
    pub verification_expiry_hours: i64,
    /// Password reset token expiry in hours.
    pub password_reset_expiry_hours: i64,
    /// Product name used in subjects and footers.
    pub product_name: String,
}

impl Default for NotificationServiceConfig {
    fn default() -> Self {
        Self {
            frontend_url: std::env::var("FRONTEND_URL")
                .unwrap_or_else(|_| "http://localhost:3000".to_string()),
            verification_expiry_hours: std::env::var("EMAIL_VERIFICATION_EXPIRY_HOURS")
                .unwrap_or_else(|_| "24".to_string())
                .parse()
                .unwrap_or(24),
            password_reset_expiry_hours: std::env::var("PASSWORD_RESET_EXPIRY_HOURS")
                .unwrap_or_else(|_| "1".to_string())
                .parse()
                .unwrap_or(1),
            product_name: std::env::var("PRODUCT_NAME").unwrap_or_else(|_| "Library".to_string()),
        }
    }
}

/// Service for queueing email notifications.
#[derive(Clone)]
pub struct NotificationService {
    dispatcher: Arc<Dispatcher>,
    gate: PreferenceGate,
    ledger: HistoryLedger,
    config: NotificationServiceConfig,
}

impl NotificationService {
    pub fn new(
        dispatcher: Arc<Dispatcher>,
        gate: PreferenceGate,
        ledger: HistoryLedger,
        config: NotificationServiceConfig,
    ) -> Self {
        Self {
            dispatcher,
            gate,
            ledger,
            config,
        }
    }

    /// Queue any notification as-is.
    pub async fn enqueue(&self, request: EnqueueRequest) -> Uuid {
        self.dispatcher.enqueue(request).await
    }

    /// Consent check, for admin tooling that wants to know before
    /// triggering a notification manually.
    pub async fn can_deliver(
        &self,
        target_user_id: Option<i64>,
        category: EmailCategory,
    ) -> ConsentDecision {
        self.gate.can_deliver(target_user_id, category).await
    }

    /// Dedup pre-check with the default 24h window.
    pub async fn was_recently_sent(
        &self,
        notification_type: &NotificationType,
        recipient: &str,
        target_user_id: Option<i64>,
        template_signature: Option<&str>,
    ) -> bool {
        self.ledger
            .was_recently_sent(
                DedupFilter {
                    email_type: notification_type.as_str().to_string(),
                    recipient_email: recipient.to_string(),
                    target_user_id,
                    template_signature: template_signature.map(str::to_string),
                },
                DEFAULT_DEDUP_WINDOW_HOURS,
            )
            .await
    }

    /// Queue an email verification message.
    pub async fn queue_verification_email(
        &self,
        user_id: i64,
        email: &str,
        name: &str,
        token: &str,
    ) -> Uuid {
        let verification_url = format!(
            "{}/auth/verify-email?token={}",
            self.config.frontend_url, token
        );
        let params = json!({
            "to_email": email,
            "preferred_name": name,
            "verification_url": verification_url,
            "expires_in_hours": self.config.verification_expiry_hours,
        });
        let request = EnqueueRequest::new(NotificationType::Verification, params)
            .for_user(user_id)
            .with_context("email verification");
        self.dispatcher.enqueue(request).await
    }

    /// Resend flow for repeated "resend verification" clicks: skips the
    /// enqueue when an equivalent email already went out within the
    /// dedup window.
    pub async fn resend_verification_email(
        &self,
        user_id: i64,
        email: &str,
        name: &str,
        token: &str,
    ) -> Option<Uuid> {
        if self
            .was_recently_sent(&NotificationType::Verification, email, Some(user_id), None)
            .await
        {
            info!(
                user_id,
                email, "Skipping verification resend; an equivalent email was sent recently"
            );
            return None;
        }
        Some(
            self.queue_verification_email(user_id, email, name, token)
                .await,
        )
    }

    /// Queue a password reset message.
    pub async fn queue_password_reset_email(
        &self,
        user_id: i64,
        email: &str,
        name: &str,
        token: &str,
    ) -> Uuid {
        let reset_url = format!(
            "{}/auth/reset-password?token={}",
            self.config.frontend_url, token
        );
        let params = json!({
            "to_email": email,
            "preferred_name": name,
            "reset_url": reset_url,
            "expires_in_hours": self.config.password_reset_expiry_hours,
        });
        let request = EnqueueRequest::new(NotificationType::PasswordReset, params)
            .for_user(user_id)
            .with_context("password reset request");
        self.dispatcher.enqueue(request).await
    }

    /// Queue a welcome message for a new account.
    pub async fn queue_welcome_email(&self, user_id: i64, email: &str, name: &str) -> Uuid {
        let params = json!({
            "to_email": email,
            "preferred_name": name,
            "product_name": self.config.product_name,
            "dashboard_url": format!("{}/dashboard", self.config.frontend_url),
        });
        let request = EnqueueRequest::new(NotificationType::Welcome, params)
            .for_user(user_id)
            .with_context("account created");
        self.dispatcher.enqueue(request).await
    }

    /// Queue a development features announcement. The subject doubles as
    /// the template signature so a re-run of the same announcement dedups
    /// against recipients who already received it.
    pub async fn queue_dev_features_announcement(
        &self,
        user_id: i64,
        email: &str,
        name: &str,
        subject: &str,
        markdown_body: &str,
    ) -> Uuid {
        let params = json!({
            "to_email": email,
            "preferred_name": name,
            "subject": subject,
            "markdown_body": markdown_body,
        });
        let request = EnqueueRequest::new(NotificationType::DevFeaturesAnnouncement, params)
            .for_user(user_id)
            .with_context("dev features announcement")
            .with_template_signature(format!("dev_features:{subject}"));
        self.dispatcher.enqueue(request).await
    }

    /// Queue an account-deletion notice to the support team. No target
    /// user: the recipient is a team inbox, not an account.
    pub async fn queue_account_deletion_admin_notice(
        &self,
        support_email: &str,
        deleted_user_email: &str,
        deleted_user_name: &str,
    ) -> Uuid {
        let params = json!({
            "to_email": support_email,
            "deleted_user_email": deleted_user_email,
            "deleted_user_name": deleted_user_name,
        });
        let request = EnqueueRequest::new(NotificationType::AccountDeleteAdminNotice, params)
            .with_context("account deletion");
        self.dispatcher.enqueue(request).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dispatcher::DispatcherConfig;
    use crate::history::InMemoryHistoryStore;
    use crate::preferences::InMemoryPreferenceStore;
    use crate::provider::MockProvider;

    fn service(provider: Arc<MockProvider>) -> (NotificationService, Arc<InMemoryHistoryStore>) {
        let history = Arc::new(InMemoryHistoryStore::new());
        let gate = PreferenceGate::new(Arc::new(InMemoryPreferenceStore::new()));
        let ledger = HistoryLedger::new(history.clone());
        let dispatcher = Arc::new(Dispatcher::new(
            provider,
            gate.clone(),
            ledger.clone(),
            DispatcherConfig::default(),
        ));
        (
            NotificationService::new(
                dispatcher,
                gate,
                ledger,
                NotificationServiceConfig {
                    frontend_url: "https://library.example.com".to_string(),
                    verification_expiry_hours: 24,
                    password_reset_expiry_hours: 1,
                    product_name: "Library".to_string(),
                },
            ),
            history,
        )
    }

    #[tokio::test]
    async fn test_verification_params() {
        let provider = Arc::new(MockProvider::new());
        let (service, _) = service(provider.clone());

        service
            .queue_verification_email(42, "user@example.com", "Avery", "tok-123")
            .await;

        // Drain the single job
        while provider.sent_count().await == 0 {
            tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        }
        let sent = provider.sent_jobs().await;
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].recipient(), Some("user@example.com"));
        assert_eq!(sent[0].target_user_id, Some(42));
        let url = sent[0].params["verification_url"].as_str().unwrap();
        assert!(url.contains("token=tok-123"));
        assert!(url.starts_with("https://library.example.com"));
    }

    #[tokio::test]
    async fn test_resend_skips_within_window() {
        let provider = Arc::new(MockProvider::new());
        let (service, _) = service(provider.clone());

        let first = service
            .resend_verification_email(42, "user@example.com", "Avery", "tok-1")
            .await;
        assert!(first.is_some());

        // The queued record alone is enough to dedup a second click
        let second = service
            .resend_verification_email(42, "user@example.com", "Avery", "tok-2")
            .await;
        assert!(second.is_none());
    }

    #[test]
    fn test_default_config_values() {
        let config = NotificationServiceConfig::default();
        assert_eq!(config.verification_expiry_hours, 24);
        assert_eq!(config.password_reset_expiry_hours, 1);
    }
}
