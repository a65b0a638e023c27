//! SMTP delivery provider using lettre.
//!
//! Rendering happens upstream of the pipeline; jobs arriving here carry
//! the finished content in their params (`to_email`, `subject`,
//! `body_text`, optionally `body_html`).

use super::{DeliveryProvider, SendResult};
use crate::error::DeliveryError;
use crate::job::Job;
use async_trait::async_trait;
use lettre::{
    message::{header::ContentType, Mailbox, MultiPart, SinglePart},
    transport::smtp::authentication::Credentials,
    AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor,
};
use std::sync::Arc;

/// SMTP provider configuration
#[derive(Clone)]
pub struct SmtpConfig {
    pub host: String,
    pub port: u16,
    pub username: String,
    pub password: String,
    pub from_email: String,
    pub from_name: String,
    pub use_tls: bool,
}

/// SMTP delivery provider
pub struct SmtpProvider {
    transport: AsyncSmtpTransport<Tokio1Executor>,
    config: Arc<SmtpConfig>,
}

impl SmtpProvider {
    /// Create a new SMTP provider
    pub fn new(config: SmtpConfig) -> Result<Self, DeliveryError> {
        let transport = if config.use_tls {
            let creds = Credentials::new(config.username.clone(), config.password.clone());
            AsyncSmtpTransport::<Tokio1Executor>::relay(&config.host)
                .map_err(|e| DeliveryError::permanent(format!("failed to create SMTP relay: {e}")))?
                .credentials(creds)
                .port(config.port)
                .build()
        } else if !config.username.is_empty() {
            let creds = Credentials::new(config.username.clone(), config.password.clone());
            AsyncSmtpTransport::<Tokio1Executor>::builder_dangerous(&config.host)
                .credentials(creds)
                .port(config.port)
                .build()
        } else {
            // No auth (for Mailpit/Mailhog)
            AsyncSmtpTransport::<Tokio1Executor>::builder_dangerous(&config.host)
                .port(config.port)
                .build()
        };

        Ok(Self {
            transport,
            config: Arc::new(config),
        })
    }

    /// Create a provider for Mailhog/Mailpit (local development)
    ///
    /// Connects to localhost:1025 without authentication.
    pub fn mailpit() -> Result<Self, DeliveryError> {
        let host = std::env::var("SMTP_HOST").unwrap_or_else(|_| "localhost".to_string());
        let port: u16 = std::env::var("SMTP_PORT")
            .unwrap_or_else(|_| "1025".to_string())
            .parse()
            .unwrap_or(1025);

        let config = SmtpConfig {
            host,
            port,
            username: String::new(),
            password: String::new(),
            from_email: std::env::var("EMAIL_FROM_ADDRESS")
                .unwrap_or_else(|_| "noreply@localhost".to_string()),
            from_name: std::env::var("EMAIL_FROM_NAME")
                .unwrap_or_else(|_| "Development".to_string()),
            use_tls: false,
        };

        Self::new(config)
    }

    /// Create a provider from environment variables
    pub fn from_env() -> Result<Self, DeliveryError> {
        let config = SmtpConfig {
            host: std::env::var("SMTP_HOST")
                .map_err(|_| DeliveryError::permanent("SMTP_HOST not set"))?,
            port: std::env::var("SMTP_PORT")
                .unwrap_or_else(|_| "587".to_string())
                .parse()
                .map_err(|_| DeliveryError::permanent("invalid SMTP_PORT"))?,
            username: std::env::var("SMTP_USERNAME").unwrap_or_default(),
            password: std::env::var("SMTP_PASSWORD").unwrap_or_default(),
            from_email: std::env::var("EMAIL_FROM_ADDRESS")
                .map_err(|_| DeliveryError::permanent("EMAIL_FROM_ADDRESS not set"))?,
            from_name: std::env::var("EMAIL_FROM_NAME")
                .unwrap_or_else(|_| "Notifications".to_string()),
            use_tls: std::env::var("SMTP_USE_TLS")
                .map(|v| v == "true" || v == "1")
                .unwrap_or(true),
        };

        Self::new(config)
    }

    fn param<'a>(job: &'a Job, key: &str) -> Option<&'a str> {
        job.params.get(key).and_then(|value| value.as_str())
    }

    fn build_message(&self, job: &Job) -> Result<Message, DeliveryError> {
        let to_email = job
            .recipient()
            .ok_or_else(|| DeliveryError::permanent("job has no to_email param"))?;
        let to: Mailbox = to_email
            .parse()
            .map_err(|_| DeliveryError::permanent(format!("invalid recipient address: {to_email}")))?;

        let from: Mailbox = format!("{} <{}>", self.config.from_name, self.config.from_email)
            .parse()
            .map_err(|_| DeliveryError::permanent("invalid from address"))?;

        let subject = Self::param(job, "subject")
            .ok_or_else(|| DeliveryError::permanent("job has no subject param"))?;

        let builder = Message::builder().from(from).to(to).subject(subject);

        let body_text = Self::param(job, "body_text");
        let body_html = Self::param(job, "body_html");

        let message = match (body_text, body_html) {
            (Some(text), Some(html)) => builder
                .multipart(
                    MultiPart::alternative()
                        .singlepart(
                            SinglePart::builder()
                                .header(ContentType::TEXT_PLAIN)
                                .body(text.to_string()),
                        )
                        .singlepart(
                            SinglePart::builder()
                                .header(ContentType::TEXT_HTML)
                                .body(html.to_string()),
                        ),
                )
                .map_err(|e| DeliveryError::permanent(format!("failed to build message: {e}")))?,
            (Some(text), None) => builder
                .header(ContentType::TEXT_PLAIN)
                .body(text.to_string())
                .map_err(|e| DeliveryError::permanent(format!("failed to build message: {e}")))?,
            (None, Some(html)) => builder
                .header(ContentType::TEXT_HTML)
                .body(html.to_string())
                .map_err(|e| DeliveryError::permanent(format!("failed to build message: {e}")))?,
            (None, None) => {
                return Err(DeliveryError::permanent(
                    "job has neither body_text nor body_html param",
                ));
            }
        };

        Ok(message)
    }
}

#[async_trait]
impl DeliveryProvider for SmtpProvider {
    async fn send(&self, job: &Job) -> Result<SendResult, DeliveryError> {
        let message = self.build_message(job)?;

        let response = self.transport.send(message).await.map_err(|e| {
            // 5xx rejections will not succeed on a retry
            if e.is_permanent() {
                DeliveryError::permanent(e.to_string())
            } else {
                DeliveryError::transient(e.to_string())
            }
        })?;

        let message_id = response
            .message()
            .next()
            .map(|s| s.to_string())
            .unwrap_or_else(|| job.id.to_string());

        Ok(SendResult { message_id })
    }

    async fn health_check(&self) -> Result<(), DeliveryError> {
        self.transport
            .test_connection()
            .await
            .map_err(|e| DeliveryError::transient(format!("SMTP health check failed: {e}")))?;
        Ok(())
    }

    fn name(&self) -> &'static str {
        "smtp"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::job::{EnqueueRequest, NotificationType};
    use serde_json::json;

    fn provider() -> SmtpProvider {
        SmtpProvider::new(SmtpConfig {
            host: "localhost".to_string(),
            port: 1025,
            username: String::new(),
            password: String::new(),
            from_email: "noreply@example.com".to_string(),
            from_name: "Library".to_string(),
            use_tls: false,
        })
        .unwrap()
    }

    #[test]
    fn test_build_message() {
        let job = Job::from_request(EnqueueRequest::new(
            NotificationType::Verification,
            json!({
                "to_email": "user@example.com",
                "subject": "Verify your email",
                "body_text": "Click the link to verify.",
            }),
        ));
        assert!(provider().build_message(&job).is_ok());
    }

    #[test]
    fn test_build_message_rejects_incomplete_jobs() {
        let no_recipient = Job::from_request(EnqueueRequest::new(
            NotificationType::Verification,
            json!({"subject": "s", "body_text": "b"}),
        ));
        let err = provider().build_message(&no_recipient).unwrap_err();
        assert!(!err.is_retryable());

        let no_body = Job::from_request(EnqueueRequest::new(
            NotificationType::Verification,
            json!({"to_email": "user@example.com", "subject": "s"}),
        ));
        let err = provider().build_message(&no_body).unwrap_err();
        assert!(!err.is_retryable());

        let bad_address = Job::from_request(EnqueueRequest::new(
            NotificationType::Verification,
            json!({"to_email": "not an address", "subject": "s", "body_text": "b"}),
        ));
        let err = provider().build_message(&bad_address).unwrap_err();
        assert!(!err.is_retryable());
    }
}
