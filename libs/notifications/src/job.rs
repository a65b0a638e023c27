//! Notification job types.
//!
//! `NotificationType` is the closed set of transactional notifications the
//! system sends; its category table is the single source of truth for
//! which notifications user preferences may suppress.

use crate::models::EmailCategory;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Notification type variants.
///
/// Unknown wire names deserialize into `Custom` rather than failing, so a
/// newer caller can enqueue a type this build has no table entry for; such
/// jobs are treated as essential and fail at the provider if nothing can
/// render them.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum NotificationType {
    Verification,
    PasswordReset,
    PasswordResetSuccess,
    Welcome,
    AccountDisableVerification,
    AccountDisableConfirmation,
    AccountDeleteVerification,
    AccountDeleteAdminNotice,
    EmailChangeVerification,
    EmailChangeConfirmation,
    AdminProfileUpdate,
    AdminAccountDisabled,
    AdminAccountEnabled,
    AdminEmailUnverified,
    AdminEmailVerified,
    AdminAccountSetup,
    DevFeaturesAnnouncement,
    ApiKeyCreated,
    ApiKeyRevoked,
    ApiKeyBanApplied,
    ApiKeyBanRemoved,
    UsageRestrictionApplied,
    UsageRestrictionRemoved,
    UsageWarningUser,
    UsageWarningApiKey,
    UsageAdminAlertWebsite,
    UsageAdminAlertApi,
    ApiKeyExpiring,
    ApiKeyExpired,
    /// A type this build does not know about.
    Custom(String),
}

impl NotificationType {
    /// Wire/storage name.
    pub fn as_str(&self) -> &str {
        match self {
            Self::Verification => "verification",
            Self::PasswordReset => "password_reset",
            Self::PasswordResetSuccess => "password_reset_success",
            Self::Welcome => "welcome",
            Self::AccountDisableVerification => "account_disable_verification",
            Self::AccountDisableConfirmation => "account_disable_confirmation",
            Self::AccountDeleteVerification => "account_delete_verification",
            Self::AccountDeleteAdminNotice => "account_delete_admin_notice",
            Self::EmailChangeVerification => "email_change_verification",
            Self::EmailChangeConfirmation => "email_change_confirmation",
            Self::AdminProfileUpdate => "admin_profile_update",
            Self::AdminAccountDisabled => "admin_account_disabled",
            Self::AdminAccountEnabled => "admin_account_enabled",
            Self::AdminEmailUnverified => "admin_email_unverified",
            Self::AdminEmailVerified => "admin_email_verified",
            Self::AdminAccountSetup => "admin_account_setup",
            Self::DevFeaturesAnnouncement => "dev_features_announcement",
            Self::ApiKeyCreated => "api_key_created",
            Self::ApiKeyRevoked => "api_key_revoked",
            Self::ApiKeyBanApplied => "api_key_ban_applied",
            Self::ApiKeyBanRemoved => "api_key_ban_removed",
            Self::UsageRestrictionApplied => "usage_restriction_applied",
            Self::UsageRestrictionRemoved => "usage_restriction_removed",
            Self::UsageWarningUser => "usage_warning_user",
            Self::UsageWarningApiKey => "usage_warning_api_key",
            Self::UsageAdminAlertWebsite => "usage_admin_alert_website",
            Self::UsageAdminAlertApi => "usage_admin_alert_api",
            Self::ApiKeyExpiring => "api_key_expiring",
            Self::ApiKeyExpired => "api_key_expired",
            Self::Custom(name) => name,
        }
    }

    /// Consent category of this notification type.
    ///
    /// Total and table-driven. Unmapped and custom types resolve to
    /// essential so they can never be silently suppressed.
    pub fn category(&self) -> EmailCategory {
        match self {
            Self::Verification
            | Self::PasswordReset
            | Self::PasswordResetSuccess
            | Self::AccountDisableVerification
            | Self::AccountDisableConfirmation
            | Self::AccountDeleteVerification
            | Self::AccountDeleteAdminNotice
            | Self::EmailChangeVerification
            | Self::EmailChangeConfirmation
            | Self::AdminAccountSetup
            | Self::ApiKeyRevoked
            | Self::ApiKeyBanApplied
            | Self::ApiKeyBanRemoved
            | Self::UsageRestrictionApplied
            | Self::UsageRestrictionRemoved
            | Self::UsageAdminAlertWebsite
            | Self::UsageAdminAlertApi
            | Self::Custom(_) => EmailCategory::Essential,

            Self::Welcome
            | Self::AdminProfileUpdate
            | Self::AdminAccountDisabled
            | Self::AdminAccountEnabled
            | Self::AdminEmailUnverified
            | Self::AdminEmailVerified
            | Self::ApiKeyCreated
            | Self::ApiKeyExpiring
            | Self::ApiKeyExpired
            | Self::UsageWarningUser
            | Self::UsageWarningApiKey => EmailCategory::AccountUpdates,

            Self::DevFeaturesAnnouncement => EmailCategory::DevFeatures,
        }
    }
}

impl From<String> for NotificationType {
    fn from(value: String) -> Self {
        match value.as_str() {
            "verification" => Self::Verification,
            "password_reset" => Self::PasswordReset,
            "password_reset_success" => Self::PasswordResetSuccess,
            "welcome" => Self::Welcome,
            "account_disable_verification" => Self::AccountDisableVerification,
            "account_disable_confirmation" => Self::AccountDisableConfirmation,
            "account_delete_verification" => Self::AccountDeleteVerification,
            "account_delete_admin_notice" => Self::AccountDeleteAdminNotice,
            "email_change_verification" => Self::EmailChangeVerification,
            "email_change_confirmation" => Self::EmailChangeConfirmation,
            "admin_profile_update" => Self::AdminProfileUpdate,
            "admin_account_disabled" => Self::AdminAccountDisabled,
            "admin_account_enabled" => Self::AdminAccountEnabled,
            "admin_email_unverified" => Self::AdminEmailUnverified,
            "admin_email_verified" => Self::AdminEmailVerified,
            "admin_account_setup" => Self::AdminAccountSetup,
            "dev_features_announcement" => Self::DevFeaturesAnnouncement,
            "api_key_created" => Self::ApiKeyCreated,
            "api_key_revoked" => Self::ApiKeyRevoked,
            "api_key_ban_applied" => Self::ApiKeyBanApplied,
            "api_key_ban_removed" => Self::ApiKeyBanRemoved,
            "usage_restriction_applied" => Self::UsageRestrictionApplied,
            "usage_restriction_removed" => Self::UsageRestrictionRemoved,
            "usage_warning_user" => Self::UsageWarningUser,
            "usage_warning_api_key" => Self::UsageWarningApiKey,
            "usage_admin_alert_website" => Self::UsageAdminAlertWebsite,
            "usage_admin_alert_api" => Self::UsageAdminAlertApi,
            "api_key_expiring" => Self::ApiKeyExpiring,
            "api_key_expired" => Self::ApiKeyExpired,
            _ => Self::Custom(value),
        }
    }
}

impl From<NotificationType> for String {
    fn from(value: NotificationType) -> Self {
        value.as_str().to_string()
    }
}

impl fmt::Display for NotificationType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An enqueue request, built by callers.
#[derive(Debug, Clone)]
pub struct EnqueueRequest {
    pub notification_type: NotificationType,
    /// Opaque payload for the provider. The conventional `to_email` member
    /// is extracted as the audit recipient.
    pub params: serde_json::Value,
    /// Free-form label carried through logs; not used in logic.
    pub context: Option<String>,
    /// The recipient's account, when one exists.
    pub target_user_id: Option<i64>,
    /// Optional content fingerprint for coarser dedup.
    pub template_signature: Option<String>,
}

impl EnqueueRequest {
    pub fn new(notification_type: NotificationType, params: serde_json::Value) -> Self {
        Self {
            notification_type,
            params,
            context: None,
            target_user_id: None,
            template_signature: None,
        }
    }

    pub fn with_context(mut self, context: impl Into<String>) -> Self {
        self.context = Some(context.into());
        self
    }

    pub fn for_user(mut self, user_id: i64) -> Self {
        self.target_user_id = Some(user_id);
        self
    }

    pub fn with_template_signature(mut self, signature: impl Into<String>) -> Self {
        self.template_signature = Some(signature.into());
        self
    }
}

/// One unit of work in the dispatcher's queue.
///
/// Jobs live only in memory; after a terminal outcome only the history
/// record survives.
#[derive(Debug, Clone)]
pub struct Job {
    pub id: Uuid,
    pub notification_type: NotificationType,
    pub params: serde_json::Value,
    pub context: Option<String>,
    pub target_user_id: Option<i64>,
    pub template_signature: Option<String>,
    /// Failed delivery attempts so far.
    pub attempt: u32,
    pub enqueued_at: DateTime<Utc>,
}

impl Job {
    pub(crate) fn from_request(request: EnqueueRequest) -> Self {
        Self {
            id: Uuid::new_v4(),
            notification_type: request.notification_type,
            params: request.params,
            context: request.context,
            target_user_id: request.target_user_id,
            template_signature: request.template_signature,
            attempt: 0,
            enqueued_at: Utc::now(),
        }
    }

    /// Audit recipient, read from the conventional `to_email` param.
    pub fn recipient(&self) -> Option<&str> {
        self.params.get("to_email").and_then(|value| value.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_wire_name_round_trip() {
        let all = [
            NotificationType::Verification,
            NotificationType::PasswordReset,
            NotificationType::Welcome,
            NotificationType::AccountDeleteAdminNotice,
            NotificationType::DevFeaturesAnnouncement,
            NotificationType::UsageAdminAlertApi,
            NotificationType::ApiKeyExpired,
        ];
        for notification_type in all {
            let name = notification_type.as_str().to_string();
            assert_eq!(NotificationType::from(name), notification_type);
        }
    }

    #[test]
    fn test_unknown_type_becomes_custom() {
        let parsed = NotificationType::from("legacy_notice".to_string());
        assert_eq!(parsed, NotificationType::Custom("legacy_notice".to_string()));
        assert_eq!(parsed.as_str(), "legacy_notice");
    }

    #[test]
    fn test_category_table() {
        assert_eq!(NotificationType::Verification.category(), EmailCategory::Essential);
        assert_eq!(NotificationType::PasswordReset.category(), EmailCategory::Essential);
        assert_eq!(NotificationType::ApiKeyRevoked.category(), EmailCategory::Essential);
        assert_eq!(NotificationType::Welcome.category(), EmailCategory::AccountUpdates);
        assert_eq!(NotificationType::ApiKeyExpiring.category(), EmailCategory::AccountUpdates);
        assert_eq!(
            NotificationType::DevFeaturesAnnouncement.category(),
            EmailCategory::DevFeatures
        );
        // Unmapped types can never be suppressed
        assert_eq!(
            NotificationType::Custom("whatever".to_string()).category(),
            EmailCategory::Essential
        );
        assert_eq!(
            NotificationType::UsageAdminAlertWebsite.category(),
            EmailCategory::Essential
        );
    }

    #[test]
    fn test_job_from_request() {
        let request = EnqueueRequest::new(
            NotificationType::PasswordReset,
            json!({"to_email": "user@example.com", "token": "abc"}),
        )
        .for_user(42)
        .with_context("password reset request");

        let job = Job::from_request(request);
        assert_eq!(job.attempt, 0);
        assert_eq!(job.target_user_id, Some(42));
        assert_eq!(job.recipient(), Some("user@example.com"));
        assert_eq!(job.context.as_deref(), Some("password reset request"));
    }

    #[test]
    fn test_recipient_missing() {
        let job = Job::from_request(EnqueueRequest::new(
            NotificationType::AccountDeleteAdminNotice,
            json!({"deleted_user": "someone"}),
        ));
        assert_eq!(job.recipient(), None);
    }
}
