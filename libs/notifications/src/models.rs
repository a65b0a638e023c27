use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Consent category of a notification type.
///
/// Every notification type resolves to exactly one category; the category
/// decides which preference flag, if any, can suppress it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EmailCategory {
    /// Security and account-integrity mail; can never be disabled.
    Essential,
    /// Account lifecycle notices (welcome, admin changes, key expiry).
    AccountUpdates,
    /// Development feature announcements; opt-in only.
    DevFeatures,
}

impl EmailCategory {
    /// Wire/storage name, matching the serde rename.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Essential => "essential",
            Self::AccountUpdates => "account_updates",
            Self::DevFeatures => "dev_features",
        }
    }
}

impl fmt::Display for EmailCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Lifecycle status of a delivery as recorded in history.
///
/// Transitions only move forward: `Queued` into one of the terminal states,
/// never backward.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeliveryStatus {
    Queued,
    Sent,
    Failed,
    /// Suppressed by consent; terminal, never retried.
    Skipped,
}

impl DeliveryStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Queued => "queued",
            Self::Sent => "sent",
            Self::Failed => "failed",
            Self::Skipped => "skipped",
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Queued)
    }
}

impl fmt::Display for DeliveryStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Per-user email consent flags.
///
/// There is no flag for the essential category on purpose.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserEmailPreferences {
    pub account_updates: bool,
    pub dev_features: bool,
}

impl Default for UserEmailPreferences {
    fn default() -> Self {
        Self {
            account_updates: true,
            dev_features: false,
        }
    }
}

/// Partial preference update; only provided fields are written.
#[derive(Debug, Clone, Copy, Default, Deserialize)]
pub struct PreferenceUpdate {
    pub account_updates: Option<bool>,
    pub dev_features: Option<bool>,
}

impl PreferenceUpdate {
    pub fn is_empty(&self) -> bool {
        self.account_updates.is_none() && self.dev_features.is_none()
    }
}

/// One row of the delivery audit trail, keyed by job id.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HistoryRecord {
    pub job_id: Uuid,
    pub email_type: String,
    /// Always stored lower-cased.
    pub recipient_email: String,
    pub queued_at: DateTime<Utc>,
    pub status: DeliveryStatus,
    /// Sanitized and truncated before storage.
    pub failure_reason: Option<String>,
    /// Retries performed; never exceeds the dispatcher's configured maximum.
    pub retry_count: u32,
    pub target_user_id: Option<i64>,
    /// Optional content fingerprint for coarser dedup than recipient+type.
    pub template_signature: Option<String>,
    pub sent_at: Option<DateTime<Utc>>,
}

/// Field-wise history update. Absent fields are left untouched.
///
/// `failure_reason` is tri-state: `None` leaves the column alone,
/// `Some(None)` clears it (a successful send wipes earlier failures),
/// `Some(Some(_))` sets it.
#[derive(Debug, Clone, Default)]
pub struct HistoryUpdate {
    pub status: Option<DeliveryStatus>,
    pub sent_at: Option<DateTime<Utc>>,
    pub failure_reason: Option<Option<String>>,
    pub retry_count: Option<u32>,
}

impl HistoryUpdate {
    /// Start an update that sets the status.
    pub fn status(status: DeliveryStatus) -> Self {
        Self {
            status: Some(status),
            ..Self::default()
        }
    }

    pub fn with_sent_at(mut self, at: DateTime<Utc>) -> Self {
        self.sent_at = Some(at);
        self
    }

    pub fn with_failure_reason(mut self, reason: impl Into<String>) -> Self {
        self.failure_reason = Some(Some(reason.into()));
        self
    }

    pub fn clear_failure_reason(mut self) -> Self {
        self.failure_reason = Some(None);
        self
    }

    pub fn with_retry_count(mut self, count: u32) -> Self {
        self.retry_count = Some(count);
        self
    }

    pub fn is_empty(&self) -> bool {
        self.status.is_none()
            && self.sent_at.is_none()
            && self.failure_reason.is_none()
            && self.retry_count.is_none()
    }
}

/// Filter for the recently-sent dedup check.
#[derive(Debug, Clone)]
pub struct DedupFilter {
    pub email_type: String,
    /// Compared case-insensitively.
    pub recipient_email: String,
    /// When present, narrows the match to this recipient account.
    pub target_user_id: Option<i64>,
    /// When present, only records carrying the same signature that were
    /// actually sent count as duplicates.
    pub template_signature: Option<String>,
}

/// Snapshot of dispatcher load.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueueStats {
    pub queued: usize,
    pub in_flight: usize,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_preference_defaults() {
        let defaults = UserEmailPreferences::default();
        assert!(defaults.account_updates);
        assert!(!defaults.dev_features);
    }

    #[test]
    fn test_status_terminality() {
        assert!(!DeliveryStatus::Queued.is_terminal());
        assert!(DeliveryStatus::Sent.is_terminal());
        assert!(DeliveryStatus::Failed.is_terminal());
        assert!(DeliveryStatus::Skipped.is_terminal());
    }

    #[test]
    fn test_history_update_builder() {
        let update = HistoryUpdate::status(DeliveryStatus::Sent)
            .with_sent_at(Utc::now())
            .clear_failure_reason()
            .with_retry_count(2);

        assert_eq!(update.status, Some(DeliveryStatus::Sent));
        assert!(update.sent_at.is_some());
        assert_eq!(update.failure_reason, Some(None));
        assert_eq!(update.retry_count, Some(2));
        assert!(!update.is_empty());

        assert!(HistoryUpdate::default().is_empty());
    }

    #[test]
    fn test_category_wire_names() {
        assert_eq!(EmailCategory::Essential.as_str(), "essential");
        assert_eq!(EmailCategory::AccountUpdates.as_str(), "account_updates");
        assert_eq!(EmailCategory::DevFeatures.as_str(), "dev_features");

        let json = serde_json::to_string(&EmailCategory::AccountUpdates).unwrap();
        assert_eq!(json, "\"account_updates\"");
    }
}
