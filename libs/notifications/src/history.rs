//! Delivery history: audit trail and recently-sent dedup checks.
//!
//! History is an audit aid, not a correctness dependency of delivery:
//! write failures are logged and swallowed, and the dedup read fails open
//! as "not recently sent".

use crate::error::StoreError;
use crate::job::Job;
use crate::models::{DedupFilter, DeliveryStatus, HistoryRecord, HistoryUpdate};
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{error, warn};
use uuid::Uuid;

/// Default trailing window for the recently-sent check.
pub const DEFAULT_DEDUP_WINDOW_HOURS: u32 = 24;

/// Maximum stored length of a failure reason, in characters.
const MAX_FAILURE_REASON_LEN: usize = 500;

static SECRET_PATTERN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)\b(password|token|secret|authorization|api[_-]?key)\b\s*[=:]\s*\S+")
        .expect("secret pattern is valid")
});

/// Redacts secret-like `key=value` fragments and truncates the result to
/// fit the history column.
pub(crate) fn sanitize_failure_reason(reason: &str) -> String {
    let mut out = SECRET_PATTERN
        .replace_all(reason, "$1=[REDACTED]")
        .into_owned();
    if let Some((index, _)) = out.char_indices().nth(MAX_FAILURE_REASON_LEN) {
        out.truncate(index);
    }
    out
}

/// Identifier assigned by the store to a history row.
pub type HistoryId = i64;

/// Store contract for the delivery audit trail.
#[async_trait]
pub trait HistoryStore: Send + Sync {
    async fn insert(&self, record: HistoryRecord) -> Result<HistoryId, StoreError>;

    /// Apply only the fields present in `update`. Unknown job ids are a
    /// no-op, not an error.
    async fn update(&self, job_id: Uuid, update: HistoryUpdate) -> Result<(), StoreError>;

    /// Whether a record matching `filter` exists at or after `cutoff`.
    /// With a template signature only sent records count, compared by
    /// `sent_at`; plain recipient+type matches any status by `queued_at`.
    async fn exists_since(
        &self,
        filter: &DedupFilter,
        cutoff: DateTime<Utc>,
    ) -> Result<bool, StoreError>;
}

/// In-memory store for tests and development.
#[derive(Debug, Default)]
pub struct InMemoryHistoryStore {
    records: RwLock<HashMap<Uuid, HistoryRecord>>,
    next_id: AtomicI64,
}

impl InMemoryHistoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn get(&self, job_id: Uuid) -> Option<HistoryRecord> {
        self.records.read().await.get(&job_id).cloned()
    }

    pub async fn records(&self) -> Vec<HistoryRecord> {
        self.records.read().await.values().cloned().collect()
    }

    pub async fn len(&self) -> usize {
        self.records.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.records.read().await.is_empty()
    }
}

fn matches_filter(record: &HistoryRecord, filter: &DedupFilter, cutoff: DateTime<Utc>) -> bool {
    if record.email_type != filter.email_type {
        return false;
    }
    if !record
        .recipient_email
        .eq_ignore_ascii_case(&filter.recipient_email)
    {
        return false;
    }
    if let Some(user_id) = filter.target_user_id {
        if record.target_user_id != Some(user_id) {
            return false;
        }
    }
    match &filter.template_signature {
        Some(signature) => {
            record.template_signature.as_deref() == Some(signature.as_str())
                && record.status == DeliveryStatus::Sent
                && record.sent_at.is_some_and(|sent_at| sent_at >= cutoff)
        }
        None => record.queued_at >= cutoff,
    }
}

#[async_trait]
impl HistoryStore for InMemoryHistoryStore {
    async fn insert(&self, record: HistoryRecord) -> Result<HistoryId, StoreError> {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst) + 1;
        self.records.write().await.insert(record.job_id, record);
        Ok(id)
    }

    async fn update(&self, job_id: Uuid, update: HistoryUpdate) -> Result<(), StoreError> {
        let mut records = self.records.write().await;
        let Some(record) = records.get_mut(&job_id) else {
            return Ok(());
        };
        if let Some(status) = update.status {
            record.status = status;
        }
        if let Some(sent_at) = update.sent_at {
            record.sent_at = Some(sent_at);
        }
        if let Some(failure_reason) = update.failure_reason {
            record.failure_reason = failure_reason;
        }
        if let Some(retry_count) = update.retry_count {
            record.retry_count = retry_count;
        }
        Ok(())
    }

    async fn exists_since(
        &self,
        filter: &DedupFilter,
        cutoff: DateTime<Utc>,
    ) -> Result<bool, StoreError> {
        let records = self.records.read().await;
        Ok(records
            .values()
            .any(|record| matches_filter(record, filter, cutoff)))
    }
}

/// Audit and dedup facade over a history store.
#[derive(Clone)]
pub struct HistoryLedger {
    store: Arc<dyn HistoryStore>,
}

impl HistoryLedger {
    pub fn new(store: Arc<dyn HistoryStore>) -> Self {
        Self { store }
    }

    /// Insert the initial `queued` row for a job. Jobs without an audit
    /// recipient are not recorded. Returns `None` on store failure.
    pub async fn record_queued(&self, job: &Job) -> Option<HistoryId> {
        let recipient = job.recipient()?;
        let record = HistoryRecord {
            job_id: job.id,
            email_type: job.notification_type.as_str().to_string(),
            recipient_email: recipient.to_lowercase(),
            queued_at: job.enqueued_at,
            status: DeliveryStatus::Queued,
            failure_reason: None,
            retry_count: 0,
            target_user_id: job.target_user_id,
            template_signature: job.template_signature.clone(),
            sent_at: None,
        };
        match self.store.insert(record).await {
            Ok(id) => Some(id),
            Err(err) => {
                error!(
                    job_id = %job.id,
                    email_type = %job.notification_type,
                    error = %err,
                    "Failed to record delivery history"
                );
                None
            }
        }
    }

    /// Apply a status change. Failure reasons are sanitized here so no
    /// store implementation can persist an unredacted one.
    pub async fn apply(&self, job_id: Uuid, mut update: HistoryUpdate) {
        if let Some(Some(reason)) = &update.failure_reason {
            update.failure_reason = Some(Some(sanitize_failure_reason(reason)));
        }
        if update.is_empty() {
            return;
        }
        if let Err(err) = self.store.update(job_id, update).await {
            error!(
                job_id = %job_id,
                error = %err,
                "Failed to update delivery history"
            );
        }
    }

    /// Advisory dedup check: was an equivalent notification sent or queued
    /// within the trailing window? Two near-simultaneous callers can both
    /// see `false`; the dispatcher's concurrency limit keeps that rare.
    pub async fn was_recently_sent(&self, filter: DedupFilter, within_hours: u32) -> bool {
        let cutoff = Utc::now() - Duration::hours(i64::from(within_hours));
        let filter = DedupFilter {
            recipient_email: filter.recipient_email.to_lowercase(),
            ..filter
        };
        match self.store.exists_since(&filter, cutoff).await {
            Ok(found) => found,
            Err(err) => {
                warn!(
                    email_type = %filter.email_type,
                    error = %err,
                    "Dedup lookup failed; treating as not recently sent"
                );
                false
            }
        }
    }
}
