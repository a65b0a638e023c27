//! PostgreSQL store implementations backed by sea-orm.

use crate::error::StoreError;
use crate::history::{HistoryId, HistoryStore};
use crate::models::{DedupFilter, HistoryRecord, HistoryUpdate, PreferenceUpdate, UserEmailPreferences};
use crate::preferences::PreferenceStore;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sea_orm::{DatabaseConnection, DbBackend, FromQueryResult, Statement};
use uuid::Uuid;

/// PostgreSQL implementation of `PreferenceStore`.
///
/// Preference flags live as columns on the `users` table; NULL columns
/// fall back to the defaults, which keeps accounts created before the
/// columns existed on the default behavior.
#[derive(Clone)]
pub struct PostgresPreferenceStore {
    db: DatabaseConnection,
}

impl PostgresPreferenceStore {
    pub fn new(db: DatabaseConnection) -> Self {
        Self { db }
    }
}

#[derive(Debug, FromQueryResult)]
struct PreferenceRow {
    email_pref_account_updates: Option<bool>,
    email_pref_dev_features: Option<bool>,
}

impl From<PreferenceRow> for UserEmailPreferences {
    fn from(row: PreferenceRow) -> Self {
        let defaults = UserEmailPreferences::default();
        Self {
            account_updates: row
                .email_pref_account_updates
                .unwrap_or(defaults.account_updates),
            dev_features: row.email_pref_dev_features.unwrap_or(defaults.dev_features),
        }
    }
}

#[async_trait]
impl PreferenceStore for PostgresPreferenceStore {
    async fn get(&self, user_id: i64) -> Result<Option<UserEmailPreferences>, StoreError> {
        let stmt = Statement::from_sql_and_values(
            DbBackend::Postgres,
            "SELECT email_pref_account_updates, email_pref_dev_features \
             FROM users WHERE id = $1",
            [user_id.into()],
        );

        let row = PreferenceRow::find_by_statement(stmt).one(&self.db).await?;
        Ok(row.map(UserEmailPreferences::from))
    }

    async fn update(
        &self,
        user_id: i64,
        changes: PreferenceUpdate,
    ) -> Result<Option<UserEmailPreferences>, StoreError> {
        if changes.is_empty() {
            return self.get(user_id).await;
        }

        let mut assignments = Vec::new();
        let mut values: Vec<sea_orm::Value> = vec![user_id.into()];

        if let Some(account_updates) = changes.account_updates {
            values.push(account_updates.into());
            assignments.push(format!("email_pref_account_updates = ${}", values.len()));
        }
        if let Some(dev_features) = changes.dev_features {
            values.push(dev_features.into());
            assignments.push(format!("email_pref_dev_features = ${}", values.len()));
        }

        let sql = format!(
            "UPDATE users SET {}, email_pref_updated_at = NOW() WHERE id = $1 \
             RETURNING email_pref_account_updates, email_pref_dev_features",
            assignments.join(", ")
        );

        let row = PreferenceRow::find_by_statement(Statement::from_sql_and_values(
            DbBackend::Postgres,
            sql,
            values,
        ))
        .one(&self.db)
        .await?;
        Ok(row.map(UserEmailPreferences::from))
    }
}

/// PostgreSQL implementation of `HistoryStore` over `email_send_history`.
#[derive(Clone)]
pub struct PostgresHistoryStore {
    db: DatabaseConnection,
}

impl PostgresHistoryStore {
    pub fn new(db: DatabaseConnection) -> Self {
        Self { db }
    }
}

#[derive(Debug, FromQueryResult)]
struct IdRow {
    id: i64,
}

#[derive(Debug, FromQueryResult)]
struct ExistsRow {
    found: bool,
}

#[async_trait]
impl HistoryStore for PostgresHistoryStore {
    async fn insert(&self, record: HistoryRecord) -> Result<HistoryId, StoreError> {
        let stmt = Statement::from_sql_and_values(
            DbBackend::Postgres,
            r#"
            INSERT INTO email_send_history (
                job_id, email_type, recipient_email, queued_at, status,
                failure_reason, retry_count, target_user_id, template_signature, sent_at
            ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            RETURNING id
            "#,
            [
                record.job_id.into(),
                record.email_type.into(),
                record.recipient_email.into(),
                record.queued_at.into(),
                record.status.as_str().into(),
                record.failure_reason.into(),
                (record.retry_count as i32).into(),
                record.target_user_id.into(),
                record.template_signature.into(),
                record.sent_at.into(),
            ],
        );

        let row = IdRow::find_by_statement(stmt)
            .one(&self.db)
            .await?
            .ok_or_else(|| StoreError::Database("history insert returned no id".to_string()))?;
        Ok(row.id)
    }

    async fn update(&self, job_id: Uuid, update: HistoryUpdate) -> Result<(), StoreError> {
        let mut assignments = Vec::new();
        let mut values: Vec<sea_orm::Value> = Vec::new();

        if let Some(status) = update.status {
            values.push(status.as_str().into());
            assignments.push(format!("status = ${}", values.len()));
        }
        if let Some(sent_at) = update.sent_at {
            values.push(sent_at.into());
            assignments.push(format!("sent_at = ${}", values.len()));
        }
        if let Some(failure_reason) = update.failure_reason {
            values.push(failure_reason.into());
            assignments.push(format!("failure_reason = ${}", values.len()));
        }
        if let Some(retry_count) = update.retry_count {
            values.push((retry_count as i32).into());
            assignments.push(format!("retry_count = ${}", values.len()));
        }
        if assignments.is_empty() {
            return Ok(());
        }

        values.push(job_id.into());
        let sql = format!(
            "UPDATE email_send_history SET {} WHERE job_id = ${} RETURNING id",
            assignments.join(", "),
            values.len()
        );

        // Unknown job ids match no row; that is a no-op, not an error.
        IdRow::find_by_statement(Statement::from_sql_and_values(
            DbBackend::Postgres,
            sql,
            values,
        ))
        .one(&self.db)
        .await?;
        Ok(())
    }

    async fn exists_since(
        &self,
        filter: &DedupFilter,
        cutoff: DateTime<Utc>,
    ) -> Result<bool, StoreError> {
        let mut conditions = vec![
            "email_type = $1".to_string(),
            "LOWER(recipient_email) = LOWER($2)".to_string(),
        ];
        let mut values: Vec<sea_orm::Value> = vec![
            filter.email_type.clone().into(),
            filter.recipient_email.clone().into(),
        ];

        if let Some(user_id) = filter.target_user_id {
            values.push(user_id.into());
            conditions.push(format!("target_user_id = ${}", values.len()));
        }

        match &filter.template_signature {
            Some(signature) => {
                values.push(signature.clone().into());
                conditions.push(format!("template_signature = ${}", values.len()));
                conditions.push("status = 'sent'".to_string());
                values.push(cutoff.into());
                conditions.push(format!("sent_at >= ${}", values.len()));
            }
            None => {
                values.push(cutoff.into());
                conditions.push(format!("queued_at >= ${}", values.len()));
            }
        }

        let sql = format!(
            "SELECT EXISTS(SELECT 1 FROM email_send_history WHERE {}) AS found",
            conditions.join(" AND ")
        );

        let row = ExistsRow::find_by_statement(Statement::from_sql_and_values(
            DbBackend::Postgres,
            sql,
            values,
        ))
        .one(&self.db)
        .await?;
        Ok(row.map(|r| r.found).unwrap_or(false))
    }
}
