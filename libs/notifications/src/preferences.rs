//! Per-user consent checks.
//!
//! The gate is read-only and fails open: a missing record, a missing user
//! id, or a store outage all allow delivery. Suppressing security mail by
//! accident is the failure mode this module is designed against.

use crate::error::StoreError;
use crate::models::{EmailCategory, PreferenceUpdate, UserEmailPreferences};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::warn;

/// Store contract for per-user preference records.
#[async_trait]
pub trait PreferenceStore: Send + Sync {
    /// Fetch the record for a user. `None` when the user has no record.
    async fn get(&self, user_id: i64) -> Result<Option<UserEmailPreferences>, StoreError>;

    /// Apply a partial update, touching only the provided fields.
    /// Returns the resulting record, or `None` when the user does not exist.
    async fn update(
        &self,
        user_id: i64,
        changes: PreferenceUpdate,
    ) -> Result<Option<UserEmailPreferences>, StoreError>;
}

/// In-memory store for tests and development.
#[derive(Debug, Default, Clone)]
pub struct InMemoryPreferenceStore {
    records: Arc<RwLock<HashMap<i64, UserEmailPreferences>>>,
}

impl InMemoryPreferenceStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed a record, as account creation would.
    pub async fn insert(&self, user_id: i64, preferences: UserEmailPreferences) {
        self.records.write().await.insert(user_id, preferences);
    }
}

#[async_trait]
impl PreferenceStore for InMemoryPreferenceStore {
    async fn get(&self, user_id: i64) -> Result<Option<UserEmailPreferences>, StoreError> {
        Ok(self.records.read().await.get(&user_id).copied())
    }

    async fn update(
        &self,
        user_id: i64,
        changes: PreferenceUpdate,
    ) -> Result<Option<UserEmailPreferences>, StoreError> {
        let mut records = self.records.write().await;
        let Some(record) = records.get_mut(&user_id) else {
            return Ok(None);
        };
        if let Some(account_updates) = changes.account_updates {
            record.account_updates = account_updates;
        }
        if let Some(dev_features) = changes.dev_features {
            record.dev_features = dev_features;
        }
        Ok(Some(*record))
    }
}

/// Outcome of a consent check.
#[derive(Debug, Clone)]
pub struct ConsentDecision {
    pub allowed: bool,
    pub reason: String,
}

impl ConsentDecision {
    fn allow(reason: &str) -> Self {
        Self {
            allowed: true,
            reason: reason.to_string(),
        }
    }

    fn deny(reason: &str) -> Self {
        Self {
            allowed: false,
            reason: reason.to_string(),
        }
    }
}

/// Decides whether a notification may be delivered to a recipient.
#[derive(Clone)]
pub struct PreferenceGate {
    store: Arc<dyn PreferenceStore>,
}

impl PreferenceGate {
    pub fn new(store: Arc<dyn PreferenceStore>) -> Self {
        Self { store }
    }

    /// Check whether delivery is permitted for the given recipient account
    /// and category. Read-only; every failure path falls open.
    pub async fn can_deliver(
        &self,
        target_user_id: Option<i64>,
        category: EmailCategory,
    ) -> ConsentDecision {
        if category == EmailCategory::Essential {
            return ConsentDecision::allow("Essential emails cannot be disabled.");
        }

        let Some(user_id) = target_user_id else {
            return ConsentDecision::allow("No user preference linked to this email.");
        };

        let preferences = match self.store.get(user_id).await {
            Ok(Some(preferences)) => preferences,
            Ok(None) => {
                return ConsentDecision::allow("No preference record found; using defaults.");
            }
            Err(err) => {
                warn!(
                    user_id,
                    category = %category,
                    error = %err,
                    "Preference lookup failed; defaulting to allow"
                );
                return ConsentDecision::allow("Preference lookup failed; defaulting to allow.");
            }
        };

        let (enabled, opted_in, opted_out) = match category {
            EmailCategory::AccountUpdates => (
                preferences.account_updates,
                "User opted in to account updates.",
                "User opted out of account updates.",
            ),
            EmailCategory::DevFeatures => (
                preferences.dev_features,
                "User opted in to development updates.",
                "User opted out of development updates.",
            ),
            // Handled above
            EmailCategory::Essential => {
                return ConsentDecision::allow("Essential emails cannot be disabled.");
            }
        };

        if enabled {
            ConsentDecision::allow(opted_in)
        } else {
            ConsentDecision::deny(opted_out)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct FailingStore;

    #[async_trait]
    impl PreferenceStore for FailingStore {
        async fn get(&self, _user_id: i64) -> Result<Option<UserEmailPreferences>, StoreError> {
            Err(StoreError::Database("connection refused".to_string()))
        }

        async fn update(
            &self,
            _user_id: i64,
            _changes: PreferenceUpdate,
        ) -> Result<Option<UserEmailPreferences>, StoreError> {
            Err(StoreError::Database("connection refused".to_string()))
        }
    }

    /// Store claiming every flag is off; essential must still pass.
    struct AllOptedOutStore;

    #[async_trait]
    impl PreferenceStore for AllOptedOutStore {
        async fn get(&self, _user_id: i64) -> Result<Option<UserEmailPreferences>, StoreError> {
            Ok(Some(UserEmailPreferences {
                account_updates: false,
                dev_features: false,
            }))
        }

        async fn update(
            &self,
            _user_id: i64,
            _changes: PreferenceUpdate,
        ) -> Result<Option<UserEmailPreferences>, StoreError> {
            Ok(None)
        }
    }

    #[tokio::test]
    async fn test_essential_cannot_be_disabled() {
        let gate = PreferenceGate::new(Arc::new(AllOptedOutStore));
        let decision = gate.can_deliver(Some(1), EmailCategory::Essential).await;
        assert!(decision.allowed);
        assert!(decision.reason.contains("cannot be disabled"));
    }

    #[tokio::test]
    async fn test_no_user_id_allows() {
        let gate = PreferenceGate::new(Arc::new(InMemoryPreferenceStore::new()));
        let decision = gate.can_deliver(None, EmailCategory::AccountUpdates).await;
        assert!(decision.allowed);
    }

    #[tokio::test]
    async fn test_missing_record_allows() {
        let gate = PreferenceGate::new(Arc::new(InMemoryPreferenceStore::new()));
        let decision = gate.can_deliver(Some(7), EmailCategory::AccountUpdates).await;
        assert!(decision.allowed);
        assert!(decision.reason.contains("No preference record"));
    }

    #[tokio::test]
    async fn test_opted_out_denies() {
        let store = InMemoryPreferenceStore::new();
        store
            .insert(
                7,
                UserEmailPreferences {
                    account_updates: false,
                    dev_features: false,
                },
            )
            .await;

        let gate = PreferenceGate::new(Arc::new(store));
        let decision = gate.can_deliver(Some(7), EmailCategory::AccountUpdates).await;
        assert!(!decision.allowed);
        assert!(decision.reason.contains("opted out of account updates"));
    }

    #[tokio::test]
    async fn test_dev_features_requires_opt_in() {
        let store = InMemoryPreferenceStore::new();
        store.insert(7, UserEmailPreferences::default()).await;
        let gate = PreferenceGate::new(Arc::new(store.clone()));

        let decision = gate.can_deliver(Some(7), EmailCategory::DevFeatures).await;
        assert!(!decision.allowed);

        store
            .update(
                7,
                PreferenceUpdate {
                    dev_features: Some(true),
                    ..PreferenceUpdate::default()
                },
            )
            .await
            .unwrap();
        let decision = gate.can_deliver(Some(7), EmailCategory::DevFeatures).await;
        assert!(decision.allowed);
    }

    #[tokio::test]
    async fn test_store_failure_fails_open() {
        let gate = PreferenceGate::new(Arc::new(FailingStore));
        let decision = gate.can_deliver(Some(7), EmailCategory::AccountUpdates).await;
        assert!(decision.allowed);
        assert!(decision.reason.contains("lookup failed"));
    }

    #[tokio::test]
    async fn test_partial_update_touches_only_provided_fields() {
        let store = InMemoryPreferenceStore::new();
        store.insert(7, UserEmailPreferences::default()).await;

        let updated = store
            .update(
                7,
                PreferenceUpdate {
                    dev_features: Some(true),
                    ..PreferenceUpdate::default()
                },
            )
            .await
            .unwrap()
            .unwrap();
        assert!(updated.account_updates);
        assert!(updated.dev_features);

        // Unknown user is a no-op
        let missing = store.update(99, PreferenceUpdate::default()).await.unwrap();
        assert!(missing.is_none());
    }
}
