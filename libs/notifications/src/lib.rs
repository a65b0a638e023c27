//! Notification delivery pipeline
//!
//! In-process asynchronous job queue for transactional email
//! notifications: consent-based suppression, retry with exponential
//! backoff, and a persisted delivery history used for audit and dedup.
//!
//! ## Components
//!
//! - **Dispatcher**: channel-fed worker with bounded concurrency that
//!   owns the retry/backoff state machine
//! - **Preference gate**: per-user consent checks; essential mail can
//!   never be suppressed and every failure path falls open
//! - **History ledger**: append/update audit trail plus the
//!   recently-sent dedup check
//! - **Providers**: SMTP via lettre, and a capturing mock
//! - **Stores**: in-memory (tests/dev) and PostgreSQL via sea-orm
//!
//! ## Usage
//!
//! ```ignore
//! use notifications::*;
//! use std::sync::Arc;
//!
//! let provider = Arc::new(SmtpProvider::from_env()?);
//! let gate = PreferenceGate::new(Arc::new(PostgresPreferenceStore::new(db.clone())));
//! let ledger = HistoryLedger::new(Arc::new(PostgresHistoryStore::new(db)));
//! let dispatcher = Arc::new(Dispatcher::new(
//!     provider,
//!     gate.clone(),
//!     ledger.clone(),
//!     DispatcherConfig::default(),
//! ));
//!
//! let service = NotificationService::new(
//!     dispatcher,
//!     gate,
//!     ledger,
//!     NotificationServiceConfig::default(),
//! );
//! service.queue_password_reset_email(42, "user@example.com", "Avery", &token).await;
//! ```

pub mod dispatcher;
pub mod error;
pub mod history;
pub mod job;
pub mod models;
pub mod postgres;
pub mod preferences;
pub mod provider;
pub mod service;

// Re-export main types
pub use dispatcher::{DeadLetterSink, Dispatcher, DispatcherConfig};
pub use error::{DeliveryError, StoreError};
pub use history::{
    HistoryId, HistoryLedger, HistoryStore, InMemoryHistoryStore, DEFAULT_DEDUP_WINDOW_HOURS,
};
pub use job::{EnqueueRequest, Job, NotificationType};
pub use models::{
    DedupFilter, DeliveryStatus, EmailCategory, HistoryRecord, HistoryUpdate, PreferenceUpdate,
    QueueStats, UserEmailPreferences,
};
pub use postgres::{PostgresHistoryStore, PostgresPreferenceStore};
pub use preferences::{ConsentDecision, InMemoryPreferenceStore, PreferenceGate, PreferenceStore};
pub use provider::{DeliveryProvider, MockProvider, SendResult, SmtpConfig, SmtpProvider};
pub use service::{NotificationService, NotificationServiceConfig};
