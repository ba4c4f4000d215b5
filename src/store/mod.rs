//! Call record persistence
//!
//! The store is the only shared state between webhook invocations. All writes
//! are single-row upserts; follow-up markers use set-if-null updates so that
//! concurrent or redelivered callbacks converge without locking.

mod sqlite;

pub use sqlite::SqliteCallStore;

use thiserror::Error;

use crate::models::{CallKey, CallRecord, CallUpdate, TenantProfile};

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("failed to serialize raw payload: {0}")]
    Serialize(#[from] serde_json::Error),
}

pub type StoreResult<T> = Result<T, StoreError>;

/// Durable call records, keyed by `(provider, provider_call_id)`.
pub trait CallStore: Send + Sync {
    /// Insert the row if absent, otherwise overwrite only the supplied columns.
    fn upsert_from_callback(&self, key: &CallKey, update: &CallUpdate) -> StoreResult<()>;

    /// Set `missed_at`, `followup_sent_at` and `followup_message_id`, each only if unset.
    fn mark_followup(&self, key: &CallKey, message_id: Option<&str>) -> StoreResult<()>;

    fn find_by_key(&self, key: &CallKey) -> StoreResult<Option<CallRecord>>;

    /// Lookup by the provider's raw session id, for callbacks whose key differs.
    fn find_by_call_sid(&self, provider: &str, call_sid: &str) -> StoreResult<Option<CallRecord>>;

    fn find_tenant(&self, systemix_number: &str) -> StoreResult<Option<TenantProfile>>;
}
