//! NotificationStore port - the source of truth for notification records.
//!
//! The dispatch queue and the workers only ever hold notification ids; every
//! state change is a `Transition` applied here.

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::app::status::StateCounts;
use crate::domain::{NotificationId, NotificationRecord, NotificationState, StoreError, Transition};

/// NotificationStore persists records and applies transitions atomically.
///
/// # Design principles
/// - `apply` is a compare-and-set: the transition is validated against the
///   current stored state and applied in the same critical section
/// - a rejected transition leaves the stored record untouched
/// - records are never deleted
#[async_trait]
pub trait NotificationStore: Send + Sync {
    /// Persist a new record. The store assigns `sequence` (insertion order).
    async fn insert(&self, record: NotificationRecord) -> Result<NotificationRecord, StoreError>;

    async fn get(&self, id: NotificationId) -> Result<Option<NotificationRecord>, StoreError>;

    /// Atomically validate and apply `transition`, returning the updated record.
    async fn apply(
        &self,
        id: NotificationId,
        transition: Transition,
        now: DateTime<Utc>,
    ) -> Result<NotificationRecord, StoreError>;

    /// Records in `state`, ordered by `sequence`.
    async fn list_by_state(&self, state: NotificationState) -> Result<Vec<NotificationRecord>, StoreError>;

    /// `sending` records whose lease expired at or before `now`.
    async fn expired_leases(&self, now: DateTime<Utc>) -> Result<Vec<NotificationRecord>, StoreError>;

    async fn counts(&self) -> Result<StateCounts, StoreError>;
}
