//! InMemoryNotificationStore - development and test store.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::Mutex;

use crate::app::status::StateCounts;
use crate::domain::{
    NotificationId, NotificationRecord, NotificationState, StoreError, Transition,
};
use crate::ports::NotificationStore;

#[derive(Debug, Default)]
struct StoreState {
    records: HashMap<NotificationId, NotificationRecord>,
    next_sequence: u64,
}

/// Records in a `HashMap` behind a single tokio `Mutex`.
///
/// `apply` runs `NotificationRecord::apply` on the stored record while the
/// lock is held, so validate-and-mutate is one atomic step.
#[derive(Debug, Default)]
pub struct InMemoryNotificationStore {
    state: Mutex<StoreState>,
}

impl InMemoryNotificationStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.state.lock().await.records.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

#[async_trait]
impl NotificationStore for InMemoryNotificationStore {
    async fn insert(&self, mut record: NotificationRecord) -> Result<NotificationRecord, StoreError> {
        let mut state = self.state.lock().await;
        if state.records.contains_key(&record.id) {
            return Err(StoreError::Duplicate(record.id));
        }
        record.sequence = state.next_sequence;
        state.next_sequence += 1;
        state.records.insert(record.id, record.clone());
        Ok(record)
    }

    async fn get(&self, id: NotificationId) -> Result<Option<NotificationRecord>, StoreError> {
        Ok(self.state.lock().await.records.get(&id).cloned())
    }

    async fn apply(
        &self,
        id: NotificationId,
        transition: Transition,
        now: DateTime<Utc>,
    ) -> Result<NotificationRecord, StoreError> {
        let mut state = self.state.lock().await;
        let record = state.records.get_mut(&id).ok_or(StoreError::NotFound(id))?;
        record.apply(transition, now)?;
        Ok(record.clone())
    }

    async fn list_by_state(&self, wanted: NotificationState) -> Result<Vec<NotificationRecord>, StoreError> {
        let state = self.state.lock().await;
        let mut records: Vec<_> = state
            .records
            .values()
            .filter(|r| r.state == wanted)
            .cloned()
            .collect();
        records.sort_by_key(|r| r.sequence);
        Ok(records)
    }

    async fn expired_leases(&self, now: DateTime<Utc>) -> Result<Vec<NotificationRecord>, StoreError> {
        let state = self.state.lock().await;
        let mut records: Vec<_> = state
            .records
            .values()
            .filter(|r| {
                r.state == NotificationState::Sending && r.lease.is_some_and(|l| l.is_expired(now))
            })
            .cloned()
            .collect();
        records.sort_by_key(|r| r.sequence);
        Ok(records)
    }

    async fn counts(&self) -> Result<StateCounts, StoreError> {
        let state = self.state.lock().await;
        Ok(state.records.values().map(|r| r.state).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{
        DeviceToken, Lease, LeaseId, NotificationPayload, TransitionError,
    };
    use chrono::Duration;
    use std::sync::Arc;
    use ulid::Ulid;

    fn new_record() -> NotificationRecord {
        NotificationRecord::new(
            NotificationId::from_ulid(Ulid::new()),
            DeviceToken::new("tok"),
            NotificationPayload::new("t", "b"),
            3,
            Utc::now(),
        )
    }

    fn lease(now: DateTime<Utc>, ttl: Duration) -> Lease {
        Lease {
            id: LeaseId::from_ulid(Ulid::new()),
            worker: 0,
            claimed_at: now,
            expires_at: now + ttl,
        }
    }

    #[tokio::test]
    async fn insert_assigns_increasing_sequence_and_rejects_duplicates() {
        let store = InMemoryNotificationStore::new();
        let a = store.insert(new_record()).await.unwrap();
        let b = store.insert(new_record()).await.unwrap();
        assert!(a.sequence < b.sequence);

        let err = store.insert(a.clone()).await.unwrap_err();
        assert_eq!(err, StoreError::Duplicate(a.id));
        assert_eq!(store.len().await, 2);
    }

    #[tokio::test]
    async fn rejected_transition_leaves_record_unchanged() {
        let store = InMemoryNotificationStore::new();
        let record = store.insert(new_record()).await.unwrap();
        let now = Utc::now();

        let err = store
            .apply(record.id, Transition::Claim { lease: lease(now, Duration::seconds(5)) }, now)
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            StoreError::Transition(TransitionError::InvalidTransition { .. })
        ));
        assert_eq!(store.get(record.id).await.unwrap(), Some(record));
    }

    #[tokio::test]
    async fn apply_to_unknown_id_is_not_found() {
        let store = InMemoryNotificationStore::new();
        let id = NotificationId::from_ulid(Ulid::new());
        let err = store
            .apply(id, Transition::Enqueue { not_before: Utc::now() }, Utc::now())
            .await
            .unwrap_err();
        assert_eq!(err, StoreError::NotFound(id));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn exactly_one_concurrent_claim_wins() {
        let store = Arc::new(InMemoryNotificationStore::new());
        let record = store.insert(new_record()).await.unwrap();
        let now = Utc::now();
        store
            .apply(record.id, Transition::Enqueue { not_before: now }, now)
            .await
            .unwrap();

        let id = record.id;
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let store = Arc::clone(&store);
                tokio::spawn(async move {
                    store
                        .apply(
                            id,
                            Transition::Claim {
                                lease: lease(now, Duration::seconds(5)),
                            },
                            now,
                        )
                        .await
                })
            })
            .collect();

        let mut wins = 0;
        for h in handles {
            match h.await.unwrap() {
                Ok(_) => wins += 1,
                Err(e) => assert_eq!(e, StoreError::Transition(TransitionError::AlreadyClaimed)),
            }
        }
        assert_eq!(wins, 1);
    }

    #[tokio::test]
    async fn expired_leases_and_counts() {
        let store = InMemoryNotificationStore::new();
        let now = Utc::now();
        let stale = store.insert(new_record()).await.unwrap();
        let fresh = store.insert(new_record()).await.unwrap();
        let waiting = store.insert(new_record()).await.unwrap();

        for (id, ttl) in [(stale.id, Duration::seconds(-1)), (fresh.id, Duration::seconds(60))] {
            store
                .apply(id, Transition::Enqueue { not_before: now }, now)
                .await
                .unwrap();
            store
                .apply(id, Transition::Claim { lease: lease(now, ttl) }, now)
                .await
                .unwrap();
        }
        store
            .apply(waiting.id, Transition::Enqueue { not_before: now }, now)
            .await
            .unwrap();

        let expired = store.expired_leases(now).await.unwrap();
        assert_eq!(expired.iter().map(|r| r.id).collect::<Vec<_>>(), vec![stale.id]);

        let counts = store.counts().await.unwrap();
        assert_eq!(counts.sending, 2);
        assert_eq!(counts.queued, 1);

        let queued = store.list_by_state(NotificationState::Queued).await.unwrap();
        assert_eq!(queued.len(), 1);
        assert_eq!(queued[0].id, waiting.id);
    }
}
