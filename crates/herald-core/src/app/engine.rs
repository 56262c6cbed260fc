//! DispatchEngine - the boundary intake and operators talk to.

use std::sync::Arc;

use serde::Serialize;
use tokio::sync::Semaphore;
use tracing::{info, warn};

use super::builder::EngineBuilder;
use super::reaper_loop::{ReapReport, reap_once};
use super::settle::Settled;
use super::status::EngineStats;
use super::worker_loop::{WorkerGroup, process};
use crate::config::EngineConfig;
use crate::domain::{
    Decider, DeviceEndpoint, DeviceToken, NotificationId, NotificationPayload, NotificationRecord,
    NotificationState, Platform, StoreError, SubmitError, Transition,
};
use crate::ports::{Clock, DeviceRegistry, IdGenerator, NotificationStore, Transport};
use crate::queue::DispatchQueue;

/// Largest token list `submit_bulk` accepts.
pub const MAX_BULK_TOKENS: usize = 1000;

/// Everything the workers, the reaper and intake share.
pub(crate) struct Shared {
    pub(crate) config: EngineConfig,
    pub(crate) store: Arc<dyn NotificationStore>,
    pub(crate) registry: Arc<dyn DeviceRegistry>,
    pub(crate) transport: Arc<dyn Transport>,
    pub(crate) decider: Arc<dyn Decider>,
    pub(crate) clock: Arc<dyn Clock>,
    pub(crate) ids: Arc<dyn IdGenerator>,
    pub(crate) queue: DispatchQueue,
    /// Caps attempts in flight (claim to settle) independently of the worker count.
    pub(crate) transport_permits: Semaphore,
}

/// What `recover` put back into the dispatch queue.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct RecoveryReport {
    /// `pending` records (accepted, never enqueued) moved to `queued`.
    pub enqueued: usize,
    /// `queued` records re-indexed.
    pub reindexed: usize,
}

/// Per-token result of `submit_bulk`.
pub type BulkResult = Vec<(DeviceToken, Result<NotificationId, SubmitError>)>;

/// The notification dispatch engine.
///
/// Cheap to clone; clones share the same queue, store and registry.
#[derive(Clone)]
pub struct DispatchEngine {
    shared: Arc<Shared>,
}

impl DispatchEngine {
    pub fn builder() -> EngineBuilder {
        EngineBuilder::new()
    }

    pub(crate) fn from_shared(shared: Shared) -> Self {
        Self {
            shared: Arc::new(shared),
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.shared.config
    }

    /// Create or overwrite (and reactivate) a device endpoint.
    pub async fn register_device(
        &self,
        token: DeviceToken,
        platform: Platform,
    ) -> Result<DeviceEndpoint, StoreError> {
        let now = self.shared.clock.now();
        let device = self.shared.registry.upsert(token, platform, now).await?;
        info!(device = %device.token.redacted(), platform = %device.platform, "device registered");
        Ok(device)
    }

    pub async fn device(&self, token: &DeviceToken) -> Result<Option<DeviceEndpoint>, StoreError> {
        self.shared.registry.get(token).await
    }

    /// Accept one notification.
    ///
    /// The token must belong to an active device. Queue capacity is reserved
    /// before anything is written, so `QueueFull` leaves the store untouched.
    /// A device deactivated after this check fails permanently at delivery.
    pub async fn submit(
        &self,
        token: DeviceToken,
        payload: NotificationPayload,
    ) -> Result<NotificationId, SubmitError> {
        if !token.is_well_formed() {
            return Err(SubmitError::MalformedToken(token.redacted()));
        }
        let shared = &self.shared;
        if !shared.registry.is_active(&token).await? {
            return Err(SubmitError::UnknownDevice(token.redacted()));
        }
        let slot = shared.queue.try_reserve()?;

        let now = shared.clock.now();
        let id = shared.ids.generate_notification_id();
        let record = NotificationRecord::new(id, token, payload, shared.config.max_retries, now);
        let record = shared.store.insert(record).await?;
        shared
            .store
            .apply(id, Transition::Enqueue { not_before: now }, now)
            .await?;
        slot.commit(id, now, record.sequence);

        info!(
            notification_id = %id,
            device = %record.device_token.redacted(),
            max_retries = record.max_retries,
            "notification queued"
        );
        Ok(id)
    }

    /// Submit the same payload to many devices; each token is an independent `submit`.
    pub async fn submit_bulk(
        &self,
        tokens: Vec<DeviceToken>,
        payload: NotificationPayload,
    ) -> Result<BulkResult, SubmitError> {
        if tokens.len() > MAX_BULK_TOKENS {
            return Err(SubmitError::BulkTooLarge {
                len: tokens.len(),
                max: MAX_BULK_TOKENS,
            });
        }
        let mut results = Vec::with_capacity(tokens.len());
        for token in tokens {
            let result = self.submit(token.clone(), payload.clone()).await;
            results.push((token, result));
        }
        let accepted = results.iter().filter(|(_, r)| r.is_ok()).count();
        info!(accepted, requested = results.len(), "bulk submit");
        Ok(results)
    }

    pub async fn notification(&self, id: NotificationId) -> Result<Option<NotificationRecord>, StoreError> {
        self.shared.store.get(id).await
    }

    pub async fn notifications_in(
        &self,
        state: NotificationState,
    ) -> Result<Vec<NotificationRecord>, StoreError> {
        self.shared.store.list_by_state(state).await
    }

    pub async fn stats(&self) -> Result<EngineStats, StoreError> {
        let states = self.shared.store.counts().await?;
        let (active_devices, inactive_devices) = self.shared.registry.count_by_activity().await?;
        Ok(EngineStats {
            states,
            queue_depth: self.shared.queue.len(),
            queue_capacity: self.shared.queue.capacity(),
            active_devices,
            inactive_devices,
        })
    }

    /// Administrative abort: any non-terminal notification becomes `failed`.
    ///
    /// A worker currently holding the lease finds out when it settles and
    /// applies nothing.
    pub async fn abort(
        &self,
        id: NotificationId,
        reason: impl Into<String>,
    ) -> Result<NotificationRecord, StoreError> {
        let now = self.shared.clock.now();
        let reason = reason.into();
        let record = self
            .shared
            .store
            .apply(id, Transition::Abort { reason: reason.clone() }, now)
            .await?;
        self.shared.queue.remove(id);
        warn!(notification_id = %id, reason = %reason, "notification aborted");
        Ok(record)
    }

    /// Rebuild the dispatch queue from the store (after a restart).
    ///
    /// `pending` records are enqueued; `queued` records not yet indexed are
    /// re-indexed at their stored `not_before`. Capacity is not checked; all
    /// of this work was accepted before.
    pub async fn recover(&self) -> Result<RecoveryReport, StoreError> {
        let shared = &self.shared;
        let now = shared.clock.now();
        let mut report = RecoveryReport::default();

        for record in shared.store.list_by_state(NotificationState::Pending).await? {
            match shared
                .store
                .apply(record.id, Transition::Enqueue { not_before: now }, now)
                .await
            {
                Ok(updated) => {
                    shared.queue.enqueue_retry(updated.id, now, updated.sequence);
                    report.enqueued += 1;
                }
                Err(err) if err.is_contention() => {}
                Err(StoreError::Transition(_)) => {}
                Err(err) => return Err(err),
            }
        }

        for record in shared.store.list_by_state(NotificationState::Queued).await? {
            let not_before = record.not_before.unwrap_or(now);
            if shared
                .queue
                .enqueue_retry(record.id, not_before, record.sequence)
            {
                report.reindexed += 1;
            }
        }

        info!(enqueued = report.enqueued, reindexed = report.reindexed, "dispatch queue recovered");
        Ok(report)
    }

    /// Run one lease-reaper pass now.
    pub async fn reap_expired(&self) -> Result<ReapReport, StoreError> {
        reap_once(&self.shared).await
    }

    /// Process every currently eligible notification on the calling task.
    ///
    /// The same path the workers take, without spawning anything; useful for
    /// one-shot tools and deterministic tests.
    pub async fn dispatch_ready(&self) -> Result<Vec<Settled>, StoreError> {
        let mut settled = Vec::new();
        loop {
            let batch = self.shared.queue.dequeue_batch(self.shared.config.batch_size);
            if batch.is_empty() {
                return Ok(settled);
            }
            for id in batch {
                if let Some(outcome) = process(0, &self.shared, id).await? {
                    settled.push(outcome);
                }
            }
        }
    }

    /// Spawn the worker pool, dispatcher and reaper.
    pub fn start(&self) -> WorkerGroup {
        WorkerGroup::spawn(Arc::clone(&self.shared))
    }
}
