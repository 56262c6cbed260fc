//! WorkerLoop - the delivery worker pool.
//!
//! One dispatcher task drains the dispatch queue into a bounded channel; a
//! fixed pool of workers takes ids from that channel one at a time:
//!
//! 1. wait (at most one lease period) for a transport slot
//! 2. claim (queued -> sending) with a fresh lease; a lost race is skipped
//! 3. expired payload -> terminal failure, transport not called
//! 4. missing or inactive device -> permanent `DeviceInactive`
//! 5. transport call under the transport timeout, unless the lease already ran out
//! 6. decide, then settle
//!
//! The slot is held from before the claim until the notification is settled,
//! so a lease only ever covers work this worker is actually doing.
//!
//! Shutdown stops the dispatcher; workers finish what is already in the
//! channel and exit once it is closed.

use std::sync::Arc;

use chrono::Duration as ChronoDuration;
use tokio::sync::{Mutex, mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::engine::Shared;
use super::reaper_loop::reaper_loop;
use super::settle::{Settled, settle};
use crate::domain::outcome::{DEVICE_INACTIVE, TIMEOUT};
use crate::domain::{
    Decision, DeliveryOutcome, Lease, NotificationId, NotificationRecord, StoreError, Transition,
    TransitionError,
};

/// Handle to a running worker pool (dispatcher, workers and reaper).
///
/// - `request_shutdown()` stops taking new work
/// - `shutdown_and_join()` also waits until every task has exited
pub struct WorkerGroup {
    shutdown_tx: watch::Sender<bool>,
    joins: Vec<JoinHandle<()>>,
}

impl WorkerGroup {
    pub(crate) fn spawn(shared: Arc<Shared>) -> Self {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let worker_count = shared.config.worker_count;
        let (work_tx, work_rx) = mpsc::channel::<NotificationId>(worker_count);
        let work_rx = Arc::new(Mutex::new(work_rx));

        let mut joins = Vec::with_capacity(worker_count + 2);
        joins.push(tokio::spawn(dispatch_loop(
            Arc::clone(&shared),
            work_tx,
            shutdown_rx.clone(),
        )));
        for worker_id in 0..worker_count {
            joins.push(tokio::spawn(worker_loop(
                worker_id,
                Arc::clone(&shared),
                Arc::clone(&work_rx),
            )));
        }
        joins.push(tokio::spawn(reaper_loop(Arc::clone(&shared), shutdown_rx)));

        info!(workers = worker_count, "worker pool started");
        Self { shutdown_tx, joins }
    }

    /// Request shutdown. In-flight deliveries are not cancelled.
    pub fn request_shutdown(&self) {
        // receivers may already be gone
        let _ = self.shutdown_tx.send(true);
    }

    pub async fn shutdown_and_join(self) {
        self.request_shutdown();
        for join in self.joins {
            if let Err(err) = join.await {
                warn!(error = %err, "worker task ended abnormally");
            }
        }
        info!("worker pool stopped");
    }
}

/// Resolves once shutdown was requested (or the sender is gone).
pub(crate) async fn wait_for_shutdown(rx: &mut watch::Receiver<bool>) {
    loop {
        if *rx.borrow() {
            return;
        }
        if rx.changed().await.is_err() {
            return;
        }
    }
}

async fn dispatch_loop(
    shared: Arc<Shared>,
    work_tx: mpsc::Sender<NotificationId>,
    mut shutdown_rx: watch::Receiver<bool>,
) {
    let batch_size = shared.config.batch_size;
    let poll_interval = shared.config.poll_interval();

    'run: loop {
        let batch = tokio::select! {
            _ = wait_for_shutdown(&mut shutdown_rx) => break 'run,
            batch = shared.queue.next_batch(batch_size, poll_interval) => batch,
        };

        for id in batch {
            // Unsent ids stay `queued` in the store; recovery re-indexes them.
            let sent = tokio::select! {
                sent = work_tx.send(id) => sent.is_ok(),
                _ = wait_for_shutdown(&mut shutdown_rx) => false,
            };
            if !sent {
                break 'run;
            }
        }
    }
    debug!("dispatcher stopped");
}

async fn worker_loop(
    worker_id: usize,
    shared: Arc<Shared>,
    work_rx: Arc<Mutex<mpsc::Receiver<NotificationId>>>,
) {
    loop {
        let next = work_rx.lock().await.recv().await;
        let Some(id) = next else {
            break;
        };
        if let Err(err) = process(worker_id, &shared, id).await {
            // The record keeps its lease; the reaper retries it once the lease expires.
            warn!(worker = worker_id, notification_id = %id, error = %err, "delivery attempt aborted");
        }
    }
    debug!(worker = worker_id, "worker stopped");
}

/// One delivery attempt for `id`, from claim to settle.
pub(crate) async fn process(
    worker_id: usize,
    shared: &Shared,
    id: NotificationId,
) -> Result<Option<Settled>, StoreError> {
    let lease_timeout = shared.config.lease_timeout();
    let _permit = match tokio::time::timeout(lease_timeout, shared.transport_permits.acquire()).await {
        Ok(Ok(permit)) => permit,
        Ok(Err(_)) => {
            debug!(worker = worker_id, notification_id = %id, "transport closed, id left queued");
            return Ok(None);
        }
        Err(_) => {
            // Still `queued` in the store; the reaper re-indexes it.
            warn!(worker = worker_id, notification_id = %id, "no transport slot within a lease period, id left queued");
            return Ok(None);
        }
    };

    let now = shared.clock.now();
    let lease_ttl =
        ChronoDuration::from_std(lease_timeout).unwrap_or_else(|_| ChronoDuration::minutes(10));
    let lease = Lease {
        id: shared.ids.generate_lease_id(),
        worker: worker_id,
        claimed_at: now,
        expires_at: now + lease_ttl,
    };

    let record = match shared.store.apply(id, Transition::Claim { lease }, now).await {
        Ok(record) => record,
        Err(StoreError::Transition(TransitionError::AlreadyClaimed)) => {
            debug!(worker = worker_id, notification_id = %id, "already claimed by another worker");
            return Ok(None);
        }
        Err(StoreError::Transition(TransitionError::InvalidTransition { from, .. })) => {
            debug!(worker = worker_id, notification_id = %id, state = %from, "stale queue entry skipped");
            return Ok(None);
        }
        Err(StoreError::NotFound(_)) => {
            warn!(worker = worker_id, notification_id = %id, "queued id has no record");
            return Ok(None);
        }
        Err(err) => return Err(err),
    };

    if record.payload.is_expired(now) {
        let decision = Decision::TerminalFailure {
            reason: "expired before delivery".to_string(),
        };
        return settle(shared, &record, lease.id, decision).await.map(Some);
    }

    let outcome = match shared.registry.is_active(&record.device_token).await {
        Ok(true) if lease.is_expired(shared.clock.now()) => {
            // The reaper owns it now.
            warn!(worker = worker_id, notification_id = %id, "lease expired before the transport call");
            return Ok(Some(Settled::Lost));
        }
        Ok(true) => deliver(shared, &record).await,
        Ok(false) => DeliveryOutcome::permanent(DEVICE_INACTIVE),
        Err(err) => DeliveryOutcome::transient(format!("registry unavailable: {err}")),
    };

    let decision = shared
        .decider
        .decide(&outcome, record.retry_count, record.max_retries);
    settle(shared, &record, lease.id, decision).await.map(Some)
}

/// Transport call bounded by the transport timeout. The caller holds a permit.
async fn deliver(shared: &Shared, record: &NotificationRecord) -> DeliveryOutcome {
    match tokio::time::timeout(
        shared.config.transport_timeout(),
        shared.transport.deliver(&record.device_token, &record.payload),
    )
    .await
    {
        Ok(outcome) => outcome,
        Err(_) => {
            debug!(notification_id = %record.id, "transport call timed out");
            DeliveryOutcome::transient(TIMEOUT)
        }
    }
}
