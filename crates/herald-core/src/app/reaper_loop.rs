//! ReaperLoop - takes back expired leases and re-indexes orphaned records.
//!
//! A worker that died (or hung past its lease) leaves its notification in
//! `sending`. The reaper treats the expired lease as a transient failure, so
//! the attempt counts against the retry budget like any other.

use std::sync::Arc;

use chrono::Duration as ChronoDuration;
use serde::Serialize;
use tokio::sync::watch;
use tokio::time::MissedTickBehavior;
use tracing::{debug, warn};

use super::engine::Shared;
use super::settle::{Settled, settle};
use super::worker_loop::wait_for_shutdown;
use crate::domain::outcome::LEASE_EXPIRED;
use crate::domain::{DeliveryOutcome, NotificationState, StoreError};

/// What one reaper pass did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ReapReport {
    /// Expired leases turned into a retry or a terminal failure.
    pub reclaimed: usize,
    /// `queued` records that were missing from the dispatch queue.
    pub reindexed: usize,
}

pub(crate) async fn reaper_loop(shared: Arc<Shared>, mut shutdown_rx: watch::Receiver<bool>) {
    let mut ticker = tokio::time::interval(shared.config.reap_interval());
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    // The first tick completes immediately; skip it so start-up is quiet.
    ticker.tick().await;

    loop {
        tokio::select! {
            _ = wait_for_shutdown(&mut shutdown_rx) => break,
            _ = ticker.tick() => {}
        }
        match reap_once(&shared).await {
            Ok(report) if report != ReapReport::default() => {
                warn!(reclaimed = report.reclaimed, reindexed = report.reindexed, "reaper recovered stuck notifications");
            }
            Ok(_) => {}
            Err(err) => warn!(error = %err, "reaper pass failed"),
        }
    }
    debug!("reaper stopped");
}

/// One reaper pass.
///
/// - `sending` records with an expired lease are settled as `LeaseExpired`
/// - `queued` records missing from the queue are re-indexed once they have been
///   eligible for a whole lease period (younger ones may still be on their way
///   to a worker)
pub(crate) async fn reap_once(shared: &Shared) -> Result<ReapReport, StoreError> {
    let now = shared.clock.now();
    let mut report = ReapReport::default();

    for record in shared.store.expired_leases(now).await? {
        let Some(lease) = record.lease else {
            continue;
        };
        warn!(
            notification_id = %record.id,
            worker = lease.worker,
            expired_at = %lease.expires_at,
            "lease expired, reclaiming"
        );
        let outcome = DeliveryOutcome::transient(LEASE_EXPIRED);
        let decision = shared
            .decider
            .decide(&outcome, record.retry_count, record.max_retries);
        if settle(shared, &record, lease.id, decision).await? != Settled::Lost {
            report.reclaimed += 1;
        }
    }

    let grace = ChronoDuration::from_std(shared.config.lease_timeout())
        .unwrap_or_else(|_| ChronoDuration::minutes(10));
    for record in shared.store.list_by_state(NotificationState::Queued).await? {
        let eligible_since = record.not_before.unwrap_or(record.created_at);
        if eligible_since + grace > now || shared.queue.contains(record.id) {
            continue;
        }
        if shared
            .queue
            .enqueue_retry(record.id, eligible_since, record.sequence)
        {
            debug!(notification_id = %record.id, "re-indexed orphaned queued notification");
            report.reindexed += 1;
        }
    }

    Ok(report)
}
