//! Settle - apply a `Decision` to a claimed notification.
//!
//! Shared by the workers and the lease reaper. The store transition happens
//! first; registry updates and re-enqueueing only follow a transition that
//! actually landed, so a worker that lost its lease causes no side effects.

use chrono::{DateTime, Utc};
use tracing::{debug, error, info, warn};

use super::engine::Shared;
use crate::domain::{
    Decision, LeaseId, NotificationRecord, StoreError, Transition, TransitionError,
};

/// What settling did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Settled {
    Sent,
    Requeued { not_before: DateTime<Utc> },
    /// `deactivated` is true only for the settle that flipped the device.
    Invalidated { deactivated: bool },
    Failed,
    /// The lease was gone (reaped, aborted, or already settled); nothing applied.
    Lost,
}

fn to_chrono(delay: std::time::Duration) -> chrono::Duration {
    chrono::Duration::from_std(delay).unwrap_or_else(|_| chrono::Duration::weeks(52))
}

/// Apply `decision` to `record`, which must have been claimed under `lease`.
pub(crate) async fn settle(
    shared: &Shared,
    record: &NotificationRecord,
    lease: LeaseId,
    decision: Decision,
) -> Result<Settled, StoreError> {
    let id = record.id;
    let now = shared.clock.now();

    let (transition, requeue_at) = match &decision {
        Decision::Success { gateway_id } => (
            Transition::Deliver {
                lease,
                gateway_id: gateway_id.clone(),
            },
            None,
        ),
        Decision::Invalidate { reason } => (
            Transition::Invalidate {
                lease,
                reason: reason.clone(),
            },
            None,
        ),
        Decision::RetryAfter { delay, reason } => {
            let not_before = now.checked_add_signed(to_chrono(*delay)).unwrap_or(now);
            (
                Transition::Retry {
                    lease,
                    not_before,
                    error: reason.clone(),
                },
                Some(not_before),
            )
        }
        Decision::TerminalFailure { reason } => (
            Transition::Fail {
                lease,
                error: reason.clone(),
            },
            None,
        ),
    };

    let updated = match shared.store.apply(id, transition, now).await {
        Ok(updated) => updated,
        Err(StoreError::Transition(TransitionError::RetryBudgetExhausted { .. })) => {
            // Only reachable with a custom Decider that ignores the budget.
            let reason = decision_reason(&decision);
            warn!(notification_id = %id, reason, "retry refused by the state machine, failing instead");
            return settle_failed(shared, record, lease, reason, now).await;
        }
        Err(err) => return lost_or_err(record, err),
    };

    match decision {
        Decision::Success { gateway_id } => {
            if let Err(err) = shared.registry.record_delivery(&record.device_token, now).await {
                warn!(notification_id = %id, error = %err, "failed to stamp device delivery time");
            }
            info!(
                notification_id = %id,
                device = %record.device_token.redacted(),
                gateway_id = %gateway_id,
                retry_count = updated.retry_count,
                "notification sent"
            );
            Ok(Settled::Sent)
        }
        Decision::Invalidate { reason } => {
            let deactivated = match shared.registry.deactivate(&record.device_token, now).await {
                Ok(flipped) => flipped,
                Err(err) => {
                    warn!(notification_id = %id, error = %err, "failed to deactivate device");
                    false
                }
            };
            if deactivated {
                warn!(
                    notification_id = %id,
                    device = %record.device_token.redacted(),
                    reason = %reason,
                    "device token invalid, device deactivated"
                );
            } else {
                debug!(notification_id = %id, reason = %reason, "device token invalid, device already inactive");
            }
            Ok(Settled::Invalidated { deactivated })
        }
        Decision::RetryAfter { delay, reason } => {
            let not_before = requeue_at.unwrap_or(now);
            shared.queue.enqueue_retry(id, not_before, updated.sequence);
            debug!(
                notification_id = %id,
                retry_count = updated.retry_count,
                max_retries = updated.max_retries,
                delay_ms = delay.as_millis() as u64,
                reason = %reason,
                "delivery failed, retry scheduled"
            );
            Ok(Settled::Requeued { not_before })
        }
        Decision::TerminalFailure { reason } => {
            error!(
                notification_id = %id,
                retry_count = updated.retry_count,
                reason = %reason,
                "notification failed"
            );
            Ok(Settled::Failed)
        }
    }
}

async fn settle_failed(
    shared: &Shared,
    record: &NotificationRecord,
    lease: LeaseId,
    reason: &str,
    now: DateTime<Utc>,
) -> Result<Settled, StoreError> {
    let transition = Transition::Fail {
        lease,
        error: reason.to_string(),
    };
    match shared.store.apply(record.id, transition, now).await {
        Ok(updated) => {
            error!(notification_id = %record.id, retry_count = updated.retry_count, reason, "notification failed");
            Ok(Settled::Failed)
        }
        Err(err) => lost_or_err(record, err),
    }
}

fn decision_reason(decision: &Decision) -> &str {
    match decision {
        Decision::Success { gateway_id } => gateway_id,
        Decision::Invalidate { reason }
        | Decision::RetryAfter { reason, .. }
        | Decision::TerminalFailure { reason } => reason,
    }
}

/// A rejected settle means someone else owns the outcome now. Only store
/// outages are real errors.
fn lost_or_err(record: &NotificationRecord, err: StoreError) -> Result<Settled, StoreError> {
    match err {
        StoreError::Transition(TransitionError::LeaseMismatch) => {
            debug!(notification_id = %record.id, "lease lost before settling, outcome dropped");
            Ok(Settled::Lost)
        }
        StoreError::Transition(TransitionError::InvalidTransition { from, event }) if from.is_terminal() => {
            info!(notification_id = %record.id, state = %from, event, "notification already terminal, outcome dropped");
            Ok(Settled::Lost)
        }
        StoreError::Transition(err) => {
            warn!(notification_id = %record.id, error = %err, "contract violation while settling");
            Ok(Settled::Lost)
        }
        StoreError::NotFound(_) => {
            warn!(notification_id = %record.id, "notification vanished while settling");
            Ok(Settled::Lost)
        }
        other => Err(other),
    }
}
