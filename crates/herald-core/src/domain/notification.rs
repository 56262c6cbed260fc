//! Notification record and its lifecycle state machine.
//!
//! State transitions:
//! - Pending -> Queued (enqueued)
//! - Queued -> Sending (worker claims, lease issued)
//! - Sending -> Sent (gateway accepted)
//! - Sending -> InvalidToken (permanent token failure)
//! - Sending -> Queued (transient failure, retry_count < max_retries)
//! - Sending -> Failed (transient failure with the budget spent, or expired)
//! - any non-terminal -> Failed (administrative abort)
//!
//! Every mutation goes through `NotificationRecord::apply`, which validates
//! first and mutates second, so a rejected transition leaves the record as it was.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use super::device::DeviceToken;
use super::errors::TransitionError;
use super::ids::{LeaseId, NotificationId};
use super::payload::NotificationPayload;

/// Persisted lifecycle state. The snake_case names are what reporting tools read.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationState {
    /// Created by intake, not yet admitted to the queue.
    Pending,

    /// Waiting in the dispatch queue (first attempt or retry).
    Queued,

    /// Claimed by a worker; a lease is held.
    Sending,

    /// Accepted by the gateway.
    Sent,

    /// Gave up (retry budget spent, expired, or aborted).
    Failed,

    /// The device token was rejected permanently.
    InvalidToken,
}

impl NotificationState {
    pub const ALL: [NotificationState; 6] = [
        NotificationState::Pending,
        NotificationState::Queued,
        NotificationState::Sending,
        NotificationState::Sent,
        NotificationState::Failed,
        NotificationState::InvalidToken,
    ];

    /// Is this a terminal state (no further transitions)?
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            NotificationState::Sent | NotificationState::Failed | NotificationState::InvalidToken
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            NotificationState::Pending => "pending",
            NotificationState::Queued => "queued",
            NotificationState::Sending => "sending",
            NotificationState::Sent => "sent",
            NotificationState::Failed => "failed",
            NotificationState::InvalidToken => "invalid_token",
        }
    }
}

impl fmt::Display for NotificationState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A time-bounded exclusive claim on a notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Lease {
    pub id: LeaseId,
    pub worker: usize,
    pub claimed_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl Lease {
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at <= now
    }
}

/// An event applied to a notification record.
///
/// Settling events (`Deliver`, `Invalidate`, `Retry`, `Fail`) carry the lease id
/// of the worker that produced them; they are rejected unless that lease is
/// still the one on the record.
#[derive(Debug, Clone, PartialEq)]
pub enum Transition {
    Enqueue {
        not_before: DateTime<Utc>,
    },
    Claim {
        lease: Lease,
    },
    Deliver {
        lease: LeaseId,
        gateway_id: String,
    },
    Invalidate {
        lease: LeaseId,
        reason: String,
    },
    Retry {
        lease: LeaseId,
        not_before: DateTime<Utc>,
        error: String,
    },
    Fail {
        lease: LeaseId,
        error: String,
    },
    Abort {
        reason: String,
    },
}

impl Transition {
    pub fn name(&self) -> &'static str {
        match self {
            Transition::Enqueue { .. } => "enqueue",
            Transition::Claim { .. } => "claim",
            Transition::Deliver { .. } => "deliver",
            Transition::Invalidate { .. } => "invalidate",
            Transition::Retry { .. } => "retry",
            Transition::Fail { .. } => "fail",
            Transition::Abort { .. } => "abort",
        }
    }

    fn settling_lease(&self) -> Option<LeaseId> {
        match self {
            Transition::Deliver { lease, .. }
            | Transition::Invalidate { lease, .. }
            | Transition::Retry { lease, .. }
            | Transition::Fail { lease, .. } => Some(*lease),
            _ => None,
        }
    }
}

/// Durable record of one notification. Single source of truth for its state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NotificationRecord {
    pub id: NotificationId,

    /// Insertion order assigned by the store; breaks ties between equal `not_before`.
    pub sequence: u64,

    /// Weak reference: the endpoint may be missing or inactive by delivery time.
    pub device_token: DeviceToken,
    pub payload: NotificationPayload,

    pub state: NotificationState,
    pub retry_count: u32,
    pub max_retries: u32,
    pub last_error: Option<String>,

    pub created_at: DateTime<Utc>,
    pub queued_at: Option<DateTime<Utc>>,
    /// Earliest instant the next attempt may start.
    pub not_before: Option<DateTime<Utc>>,
    pub sent_at: Option<DateTime<Utc>>,
    pub updated_at: DateTime<Utc>,

    /// Set only on success.
    pub gateway_delivery_id: Option<String>,

    /// Present exactly while the state is `Sending`.
    pub lease: Option<Lease>,
}

impl NotificationRecord {
    pub fn new(
        id: NotificationId,
        device_token: DeviceToken,
        payload: NotificationPayload,
        max_retries: u32,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id,
            sequence: 0,
            device_token,
            payload,
            state: NotificationState::Pending,
            retry_count: 0,
            max_retries,
            last_error: None,
            created_at: now,
            queued_at: None,
            not_before: None,
            sent_at: None,
            updated_at: now,
            gateway_delivery_id: None,
            lease: None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.state.is_terminal()
    }

    /// Apply one transition. Validation happens before any field changes.
    pub fn apply(&mut self, transition: Transition, now: DateTime<Utc>) -> Result<(), TransitionError> {
        self.check(&transition)?;

        match transition {
            Transition::Enqueue { not_before } => {
                self.state = NotificationState::Queued;
                self.queued_at = Some(now);
                self.not_before = Some(not_before);
            }
            Transition::Claim { lease } => {
                self.state = NotificationState::Sending;
                self.lease = Some(lease);
            }
            Transition::Deliver { gateway_id, .. } => {
                self.state = NotificationState::Sent;
                self.sent_at = Some(now);
                self.gateway_delivery_id = Some(gateway_id);
                self.lease = None;
            }
            Transition::Invalidate { reason, .. } => {
                self.state = NotificationState::InvalidToken;
                self.last_error = Some(reason);
                self.lease = None;
            }
            Transition::Retry {
                not_before, error, ..
            } => {
                self.state = NotificationState::Queued;
                self.retry_count += 1;
                self.last_error = Some(error);
                self.queued_at = Some(now);
                self.not_before = Some(not_before);
                self.lease = None;
            }
            Transition::Fail { error, .. } | Transition::Abort { reason: error } => {
                self.state = NotificationState::Failed;
                self.last_error = Some(error);
                self.lease = None;
            }
        }

        self.updated_at = now;
        Ok(())
    }

    fn check(&self, transition: &Transition) -> Result<(), TransitionError> {
        use NotificationState::*;

        let invalid = || TransitionError::InvalidTransition {
            from: self.state,
            event: transition.name(),
        };

        if let Some(lease) = transition.settling_lease() {
            if self.state.is_terminal() {
                return Err(invalid());
            }
            let held = self.state == Sending && self.lease.is_some_and(|l| l.id == lease);
            if !held {
                return Err(TransitionError::LeaseMismatch);
            }
            if matches!(transition, Transition::Retry { .. }) && self.retry_count >= self.max_retries {
                return Err(TransitionError::RetryBudgetExhausted {
                    retry_count: self.retry_count,
                    max_retries: self.max_retries,
                });
            }
            return Ok(());
        }

        match (self.state, transition) {
            (Pending, Transition::Enqueue { .. }) => Ok(()),
            (Queued, Transition::Claim { .. }) => Ok(()),
            (Sending, Transition::Claim { .. }) => Err(TransitionError::AlreadyClaimed),
            (state, Transition::Abort { .. }) if !state.is_terminal() => Ok(()),
            _ => Err(invalid()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use rstest::rstest;
    use ulid::Ulid;

    fn lease_at(now: DateTime<Utc>) -> Lease {
        Lease {
            id: LeaseId::from_ulid(Ulid::new()),
            worker: 0,
            claimed_at: now,
            expires_at: now + Duration::seconds(30),
        }
    }

    fn record(max_retries: u32) -> NotificationRecord {
        NotificationRecord::new(
            NotificationId::from_ulid(Ulid::new()),
            DeviceToken::new("token-1"),
            NotificationPayload::new("t", "b"),
            max_retries,
            Utc::now(),
        )
    }

    /// Drive a fresh record to `state`, returning it with the lease used (if any).
    fn record_in(state: NotificationState) -> (NotificationRecord, Lease) {
        let now = Utc::now();
        let lease = lease_at(now);
        let mut r = record(3);
        if state == NotificationState::Pending {
            return (r, lease);
        }
        r.apply(Transition::Enqueue { not_before: now }, now).unwrap();
        if state == NotificationState::Queued {
            return (r, lease);
        }
        r.apply(Transition::Claim { lease }, now).unwrap();
        let settle = match state {
            NotificationState::Sending => None,
            NotificationState::Sent => Some(Transition::Deliver {
                lease: lease.id,
                gateway_id: "gw".into(),
            }),
            NotificationState::Failed => Some(Transition::Fail {
                lease: lease.id,
                error: "e".into(),
            }),
            NotificationState::InvalidToken => Some(Transition::Invalidate {
                lease: lease.id,
                reason: "BadDeviceToken".into(),
            }),
            _ => unreachable!(),
        };
        if let Some(t) = settle {
            r.apply(t, now).unwrap();
        }
        (r, lease)
    }

    #[test]
    fn happy_path_records_delivery() {
        let (mut r, lease) = record_in(NotificationState::Sending);
        assert_eq!(r.lease.map(|l| l.id), Some(lease.id));

        r.apply(
            Transition::Deliver {
                lease: lease.id,
                gateway_id: "abc".into(),
            },
            Utc::now(),
        )
        .unwrap();

        assert_eq!(r.state, NotificationState::Sent);
        assert_eq!(r.gateway_delivery_id.as_deref(), Some("abc"));
        assert!(r.sent_at.is_some());
        assert!(r.lease.is_none());
        assert_eq!(r.retry_count, 0);
    }

    #[test]
    fn retry_requeues_and_counts() {
        let (mut r, lease) = record_in(NotificationState::Sending);
        let later = Utc::now() + Duration::seconds(60);

        r.apply(
            Transition::Retry {
                lease: lease.id,
                not_before: later,
                error: "ServerError".into(),
            },
            Utc::now(),
        )
        .unwrap();

        assert_eq!(r.state, NotificationState::Queued);
        assert_eq!(r.retry_count, 1);
        assert_eq!(r.not_before, Some(later));
        assert_eq!(r.last_error.as_deref(), Some("ServerError"));
        assert!(r.lease.is_none());
    }

    #[test]
    fn retry_is_refused_once_budget_is_spent() {
        let now = Utc::now();
        let mut r = record(0);
        let lease = lease_at(now);
        r.apply(Transition::Enqueue { not_before: now }, now).unwrap();
        r.apply(Transition::Claim { lease }, now).unwrap();
        let before = r.clone();

        let err = r
            .apply(
                Transition::Retry {
                    lease: lease.id,
                    not_before: now,
                    error: "x".into(),
                },
                now,
            )
            .unwrap_err();

        assert_eq!(
            err,
            TransitionError::RetryBudgetExhausted {
                retry_count: 0,
                max_retries: 0
            }
        );
        assert_eq!(r, before);
    }

    #[test]
    fn second_claim_observes_already_claimed() {
        let (mut r, _) = record_in(NotificationState::Sending);
        let before = r.clone();

        let err = r
            .apply(Transition::Claim { lease: lease_at(Utc::now()) }, Utc::now())
            .unwrap_err();

        assert_eq!(err, TransitionError::AlreadyClaimed);
        assert_eq!(r, before);
    }

    #[test]
    fn settling_with_a_foreign_lease_is_rejected() {
        let (mut r, _) = record_in(NotificationState::Sending);
        let stranger = lease_at(Utc::now());

        let err = r
            .apply(
                Transition::Deliver {
                    lease: stranger.id,
                    gateway_id: "x".into(),
                },
                Utc::now(),
            )
            .unwrap_err();

        assert_eq!(err, TransitionError::LeaseMismatch);
        assert_eq!(r.state, NotificationState::Sending);
    }

    #[test]
    fn settling_after_requeue_is_a_lost_lease() {
        let (mut r, lease) = record_in(NotificationState::Queued);

        let err = r
            .apply(
                Transition::Fail {
                    lease: lease.id,
                    error: "x".into(),
                },
                Utc::now(),
            )
            .unwrap_err();

        assert_eq!(err, TransitionError::LeaseMismatch);
    }

    #[rstest]
    #[case::pending(NotificationState::Pending)]
    #[case::queued(NotificationState::Queued)]
    #[case::sending(NotificationState::Sending)]
    fn abort_is_allowed_from_non_terminal(#[case] state: NotificationState) {
        let (mut r, _) = record_in(state);

        r.apply(
            Transition::Abort {
                reason: "cancelled by operator".into(),
            },
            Utc::now(),
        )
        .unwrap();

        assert_eq!(r.state, NotificationState::Failed);
        assert_eq!(r.last_error.as_deref(), Some("cancelled by operator"));
        assert!(r.lease.is_none());
    }

    #[rstest]
    fn nothing_leaves_a_terminal_state(
        #[values(
            NotificationState::Sent,
            NotificationState::Failed,
            NotificationState::InvalidToken
        )]
        state: NotificationState,
        #[values("enqueue", "claim", "deliver", "invalidate", "retry", "fail", "abort")]
        event: &str,
    ) {
        let (mut r, lease) = record_in(state);
        let now = Utc::now();
        let transition = match event {
            "enqueue" => Transition::Enqueue { not_before: now },
            "claim" => Transition::Claim { lease: lease_at(now) },
            "deliver" => Transition::Deliver {
                lease: lease.id,
                gateway_id: "gw".into(),
            },
            "invalidate" => Transition::Invalidate {
                lease: lease.id,
                reason: "r".into(),
            },
            "retry" => Transition::Retry {
                lease: lease.id,
                not_before: now,
                error: "e".into(),
            },
            "fail" => Transition::Fail {
                lease: lease.id,
                error: "e".into(),
            },
            _ => Transition::Abort { reason: "r".into() },
        };
        let before = r.clone();

        let err = r.apply(transition, now).unwrap_err();

        assert!(matches!(err, TransitionError::InvalidTransition { from, .. } if from == state));
        assert_eq!(r, before);
    }

    #[rstest]
    #[case::claim_pending(NotificationState::Pending, "claim")]
    #[case::enqueue_queued(NotificationState::Queued, "enqueue")]
    #[case::enqueue_sending(NotificationState::Sending, "enqueue")]
    fn out_of_order_events_are_invalid(#[case] state: NotificationState, #[case] event: &str) {
        let (mut r, _) = record_in(state);
        let now = Utc::now();
        let transition = match event {
            "claim" => Transition::Claim { lease: lease_at(now) },
            _ => Transition::Enqueue { not_before: now },
        };

        let err = r.apply(transition, now).unwrap_err();
        assert!(matches!(err, TransitionError::InvalidTransition { .. }));
    }

    #[test]
    fn state_serializes_as_snake_case() {
        let names: Vec<String> = NotificationState::ALL
            .iter()
            .map(|s| serde_json::to_string(s).unwrap())
            .collect();
        assert_eq!(
            names,
            vec![
                "\"pending\"",
                "\"queued\"",
                "\"sending\"",
                "\"sent\"",
                "\"failed\"",
                "\"invalid_token\""
            ]
        );
        assert_eq!(NotificationState::InvalidToken.to_string(), "invalid_token");
    }

    #[test]
    fn lease_expiry_is_inclusive() {
        let now = Utc::now();
        let lease = lease_at(now);
        assert!(!lease.is_expired(now));
        assert!(lease.is_expired(lease.expires_at));
    }
}
