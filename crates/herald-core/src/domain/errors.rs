//! Error taxonomy.
//!
//! - `TransitionError`: contract violations against the notification state machine.
//!   A failed transition never changes the stored record.
//! - `StoreError`: persistence-level failures (includes rejected transitions).
//! - `SubmitError`: what intake sees synchronously from `submit`.

use thiserror::Error;

use super::device::DeviceToken;
use super::ids::NotificationId;
use super::notification::NotificationState;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransitionError {
    #[error("invalid transition: {event} is not allowed from state {from}")]
    InvalidTransition {
        from: NotificationState,
        event: &'static str,
    },

    #[error("notification is already claimed by another worker")]
    AlreadyClaimed,

    #[error("lease is no longer held (expired or superseded)")]
    LeaseMismatch,

    #[error("retry budget exhausted: retry_count={retry_count}, max_retries={max_retries}")]
    RetryBudgetExhausted { retry_count: u32, max_retries: u32 },
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StoreError {
    #[error("notification not found: {0}")]
    NotFound(NotificationId),

    #[error("notification already exists: {0}")]
    Duplicate(NotificationId),

    #[error(transparent)]
    Transition(#[from] TransitionError),

    #[error("store unavailable: {0}")]
    Unavailable(String),
}

impl StoreError {
    /// Lost claim races and settling after a lease was lost are expected under
    /// concurrency; everything else deserves a louder log line.
    pub fn is_contention(&self) -> bool {
        matches!(
            self,
            StoreError::Transition(TransitionError::AlreadyClaimed)
                | StoreError::Transition(TransitionError::LeaseMismatch)
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SubmitError {
    #[error("device token {0} is malformed (expected at least {min} characters)", min = DeviceToken::MIN_LEN)]
    MalformedToken(String),

    #[error("no active device is registered for token {0}")]
    UnknownDevice(String),

    #[error("bulk submit of {len} tokens exceeds the limit of {max}")]
    BulkTooLarge { len: usize, max: usize },

    #[error("dispatch queue is full (capacity {capacity})")]
    QueueFull { capacity: usize },

    #[error(transparent)]
    Store(#[from] StoreError),
}
