//! Outcome model: what the transport reports for one delivery attempt, and
//! how failure reasons are classified.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// Reason recorded when a notification targets a missing or deactivated device.
pub const DEVICE_INACTIVE: &str = "DeviceInactive";

/// Reason recorded when a transport call exceeds its deadline.
pub const TIMEOUT: &str = "Timeout";

/// Reason recorded when a worker's lease expired before it settled.
pub const LEASE_EXPIRED: &str = "LeaseExpired";

/// Gateway reasons that mean the token itself is dead.
pub const DEFAULT_PERMANENT_REASONS: [&str; 3] =
    ["BadDeviceToken", "Unregistered", "DeviceTokenNotForTopic"];

/// Result of one transport call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum DeliveryOutcome {
    /// The gateway accepted the notification.
    Delivered { gateway_id: String },

    /// The transport believes the token is dead.
    PermanentFailure { reason: String },

    /// Anything that might succeed later (5xx, throttling, network, timeout).
    TransientFailure { reason: String },
}

impl DeliveryOutcome {
    pub fn delivered(gateway_id: impl Into<String>) -> Self {
        Self::Delivered {
            gateway_id: gateway_id.into(),
        }
    }

    pub fn permanent(reason: impl Into<String>) -> Self {
        Self::PermanentFailure {
            reason: reason.into(),
        }
    }

    pub fn transient(reason: impl Into<String>) -> Self {
        Self::TransientFailure {
            reason: reason.into(),
        }
    }

    pub fn reason(&self) -> Option<&str> {
        match self {
            DeliveryOutcome::Delivered { .. } => None,
            DeliveryOutcome::PermanentFailure { reason }
            | DeliveryOutcome::TransientFailure { reason } => Some(reason),
        }
    }
}

/// How a failure reason is treated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FailureClass {
    /// Invalidate the token; never retry.
    Permanent,
    /// Retry with backoff while budget remains.
    Transient,
}

/// Maps failure reasons to `FailureClass`.
///
/// The reason table is authoritative: a reason missing from it is transient,
/// whichever variant the transport used to report it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FailureClassifier {
    permanent: BTreeSet<String>,
}

impl Default for FailureClassifier {
    fn default() -> Self {
        let mut permanent: BTreeSet<String> = DEFAULT_PERMANENT_REASONS
            .iter()
            .map(|r| r.to_string())
            .collect();
        permanent.insert(DEVICE_INACTIVE.to_string());
        Self { permanent }
    }
}

impl FailureClassifier {
    /// Default table plus `extra` permanent reasons.
    pub fn with_extra<I, S>(extra: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut classifier = Self::default();
        classifier
            .permanent
            .extend(extra.into_iter().map(Into::into));
        classifier
    }

    pub fn classify(&self, reason: &str) -> FailureClass {
        if self.permanent.contains(reason) {
            FailureClass::Permanent
        } else {
            FailureClass::Transient
        }
    }

    pub fn permanent_reasons(&self) -> impl Iterator<Item = &str> {
        self.permanent.iter().map(String::as_str)
    }
}
