//! Decision model: what happens to a notification after an attempt.
//!
//! `Decision` is a plain tagged value; `Decider` implementations are pure and
//! carry no side effects. Applying a decision (store transition, registry
//! update, re-enqueue) is the worker's job.

use std::time::Duration;

use super::outcome::{DeliveryOutcome, FailureClass, FailureClassifier};
use crate::queue::RetryPolicy;

/// The next action to take for a notification.
#[derive(Debug, Clone, PartialEq)]
pub enum Decision {
    /// The gateway accepted it.
    Success { gateway_id: String },

    /// The token is dead: deactivate the device and stop.
    Invalidate { reason: String },

    /// Re-enqueue after `delay`.
    RetryAfter { delay: Duration, reason: String },

    /// Give up.
    TerminalFailure { reason: String },
}

/// Maps an attempt outcome to the next action.
pub trait Decider: Send + Sync {
    fn decide(&self, outcome: &DeliveryOutcome, retry_count: u32, max_retries: u32) -> Decision;
}

/// Reason-table classification plus exponential backoff.
///
/// - `Delivered` -> `Success`
/// - permanent reason -> `Invalidate`, whatever the retry count
/// - transient reason with budget left -> `RetryAfter`
/// - transient reason with budget spent -> `TerminalFailure`
#[derive(Debug, Clone, Default)]
pub struct RetryDecider {
    policy: RetryPolicy,
    classifier: FailureClassifier,
}

impl RetryDecider {
    pub fn new(policy: RetryPolicy, classifier: FailureClassifier) -> Self {
        Self { policy, classifier }
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    pub fn classifier(&self) -> &FailureClassifier {
        &self.classifier
    }
}

impl Decider for RetryDecider {
    fn decide(&self, outcome: &DeliveryOutcome, retry_count: u32, max_retries: u32) -> Decision {
        let reason = match outcome {
            DeliveryOutcome::Delivered { gateway_id } => {
                return Decision::Success {
                    gateway_id: gateway_id.clone(),
                };
            }
            DeliveryOutcome::PermanentFailure { reason }
            | DeliveryOutcome::TransientFailure { reason } => reason,
        };

        match self.classifier.classify(reason) {
            FailureClass::Permanent => Decision::Invalidate {
                reason: reason.clone(),
            },
            FailureClass::Transient if retry_count < max_retries => Decision::RetryAfter {
                delay: self.policy.next_delay(retry_count),
                reason: reason.clone(),
            },
            FailureClass::Transient => Decision::TerminalFailure {
                reason: format!("{reason} (gave up after {retry_count}/{max_retries} retries)"),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    fn decider() -> RetryDecider {
        RetryDecider::default()
    }

    #[test]
    fn delivered_is_success() {
        let d = decider().decide(&DeliveryOutcome::delivered("abc"), 0, 3);
        assert_eq!(
            d,
            Decision::Success {
                gateway_id: "abc".into()
            }
        );
    }

    #[rstest]
    fn permanent_reasons_invalidate_at_any_retry_count(
        #[values("BadDeviceToken", "Unregistered", "DeviceTokenNotForTopic", "DeviceInactive")]
        reason: &str,
        #[values(0, 2, 3, 9)] retry_count: u32,
    ) {
        let d = decider().decide(&DeliveryOutcome::permanent(reason), retry_count, 3);
        assert_eq!(
            d,
            Decision::Invalidate {
                reason: reason.into()
            }
        );
    }

    #[rstest]
    #[case(0, Duration::from_secs(60))]
    #[case(1, Duration::from_secs(120))]
    #[case(2, Duration::from_secs(240))]
    fn transient_retries_while_budget_remains(#[case] retry_count: u32, #[case] delay: Duration) {
        let d = decider().decide(&DeliveryOutcome::transient("ServerError"), retry_count, 3);
        assert_eq!(
            d,
            Decision::RetryAfter {
                delay,
                reason: "ServerError".into()
            }
        );
    }

    #[rstest]
    #[case(3, 3)]
    #[case(0, 0)]
    fn transient_with_spent_budget_is_terminal(#[case] retry_count: u32, #[case] max: u32) {
        let d = decider().decide(&DeliveryOutcome::transient("ServerError"), retry_count, max);
        assert!(matches!(d, Decision::TerminalFailure { reason } if reason.starts_with("ServerError")));
    }

    #[test]
    fn unknown_permanent_reason_is_retried() {
        let d = decider().decide(&DeliveryOutcome::permanent("SomethingNew"), 0, 3);
        assert!(matches!(d, Decision::RetryAfter { .. }));
    }

    #[test]
    fn known_permanent_reason_reported_as_transient_still_invalidates() {
        let d = decider().decide(&DeliveryOutcome::transient("Unregistered"), 0, 3);
        assert!(matches!(d, Decision::Invalidate { .. }));
    }

    #[test]
    fn backoff_curve_comes_from_the_policy() {
        let decider = RetryDecider::new(
            RetryPolicy::new(Duration::from_secs(10), 3.0),
            FailureClassifier::default(),
        );
        let d = decider.decide(&DeliveryOutcome::transient("x"), 2, 5);
        assert_eq!(
            d,
            Decision::RetryAfter {
                delay: Duration::from_secs(90),
                reason: "x".into()
            }
        );
    }
}
