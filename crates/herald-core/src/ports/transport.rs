//! Transport port - the push gateway client.

use async_trait::async_trait;

use crate::domain::{DeliveryOutcome, DeviceToken, NotificationPayload};

/// One delivery attempt against the gateway.
///
/// Implementations report failures as outcomes, never as panics or errors;
/// anything they cannot classify should come back as `TransientFailure`.
/// The engine bounds every call with its own timeout.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn deliver(&self, token: &DeviceToken, payload: &NotificationPayload) -> DeliveryOutcome;
}
