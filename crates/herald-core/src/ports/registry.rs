//! DeviceRegistry port - the set of known device endpoints.

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::domain::{DeviceEndpoint, DeviceToken, Platform, StoreError};

/// DeviceRegistry owns device endpoints, keyed by token.
///
/// # Invariants
/// - one endpoint per token
/// - only `upsert` reactivates an endpoint; the dispatch engine never does
/// - endpoints are never deleted here
#[async_trait]
pub trait DeviceRegistry: Send + Sync {
    /// Create the endpoint, or overwrite and reactivate an existing one.
    async fn upsert(
        &self,
        token: DeviceToken,
        platform: Platform,
        now: DateTime<Utc>,
    ) -> Result<DeviceEndpoint, StoreError>;

    async fn get(&self, token: &DeviceToken) -> Result<Option<DeviceEndpoint>, StoreError>;

    /// `false` for unknown tokens.
    async fn is_active(&self, token: &DeviceToken) -> Result<bool, StoreError>;

    /// Mark the endpoint inactive.
    ///
    /// Returns `true` only for the call that performed the flip, so concurrent
    /// invalidations of one token produce exactly one deactivation. Unknown
    /// tokens are a no-op returning `false`.
    async fn deactivate(&self, token: &DeviceToken, now: DateTime<Utc>) -> Result<bool, StoreError>;

    /// Stamp the last successful delivery. Unknown tokens are ignored.
    async fn record_delivery(&self, token: &DeviceToken, at: DateTime<Utc>) -> Result<(), StoreError>;

    /// `(active, inactive)` endpoint counts.
    async fn count_by_activity(&self) -> Result<(usize, usize), StoreError>;
}
