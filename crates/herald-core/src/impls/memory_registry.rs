//! InMemoryDeviceRegistry - development and test registry.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::RwLock;

use crate::domain::{DeviceEndpoint, DeviceToken, Platform, StoreError};
use crate::ports::DeviceRegistry;

/// Endpoints in a `HashMap` behind a tokio `RwLock`.
///
/// `deactivate` checks and flips the flag under the write lock, which is what
/// makes concurrent invalidations of one token collapse into a single flip.
#[derive(Debug, Default)]
pub struct InMemoryDeviceRegistry {
    devices: RwLock<HashMap<DeviceToken, DeviceEndpoint>>,
}

impl InMemoryDeviceRegistry {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl DeviceRegistry for InMemoryDeviceRegistry {
    async fn upsert(
        &self,
        token: DeviceToken,
        platform: Platform,
        now: DateTime<Utc>,
    ) -> Result<DeviceEndpoint, StoreError> {
        let mut devices = self.devices.write().await;
        let endpoint = devices
            .entry(token.clone())
            .and_modify(|d| d.reregister(platform, now))
            .or_insert_with(|| DeviceEndpoint::new(token, platform, now));
        Ok(endpoint.clone())
    }

    async fn get(&self, token: &DeviceToken) -> Result<Option<DeviceEndpoint>, StoreError> {
        Ok(self.devices.read().await.get(token).cloned())
    }

    async fn is_active(&self, token: &DeviceToken) -> Result<bool, StoreError> {
        Ok(self
            .devices
            .read()
            .await
            .get(token)
            .is_some_and(|d| d.active))
    }

    async fn deactivate(&self, token: &DeviceToken, now: DateTime<Utc>) -> Result<bool, StoreError> {
        let mut devices = self.devices.write().await;
        Ok(devices
            .get_mut(token)
            .is_some_and(|d| d.deactivate(now)))
    }

    async fn record_delivery(&self, token: &DeviceToken, at: DateTime<Utc>) -> Result<(), StoreError> {
        if let Some(device) = self.devices.write().await.get_mut(token) {
            device.record_delivery(at);
        }
        Ok(())
    }

    async fn count_by_activity(&self) -> Result<(usize, usize), StoreError> {
        let devices = self.devices.read().await;
        let active = devices.values().filter(|d| d.active).count();
        Ok((active, devices.len() - active))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[tokio::test]
    async fn upsert_overwrites_and_reactivates() {
        let registry = InMemoryDeviceRegistry::new();
        let token = DeviceToken::new("tok");
        let now = Utc::now();

        registry.upsert(token.clone(), Platform::Ios, now).await.unwrap();
        assert!(registry.deactivate(&token, now).await.unwrap());
        assert!(!registry.is_active(&token).await.unwrap());

        let device = registry
            .upsert(token.clone(), Platform::Android, now)
            .await
            .unwrap();
        assert!(device.active);
        assert_eq!(device.platform, Platform::Android);
        assert_eq!(registry.count_by_activity().await.unwrap(), (1, 0));
    }

    #[tokio::test]
    async fn unknown_tokens_are_inactive_and_deactivation_is_a_no_op() {
        let registry = InMemoryDeviceRegistry::new();
        let token = DeviceToken::new("ghost");

        assert!(!registry.is_active(&token).await.unwrap());
        assert!(!registry.deactivate(&token, Utc::now()).await.unwrap());
        registry.record_delivery(&token, Utc::now()).await.unwrap();
        assert!(registry.get(&token).await.unwrap().is_none());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_deactivation_flips_exactly_once() {
        let registry = Arc::new(InMemoryDeviceRegistry::new());
        let token = DeviceToken::new("shared");
        registry
            .upsert(token.clone(), Platform::Ios, Utc::now())
            .await
            .unwrap();

        let handles: Vec<_> = (0..16)
            .map(|_| {
                let registry = Arc::clone(&registry);
                let token = token.clone();
                tokio::spawn(async move { registry.deactivate(&token, Utc::now()).await.unwrap() })
            })
            .collect();

        let mut flips = 0;
        for h in handles {
            if h.await.unwrap() {
                flips += 1;
            }
        }
        assert_eq!(flips, 1);
        assert_eq!(registry.count_by_activity().await.unwrap(), (0, 1));
    }

    #[tokio::test]
    async fn record_delivery_stamps_endpoint() {
        let registry = InMemoryDeviceRegistry::new();
        let token = DeviceToken::new("tok");
        let now = Utc::now();
        registry.upsert(token.clone(), Platform::Ios, now).await.unwrap();

        registry.record_delivery(&token, now).await.unwrap();

        let device = registry.get(&token).await.unwrap().unwrap();
        assert_eq!(device.last_successful_delivery, Some(now));
    }
}
