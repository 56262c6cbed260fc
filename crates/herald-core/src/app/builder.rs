//! EngineBuilder - wiring and start-up validation.
//!
//! Fail fast: a missing transport or an inconsistent configuration is
//! reported by `build()`, before any notification is accepted.

use std::sync::Arc;

use tokio::sync::Semaphore;

use super::engine::{DispatchEngine, Shared};
use crate::config::{ConfigError, EngineConfig};
use crate::domain::{Decider, RetryDecider};
use crate::impls::{InMemoryDeviceRegistry, InMemoryNotificationStore};
use crate::ports::{
    Clock, DeviceRegistry, IdGenerator, NotificationStore, SystemClock, Transport, UlidGenerator,
};
use crate::queue::DispatchQueue;

/// Builds a `DispatchEngine`.
///
/// # Example
/// ```ignore
/// let engine = DispatchEngine::builder()
///     .config(EngineConfig::from_env()?)
///     .transport(Arc::new(SimulatedTransport::new()))
///     .build()?;
/// ```
///
/// Only the transport is mandatory. Store and registry default to the
/// in-memory implementations, the clock to `SystemClock`, and the decider to
/// a `RetryDecider` derived from the configuration.
#[derive(Default)]
pub struct EngineBuilder {
    config: EngineConfig,
    store: Option<Arc<dyn NotificationStore>>,
    registry: Option<Arc<dyn DeviceRegistry>>,
    transport: Option<Arc<dyn Transport>>,
    decider: Option<Arc<dyn Decider>>,
    clock: Option<Arc<dyn Clock>>,
    ids: Option<Arc<dyn IdGenerator>>,
}

#[derive(Debug, thiserror::Error)]
pub enum BuildError {
    #[error("no transport configured; call EngineBuilder::transport before build")]
    MissingTransport,

    #[error("invalid configuration: {0}")]
    InvalidConfig(#[from] ConfigError),
}

impl EngineBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn config(mut self, config: EngineConfig) -> Self {
        self.config = config;
        self
    }

    pub fn store(mut self, store: Arc<dyn NotificationStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn registry(mut self, registry: Arc<dyn DeviceRegistry>) -> Self {
        self.registry = Some(registry);
        self
    }

    pub fn transport(mut self, transport: Arc<dyn Transport>) -> Self {
        self.transport = Some(transport);
        self
    }

    /// Replace the default `RetryDecider`.
    pub fn decider(mut self, decider: Arc<dyn Decider>) -> Self {
        self.decider = Some(decider);
        self
    }

    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    pub fn id_generator(mut self, ids: Arc<dyn IdGenerator>) -> Self {
        self.ids = Some(ids);
        self
    }

    pub fn build(self) -> Result<DispatchEngine, BuildError> {
        self.config.validate()?;
        let transport = self.transport.ok_or(BuildError::MissingTransport)?;

        let clock = self
            .clock
            .unwrap_or_else(|| Arc::new(SystemClock) as Arc<dyn Clock>);
        let ids = self
            .ids
            .unwrap_or_else(|| Arc::new(UlidGenerator::new(Arc::clone(&clock))) as Arc<dyn IdGenerator>);
        let decider = self.decider.unwrap_or_else(|| {
            Arc::new(RetryDecider::new(
                self.config.retry_policy(),
                self.config.failure_classifier(),
            )) as Arc<dyn Decider>
        });
        let store = self
            .store
            .unwrap_or_else(|| Arc::new(InMemoryNotificationStore::new()) as Arc<dyn NotificationStore>);
        let registry = self
            .registry
            .unwrap_or_else(|| Arc::new(InMemoryDeviceRegistry::new()) as Arc<dyn DeviceRegistry>);

        let shared = Shared {
            queue: DispatchQueue::new(self.config.queue_capacity, Arc::clone(&clock)),
            transport_permits: Semaphore::new(self.config.transport_concurrency),
            config: self.config,
            store,
            registry,
            transport,
            decider,
            clock,
            ids,
        };
        Ok(DispatchEngine::from_shared(shared))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::impls::SimulatedTransport;

    #[test]
    fn build_requires_a_transport() {
        let result = EngineBuilder::new().build();
        assert!(matches!(result, Err(BuildError::MissingTransport)));
    }

    #[test]
    fn build_rejects_invalid_config() {
        let result = EngineBuilder::new()
            .config(EngineConfig {
                worker_count: 0,
                ..EngineConfig::default()
            })
            .transport(Arc::new(SimulatedTransport::new()))
            .build();
        assert!(matches!(
            result,
            Err(BuildError::InvalidConfig(ConfigError::Zero("worker_count")))
        ));
    }

    #[test]
    fn build_with_defaults() {
        let engine = EngineBuilder::new()
            .transport(Arc::new(SimulatedTransport::new()))
            .build()
            .unwrap();
        assert_eq!(engine.config().queue_capacity, 10_000);
    }
}
