//! Impls - in-memory implementations of the ports.
//!
//! Good enough for development, tests and the demo binary. Durable backends
//! implement the same traits in their own crates.

pub mod memory_registry;
pub mod memory_store;
pub mod simulated_transport;

pub use self::memory_registry::InMemoryDeviceRegistry;
pub use self::memory_store::InMemoryNotificationStore;
pub use self::simulated_transport::{DeliveryCall, SimulatedTransport};
