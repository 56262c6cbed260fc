//! Ports - the seams between the engine and its collaborators.
//!
//! Each trait hides a system the engine does not own (a database, the push
//! gateway, the wall clock). In-memory implementations live in `impls`.

pub mod clock;
pub mod id_generator;
pub mod registry;
pub mod store;
pub mod transport;

pub use self::clock::{Clock, FixedClock, SystemClock};
pub use self::id_generator::{IdGenerator, UlidGenerator};
pub use self::registry::DeviceRegistry;
pub use self::store::NotificationStore;
pub use self::transport::Transport;
