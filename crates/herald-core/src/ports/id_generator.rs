//! IdGenerator port - id generation.
//!
//! # Implementations
//! - **UlidGenerator**: ULID-based (production and tests)

use std::sync::Arc;

use crate::domain::ids::{LeaseId, NotificationId};
use crate::ports::Clock;
use ulid::Ulid;

/// IdGenerator hands out ids that need no coordination between processes.
///
/// ULIDs sort by creation time and are 128-bit, so they double as a coarse
/// creation order in logs.
pub trait IdGenerator: Send + Sync {
    fn generate_notification_id(&self) -> NotificationId;

    /// A fresh id for every claim, including re-claims of the same notification.
    fn generate_lease_id(&self) -> LeaseId;
}

/// ULID generator whose timestamp part comes from a `Clock`.
///
/// With a `FixedClock` the timestamp part is deterministic; the random part
/// still keeps ids unique.
pub struct UlidGenerator {
    clock: Arc<dyn Clock>,
}

impl UlidGenerator {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self { clock }
    }

    fn next_ulid(&self) -> Ulid {
        let timestamp_ms = u64::try_from(self.clock.now().timestamp_millis()).unwrap_or(0);
        Ulid::from_parts(timestamp_ms, rand::random())
    }
}

impl IdGenerator for UlidGenerator {
    fn generate_notification_id(&self) -> NotificationId {
        NotificationId::from(self.next_ulid())
    }

    fn generate_lease_id(&self) -> LeaseId {
        LeaseId::from(self.next_ulid())
    }
}
