//! Domain model (ids, devices, payloads, notification records, outcomes, decisions).
//!
//! Everything here is synchronous and free of I/O.

pub mod decision;
pub mod device;
pub mod errors;
pub mod ids;
pub mod notification;
pub mod outcome;
pub mod payload;

pub use decision::{Decider, Decision, RetryDecider};
pub use device::{DeviceEndpoint, DeviceToken, Platform};
pub use errors::{StoreError, SubmitError, TransitionError};
pub use ids::{LeaseId, NotificationId};
pub use notification::{Lease, NotificationRecord, NotificationState, Transition};
pub use outcome::{DeliveryOutcome, FailureClass, FailureClassifier};
pub use payload::{NotificationPayload, Priority};
