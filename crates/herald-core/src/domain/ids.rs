//! Domain identifiers (strongly-typed IDs).
//!
//! All ids are ULIDs wrapped in `Id<T>`, where `T` is a zero-sized marker type.
//! The marker only exists at compile time, so a `NotificationId` can never be
//! passed where a `LeaseId` is expected, while both stay 16 bytes wide.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::marker::PhantomData;
use ulid::Ulid;

/// Marker trait for id kinds.
///
/// Provides the prefix used by `Display` ("ntf-", "lease-").
pub trait IdMarker: Send + Sync + 'static {
    fn prefix() -> &'static str;
}

/// Generic ULID-backed id.
#[repr(transparent)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Id<T: IdMarker> {
    ulid: Ulid,
    #[serde(skip)]
    _marker: PhantomData<T>,
}

impl<T: IdMarker> Id<T> {
    pub fn from_ulid(ulid: Ulid) -> Self {
        Self {
            ulid,
            _marker: PhantomData,
        }
    }

    pub fn as_ulid(&self) -> Ulid {
        self.ulid
    }
}

impl<T: IdMarker> From<Ulid> for Id<T> {
    fn from(ulid: Ulid) -> Self {
        Self::from_ulid(ulid)
    }
}

impl<T: IdMarker> fmt::Display for Id<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", T::prefix(), self.ulid)
    }
}

/// Marker for notification ids.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Notification {}

impl IdMarker for Notification {
    fn prefix() -> &'static str {
        "ntf-"
    }
}

/// Marker for lease ids.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Lease {}

impl IdMarker for Lease {
    fn prefix() -> &'static str {
        "lease-"
    }
}

/// Identifier of a notification (assigned at creation, never reused).
pub type NotificationId = Id<Notification>;

/// Identifier of one claim a worker holds on a notification.
///
/// Every claim gets a fresh lease id, so a worker whose lease was reaped can
/// be told apart from the worker that re-claimed the same notification.
pub type LeaseId = Id<Lease>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_uses_kind_prefix() {
        let ulid = Ulid::new();
        let notification = NotificationId::from_ulid(ulid);
        let lease = LeaseId::from_ulid(ulid);

        assert_eq!(notification.as_ulid(), lease.as_ulid());
        assert!(notification.to_string().starts_with("ntf-"));
        assert!(lease.to_string().starts_with("lease-"));
        // let _: LeaseId = notification; // <- does not compile
    }

    #[test]
    fn serializes_as_bare_ulid_string() {
        let ulid = Ulid::new();
        let id = NotificationId::from_ulid(ulid);

        let json = serde_json::to_string(&id).unwrap();
        assert_eq!(json, format!("\"{ulid}\""));

        let back: NotificationId = serde_json::from_str(&json).unwrap();
        assert_eq!(back, id);
    }

    #[test]
    fn phantom_marker_is_zero_sized() {
        use std::mem::size_of;

        assert_eq!(size_of::<NotificationId>(), size_of::<Ulid>());
        assert_eq!(size_of::<LeaseId>(), 16);
    }
}
