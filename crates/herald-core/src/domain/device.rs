//! Device endpoints: the registered destinations of notifications.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Opaque device token issued by the push gateway. Unique across the registry.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DeviceToken(String);

impl DeviceToken {
    /// Shortest token intake accepts.
    pub const MIN_LEN: usize = 10;

    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    /// Intake check: non-blank and at least `MIN_LEN` characters.
    pub fn is_well_formed(&self) -> bool {
        let trimmed = self.0.trim();
        !trimmed.is_empty() && trimmed.chars().count() >= Self::MIN_LEN
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Shortened form for log lines; tokens are credentials of sorts.
    pub fn redacted(&self) -> String {
        let prefix: String = self.0.chars().take(8).collect();
        format!("{prefix}...")
    }
}

impl fmt::Display for DeviceToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl From<&str> for DeviceToken {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Platform {
    #[default]
    Ios,
    Android,
}

impl fmt::Display for Platform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Platform::Ios => write!(f, "ios"),
            Platform::Android => write!(f, "android"),
        }
    }
}

impl std::str::FromStr for Platform {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "ios" => Ok(Platform::Ios),
            "android" => Ok(Platform::Android),
            other => Err(format!("unknown platform: {other}")),
        }
    }
}

/// A registered device endpoint.
///
/// Lifecycle:
/// - created or overwritten by intake (`upsert`, keyed on the token)
/// - flipped to inactive only by the invalidation protocol
/// - never deleted by the dispatch engine
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeviceEndpoint {
    pub token: DeviceToken,
    pub platform: Platform,
    pub active: bool,
    pub last_successful_delivery: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl DeviceEndpoint {
    pub fn new(token: DeviceToken, platform: Platform, now: DateTime<Utc>) -> Self {
        Self {
            token,
            platform,
            active: true,
            last_successful_delivery: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Re-registration: overwrite the platform and reactivate.
    pub fn reregister(&mut self, platform: Platform, now: DateTime<Utc>) {
        self.platform = platform;
        self.active = true;
        self.updated_at = now;
    }

    /// Returns `true` only for the call that actually flipped the flag.
    pub fn deactivate(&mut self, now: DateTime<Utc>) -> bool {
        if !self.active {
            return false;
        }
        self.active = false;
        self.updated_at = now;
        true
    }

    pub fn record_delivery(&mut self, at: DateTime<Utc>) {
        self.last_successful_delivery = Some(at);
        self.updated_at = at;
    }
}
