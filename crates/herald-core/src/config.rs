use std::time::Duration;

use serde::Deserialize;
use thiserror::Error;

use crate::domain::FailureClassifier;
use crate::queue::RetryPolicy;

/// Engine configuration, loaded from `HERALD_*` environment variables.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Retry budget given to every new notification (default: 3)
    pub max_retries: u32,

    /// Delay before the first retry in milliseconds (default: 60000)
    pub backoff_base_ms: u64,

    /// Exponential backoff multiplier (default: 2.0)
    pub backoff_multiplier: f64,

    /// Upper bound on any single retry delay in milliseconds (default: 3600000)
    pub backoff_cap_ms: u64,

    /// Fraction of each delay randomly shaved off, 0.0..=1.0 (default: 0.0)
    pub backoff_jitter: f64,

    /// Maximum number of ids the dispatch queue admits from intake (default: 10000)
    pub queue_capacity: usize,

    /// Number of worker tasks (default: 4)
    pub worker_count: usize,

    /// How long a claim stays valid before the reaper takes it back (default: 600000)
    pub lease_timeout_ms: u64,

    /// Maximum simultaneous transport calls across all workers (default: 2)
    pub transport_concurrency: usize,

    /// Deadline for a single transport call in milliseconds (default: 30000)
    pub transport_timeout_ms: u64,

    /// Ids taken from the queue per dequeue (default: 16)
    pub batch_size: usize,

    /// Longest a worker waits on an empty queue before re-checking shutdown (default: 1000)
    pub poll_interval_ms: u64,

    /// Lease reaper period in milliseconds (default: 30000)
    pub reap_interval_ms: u64,

    /// Gateway reasons treated as permanent on top of the built-in table
    pub permanent_reasons: Vec<String>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            backoff_base_ms: 60_000,
            backoff_multiplier: 2.0,
            backoff_cap_ms: 3_600_000,
            backoff_jitter: 0.0,
            queue_capacity: 10_000,
            worker_count: 4,
            lease_timeout_ms: 600_000,
            transport_concurrency: 2,
            transport_timeout_ms: 30_000,
            batch_size: 16,
            poll_interval_ms: 1_000,
            reap_interval_ms: 30_000,
            permanent_reasons: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum ConfigError {
    #[error("{0} must be greater than zero")]
    Zero(&'static str),

    #[error("backoff_multiplier must be at least 1.0, got {0}")]
    Multiplier(f64),

    #[error("backoff_jitter must be within 0.0..=1.0, got {0}")]
    Jitter(f64),

    #[error("backoff_cap_ms ({cap}) must not be below backoff_base_ms ({base})")]
    CapBelowBase { base: u64, cap: u64 },

    #[error("lease_timeout_ms ({lease}) must exceed transport_timeout_ms ({transport})")]
    LeaseTooShort { lease: u64, transport: u64 },
}

fn parse_var<T: std::str::FromStr>(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &str,
    default: T,
) -> anyhow::Result<T> {
    match lookup(key) {
        Some(raw) => raw
            .trim()
            .parse()
            .map_err(|_| anyhow::anyhow!("{key} must be a valid {}", std::any::type_name::<T>())),
        None => Ok(default),
    }
}

impl EngineConfig {
    /// Load configuration from the environment (and a `.env` file, if present).
    pub fn from_env() -> anyhow::Result<Self> {
        dotenvy::dotenv().ok();
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load configuration through `lookup`; unset keys keep their defaults.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> anyhow::Result<Self> {
        let d = Self::default();
        let config = Self {
            max_retries: parse_var(&lookup, "HERALD_MAX_RETRIES", d.max_retries)?,
            backoff_base_ms: parse_var(&lookup, "HERALD_BACKOFF_BASE_MS", d.backoff_base_ms)?,
            backoff_multiplier: parse_var(&lookup, "HERALD_BACKOFF_MULTIPLIER", d.backoff_multiplier)?,
            backoff_cap_ms: parse_var(&lookup, "HERALD_BACKOFF_CAP_MS", d.backoff_cap_ms)?,
            backoff_jitter: parse_var(&lookup, "HERALD_BACKOFF_JITTER", d.backoff_jitter)?,
            queue_capacity: parse_var(&lookup, "HERALD_QUEUE_CAPACITY", d.queue_capacity)?,
            worker_count: parse_var(&lookup, "HERALD_WORKER_COUNT", d.worker_count)?,
            lease_timeout_ms: parse_var(&lookup, "HERALD_LEASE_TIMEOUT_MS", d.lease_timeout_ms)?,
            transport_concurrency: parse_var(
                &lookup,
                "HERALD_TRANSPORT_CONCURRENCY",
                d.transport_concurrency,
            )?,
            transport_timeout_ms: parse_var(
                &lookup,
                "HERALD_TRANSPORT_TIMEOUT_MS",
                d.transport_timeout_ms,
            )?,
            batch_size: parse_var(&lookup, "HERALD_BATCH_SIZE", d.batch_size)?,
            poll_interval_ms: parse_var(&lookup, "HERALD_POLL_INTERVAL_MS", d.poll_interval_ms)?,
            reap_interval_ms: parse_var(&lookup, "HERALD_REAP_INTERVAL_MS", d.reap_interval_ms)?,
            permanent_reasons: lookup("HERALD_PERMANENT_REASONS")
                .map(|raw| {
                    raw.split(',')
                        .map(str::trim)
                        .filter(|s| !s.is_empty())
                        .map(String::from)
                        .collect()
                })
                .unwrap_or_default(),
        };
        config.validate()?;
        Ok(config)
    }

    /// Check the configuration for values the engine cannot run with.
    ///
    /// A lease starts only once its worker holds a transport slot, so it has to
    /// outlast one transport call, not the queue of workers waiting for a slot.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let positive = [
            ("queue_capacity", self.queue_capacity as u64),
            ("worker_count", self.worker_count as u64),
            ("transport_concurrency", self.transport_concurrency as u64),
            ("transport_timeout_ms", self.transport_timeout_ms),
            ("batch_size", self.batch_size as u64),
            ("poll_interval_ms", self.poll_interval_ms),
            ("reap_interval_ms", self.reap_interval_ms),
        ];
        if let Some((name, _)) = positive.into_iter().find(|(_, v)| *v == 0) {
            return Err(ConfigError::Zero(name));
        }
        if !(self.backoff_multiplier >= 1.0) {
            return Err(ConfigError::Multiplier(self.backoff_multiplier));
        }
        if !(0.0..=1.0).contains(&self.backoff_jitter) {
            return Err(ConfigError::Jitter(self.backoff_jitter));
        }
        if self.backoff_cap_ms < self.backoff_base_ms {
            return Err(ConfigError::CapBelowBase {
                base: self.backoff_base_ms,
                cap: self.backoff_cap_ms,
            });
        }
        if self.lease_timeout_ms <= self.transport_timeout_ms {
            return Err(ConfigError::LeaseTooShort {
                lease: self.lease_timeout_ms,
                transport: self.transport_timeout_ms,
            });
        }
        Ok(())
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(Duration::from_millis(self.backoff_base_ms), self.backoff_multiplier)
            .with_max_delay(Duration::from_millis(self.backoff_cap_ms))
            .with_jitter(self.backoff_jitter)
    }

    pub fn failure_classifier(&self) -> FailureClassifier {
        FailureClassifier::with_extra(self.permanent_reasons.iter().cloned())
    }

    pub fn lease_timeout(&self) -> Duration {
        Duration::from_millis(self.lease_timeout_ms)
    }

    pub fn transport_timeout(&self) -> Duration {
        Duration::from_millis(self.transport_timeout_ms)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn reap_interval(&self) -> Duration {
        Duration::from_millis(self.reap_interval_ms)
    }
}
