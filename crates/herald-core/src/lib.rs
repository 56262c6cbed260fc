//! herald-core
//!
//! Push-notification dispatch engine: accepts notifications for registered
//! devices and drives each one to a terminal state (`sent`, `failed` or
//! `invalid_token`) with at-least-once delivery.
//!
//! # Modules
//! - **domain**: ids, devices, payloads, the notification state machine, outcomes, decisions, errors
//! - **ports**: traits for the store, registry, transport, clock and id generation
//! - **impls**: in-memory implementations and a simulated transport
//! - **queue**: the bounded dispatch queue and the retry backoff policy
//! - **app**: builder, engine, worker pool, lease reaper, status
//! - **config**: `EngineConfig` loaded from `HERALD_*` variables

pub mod app;
pub mod config;
pub mod domain;
pub mod impls;
pub mod ports;
pub mod queue;

pub use app::{BuildError, DispatchEngine, EngineBuilder, WorkerGroup};
pub use config::{ConfigError, EngineConfig};
