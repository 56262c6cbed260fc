//! App - the engine, built from the ports.
//!
//! # Components
//! - **EngineBuilder**: wiring and start-up validation
//! - **DispatchEngine**: intake, queries, recovery, admin abort
//! - **WorkerGroup**: dispatcher + delivery workers (claim -> deliver -> decide -> settle)
//! - **reaper**: expired-lease recovery
//! - **status**: state counts

pub mod builder;
pub mod engine;
pub mod reaper_loop;
pub mod settle;
pub mod status;
pub mod worker_loop;

pub use self::builder::{BuildError, EngineBuilder};
pub use self::engine::{BulkResult, DispatchEngine, MAX_BULK_TOKENS, RecoveryReport};
pub use self::reaper_loop::ReapReport;
pub use self::settle::Settled;
pub use self::status::{EngineStats, StateCounts};
pub use self::worker_loop::WorkerGroup;
