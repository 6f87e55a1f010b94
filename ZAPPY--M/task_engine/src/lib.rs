#![deny(
    clippy::all,
    clippy::pedantic,
    clippy::nursery,
    rust_2018_idioms,
    missing_docs
)]

//! Bounded-concurrency task engine with pluggable execution capabilities.

/// Telemetry builder/hook for engine rounds.
#[path = "../telemetry.rs"]
pub mod telemetry;

/// Task descriptors, outcomes, and modes.
#[path = "../task.rs"]
pub mod task;

/// Execution capability contract and bundled executors.
#[path = "../executor.rs"]
pub mod executor;

/// Lazily constructed executors keyed by purpose.
#[path = "../registry.rs"]
pub mod registry;

/// Queue and admission-limited runner.
#[path = "../engine.rs"]
pub mod engine;

pub use engine::TaskEngine;
pub use executor::{
    ExecutionError, ExecutionReport, LoopbackExecutor, ProcessExecutor, TaskExecutor, TextReport,
};
pub use registry::{CapabilityRegistry, Purpose, RoutingExecutor};
pub use task::{TaskDescriptor, TaskFailure, TaskMode, TaskOutcome, TaskResult, UnknownTaskMode};
pub use telemetry::{TaskTelemetry, TaskTelemetryBuilder};
