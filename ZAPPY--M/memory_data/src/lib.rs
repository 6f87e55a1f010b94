#![deny(
    clippy::all,
    clippy::pedantic,
    clippy::nursery,
    missing_docs,
    rust_2018_idioms
)]

//! Tiered memory: a TTL-bounded short-term store, a SQLite long-term store, and the
//! coordinator that consolidates one into the other.

/// Coordinator settings.
pub mod config;
/// Long-term memory persistence.
pub mod long_term;
/// Record model shared by both tiers.
pub mod record;
/// Short-term, in-process store with expiry.
pub mod short_term;

/// Telemetry helpers for memory orchestration.
#[path = "../telemetry.rs"]
pub mod telemetry;

/// Unified recall and consolidation across both tiers.
#[path = "../main.rs"]
pub mod coordinator;

pub use config::MemoryConfig;
pub use coordinator::MemoryCoordinator;
pub use long_term::{DurableStore, MemoryStorageError};
pub use record::{metadata, metadata_text, MemoryRecord, Metadata, RecordId};
pub use short_term::EphemeralStore;
pub use telemetry::{MemoryTelemetry, MemoryTelemetryBuilder};
