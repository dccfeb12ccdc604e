//! Durable store boundary for the Weft engine.
//!
//! The engine never talks to a database directly: every component receives an
//! `Arc<dyn WorkflowStore>` and performs each operation as a single store
//! round-trip. This crate defines that trait, the query filters it accepts,
//! and two backends.
//!
//! # Main types
//!
//! - [`WorkflowStore`] — One logical collection per entity, plus the atomic
//!   conditional updates the engine relies on under concurrent agents.
//! - [`InMemoryStore`] — Lock-guarded maps; used by tests and embedders.
//! - `SqliteStore` — SQLite-backed store (feature `sqlite`).

/// In-memory backend.
pub mod memory;
/// Query filters shared by every backend.
pub mod query;
/// SQLite backend.
#[cfg(feature = "sqlite")]
pub mod sqlite;
/// The store trait.
pub mod store;

pub use memory::InMemoryStore;
pub use query::{
    AgentQuery, BatchQuery, CheckpointQuery, DependencyQuery, GateQuery, MessageQuery,
    MetricQuery, SessionQuery, TaskQuery,
};
#[cfg(feature = "sqlite")]
pub use sqlite::SqliteStore;
pub use store::{CascadeReport, WorkflowStore};
