//! Core types and error definitions for the Weft workflow coordination engine.
//!
//! This crate holds the store-resident entities shared by every Weft crate:
//! sessions, checkpoints, agent messages, task batches, tasks and their
//! dependency edges, quality-gate executions, registered agents, and metric
//! observations. It also defines the error taxonomy and the [`Clock`]
//! abstraction used to stamp timestamps.
//!
//! # Main types
//!
//! - [`WeftError`] — Unified error enum for all Weft subsystems.
//! - [`WeftResult`] — Convenience alias for `Result<T, WeftError>`.
//! - [`WorkflowSession`] — Top-level container for one logical run.
//! - [`WorkflowCheckpoint`] — Per-(session, agent) state snapshot.
//! - [`AgentMessage`] — Priority-ordered, TTL-bound inter-agent message.
//! - [`TaskBatch`], [`Task`], [`TaskDependency`] — The scheduling graph.
//! - [`QualityGateExecution`] — One run of a quality gate.
//! - [`RegisteredAgent`] — Liveness bookkeeping for one agent.
//! - [`MetricObservation`] — One append-only metric sample.

#[macro_use]
mod macros;

/// Registered agents and their liveness status.
pub mod agent;
/// Workflow checkpoints.
pub mod checkpoint;
/// Time source abstraction.
pub mod clock;
/// Error taxonomy.
pub mod error;
/// Inter-agent messages.
pub mod message;
/// Metric observations.
pub mod metric;
/// Quality-gate execution records.
pub mod quality;
/// Workflow sessions.
pub mod session;
/// Task batches, tasks, and dependency edges.
pub mod task;

pub use agent::{AgentStatus, AgentType, RegisteredAgent};
pub use checkpoint::{CheckpointType, WorkflowCheckpoint};
pub use clock::{Clock, ManualClock, SystemClock};
pub use error::{WeftError, WeftResult};
pub use message::{AgentMessage, MessageStatus, DEFAULT_MAX_DELIVERY_ATTEMPTS, DEFAULT_PRIORITY};
pub use metric::{MetricKind, MetricObservation};
pub use quality::{GateStatus, QualityGateExecution};
pub use session::{SessionStatus, WorkflowSession};
pub use task::{
    BatchStatus, DependencyType, ExecutionStrategy, RollbackStrategy, Task, TaskBatch,
    TaskDependency, TaskPriority, TaskStatus,
};

/// Free-form key/value metadata attached to most entities.
pub type Metadata = std::collections::HashMap<String, serde_json::Value>;

/// Generate a fresh identifier for an entity that was not given one.
pub fn new_id() -> String {
    uuid::Uuid::new_v4().to_string()
}
