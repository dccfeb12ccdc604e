//! Coordination engine for Weft: sessions, checkpoints, messaging, task
//! scheduling, quality gates, agent liveness, and metrics.
//!
//! The engine holds no state of its own. Every component is a cheap handle
//! over an injected [`weft_store::WorkflowStore`] and a [`weft_core::Clock`];
//! concurrency comes from many agents calling in at once, and the races that
//! matter (claiming a task, pruning checkpoints, flipping a stale agent) are
//! settled by conditional store writes.
//!
//! # Main types
//!
//! - [`WorkflowEngine`] — Builds and owns every component below.
//! - [`SessionService`] — Session lifecycle and cascading delete.
//! - [`CheckpointManager`] — Checkpoint chains with bounded retention.
//! - [`MessageBus`] — Priority-ordered, TTL-bound inter-agent messages.
//! - [`TaskScheduler`] — Batches, tasks, dependency edges, and readiness.
//! - [`DependencyGraph`] — Incremental readiness over a whole batch.
//! - [`QualityGateTracker`] — Gate runs and their statistics.
//! - [`AgentRegistry`] — Registration, heartbeats, and the staleness sweep.
//! - [`MetricsSink`] — Append-only engine metrics.
//! - [`Maintenance`] — Periodic expiry, staleness, and retention sweeps.

/// Checkpoint chains and retention.
pub mod checkpoint;
/// Checkpoint context compression.
pub mod codec;
/// Engine tunables.
pub mod config;
/// The engine facade.
pub mod engine;
/// In-memory dependency graph.
pub mod graph;
/// Periodic sweeps.
pub mod maintenance;
/// Inter-agent message bus.
pub mod messaging;
/// Metrics sink.
pub mod metrics;
/// Dispatch, retry, and rollback rules for callers.
pub mod policy;
/// Quality-gate tracking.
pub mod quality;
/// Agent registry and liveness.
pub mod registry;
/// Task and batch scheduling.
pub mod scheduler;
/// Session lifecycle.
pub mod session;

pub use checkpoint::CheckpointManager;
pub use config::EngineConfig;
pub use engine::WorkflowEngine;
pub use graph::DependencyGraph;
pub use maintenance::{Maintenance, SweepReport};
pub use messaging::{MessageBus, MessageDefaults};
pub use metrics::MetricsSink;
pub use policy::{dispatch, rollback_order, RetryDecision, RetryPolicy};
pub use quality::{GateOutcome, GateStatistics, QualityGateTracker};
pub use registry::AgentRegistry;
pub use scheduler::{BatchDetail, BatchStatistics, TaskDetail, TaskScheduler, TaskUpdate};
pub use session::{SessionDetail, SessionService, SessionSummary};

/// Sort `rows` newest first by `key`. Rows with equal keys keep the later
/// inserted one first.
pub(crate) fn newest_first<T, K: Ord>(rows: &mut [T], key: impl Fn(&T) -> K) {
    rows.sort_by_key(|row| key(row));
    rows.reverse();
}
