use crate::query::{
    AgentQuery, BatchQuery, CheckpointQuery, DependencyQuery, GateQuery, MessageQuery,
    MetricQuery, SessionQuery, TaskQuery,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use weft_core::{
    AgentMessage, AgentStatus, MessageStatus, MetricObservation, QualityGateExecution, RegisteredAgent, Task, TaskBatch,
    TaskDependency, TaskStatus, WeftResult, WorkflowCheckpoint, WorkflowSession,
};

/// Rows removed by [`WorkflowStore::delete_session_cascade`], per collection.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CascadeReport {
    pub dependencies: usize,
    pub tasks: usize,
    pub batches: usize,
    pub messages: usize,
    pub checkpoints: usize,
}

impl CascadeReport {
    /// Child rows removed, not counting the session itself.
    pub fn total(&self) -> usize {
        self.dependencies + self.tasks + self.batches + self.messages + self.checkpoints
    }
}

/// The durable store shared by every engine component.
///
/// Inserts fail with `WeftError::Store` on a duplicate key. Lookups return
/// `Ok(None)` for unknown ids and updates return `Ok(false)`; neither is an
/// error. Every method is one unit of work: a backend must never expose a
/// half-applied call to a concurrent reader.
#[async_trait]
pub trait WorkflowStore: Send + Sync {
    // -- sessions --
    async fn insert_session(&self, session: &WorkflowSession) -> WeftResult<()>;
    async fn get_session(&self, session_id: &str) -> WeftResult<Option<WorkflowSession>>;
    async fn list_sessions(&self, query: &SessionQuery) -> WeftResult<Vec<WorkflowSession>>;
    async fn update_session(&self, session: &WorkflowSession) -> WeftResult<bool>;
    /// Delete a session and everything it owns, children first: dependency
    /// edges touching its tasks, the tasks, its batches, its messages, its
    /// checkpoints, then the session row.
    async fn delete_session_cascade(&self, session_id: &str) -> WeftResult<Option<CascadeReport>>;

    // -- checkpoints --
    async fn insert_checkpoint(&self, checkpoint: &WorkflowCheckpoint) -> WeftResult<()>;
    async fn get_checkpoint(&self, checkpoint_id: &str) -> WeftResult<Option<WorkflowCheckpoint>>;
    async fn list_checkpoints(&self, query: &CheckpointQuery)
        -> WeftResult<Vec<WorkflowCheckpoint>>;
    /// Delete exactly these ids; ids already gone are skipped. Returns the
    /// number actually deleted.
    async fn delete_checkpoints(&self, checkpoint_ids: &[String]) -> WeftResult<usize>;

    // -- messages --
    async fn insert_message(&self, message: &AgentMessage) -> WeftResult<()>;
    async fn get_message(&self, message_id: &str) -> WeftResult<Option<AgentMessage>>;
    async fn list_messages(&self, query: &MessageQuery) -> WeftResult<Vec<AgentMessage>>;
    async fn update_message(&self, message: &AgentMessage) -> WeftResult<bool>;
    /// Write `message` only if the stored row's status is still `expected`.
    async fn update_message_if(
        &self,
        message: &AgentMessage,
        expected: MessageStatus,
    ) -> WeftResult<bool>;
    /// Delete every message whose `expires_at` is strictly before `now`.
    async fn delete_messages_expired_before(&self, now: DateTime<Utc>) -> WeftResult<usize>;

    // -- batches --
    async fn insert_batch(&self, batch: &TaskBatch) -> WeftResult<()>;
    async fn get_batch(&self, batch_id: &str) -> WeftResult<Option<TaskBatch>>;
    async fn list_batches(&self, query: &BatchQuery) -> WeftResult<Vec<TaskBatch>>;
    async fn update_batch(&self, batch: &TaskBatch) -> WeftResult<bool>;

    // -- tasks --
    async fn insert_task(&self, task: &Task) -> WeftResult<()>;
    async fn get_task(&self, task_id: &str) -> WeftResult<Option<Task>>;
    /// Fetch several tasks at once; unknown ids are absent from the result.
    async fn get_tasks(&self, task_ids: &[String]) -> WeftResult<Vec<Task>>;
    async fn list_tasks(&self, query: &TaskQuery) -> WeftResult<Vec<Task>>;
    async fn update_task(&self, task: &Task) -> WeftResult<bool>;
    /// Write `task` only if the stored row's status is still `expected`.
    async fn update_task_if(&self, task: &Task, expected: TaskStatus) -> WeftResult<bool>;

    // -- dependency edges --
    async fn insert_dependency(&self, dependency: &TaskDependency) -> WeftResult<()>;
    async fn list_dependencies(&self, query: &DependencyQuery)
        -> WeftResult<Vec<TaskDependency>>;

    // -- quality gates --
    async fn insert_gate_execution(&self, execution: &QualityGateExecution) -> WeftResult<()>;
    async fn get_gate_execution(
        &self,
        execution_id: &str,
    ) -> WeftResult<Option<QualityGateExecution>>;
    async fn list_gate_executions(&self, query: &GateQuery)
        -> WeftResult<Vec<QualityGateExecution>>;
    /// Write the finished execution only while the stored row is `running`.
    async fn complete_gate_execution(&self, execution: &QualityGateExecution)
        -> WeftResult<bool>;

    // -- agents --
    /// Insert or replace the row keyed by `agent_id`.
    async fn upsert_agent(&self, agent: &RegisteredAgent) -> WeftResult<()>;
    async fn get_agent(&self, agent_id: &str) -> WeftResult<Option<RegisteredAgent>>;
    async fn list_agents(&self, query: &AgentQuery) -> WeftResult<Vec<RegisteredAgent>>;
    async fn update_agent(&self, agent: &RegisteredAgent) -> WeftResult<bool>;
    /// Set `last_heartbeat` to `at`, leaving every other field as stored.
    async fn touch_agent_heartbeat(&self, agent_id: &str, at: DateTime<Utc>) -> WeftResult<bool>;
    /// Set `status`, leaving every other field as stored.
    async fn set_agent_status(&self, agent_id: &str, status: AgentStatus) -> WeftResult<bool>;
    /// Flip the agent to `inactive` only if it is still `active` and its
    /// `last_heartbeat` still equals `observed`.
    async fn mark_agent_inactive_if(
        &self,
        agent_id: &str,
        observed: Option<DateTime<Utc>>,
    ) -> WeftResult<bool>;

    // -- metrics --
    async fn insert_metric(&self, metric: &MetricObservation) -> WeftResult<()>;
    async fn list_metrics(&self, query: &MetricQuery) -> WeftResult<Vec<MetricObservation>>;
}
