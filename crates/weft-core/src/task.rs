use crate::Metadata;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

wire_enum! {
    /// How the caller runs the ready tasks of a batch.
    pub enum ExecutionStrategy {
        /// One ready task at a time, in priority/creation order.
        Sequential => "sequential",
        /// Every currently ready task at once.
        Parallel => "parallel",
        /// Re-evaluate readiness after each completion.
        Dag => "dag",
    }
}

wire_enum! {
    /// How completed siblings are undone when a task fails.
    pub enum RollbackStrategy {
        /// Undo in reverse completion order.
        ReverseOrder => "reverse_order",
        /// Caller-defined order.
        Custom => "custom",
    }
}

wire_enum! {
    /// Status of a [`TaskBatch`]. Derived by the caller from its tasks.
    pub enum BatchStatus {
        /// Created, nothing started.
        Pending => "pending",
        /// At least one task started.
        Running => "running",
        /// All tasks completed.
        Completed => "completed",
        /// A task failed terminally.
        Failed => "failed",
        /// Cancelled by the caller.
        Cancelled => "cancelled",
    }
}

impl BatchStatus {
    /// `pending` and `running` batches are still active.
    pub fn is_active(&self) -> bool {
        matches!(self, BatchStatus::Pending | BatchStatus::Running)
    }
}

wire_enum! {
    /// Scheduling priority of a [`Task`].
    ///
    /// Ordering follows urgency: `Critical < High < Normal < Low`, so sorting
    /// ascending services critical work first.
    #[derive(PartialOrd, Ord)]
    pub enum TaskPriority {
        /// Most urgent.
        Critical => "critical",
        /// Ahead of normal work.
        High => "high",
        /// Default.
        Normal => "normal",
        /// Least urgent.
        Low => "low",
    }
}

impl Default for TaskPriority {
    fn default() -> Self {
        TaskPriority::Normal
    }
}

wire_enum! {
    /// Status of a [`Task`].
    pub enum TaskStatus {
        /// Waiting for dependencies or a claimer.
        Pending => "pending",
        /// Claimed by an agent, not yet started.
        Scheduled => "scheduled",
        /// Executing.
        Running => "running",
        /// Finished successfully.
        Completed => "completed",
        /// Finished unsuccessfully after retries.
        Failed => "failed",
        /// Cancelled before completion.
        Cancelled => "cancelled",
        /// Undone after a sibling failed.
        RolledBack => "rolled_back",
    }
}

impl TaskStatus {
    /// Whether no further execution will happen for the task.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            TaskStatus::Completed
                | TaskStatus::Failed
                | TaskStatus::Cancelled
                | TaskStatus::RolledBack
        )
    }
}

wire_enum! {
    /// Kind of a [`TaskDependency`] edge.
    pub enum DependencyType {
        /// The dependency must be completed.
        Completion => "completion",
        /// Partial output suffices (evaluated by the caller).
        Partial => "partial",
        /// Caller-evaluated `condition`.
        Custom => "custom",
    }
}

/// A named group of tasks executed under one strategy.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskBatch {
    /// Unique batch identifier.
    pub batch_id: String,
    /// Owning session, if any.
    pub session_id: Option<String>,
    /// Display name.
    pub name: String,
    /// Optional description.
    pub description: Option<String>,
    /// How ready tasks are dispatched.
    pub execution_strategy: ExecutionStrategy,
    /// How completed tasks are undone on failure.
    pub rollback_strategy: RollbackStrategy,
    /// Advisory batch timeout.
    pub timeout_seconds: Option<u64>,
    /// Batch status.
    pub status: BatchStatus,
    /// When the batch was created.
    pub created_at: DateTime<Utc>,
    /// When the first task started.
    pub started_at: Option<DateTime<Utc>>,
    /// When the batch reached a terminal status.
    pub completed_at: Option<DateTime<Utc>>,
    /// Arbitrary caller metadata.
    #[serde(default)]
    pub metadata: Metadata,
}

impl TaskBatch {
    /// A new pending, sequential batch with reverse-order rollback.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            batch_id: crate::new_id(),
            session_id: None,
            name: name.into(),
            description: None,
            execution_strategy: ExecutionStrategy::Sequential,
            rollback_strategy: RollbackStrategy::ReverseOrder,
            timeout_seconds: None,
            status: BatchStatus::Pending,
            created_at: Utc::now(),
            started_at: None,
            completed_at: None,
            metadata: Metadata::new(),
        }
    }

    /// Attach to a session.
    pub fn in_session(mut self, session_id: impl Into<String>) -> Self {
        self.session_id = Some(session_id.into());
        self
    }

    /// Set the execution strategy.
    pub fn with_strategy(mut self, strategy: ExecutionStrategy) -> Self {
        self.execution_strategy = strategy;
        self
    }

    /// Set the rollback strategy.
    pub fn with_rollback(mut self, strategy: RollbackStrategy) -> Self {
        self.rollback_strategy = strategy;
        self
    }

    /// Set the advisory timeout.
    pub fn with_timeout(mut self, seconds: u64) -> Self {
        self.timeout_seconds = Some(seconds);
        self
    }
}

/// A unit of work assigned to an agent.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    pub task_id: String,
    pub batch_id: Option<String>,
    pub name: String,
    pub description: Option<String>,
    pub task_type: String,
    pub agent_id: String,
    pub priority: TaskPriority,
    #[serde(default)]
    pub parameters: serde_json::Value,
    /// Advisory per-attempt timeout.
    pub timeout_seconds: Option<u64>,
    pub max_retries: u32,
    pub retry_delay_seconds: u64,
    /// Whether a terminal failure should roll back completed siblings.
    pub rollback_on_failure: bool,
    pub status: TaskStatus,
    /// Claims made so far; the first claim is attempt 1.
    #[serde(default)]
    pub attempts: u32,
    pub created_at: DateTime<Utc>,
    pub scheduled_at: Option<DateTime<Utc>>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub execution_time_seconds: Option<f64>,
    pub result: Option<serde_json::Value>,
    pub error_message: Option<String>,
    /// Payload the caller needs to undo this task.
    pub rollback_data: Option<serde_json::Value>,
    #[serde(default)]
    pub metadata: Metadata,
}

impl Task {
    /// A new pending task of `task_type` assigned to `agent_id`.
    pub fn new(
        name: impl Into<String>,
        task_type: impl Into<String>,
        agent_id: impl Into<String>,
    ) -> Self {
        Self {
            task_id: crate::new_id(),
            batch_id: None,
            name: name.into(),
            description: None,
            task_type: task_type.into(),
            agent_id: agent_id.into(),
            priority: TaskPriority::Normal,
            parameters: serde_json::Value::Object(Default::default()),
            timeout_seconds: None,
            max_retries: 3,
            retry_delay_seconds: 30,
            rollback_on_failure: true,
            status: TaskStatus::Pending,
            attempts: 0,
            created_at: Utc::now(),
            scheduled_at: None,
            started_at: None,
            completed_at: None,
            execution_time_seconds: None,
            result: None,
            error_message: None,
            rollback_data: None,
            metadata: Metadata::new(),
        }
    }

    /// Place the task in a batch.
    pub fn in_batch(mut self, batch_id: impl Into<String>) -> Self {
        self.batch_id = Some(batch_id.into());
        self
    }

    /// Set the priority.
    pub fn with_priority(mut self, priority: TaskPriority) -> Self {
        self.priority = priority;
        self
    }

    /// Set the parameters.
    pub fn with_parameters(mut self, parameters: serde_json::Value) -> Self {
        self.parameters = parameters;
        self
    }

    /// Set the retry policy.
    pub fn with_retries(mut self, max_retries: u32, retry_delay_seconds: u64) -> Self {
        self.max_retries = max_retries;
        self.retry_delay_seconds = retry_delay_seconds;
        self
    }

    /// Set the advisory timeout.
    pub fn with_timeout(mut self, seconds: u64) -> Self {
        self.timeout_seconds = Some(seconds);
        self
    }
}

/// A `task_id → depends_on_task_id` edge in the dependency graph.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskDependency {
    /// The dependent task.
    pub task_id: String,
    /// The task that must finish first.
    pub depends_on_task_id: String,
    /// Edge kind.
    pub dependency_type: DependencyType,
    /// Caller-evaluated condition for `partial`/`custom` edges.
    pub condition: Option<serde_json::Value>,
    /// When the edge was added.
    pub created_at: DateTime<Utc>,
}

impl TaskDependency {
    /// A completion edge: `task_id` waits for `depends_on_task_id`.
    pub fn completion(task_id: impl Into<String>, depends_on_task_id: impl Into<String>) -> Self {
        Self {
            task_id: task_id.into(),
            depends_on_task_id: depends_on_task_id.into(),
            dependency_type: DependencyType::Completion,
            condition: None,
            created_at: Utc::now(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_task_creation() {
        let task = Task::new("Compile", "build", "exec-1");
        assert_eq!(task.status, TaskStatus::Pending);
        assert_eq!(task.priority, TaskPriority::Normal);
        assert_eq!(task.max_retries, 3);
        assert_eq!(task.retry_delay_seconds, 30);
        assert!(task.rollback_on_failure);
        assert_eq!(task.attempts, 0);
    }

    #[test]
    fn test_priority_orders_by_urgency() {
        let mut priorities = vec![
            TaskPriority::Low,
            TaskPriority::Critical,
            TaskPriority::Normal,
            TaskPriority::High,
        ];
        priorities.sort();
        assert_eq!(
            priorities,
            vec![
                TaskPriority::Critical,
                TaskPriority::High,
                TaskPriority::Normal,
                TaskPriority::Low
            ]
        );
    }

    #[test]
    fn test_rolled_back_wire_name() {
        assert_eq!(TaskStatus::RolledBack.to_string(), "rolled_back");
        assert_eq!(
            "rolled_back".parse::<TaskStatus>().unwrap(),
            TaskStatus::RolledBack
        );
        assert_eq!(
            serde_json::to_string(&RollbackStrategy::ReverseOrder).unwrap(),
            "\"reverse_order\""
        );
    }

    #[test]
    fn test_terminal_task_statuses() {
        assert!(!TaskStatus::Pending.is_terminal());
        assert!(!TaskStatus::Running.is_terminal());
        assert!(TaskStatus::Completed.is_terminal());
        assert!(TaskStatus::RolledBack.is_terminal());
    }

    #[test]
    fn test_batch_defaults() {
        let batch = TaskBatch::new("deploy").with_strategy(ExecutionStrategy::Dag);
        assert_eq!(batch.status, BatchStatus::Pending);
        assert!(batch.status.is_active());
        assert_eq!(batch.rollback_strategy, RollbackStrategy::ReverseOrder);
        assert_eq!(batch.execution_strategy, ExecutionStrategy::Dag);
    }
}
