use crate::graph::DependencyGraph;
use crate::policy::{rollback_order, RetryDecision, RetryPolicy};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;
use tracing::{debug, info, warn};
use weft_core::{
    BatchStatus, Clock, Task, TaskBatch, TaskDependency, TaskStatus, WeftError, WeftResult,
};
use weft_store::{BatchQuery, DependencyQuery, TaskQuery, WorkflowStore};

/// A task with the edges on both sides of it.
#[derive(Debug, Clone, Serialize)]
pub struct TaskDetail {
    pub task: Task,
    /// Edges this task waits on.
    pub dependencies: Vec<TaskDependency>,
    /// Edges of tasks waiting on this one.
    pub dependents: Vec<TaskDependency>,
}

/// A batch with its tasks, oldest first.
#[derive(Debug, Clone, Serialize)]
pub struct BatchDetail {
    pub batch: TaskBatch,
    pub tasks: Vec<Task>,
}

/// Task counts of one batch.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct BatchStatistics {
    pub total: usize,
    /// Count per status wire name; statuses with no tasks are absent.
    pub by_status: BTreeMap<String, usize>,
}

impl BatchStatistics {
    /// Tasks currently in `status`.
    pub fn count(&self, status: TaskStatus) -> usize {
        self.by_status.get(status.as_str()).copied().unwrap_or(0)
    }
}

/// A status change requested for a task, with whatever outcome data goes
/// with it.
#[derive(Debug, Clone)]
pub struct TaskUpdate {
    pub status: TaskStatus,
    pub result: Option<serde_json::Value>,
    pub error_message: Option<String>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub execution_time_seconds: Option<f64>,
}

impl TaskUpdate {
    /// Move to `status` and nothing else.
    pub fn to(status: TaskStatus) -> Self {
        Self {
            status,
            result: None,
            error_message: None,
            started_at: None,
            completed_at: None,
            execution_time_seconds: None,
        }
    }

    /// Attach a result payload.
    pub fn with_result(mut self, result: serde_json::Value) -> Self {
        self.result = Some(result);
        self
    }

    /// Attach an error message.
    pub fn with_error(mut self, error: impl Into<String>) -> Self {
        self.error_message = Some(error.into());
        self
    }

    /// Record a measured execution time.
    pub fn with_execution_time(mut self, seconds: f64) -> Self {
        self.execution_time_seconds = Some(seconds);
        self
    }
}

/// Creates batches, tasks, and dependency edges; resolves readiness; and
/// records task progress.
///
/// There is no queue: readiness is derived from stored status on every call,
/// and claiming is a conditional write so only one agent wins a task.
#[derive(Clone)]
pub struct TaskScheduler {
    store: Arc<dyn WorkflowStore>,
    clock: Arc<dyn Clock>,
    default_limit: usize,
}

impl TaskScheduler {
    pub fn new(store: Arc<dyn WorkflowStore>, clock: Arc<dyn Clock>, default_limit: usize) -> Self {
        Self {
            store,
            clock,
            default_limit,
        }
    }

    // ------------------------------------------------------------------
    // Creation
    // ------------------------------------------------------------------

    /// Persist a new `pending` batch.
    pub async fn create_batch(&self, mut batch: TaskBatch) -> WeftResult<TaskBatch> {
        batch.status = BatchStatus::Pending;
        batch.created_at = self.clock.now();
        batch.started_at = None;
        batch.completed_at = None;
        self.store.insert_batch(&batch).await?;
        info!(
            batch_id = %batch.batch_id,
            strategy = %batch.execution_strategy,
            "Batch created"
        );
        Ok(batch)
    }

    /// Persist a new `pending` task.
    pub async fn create_task(&self, mut task: Task) -> WeftResult<Task> {
        task.status = TaskStatus::Pending;
        task.attempts = 0;
        task.created_at = self.clock.now();
        self.store.insert_task(&task).await?;
        debug!(task_id = %task.task_id, task_type = %task.task_type, "Task created");
        Ok(task)
    }

    /// Add the edge `dependency.task_id -> dependency.depends_on_task_id`.
    ///
    /// Both tasks must exist and the edge must not close a cycle.
    pub async fn add_dependency(&self, mut dependency: TaskDependency) -> WeftResult<TaskDependency> {
        let (task_id, depends_on) = (&dependency.task_id, &dependency.depends_on_task_id);
        if task_id == depends_on {
            return Err(WeftError::InvalidDependency(format!(
                "task {task_id} cannot depend on itself"
            )));
        }
        let found = self
            .store
            .get_tasks(&[task_id.clone(), depends_on.clone()])
            .await?;
        for id in [task_id, depends_on] {
            if !found.iter().any(|t| &t.task_id == id) {
                return Err(WeftError::InvalidDependency(format!("unknown task {id}")));
            }
        }
        if self.reaches(depends_on, task_id).await? {
            warn!(%task_id, %depends_on, "Rejected dependency that closes a cycle");
            return Err(WeftError::DependencyCycle {
                task_id: task_id.clone(),
                depends_on: depends_on.clone(),
            });
        }

        dependency.created_at = self.clock.now();
        self.store.insert_dependency(&dependency).await?;
        debug!(
            task_id = %dependency.task_id,
            depends_on = %dependency.depends_on_task_id,
            "Dependency added"
        );
        Ok(dependency)
    }

    /// Whether `target` is reachable from `start` along stored edges.
    async fn reaches(&self, start: &str, target: &str) -> WeftResult<bool> {
        let mut frontier = vec![start.to_string()];
        let mut seen: HashSet<String> = HashSet::new();
        while !frontier.is_empty() {
            if frontier.iter().any(|id| id == target) {
                return Ok(true);
            }
            frontier.retain(|id| seen.insert(id.clone()));
            if frontier.is_empty() {
                break;
            }
            let edges = self
                .store
                .list_dependencies(&DependencyQuery::of_tasks(frontier))
                .await?;
            frontier = edges.into_iter().map(|e| e.depends_on_task_id).collect();
        }
        Ok(false)
    }

    // ------------------------------------------------------------------
    // Readiness and claiming
    // ------------------------------------------------------------------

    /// Pending tasks whose every dependency is completed, most urgent first
    /// and oldest first within a priority.
    pub async fn ready_tasks(
        &self,
        batch_id: Option<&str>,
        limit: Option<usize>,
    ) -> WeftResult<Vec<Task>> {
        let pending = self
            .store
            .list_tasks(&TaskQuery {
                batch_id: batch_id.map(str::to_string),
                status: Some(TaskStatus::Pending),
                ..Default::default()
            })
            .await?;
        let blocked = self.blocked(&pending).await?;

        let mut ready: Vec<Task> = pending
            .into_iter()
            .filter(|t| !blocked.contains(&t.task_id))
            .collect();
        ready.sort_by(|a, b| {
            a.priority
                .cmp(&b.priority)
                .then_with(|| a.created_at.cmp(&b.created_at))
        });
        ready.truncate(limit.unwrap_or(self.default_limit));
        Ok(ready)
    }

    /// Ids among `tasks` that wait on a task that is not completed.
    async fn blocked(&self, tasks: &[Task]) -> WeftResult<HashSet<String>> {
        if tasks.is_empty() {
            return Ok(HashSet::new());
        }
        let ids: Vec<String> = tasks.iter().map(|t| t.task_id.clone()).collect();
        let edges = self
            .store
            .list_dependencies(&DependencyQuery::of_tasks(ids))
            .await?;
        if edges.is_empty() {
            return Ok(HashSet::new());
        }

        let targets: Vec<String> = edges
            .iter()
            .map(|e| e.depends_on_task_id.clone())
            .collect::<HashSet<_>>()
            .into_iter()
            .collect();
        let completed: HashSet<String> = self
            .store
            .get_tasks(&targets)
            .await?
            .into_iter()
            .filter(|t| t.status == TaskStatus::Completed)
            .map(|t| t.task_id)
            .collect();

        Ok(edges
            .into_iter()
            .filter(|e| !completed.contains(&e.depends_on_task_id))
            .map(|e| e.task_id)
            .collect())
    }

    /// Claim a ready task for `agent_id` and move it to `running`.
    ///
    /// Returns `Ok(None)` if the task is unknown, no longer pending, still
    /// blocked, or another agent claimed it first.
    pub async fn claim_task(&self, task_id: &str, agent_id: &str) -> WeftResult<Option<Task>> {
        let Some(mut task) = self.store.get_task(task_id).await? else {
            return Ok(None);
        };
        if task.status != TaskStatus::Pending {
            debug!(task_id, status = %task.status, "Task not claimable");
            return Ok(None);
        }
        if !self.blocked(std::slice::from_ref(&task)).await?.is_empty() {
            debug!(task_id, "Task has unfinished dependencies");
            return Ok(None);
        }

        let now = self.clock.now();
        task.agent_id = agent_id.to_string();
        task.status = TaskStatus::Running;
        task.scheduled_at = Some(now);
        task.started_at = Some(now);
        task.attempts += 1;

        if self
            .store
            .update_task_if(&task, TaskStatus::Pending)
            .await?
        {
            info!(task_id, agent_id, attempt = task.attempts, "Task claimed");
            Ok(Some(task))
        } else {
            warn!(task_id, agent_id, "Lost claim race");
            Ok(None)
        }
    }

    // ------------------------------------------------------------------
    // Lookups
    // ------------------------------------------------------------------

    pub async fn get_task(&self, task_id: &str) -> WeftResult<Option<TaskDetail>> {
        let Some(task) = self.store.get_task(task_id).await? else {
            return Ok(None);
        };
        let dependencies = self
            .store
            .list_dependencies(&DependencyQuery::of_tasks(vec![task_id.to_string()]))
            .await?;
        let dependents = self
            .store
            .list_dependencies(&DependencyQuery::dependents_of(task_id))
            .await?;
        Ok(Some(TaskDetail {
            task,
            dependencies,
            dependents,
        }))
    }

    pub async fn get_batch(&self, batch_id: &str) -> WeftResult<Option<BatchDetail>> {
        let Some(batch) = self.store.get_batch(batch_id).await? else {
            return Ok(None);
        };
        let mut tasks = self.batch_tasks(batch_id).await?;
        tasks.sort_by_key(|t| t.created_at);
        Ok(Some(BatchDetail { batch, tasks }))
    }

    /// The dependency graph of one batch, for callers dispatching it as a
    /// whole.
    ///
    /// Dependencies on tasks of other batches count as finished once those
    /// tasks have completed.
    pub async fn batch_graph(&self, batch_id: &str) -> WeftResult<DependencyGraph> {
        let mut tasks = self.batch_tasks(batch_id).await?;
        if tasks.is_empty() {
            return Ok(DependencyGraph::new());
        }
        tasks.sort_by_key(|t| t.created_at);
        let ids: HashSet<String> = tasks.iter().map(|t| t.task_id.clone()).collect();
        let edges = self
            .store
            .list_dependencies(&DependencyQuery::of_tasks(ids.iter().cloned().collect()))
            .await?;
        let mut graph = DependencyGraph::from_tasks(&tasks, &edges);

        let mut outside: Vec<String> = edges
            .iter()
            .map(|e| e.depends_on_task_id.clone())
            .filter(|id| !ids.contains(id))
            .collect();
        outside.sort();
        outside.dedup();
        if !outside.is_empty() {
            for task in self.store.get_tasks(&outside).await? {
                if task.status == TaskStatus::Completed {
                    graph.complete(&task.task_id);
                }
            }
        }
        Ok(graph)
    }

    /// Tasks assigned to `agent_id`, most urgent first and newest first
    /// within a priority.
    pub async fn agent_tasks(
        &self,
        agent_id: &str,
        status: Option<TaskStatus>,
        task_type: Option<&str>,
        limit: Option<usize>,
    ) -> WeftResult<Vec<Task>> {
        let mut tasks = self
            .store
            .list_tasks(&TaskQuery {
                agent_id: Some(agent_id.to_string()),
                status,
                task_type: task_type.map(str::to_string),
                ..Default::default()
            })
            .await?;
        tasks.sort_by(|a, b| {
            a.priority
                .cmp(&b.priority)
                .then_with(|| b.created_at.cmp(&a.created_at))
        });
        tasks.truncate(limit.unwrap_or(self.default_limit));
        Ok(tasks)
    }

    /// Pending and running batches, oldest first.
    pub async fn active_batches(
        &self,
        session_id: Option<&str>,
        limit: Option<usize>,
    ) -> WeftResult<Vec<TaskBatch>> {
        let mut batches = self
            .store
            .list_batches(&BatchQuery {
                session_id: session_id.map(str::to_string),
                statuses: vec![BatchStatus::Pending, BatchStatus::Running],
            })
            .await?;
        batches.sort_by_key(|b| b.created_at);
        batches.truncate(limit.unwrap_or(self.default_limit));
        Ok(batches)
    }

    pub async fn batch_statistics(&self, batch_id: &str) -> WeftResult<BatchStatistics> {
        let tasks = self.batch_tasks(batch_id).await?;
        let mut stats = BatchStatistics {
            total: tasks.len(),
            by_status: BTreeMap::new(),
        };
        for task in &tasks {
            *stats
                .by_status
                .entry(task.status.as_str().to_string())
                .or_insert(0) += 1;
        }
        Ok(stats)
    }

    async fn batch_tasks(&self, batch_id: &str) -> WeftResult<Vec<Task>> {
        self.store
            .list_tasks(&TaskQuery {
                batch_id: Some(batch_id.to_string()),
                ..Default::default()
            })
            .await
    }

    // ------------------------------------------------------------------
    // Progress
    // ------------------------------------------------------------------

    /// Apply `update` to a task.
    ///
    /// Moving a pending task to `scheduled` or `running` is refused while it
    /// has unfinished dependencies. Start and completion times default to
    /// now when the status implies them, and execution time is derived from
    /// them when not given.
    pub async fn update_task_status(
        &self,
        task_id: &str,
        update: TaskUpdate,
    ) -> WeftResult<Option<Task>> {
        let Some(mut task) = self.store.get_task(task_id).await? else {
            return Ok(None);
        };
        let from = task.status;
        let starting = matches!(update.status, TaskStatus::Scheduled | TaskStatus::Running);
        if from == TaskStatus::Pending
            && starting
            && !self.blocked(std::slice::from_ref(&task)).await?.is_empty()
        {
            warn!(task_id, to = %update.status, "Refused to start a blocked task");
            return Err(WeftError::transition("task", from, update.status));
        }

        let now = self.clock.now();
        task.status = update.status;
        if update.status == TaskStatus::Scheduled && task.scheduled_at.is_none() {
            task.scheduled_at = Some(now);
        }
        if let Some(at) = update.started_at {
            task.started_at = Some(at);
        } else if update.status == TaskStatus::Running && task.started_at.is_none() {
            task.started_at = Some(now);
        }
        if let Some(at) = update.completed_at {
            task.completed_at = Some(at);
        } else if update.status.is_terminal() {
            task.completed_at = Some(now);
        }
        task.execution_time_seconds = update.execution_time_seconds.or_else(|| {
            match (task.started_at, task.completed_at) {
                (Some(start), Some(end)) if update.status.is_terminal() => {
                    Some((end - start).num_milliseconds() as f64 / 1000.0)
                }
                _ => task.execution_time_seconds,
            }
        });
        if update.result.is_some() {
            task.result = update.result;
        }
        if update.error_message.is_some() {
            task.error_message = update.error_message;
        }

        // A conditional write keeps a concurrent claim from being overwritten
        // by a stale read.
        if !self.store.update_task_if(&task, from).await? {
            warn!(task_id, from = %from, to = %task.status, "Task changed during update");
            return Ok(None);
        }
        info!(task_id, from = %from, to = %task.status, "Task status updated");
        Ok(Some(task))
    }

    /// Record a failed attempt and apply the task's retry policy: back to
    /// `pending` while retries remain, otherwise terminally `failed`.
    pub async fn record_failure(
        &self,
        task_id: &str,
        error: &str,
    ) -> WeftResult<Option<(Task, RetryDecision)>> {
        let Some(task) = self.store.get_task(task_id).await? else {
            return Ok(None);
        };
        let decision = RetryPolicy::for_task(&task).decide(task.attempts.max(1));
        let next = match decision {
            RetryDecision::Retry { .. } => TaskStatus::Pending,
            RetryDecision::Exhausted => TaskStatus::Failed,
        };
        let updated = self
            .update_task_status(task_id, TaskUpdate::to(next).with_error(error))
            .await?;
        if let RetryDecision::Retry { attempt, .. } = decision {
            info!(task_id, attempt, "Task requeued for retry");
        }
        Ok(updated.map(|task| (task, decision)))
    }

    /// Completed siblings of a failed task to undo, in the batch's rollback
    /// order. Empty unless the task asked for rollback.
    pub async fn rollback_plan(&self, failed_task_id: &str) -> WeftResult<Vec<Task>> {
        let Some(task) = self.store.get_task(failed_task_id).await? else {
            return Ok(Vec::new());
        };
        let Some(batch_id) = task.batch_id.as_deref() else {
            return Ok(Vec::new());
        };
        if !task.rollback_on_failure {
            return Ok(Vec::new());
        }
        let Some(batch) = self.store.get_batch(batch_id).await? else {
            return Ok(Vec::new());
        };
        let siblings = self.batch_tasks(batch_id).await?;
        Ok(rollback_order(batch.rollback_strategy, &siblings))
    }

    /// Attach the payload needed to undo a task.
    pub async fn record_rollback_data(
        &self,
        task_id: &str,
        rollback_data: serde_json::Value,
    ) -> WeftResult<bool> {
        let Some(mut task) = self.store.get_task(task_id).await? else {
            return Ok(false);
        };
        task.rollback_data = Some(rollback_data);
        self.store.update_task(&task).await
    }

    /// Set a batch's status. Batch status is derived by the caller; the
    /// scheduler only stamps `started_at` and `completed_at`.
    pub async fn update_batch_status(
        &self,
        batch_id: &str,
        status: BatchStatus,
    ) -> WeftResult<Option<TaskBatch>> {
        let Some(mut batch) = self.store.get_batch(batch_id).await? else {
            return Ok(None);
        };
        let now = self.clock.now();
        batch.status = status;
        if status == BatchStatus::Running && batch.started_at.is_none() {
            batch.started_at = Some(now);
        }
        if !status.is_active() {
            batch.completed_at = Some(now);
        }
        if !self.store.update_batch(&batch).await? {
            return Ok(None);
        }
        info!(batch_id, status = %status, "Batch status updated");
        Ok(Some(batch))
    }

    /// Cancel a batch and every task in it that has not started. Returns the
    /// batch and the number of tasks cancelled.
    pub async fn cancel_batch(&self, batch_id: &str) -> WeftResult<Option<(TaskBatch, usize)>> {
        if self.store.get_batch(batch_id).await?.is_none() {
            return Ok(None);
        }
        let now = self.clock.now();
        let mut cancelled = 0;
        for mut task in self.batch_tasks(batch_id).await? {
            let from = task.status;
            if !matches!(from, TaskStatus::Pending | TaskStatus::Scheduled) {
                continue;
            }
            task.status = TaskStatus::Cancelled;
            task.completed_at = Some(now);
            if self.store.update_task_if(&task, from).await? {
                cancelled += 1;
            }
        }
        let batch = self
            .update_batch_status(batch_id, BatchStatus::Cancelled)
            .await?;
        info!(batch_id, cancelled, "Batch cancelled");
        Ok(batch.map(|b| (b, cancelled)))
    }
}
