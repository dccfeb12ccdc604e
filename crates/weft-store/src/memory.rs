use crate::query::{
    AgentQuery, BatchQuery, CheckpointQuery, DependencyQuery, GateQuery, MessageQuery,
    MetricQuery, SessionQuery, TaskQuery,
};
use crate::store::{CascadeReport, WorkflowStore};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::{HashMap, HashSet};
use tokio::sync::RwLock;
use weft_core::{
    AgentMessage, AgentStatus, GateStatus, MessageStatus, MetricObservation, QualityGateExecution,
    RegisteredAgent, Task, TaskBatch, TaskDependency, TaskStatus, WeftError, WeftResult,
    WorkflowCheckpoint, WorkflowSession,
};

/// Rows in insertion order with a primary-key index.
///
/// Listing in insertion order keeps ties between equal timestamps stable
/// under the engine's sorts.
#[derive(Debug)]
struct Table<T> {
    kind: &'static str,
    rows: Vec<T>,
    index: HashMap<String, usize>,
}

impl<T: Clone> Table<T> {
    fn new(kind: &'static str) -> Self {
        Self {
            kind,
            rows: Vec::new(),
            index: HashMap::new(),
        }
    }

    fn insert(&mut self, key: &str, row: &T) -> WeftResult<()> {
        if self.index.contains_key(key) {
            return Err(WeftError::Store(format!(
                "duplicate {} id '{}'",
                self.kind, key
            )));
        }
        self.index.insert(key.to_string(), self.rows.len());
        self.rows.push(row.clone());
        Ok(())
    }

    fn upsert(&mut self, key: &str, row: &T) {
        match self.index.get(key) {
            Some(&at) => self.rows[at] = row.clone(),
            None => {
                self.index.insert(key.to_string(), self.rows.len());
                self.rows.push(row.clone());
            }
        }
    }

    fn get(&self, key: &str) -> Option<&T> {
        self.index.get(key).map(|&at| &self.rows[at])
    }

    fn get_mut(&mut self, key: &str) -> Option<&mut T> {
        match self.index.get(key) {
            Some(&at) => Some(&mut self.rows[at]),
            None => None,
        }
    }

    fn replace(&mut self, key: &str, row: &T) -> bool {
        match self.get_mut(key) {
            Some(slot) => {
                *slot = row.clone();
                true
            }
            None => false,
        }
    }

    fn select(&self, keep: impl Fn(&T) -> bool) -> Vec<T> {
        self.rows.iter().filter(|row| keep(row)).cloned().collect()
    }

    /// Drop every row for which `doomed` holds; returns how many went.
    fn remove_where(&mut self, key_of: impl Fn(&T) -> &str, doomed: impl Fn(&T) -> bool) -> usize {
        let before = self.rows.len();
        self.rows.retain(|row| !doomed(row));
        self.index = self
            .rows
            .iter()
            .enumerate()
            .map(|(at, row)| (key_of(row).to_string(), at))
            .collect();
        before - self.rows.len()
    }
}

#[derive(Debug)]
struct Collections {
    sessions: Table<WorkflowSession>,
    checkpoints: Table<WorkflowCheckpoint>,
    messages: Table<AgentMessage>,
    batches: Table<TaskBatch>,
    tasks: Table<Task>,
    dependencies: Vec<TaskDependency>,
    gates: Table<QualityGateExecution>,
    agents: Table<RegisteredAgent>,
    metrics: Vec<MetricObservation>,
}

impl Default for Collections {
    fn default() -> Self {
        Self {
            sessions: Table::new("session"),
            checkpoints: Table::new("checkpoint"),
            messages: Table::new("message"),
            batches: Table::new("batch"),
            tasks: Table::new("task"),
            dependencies: Vec::new(),
            gates: Table::new("gate execution"),
            agents: Table::new("agent"),
            metrics: Vec::new(),
        }
    }
}

/// A [`WorkflowStore`] held entirely in process memory.
///
/// One `RwLock` guards every collection, so each call observes and applies a
/// consistent snapshot. Nothing survives a restart.
#[derive(Debug, Default)]
pub struct InMemoryStore {
    inner: RwLock<Collections>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl WorkflowStore for InMemoryStore {
    async fn insert_session(&self, session: &WorkflowSession) -> WeftResult<()> {
        self.inner
            .write()
            .await
            .sessions
            .insert(&session.session_id, session)
    }

    async fn get_session(&self, session_id: &str) -> WeftResult<Option<WorkflowSession>> {
        Ok(self.inner.read().await.sessions.get(session_id).cloned())
    }

    async fn list_sessions(&self, query: &SessionQuery) -> WeftResult<Vec<WorkflowSession>> {
        Ok(self.inner.read().await.sessions.select(|s| query.matches(s)))
    }

    async fn update_session(&self, session: &WorkflowSession) -> WeftResult<bool> {
        Ok(self
            .inner
            .write()
            .await
            .sessions
            .replace(&session.session_id, session))
    }

    async fn delete_session_cascade(&self, session_id: &str) -> WeftResult<Option<CascadeReport>> {
        let mut inner = self.inner.write().await;
        if inner.sessions.get(session_id).is_none() {
            return Ok(None);
        }
        let owned = Some(session_id.to_string());

        let batch_ids: HashSet<String> = inner
            .batches
            .rows
            .iter()
            .filter(|b| b.session_id == owned)
            .map(|b| b.batch_id.clone())
            .collect();
        let task_ids: HashSet<String> = inner
            .tasks
            .rows
            .iter()
            .filter(|t| t.batch_id.as_ref().is_some_and(|b| batch_ids.contains(b)))
            .map(|t| t.task_id.clone())
            .collect();

        let mut report = CascadeReport::default();
        let edges_before = inner.dependencies.len();
        inner
            .dependencies
            .retain(|d| !task_ids.contains(&d.task_id) && !task_ids.contains(&d.depends_on_task_id));
        report.dependencies = edges_before - inner.dependencies.len();
        report.tasks = inner
            .tasks
            .remove_where(|t| t.task_id.as_str(), |t| task_ids.contains(&t.task_id));
        report.batches = inner
            .batches
            .remove_where(|b| b.batch_id.as_str(), |b| batch_ids.contains(&b.batch_id));
        report.messages = inner
            .messages
            .remove_where(|m| m.message_id.as_str(), |m| m.session_id == owned);
        report.checkpoints = inner
            .checkpoints
            .remove_where(|c| c.checkpoint_id.as_str(), |c| c.session_id == session_id);
        inner
            .sessions
            .remove_where(|s| s.session_id.as_str(), |s| s.session_id == session_id);

        Ok(Some(report))
    }

    async fn insert_checkpoint(&self, checkpoint: &WorkflowCheckpoint) -> WeftResult<()> {
        self.inner
            .write()
            .await
            .checkpoints
            .insert(&checkpoint.checkpoint_id, checkpoint)
    }

    async fn get_checkpoint(&self, checkpoint_id: &str) -> WeftResult<Option<WorkflowCheckpoint>> {
        Ok(self.inner.read().await.checkpoints.get(checkpoint_id).cloned())
    }

    async fn list_checkpoints(
        &self,
        query: &CheckpointQuery,
    ) -> WeftResult<Vec<WorkflowCheckpoint>> {
        Ok(self
            .inner
            .read()
            .await
            .checkpoints
            .select(|c| query.matches(c)))
    }

    async fn delete_checkpoints(&self, checkpoint_ids: &[String]) -> WeftResult<usize> {
        let doomed: HashSet<&str> = checkpoint_ids.iter().map(String::as_str).collect();
        Ok(self.inner.write().await.checkpoints.remove_where(
            |c| c.checkpoint_id.as_str(),
            |c| doomed.contains(c.checkpoint_id.as_str()),
        ))
    }

    async fn insert_message(&self, message: &AgentMessage) -> WeftResult<()> {
        self.inner
            .write()
            .await
            .messages
            .insert(&message.message_id, message)
    }

    async fn get_message(&self, message_id: &str) -> WeftResult<Option<AgentMessage>> {
        Ok(self.inner.read().await.messages.get(message_id).cloned())
    }

    async fn list_messages(&self, query: &MessageQuery) -> WeftResult<Vec<AgentMessage>> {
        Ok(self.inner.read().await.messages.select(|m| query.matches(m)))
    }

    async fn update_message(&self, message: &AgentMessage) -> WeftResult<bool> {
        Ok(self
            .inner
            .write()
            .await
            .messages
            .replace(&message.message_id, message))
    }

    async fn update_message_if(
        &self,
        message: &AgentMessage,
        expected: MessageStatus,
    ) -> WeftResult<bool> {
        let mut inner = self.inner.write().await;
        match inner.messages.get_mut(&message.message_id) {
            Some(stored) if stored.status == expected => {
                *stored = message.clone();
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn delete_messages_expired_before(&self, now: DateTime<Utc>) -> WeftResult<usize> {
        Ok(self
            .inner
            .write()
            .await
            .messages
            .remove_where(|m| m.message_id.as_str(), |m| m.is_expired_at(now)))
    }

    async fn insert_batch(&self, batch: &TaskBatch) -> WeftResult<()> {
        self.inner.write().await.batches.insert(&batch.batch_id, batch)
    }

    async fn get_batch(&self, batch_id: &str) -> WeftResult<Option<TaskBatch>> {
        Ok(self.inner.read().await.batches.get(batch_id).cloned())
    }

    async fn list_batches(&self, query: &BatchQuery) -> WeftResult<Vec<TaskBatch>> {
        Ok(self.inner.read().await.batches.select(|b| query.matches(b)))
    }

    async fn update_batch(&self, batch: &TaskBatch) -> WeftResult<bool> {
        Ok(self
            .inner
            .write()
            .await
            .batches
            .replace(&batch.batch_id, batch))
    }

    async fn insert_task(&self, task: &Task) -> WeftResult<()> {
        self.inner.write().await.tasks.insert(&task.task_id, task)
    }

    async fn get_task(&self, task_id: &str) -> WeftResult<Option<Task>> {
        Ok(self.inner.read().await.tasks.get(task_id).cloned())
    }

    async fn get_tasks(&self, task_ids: &[String]) -> WeftResult<Vec<Task>> {
        let inner = self.inner.read().await;
        Ok(task_ids
            .iter()
            .filter_map(|id| inner.tasks.get(id).cloned())
            .collect())
    }

    async fn list_tasks(&self, query: &TaskQuery) -> WeftResult<Vec<Task>> {
        Ok(self.inner.read().await.tasks.select(|t| query.matches(t)))
    }

    async fn update_task(&self, task: &Task) -> WeftResult<bool> {
        Ok(self.inner.write().await.tasks.replace(&task.task_id, task))
    }

    async fn update_task_if(&self, task: &Task, expected: TaskStatus) -> WeftResult<bool> {
        let mut inner = self.inner.write().await;
        match inner.tasks.get_mut(&task.task_id) {
            Some(stored) if stored.status == expected => {
                *stored = task.clone();
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn insert_dependency(&self, dependency: &TaskDependency) -> WeftResult<()> {
        let mut inner = self.inner.write().await;
        let duplicate = inner.dependencies.iter().any(|d| {
            d.task_id == dependency.task_id && d.depends_on_task_id == dependency.depends_on_task_id
        });
        if duplicate {
            return Err(WeftError::Store(format!(
                "duplicate dependency {} -> {}",
                dependency.task_id, dependency.depends_on_task_id
            )));
        }
        inner.dependencies.push(dependency.clone());
        Ok(())
    }

    async fn list_dependencies(&self, query: &DependencyQuery) -> WeftResult<Vec<TaskDependency>> {
        Ok(self
            .inner
            .read()
            .await
            .dependencies
            .iter()
            .filter(|d| query.matches(d))
            .cloned()
            .collect())
    }

    async fn insert_gate_execution(&self, execution: &QualityGateExecution) -> WeftResult<()> {
        self.inner
            .write()
            .await
            .gates
            .insert(&execution.execution_id, execution)
    }

    async fn get_gate_execution(
        &self,
        execution_id: &str,
    ) -> WeftResult<Option<QualityGateExecution>> {
        Ok(self.inner.read().await.gates.get(execution_id).cloned())
    }

    async fn list_gate_executions(&self, query: &GateQuery) -> WeftResult<Vec<QualityGateExecution>> {
        Ok(self.inner.read().await.gates.select(|g| query.matches(g)))
    }

    async fn complete_gate_execution(&self, execution: &QualityGateExecution) -> WeftResult<bool> {
        let mut inner = self.inner.write().await;
        match inner.gates.get_mut(&execution.execution_id) {
            Some(stored) if stored.status == GateStatus::Running => {
                *stored = execution.clone();
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn upsert_agent(&self, agent: &RegisteredAgent) -> WeftResult<()> {
        self.inner.write().await.agents.upsert(&agent.agent_id, agent);
        Ok(())
    }

    async fn get_agent(&self, agent_id: &str) -> WeftResult<Option<RegisteredAgent>> {
        Ok(self.inner.read().await.agents.get(agent_id).cloned())
    }

    async fn list_agents(&self, query: &AgentQuery) -> WeftResult<Vec<RegisteredAgent>> {
        Ok(self.inner.read().await.agents.select(|a| query.matches(a)))
    }

    async fn update_agent(&self, agent: &RegisteredAgent) -> WeftResult<bool> {
        Ok(self
            .inner
            .write()
            .await
            .agents
            .replace(&agent.agent_id, agent))
    }

    async fn touch_agent_heartbeat(&self, agent_id: &str, at: DateTime<Utc>) -> WeftResult<bool> {
        let mut inner = self.inner.write().await;
        match inner.agents.get_mut(agent_id) {
            Some(agent) => {
                agent.last_heartbeat = Some(at);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn set_agent_status(&self, agent_id: &str, status: AgentStatus) -> WeftResult<bool> {
        let mut inner = self.inner.write().await;
        match inner.agents.get_mut(agent_id) {
            Some(agent) => {
                agent.status = status;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn mark_agent_inactive_if(
        &self,
        agent_id: &str,
        observed: Option<DateTime<Utc>>,
    ) -> WeftResult<bool> {
        let mut inner = self.inner.write().await;
        match inner.agents.get_mut(agent_id) {
            Some(agent) if agent.status == AgentStatus::Active && agent.last_heartbeat == observed => {
                agent.status = AgentStatus::Inactive;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn insert_metric(&self, metric: &MetricObservation) -> WeftResult<()> {
        self.inner.write().await.metrics.push(metric.clone());
        Ok(())
    }

    async fn list_metrics(&self, query: &MetricQuery) -> WeftResult<Vec<MetricObservation>> {
        Ok(self
            .inner
            .read()
            .await
            .metrics
            .iter()
            .filter(|m| query.matches(m))
            .cloned()
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use weft_core::CheckpointType;

    #[tokio::test]
    async fn test_duplicate_insert_is_store_error() {
        let store = InMemoryStore::new();
        let session = WorkflowSession::new("planner");
        store.insert_session(&session).await.unwrap();
        let err = store.insert_session(&session).await.unwrap_err();
        assert!(matches!(err, WeftError::Store(_)));
    }

    #[tokio::test]
    async fn test_update_unknown_returns_false() {
        let store = InMemoryStore::new();
        let task = Task::new("t", "build", "exec-1");
        assert!(!store.update_task(&task).await.unwrap());
        assert!(store.get_task(&task.task_id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_update_task_if_checks_status() {
        let store = InMemoryStore::new();
        let mut task = Task::new("t", "build", "exec-1");
        store.insert_task(&task).await.unwrap();

        task.status = TaskStatus::Running;
        assert!(store.update_task_if(&task, TaskStatus::Pending).await.unwrap());
        // The row is no longer pending, so a second claimer loses.
        assert!(!store.update_task_if(&task, TaskStatus::Pending).await.unwrap());
    }

    #[tokio::test]
    async fn test_delete_checkpoints_skips_missing() {
        let store = InMemoryStore::new();
        let c1 = WorkflowCheckpoint::new("s", "a", CheckpointType::Manual, json!({}));
        let c2 = WorkflowCheckpoint::new("s", "a", CheckpointType::Manual, json!({}));
        store.insert_checkpoint(&c1).await.unwrap();
        store.insert_checkpoint(&c2).await.unwrap();

        let deleted = store
            .delete_checkpoints(&[c1.checkpoint_id.clone(), "gone".into()])
            .await
            .unwrap();
        assert_eq!(deleted, 1);
        assert!(store.get_checkpoint(&c2.checkpoint_id).await.unwrap().is_some());
        assert!(store.get_checkpoint(&c1.checkpoint_id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_list_preserves_insertion_order() {
        let store = InMemoryStore::new();
        let ids: Vec<String> = (0..5)
            .map(|i| format!("t{i}"))
            .collect();
        for id in &ids {
            let mut task = Task::new(id, "build", "exec-1");
            task.task_id = id.clone();
            store.insert_task(&task).await.unwrap();
        }
        let listed: Vec<String> = store
            .list_tasks(&TaskQuery::default())
            .await
            .unwrap()
            .into_iter()
            .map(|t| t.task_id)
            .collect();
        assert_eq!(listed, ids);
    }

    #[tokio::test]
    async fn test_mark_inactive_requires_observed_heartbeat() {
        let store = InMemoryStore::new();
        let t0 = Utc::now();
        let mut agent = RegisteredAgent::new("exec-1", weft_core::AgentType::Execution, "E");
        agent.last_heartbeat = Some(t0);
        store.upsert_agent(&agent).await.unwrap();

        let stale_view = Some(t0 - chrono::Duration::minutes(5));
        assert!(!store.mark_agent_inactive_if("exec-1", stale_view).await.unwrap());
        assert!(store.mark_agent_inactive_if("exec-1", Some(t0)).await.unwrap());
        assert!(!store.mark_agent_inactive_if("exec-1", Some(t0)).await.unwrap());
        assert!(!store.mark_agent_inactive_if("nobody", None).await.unwrap());
    }
}
