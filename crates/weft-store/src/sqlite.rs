use crate::query::{
    AgentQuery, BatchQuery, CheckpointQuery, DependencyQuery, GateQuery, MessageQuery,
    MetricQuery, SessionQuery, TaskQuery,
};
use crate::store::{CascadeReport, WorkflowStore};
use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use parking_lot::Mutex;
use rusqlite::types::Value;
use rusqlite::{params_from_iter, Connection, OptionalExtension};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::path::Path;
use std::sync::Arc;
use tracing::info;
use weft_core::{
    AgentMessage, AgentStatus, MessageStatus, MetricObservation, QualityGateExecution, RegisteredAgent, Task, TaskBatch,
    TaskDependency, TaskStatus, WeftError, WeftResult, WorkflowCheckpoint, WorkflowSession,
};

/// One table per entity. Each row keeps the full entity as JSON in `body`
/// next to the columns that queries and conditional updates filter on.
const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS workflow_sessions (
    session_id TEXT PRIMARY KEY,
    status TEXT NOT NULL,
    created_by TEXT NOT NULL,
    body TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_sessions_status ON workflow_sessions(status);

CREATE TABLE IF NOT EXISTS workflow_checkpoints (
    checkpoint_id TEXT PRIMARY KEY,
    session_id TEXT NOT NULL,
    agent_id TEXT NOT NULL,
    checkpoint_type TEXT NOT NULL,
    body TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_checkpoints_chain ON workflow_checkpoints(session_id, agent_id);

CREATE TABLE IF NOT EXISTS agent_messages (
    message_id TEXT PRIMARY KEY,
    session_id TEXT,
    from_agent TEXT NOT NULL,
    to_agent TEXT,
    correlation_id TEXT,
    status TEXT NOT NULL,
    expires_at TEXT,
    body TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_messages_to ON agent_messages(to_agent, status);
CREATE INDEX IF NOT EXISTS idx_messages_correlation ON agent_messages(correlation_id);
CREATE INDEX IF NOT EXISTS idx_messages_expires ON agent_messages(expires_at);

CREATE TABLE IF NOT EXISTS task_batches (
    batch_id TEXT PRIMARY KEY,
    session_id TEXT,
    status TEXT NOT NULL,
    body TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_batches_session ON task_batches(session_id, status);

CREATE TABLE IF NOT EXISTS tasks (
    task_id TEXT PRIMARY KEY,
    batch_id TEXT,
    agent_id TEXT NOT NULL,
    status TEXT NOT NULL,
    body TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_tasks_batch ON tasks(batch_id, status);
CREATE INDEX IF NOT EXISTS idx_tasks_agent ON tasks(agent_id, status);

CREATE TABLE IF NOT EXISTS task_dependencies (
    task_id TEXT NOT NULL,
    depends_on_task_id TEXT NOT NULL,
    body TEXT NOT NULL,
    PRIMARY KEY (task_id, depends_on_task_id)
);
CREATE INDEX IF NOT EXISTS idx_dependencies_target ON task_dependencies(depends_on_task_id);

CREATE TABLE IF NOT EXISTS quality_gate_executions (
    execution_id TEXT PRIMARY KEY,
    gate_type TEXT NOT NULL,
    session_id TEXT,
    status TEXT NOT NULL,
    started_at TEXT NOT NULL,
    body TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_gates_type ON quality_gate_executions(gate_type, started_at);

CREATE TABLE IF NOT EXISTS agent_registry (
    agent_id TEXT PRIMARY KEY,
    status TEXT NOT NULL,
    last_heartbeat TEXT,
    body TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS workflow_metrics (
    metric_id TEXT PRIMARY KEY,
    metric_name TEXT NOT NULL,
    component TEXT,
    session_id TEXT,
    recorded_at TEXT NOT NULL,
    body TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_metrics_name ON workflow_metrics(metric_name, recorded_at);
";

fn store_err(e: rusqlite::Error) -> WeftError {
    WeftError::Store(e.to_string())
}

/// Timestamps go into indexed columns as fixed-width RFC 3339 strings, so
/// text comparison agrees with time order.
fn ts(at: &DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn body<T: Serialize>(value: &T) -> WeftResult<String> {
    Ok(serde_json::to_string(value)?)
}

/// Owned statement parameters, so a statement can move onto the blocking
/// pool.
macro_rules! values {
    ($($value:expr),* $(,)?) => {
        vec![$(Value::from($value)),*]
    };
}

/// Indexed-column pre-filter for a `SELECT body` scan.
#[derive(Default)]
struct Filter {
    clauses: Vec<String>,
    values: Vec<String>,
}

impl Filter {
    fn next(&mut self, value: String) -> usize {
        self.values.push(value);
        self.values.len()
    }

    fn eq(mut self, column: &str, value: Option<&str>) -> Self {
        if let Some(value) = value {
            let n = self.next(value.to_string());
            self.clauses.push(format!("{column} = ?{n}"));
        }
        self
    }

    fn any(mut self, column: &str, values: &[String]) -> Self {
        if !values.is_empty() {
            let slots: Vec<String> = values
                .iter()
                .map(|v| format!("?{}", self.next(v.clone())))
                .collect();
            self.clauses
                .push(format!("{column} IN ({})", slots.join(", ")));
        }
        self
    }

    fn since(mut self, column: &str, after: Option<&DateTime<Utc>>) -> Self {
        if let Some(after) = after {
            let n = self.next(ts(after));
            self.clauses.push(format!("{column} >= ?{n}"));
        }
        self
    }

    fn visible_to(mut self, agent: Option<&str>) -> Self {
        if let Some(agent) = agent {
            let n = self.next(agent.to_string());
            self.clauses.push(format!(
                "(to_agent = ?{n} OR (to_agent IS NULL AND from_agent <> ?{n}))"
            ));
        }
        self
    }

    fn sql(&self, table: &str) -> String {
        let mut sql = format!("SELECT body FROM {table}");
        if !self.clauses.is_empty() {
            sql.push_str(" WHERE ");
            sql.push_str(&self.clauses.join(" AND "));
        }
        sql.push_str(" ORDER BY rowid");
        sql
    }
}

/// A [`WorkflowStore`] backed by one SQLite database file.
///
/// The connection sits behind a mutex, so calls from one process are
/// serialized, and every statement runs on tokio's blocking pool. Conditional
/// updates are single `UPDATE ... WHERE` statements and the session cascade
/// runs in one transaction, which keeps both safe when several processes
/// share the file.
pub struct SqliteStore {
    conn: Arc<Mutex<Connection>>,
}

impl std::fmt::Debug for SqliteStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SqliteStore").finish_non_exhaustive()
    }
}

impl SqliteStore {
    /// Open (or create) the database at `path` in WAL mode.
    pub fn open(path: impl AsRef<Path>) -> WeftResult<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(path).map_err(store_err)?;
        conn.pragma_update_and_check(None, "journal_mode", "WAL", |_| Ok(()))
            .map_err(store_err)?;
        conn.busy_timeout(std::time::Duration::from_secs(5))
            .map_err(store_err)?;
        let store = Self::init(conn)?;
        info!(path = %path.display(), "Opened SQLite workflow store");
        Ok(store)
    }

    /// A private in-memory database; gone when the store is dropped.
    pub fn in_memory() -> WeftResult<Self> {
        Self::init(Connection::open_in_memory().map_err(store_err)?)
    }

    fn init(conn: Connection) -> WeftResult<Self> {
        conn.execute_batch(SCHEMA).map_err(store_err)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Run `op` against the connection on the blocking pool. A busy database
    /// can hold the lock for the whole busy timeout, which must not stall an
    /// async worker.
    async fn run<R, F>(&self, op: F) -> WeftResult<R>
    where
        R: Send + 'static,
        F: FnOnce(&mut Connection) -> WeftResult<R> + Send + 'static,
    {
        let conn = Arc::clone(&self.conn);
        tokio::task::spawn_blocking(move || op(&mut *conn.lock()))
            .await
            .map_err(|e| WeftError::Store(format!("store task failed: {e}")))?
    }

    async fn exec(&self, sql: &'static str, values: Vec<Value>) -> WeftResult<usize> {
        self.run(move |conn| {
            conn.execute(sql, params_from_iter(values.iter()))
                .map_err(store_err)
        })
        .await
    }

    async fn fetch<T>(&self, table: &str, key: &str, id: &str) -> WeftResult<Option<T>>
    where
        T: DeserializeOwned + Send + 'static,
    {
        let sql = format!("SELECT body FROM {table} WHERE {key} = ?1");
        let id = id.to_string();
        self.run(move |conn| {
            let found: Option<String> = conn
                .query_row(&sql, [id], |row| row.get(0))
                .optional()
                .map_err(store_err)?;
            match found {
                Some(text) => Ok(Some(serde_json::from_str(&text)?)),
                None => Ok(None),
            }
        })
        .await
    }

    async fn select<T>(&self, table: &str, filter: Filter) -> WeftResult<Vec<T>>
    where
        T: DeserializeOwned + Send + 'static,
    {
        let sql = filter.sql(table);
        self.run(move |conn| {
            let mut stmt = conn.prepare(&sql).map_err(store_err)?;
            let rows = stmt
                .query_map(params_from_iter(filter.values.iter()), |row| {
                    row.get::<_, String>(0)
                })
                .map_err(store_err)?;
            let mut out = Vec::new();
            for text in rows {
                out.push(serde_json::from_str(&text.map_err(store_err)?)?);
            }
            Ok(out)
        })
        .await
    }
}

fn cascade(conn: &mut Connection, session_id: &str) -> WeftResult<Option<CascadeReport>> {
    let tx = conn.transaction().map_err(store_err)?;
    let exists = tx
        .query_row(
            "SELECT 1 FROM workflow_sessions WHERE session_id = ?1",
            [session_id],
            |_| Ok(()),
        )
        .optional()
        .map_err(store_err)?
        .is_some();
    if !exists {
        return Ok(None);
    }

    const OWNED_TASKS: &str = "SELECT task_id FROM tasks WHERE batch_id IN \
         (SELECT batch_id FROM task_batches WHERE session_id = ?1)";
    let report = CascadeReport {
        dependencies: tx
            .execute(
                &format!(
                    "DELETE FROM task_dependencies WHERE task_id IN ({OWNED_TASKS}) \
                     OR depends_on_task_id IN ({OWNED_TASKS})"
                ),
                [session_id],
            )
            .map_err(store_err)?,
        tasks: tx
            .execute(
                "DELETE FROM tasks WHERE batch_id IN \
                 (SELECT batch_id FROM task_batches WHERE session_id = ?1)",
                [session_id],
            )
            .map_err(store_err)?,
        batches: tx
            .execute("DELETE FROM task_batches WHERE session_id = ?1", [session_id])
            .map_err(store_err)?,
        messages: tx
            .execute("DELETE FROM agent_messages WHERE session_id = ?1", [session_id])
            .map_err(store_err)?,
        checkpoints: tx
            .execute(
                "DELETE FROM workflow_checkpoints WHERE session_id = ?1",
                [session_id],
            )
            .map_err(store_err)?,
    };
    tx.execute(
        "DELETE FROM workflow_sessions WHERE session_id = ?1",
        [session_id],
    )
    .map_err(store_err)?;
    tx.commit().map_err(store_err)?;
    Ok(Some(report))
}

fn delete_checkpoint_ids(conn: &mut Connection, ids: &[String]) -> WeftResult<usize> {
    let tx = conn.transaction().map_err(store_err)?;
    let mut deleted = 0;
    for id in ids {
        deleted += tx
            .execute(
                "DELETE FROM workflow_checkpoints WHERE checkpoint_id = ?1",
                [id],
            )
            .map_err(store_err)?;
    }
    tx.commit().map_err(store_err)?;
    Ok(deleted)
}

#[async_trait]
impl WorkflowStore for SqliteStore {
    async fn insert_session(&self, session: &WorkflowSession) -> WeftResult<()> {
        self.exec(
            "INSERT INTO workflow_sessions (session_id, status, created_by, body) \
             VALUES (?1, ?2, ?3, ?4)",
            values![
                session.session_id.clone(),
                session.status.to_string(),
                session.created_by.clone(),
                body(session)?
            ],
        )
        .await?;
        Ok(())
    }

    async fn get_session(&self, session_id: &str) -> WeftResult<Option<WorkflowSession>> {
        self.fetch("workflow_sessions", "session_id", session_id).await
    }

    async fn list_sessions(&self, query: &SessionQuery) -> WeftResult<Vec<WorkflowSession>> {
        let filter = Filter::default()
            .eq("status", query.status.as_ref().map(|s| s.as_str()))
            .eq("created_by", query.created_by.as_deref());
        let rows: Vec<WorkflowSession> = self.select("workflow_sessions", filter).await?;
        Ok(rows.into_iter().filter(|s| query.matches(s)).collect())
    }

    async fn update_session(&self, session: &WorkflowSession) -> WeftResult<bool> {
        let n = self
            .exec(
                "UPDATE workflow_sessions SET status = ?2, created_by = ?3, body = ?4 \
                 WHERE session_id = ?1",
                values![
                    session.session_id.clone(),
                    session.status.to_string(),
                    session.created_by.clone(),
                    body(session)?
                ],
            )
            .await?;
        Ok(n > 0)
    }

    async fn delete_session_cascade(&self, session_id: &str) -> WeftResult<Option<CascadeReport>> {
        let session_id = session_id.to_string();
        self.run(move |conn| cascade(conn, &session_id)).await
    }

    async fn insert_checkpoint(&self, checkpoint: &WorkflowCheckpoint) -> WeftResult<()> {
        self.exec(
            "INSERT INTO workflow_checkpoints \
             (checkpoint_id, session_id, agent_id, checkpoint_type, body) \
             VALUES (?1, ?2, ?3, ?4, ?5)",
            values![
                checkpoint.checkpoint_id.clone(),
                checkpoint.session_id.clone(),
                checkpoint.agent_id.clone(),
                checkpoint.checkpoint_type.to_string(),
                body(checkpoint)?
            ],
        )
        .await?;
        Ok(())
    }

    async fn get_checkpoint(&self, checkpoint_id: &str) -> WeftResult<Option<WorkflowCheckpoint>> {
        self.fetch("workflow_checkpoints", "checkpoint_id", checkpoint_id)
            .await
    }

    async fn list_checkpoints(
        &self,
        query: &CheckpointQuery,
    ) -> WeftResult<Vec<WorkflowCheckpoint>> {
        let filter = Filter::default()
            .eq("session_id", query.session_id.as_deref())
            .eq("agent_id", query.agent_id.as_deref())
            .eq(
                "checkpoint_type",
                query.checkpoint_type.as_ref().map(|t| t.as_str()),
            );
        let rows: Vec<WorkflowCheckpoint> = self.select("workflow_checkpoints", filter).await?;
        Ok(rows.into_iter().filter(|c| query.matches(c)).collect())
    }

    async fn delete_checkpoints(&self, checkpoint_ids: &[String]) -> WeftResult<usize> {
        let ids = checkpoint_ids.to_vec();
        self.run(move |conn| delete_checkpoint_ids(conn, &ids)).await
    }

    async fn insert_message(&self, message: &AgentMessage) -> WeftResult<()> {
        self.exec(
            "INSERT INTO agent_messages \
             (message_id, session_id, from_agent, to_agent, correlation_id, status, expires_at, body) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            values![
                message.message_id.clone(),
                message.session_id.clone(),
                message.from_agent.clone(),
                message.to_agent.clone(),
                message.correlation_id.clone(),
                message.status.to_string(),
                message.expires_at.as_ref().map(ts),
                body(message)?
            ],
        )
        .await?;
        Ok(())
    }

    async fn get_message(&self, message_id: &str) -> WeftResult<Option<AgentMessage>> {
        self.fetch("agent_messages", "message_id", message_id).await
    }

    async fn list_messages(&self, query: &MessageQuery) -> WeftResult<Vec<AgentMessage>> {
        let filter = Filter::default()
            .visible_to(query.recipient.as_deref())
            .eq("correlation_id", query.correlation_id.as_deref())
            .eq("session_id", query.session_id.as_deref())
            .eq("status", query.status.as_ref().map(|s| s.as_str()));
        let rows: Vec<AgentMessage> = self.select("agent_messages", filter).await?;
        Ok(rows.into_iter().filter(|m| query.matches(m)).collect())
    }

    async fn update_message(&self, message: &AgentMessage) -> WeftResult<bool> {
        let n = self
            .exec(
                "UPDATE agent_messages SET status = ?2, expires_at = ?3, body = ?4 \
                 WHERE message_id = ?1",
                values![
                    message.message_id.clone(),
                    message.status.to_string(),
                    message.expires_at.as_ref().map(ts),
                    body(message)?
                ],
            )
            .await?;
        Ok(n > 0)
    }

    async fn update_message_if(
        &self,
        message: &AgentMessage,
        expected: MessageStatus,
    ) -> WeftResult<bool> {
        let n = self
            .exec(
                "UPDATE agent_messages SET status = ?2, expires_at = ?3, body = ?4 \
                 WHERE message_id = ?1 AND status = ?5",
                values![
                    message.message_id.clone(),
                    message.status.to_string(),
                    message.expires_at.as_ref().map(ts),
                    body(message)?,
                    expected.to_string()
                ],
            )
            .await?;
        Ok(n > 0)
    }

    async fn delete_messages_expired_before(&self, now: DateTime<Utc>) -> WeftResult<usize> {
        self.exec(
            "DELETE FROM agent_messages WHERE expires_at IS NOT NULL AND expires_at < ?1",
            values![ts(&now)],
        )
        .await
    }

    async fn insert_batch(&self, batch: &TaskBatch) -> WeftResult<()> {
        self.exec(
            "INSERT INTO task_batches (batch_id, session_id, status, body) \
             VALUES (?1, ?2, ?3, ?4)",
            values![
                batch.batch_id.clone(),
                batch.session_id.clone(),
                batch.status.to_string(),
                body(batch)?
            ],
        )
        .await?;
        Ok(())
    }

    async fn get_batch(&self, batch_id: &str) -> WeftResult<Option<TaskBatch>> {
        self.fetch("task_batches", "batch_id", batch_id).await
    }

    async fn list_batches(&self, query: &BatchQuery) -> WeftResult<Vec<TaskBatch>> {
        let statuses: Vec<String> = query.statuses.iter().map(|s| s.to_string()).collect();
        let filter = Filter::default()
            .eq("session_id", query.session_id.as_deref())
            .any("status", &statuses);
        let rows: Vec<TaskBatch> = self.select("task_batches", filter).await?;
        Ok(rows.into_iter().filter(|b| query.matches(b)).collect())
    }

    async fn update_batch(&self, batch: &TaskBatch) -> WeftResult<bool> {
        let n = self
            .exec(
                "UPDATE task_batches SET session_id = ?2, status = ?3, body = ?4 WHERE batch_id = ?1",
                values![
                    batch.batch_id.clone(),
                    batch.session_id.clone(),
                    batch.status.to_string(),
                    body(batch)?
                ],
            )
            .await?;
        Ok(n > 0)
    }

    async fn insert_task(&self, task: &Task) -> WeftResult<()> {
        self.exec(
            "INSERT INTO tasks (task_id, batch_id, agent_id, status, body) \
             VALUES (?1, ?2, ?3, ?4, ?5)",
            values![
                task.task_id.clone(),
                task.batch_id.clone(),
                task.agent_id.clone(),
                task.status.to_string(),
                body(task)?
            ],
        )
        .await?;
        Ok(())
    }

    async fn get_task(&self, task_id: &str) -> WeftResult<Option<Task>> {
        self.fetch("tasks", "task_id", task_id).await
    }

    async fn get_tasks(&self, task_ids: &[String]) -> WeftResult<Vec<Task>> {
        if task_ids.is_empty() {
            return Ok(Vec::new());
        }
        self.select("tasks", Filter::default().any("task_id", task_ids))
            .await
    }

    async fn list_tasks(&self, query: &TaskQuery) -> WeftResult<Vec<Task>> {
        let filter = Filter::default()
            .eq("batch_id", query.batch_id.as_deref())
            .eq("agent_id", query.agent_id.as_deref())
            .eq("status", query.status.as_ref().map(|s| s.as_str()));
        let rows: Vec<Task> = self.select("tasks", filter).await?;
        Ok(rows.into_iter().filter(|t| query.matches(t)).collect())
    }

    async fn update_task(&self, task: &Task) -> WeftResult<bool> {
        let n = self
            .exec(
                "UPDATE tasks SET batch_id = ?2, agent_id = ?3, status = ?4, body = ?5 \
                 WHERE task_id = ?1",
                values![
                    task.task_id.clone(),
                    task.batch_id.clone(),
                    task.agent_id.clone(),
                    task.status.to_string(),
                    body(task)?
                ],
            )
            .await?;
        Ok(n > 0)
    }

    async fn update_task_if(&self, task: &Task, expected: TaskStatus) -> WeftResult<bool> {
        let n = self
            .exec(
                "UPDATE tasks SET batch_id = ?2, agent_id = ?3, status = ?4, body = ?5 \
                 WHERE task_id = ?1 AND status = ?6",
                values![
                    task.task_id.clone(),
                    task.batch_id.clone(),
                    task.agent_id.clone(),
                    task.status.to_string(),
                    body(task)?,
                    expected.to_string()
                ],
            )
            .await?;
        Ok(n > 0)
    }

    async fn insert_dependency(&self, dependency: &TaskDependency) -> WeftResult<()> {
        self.exec(
            "INSERT INTO task_dependencies (task_id, depends_on_task_id, body) VALUES (?1, ?2, ?3)",
            values![
                dependency.task_id.clone(),
                dependency.depends_on_task_id.clone(),
                body(dependency)?
            ],
        )
        .await?;
        Ok(())
    }

    async fn list_dependencies(&self, query: &DependencyQuery) -> WeftResult<Vec<TaskDependency>> {
        let filter = Filter::default()
            .any("task_id", &query.task_ids)
            .any("depends_on_task_id", &query.depends_on);
        self.select("task_dependencies", filter).await
    }

    async fn insert_gate_execution(&self, execution: &QualityGateExecution) -> WeftResult<()> {
        self.exec(
            "INSERT INTO quality_gate_executions \
             (execution_id, gate_type, session_id, status, started_at, body) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            values![
                execution.execution_id.clone(),
                execution.gate_type.clone(),
                execution.session_id.clone(),
                execution.status.to_string(),
                ts(&execution.started_at),
                body(execution)?
            ],
        )
        .await?;
        Ok(())
    }

    async fn get_gate_execution(
        &self,
        execution_id: &str,
    ) -> WeftResult<Option<QualityGateExecution>> {
        self.fetch("quality_gate_executions", "execution_id", execution_id)
            .await
    }

    async fn list_gate_executions(&self, query: &GateQuery) -> WeftResult<Vec<QualityGateExecution>> {
        let filter = Filter::default()
            .eq("gate_type", query.gate_type.as_deref())
            .eq("session_id", query.session_id.as_deref())
            .eq("status", query.status.as_ref().map(|s| s.as_str()))
            .since("started_at", query.started_after.as_ref());
        let rows: Vec<QualityGateExecution> =
            self.select("quality_gate_executions", filter).await?;
        Ok(rows.into_iter().filter(|g| query.matches(g)).collect())
    }

    async fn complete_gate_execution(&self, execution: &QualityGateExecution) -> WeftResult<bool> {
        let n = self
            .exec(
                "UPDATE quality_gate_executions SET status = ?2, body = ?3 \
                 WHERE execution_id = ?1 AND status = 'running'",
                values![
                    execution.execution_id.clone(),
                    execution.status.to_string(),
                    body(execution)?
                ],
            )
            .await?;
        Ok(n > 0)
    }

    async fn upsert_agent(&self, agent: &RegisteredAgent) -> WeftResult<()> {
        self.exec(
            "INSERT INTO agent_registry (agent_id, status, last_heartbeat, body) \
             VALUES (?1, ?2, ?3, ?4) \
             ON CONFLICT(agent_id) DO UPDATE SET \
             status = excluded.status, last_heartbeat = excluded.last_heartbeat, body = excluded.body",
            values![
                agent.agent_id.clone(),
                agent.status.to_string(),
                agent.last_heartbeat.as_ref().map(ts),
                body(agent)?
            ],
        )
        .await?;
        Ok(())
    }

    async fn get_agent(&self, agent_id: &str) -> WeftResult<Option<RegisteredAgent>> {
        self.fetch("agent_registry", "agent_id", agent_id).await
    }

    async fn list_agents(&self, query: &AgentQuery) -> WeftResult<Vec<RegisteredAgent>> {
        let filter = Filter::default().eq("status", query.status.as_ref().map(|s| s.as_str()));
        let rows: Vec<RegisteredAgent> = self.select("agent_registry", filter).await?;
        Ok(rows.into_iter().filter(|a| query.matches(a)).collect())
    }

    async fn update_agent(&self, agent: &RegisteredAgent) -> WeftResult<bool> {
        let n = self
            .exec(
                "UPDATE agent_registry SET status = ?2, last_heartbeat = ?3, body = ?4 \
                 WHERE agent_id = ?1",
                values![
                    agent.agent_id.clone(),
                    agent.status.to_string(),
                    agent.last_heartbeat.as_ref().map(ts),
                    body(agent)?
                ],
            )
            .await?;
        Ok(n > 0)
    }

    async fn touch_agent_heartbeat(&self, agent_id: &str, at: DateTime<Utc>) -> WeftResult<bool> {
        let n = self
            .exec(
                "UPDATE agent_registry \
                 SET last_heartbeat = ?2, body = json_set(body, '$.last_heartbeat', ?2) \
                 WHERE agent_id = ?1",
                values![agent_id.to_string(), ts(&at)],
            )
            .await?;
        Ok(n > 0)
    }

    async fn set_agent_status(&self, agent_id: &str, status: AgentStatus) -> WeftResult<bool> {
        let n = self
            .exec(
                "UPDATE agent_registry \
                 SET status = ?2, body = json_set(body, '$.status', ?2) \
                 WHERE agent_id = ?1",
                values![agent_id.to_string(), status.to_string()],
            )
            .await?;
        Ok(n > 0)
    }

    async fn mark_agent_inactive_if(
        &self,
        agent_id: &str,
        observed: Option<DateTime<Utc>>,
    ) -> WeftResult<bool> {
        let n = self
            .exec(
                "UPDATE agent_registry \
                 SET status = 'inactive', body = json_set(body, '$.status', 'inactive') \
                 WHERE agent_id = ?1 AND status = 'active' AND last_heartbeat IS ?2",
                values![agent_id.to_string(), observed.as_ref().map(ts)],
            )
            .await?;
        Ok(n > 0)
    }

    async fn insert_metric(&self, metric: &MetricObservation) -> WeftResult<()> {
        self.exec(
            "INSERT INTO workflow_metrics \
             (metric_id, metric_name, component, session_id, recorded_at, body) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            values![
                metric.metric_id.clone(),
                metric.metric_name.clone(),
                metric.component.clone(),
                metric.session_id.clone(),
                ts(&metric.recorded_at),
                body(metric)?
            ],
        )
        .await?;
        Ok(())
    }

    async fn list_metrics(&self, query: &MetricQuery) -> WeftResult<Vec<MetricObservation>> {
        let filter = Filter::default()
            .eq("metric_name", query.metric_name.as_deref())
            .eq("component", query.component.as_deref())
            .eq("session_id", query.session_id.as_deref())
            .since("recorded_at", query.recorded_after.as_ref());
        let rows: Vec<MetricObservation> = self.select("workflow_metrics", filter).await?;
        Ok(rows.into_iter().filter(|m| query.matches(m)).collect())
    }
}
