//! Filters accepted by [`WorkflowStore`](crate::WorkflowStore) list calls.
//!
//! Each filter's `matches` is the single definition of what it selects.
//! Backends may narrow the scan with indexed columns first, but must agree
//! with `matches`. Ordering and limits are the caller's job.

use chrono::{DateTime, Utc};
use weft_core::{
    AgentMessage, AgentStatus, AgentType, BatchStatus, CheckpointType, GateStatus,
    MessageStatus, MetricObservation, QualityGateExecution, RegisteredAgent, SessionStatus, Task,
    TaskBatch, TaskDependency, TaskStatus, WorkflowCheckpoint, WorkflowSession,
};

fn opt_eq<T: PartialEq + ?Sized>(want: Option<&T>, have: &T) -> bool {
    want.map_or(true, |w| w == have)
}

fn opt_eq_opt(want: Option<&String>, have: Option<&String>) -> bool {
    match want {
        None => true,
        Some(w) => have == Some(w),
    }
}

/// Selects sessions.
#[derive(Debug, Clone, Default)]
pub struct SessionQuery {
    pub status: Option<SessionStatus>,
    pub created_by: Option<String>,
}

impl SessionQuery {
    /// Whether `session` is selected.
    pub fn matches(&self, session: &WorkflowSession) -> bool {
        opt_eq(self.status.as_ref(), &session.status)
            && opt_eq(self.created_by.as_ref(), &session.created_by)
    }
}

/// Selects checkpoints.
#[derive(Debug, Clone, Default)]
pub struct CheckpointQuery {
    pub session_id: Option<String>,
    pub agent_id: Option<String>,
    pub checkpoint_type: Option<CheckpointType>,
}

impl CheckpointQuery {
    /// Every checkpoint of one (session, agent) pair.
    pub fn chain(session_id: &str, agent_id: &str) -> Self {
        Self {
            session_id: Some(session_id.to_string()),
            agent_id: Some(agent_id.to_string()),
            checkpoint_type: None,
        }
    }

    /// Whether `checkpoint` is selected.
    pub fn matches(&self, checkpoint: &WorkflowCheckpoint) -> bool {
        opt_eq(self.session_id.as_ref(), &checkpoint.session_id)
            && opt_eq(self.agent_id.as_ref(), &checkpoint.agent_id)
            && opt_eq(self.checkpoint_type.as_ref(), &checkpoint.checkpoint_type)
    }
}

/// Selects messages.
#[derive(Debug, Clone, Default)]
pub struct MessageQuery {
    /// Inbox of this agent: direct messages to it, or broadcasts it did not send.
    pub recipient: Option<String>,
    pub correlation_id: Option<String>,
    pub session_id: Option<String>,
    pub status: Option<MessageStatus>,
    pub message_type: Option<String>,
}

impl MessageQuery {
    /// Whether `message` is selected.
    pub fn matches(&self, message: &AgentMessage) -> bool {
        self.recipient
            .as_deref()
            .map_or(true, |agent| message.is_visible_to(agent))
            && opt_eq_opt(self.correlation_id.as_ref(), message.correlation_id.as_ref())
            && opt_eq_opt(self.session_id.as_ref(), message.session_id.as_ref())
            && opt_eq(self.status.as_ref(), &message.status)
            && opt_eq(self.message_type.as_ref(), &message.message_type)
    }
}

/// Selects batches.
#[derive(Debug, Clone, Default)]
pub struct BatchQuery {
    pub session_id: Option<String>,
    /// Any of these statuses; empty selects every status.
    pub statuses: Vec<BatchStatus>,
}

impl BatchQuery {
    /// Whether `batch` is selected.
    pub fn matches(&self, batch: &TaskBatch) -> bool {
        opt_eq_opt(self.session_id.as_ref(), batch.session_id.as_ref())
            && (self.statuses.is_empty() || self.statuses.contains(&batch.status))
    }
}

/// Selects tasks.
#[derive(Debug, Clone, Default)]
pub struct TaskQuery {
    pub batch_id: Option<String>,
    pub agent_id: Option<String>,
    pub status: Option<TaskStatus>,
    pub task_type: Option<String>,
}

impl TaskQuery {
    /// Whether `task` is selected.
    pub fn matches(&self, task: &Task) -> bool {
        opt_eq_opt(self.batch_id.as_ref(), task.batch_id.as_ref())
            && opt_eq(self.agent_id.as_ref(), &task.agent_id)
            && opt_eq(self.status.as_ref(), &task.status)
            && opt_eq(self.task_type.as_ref(), &task.task_type)
    }
}

/// Selects dependency edges.
#[derive(Debug, Clone, Default)]
pub struct DependencyQuery {
    /// Edges whose dependent side is one of these; empty selects any.
    pub task_ids: Vec<String>,
    /// Edges whose depended-on side is one of these; empty selects any.
    pub depends_on: Vec<String>,
}

impl DependencyQuery {
    /// The edges leaving each of `task_ids` (what they wait for).
    pub fn of_tasks(task_ids: Vec<String>) -> Self {
        Self {
            task_ids,
            depends_on: Vec::new(),
        }
    }

    /// The edges pointing at `task_id` (who waits for it).
    pub fn dependents_of(task_id: &str) -> Self {
        Self {
            task_ids: Vec::new(),
            depends_on: vec![task_id.to_string()],
        }
    }

    /// Whether `edge` is selected.
    pub fn matches(&self, edge: &TaskDependency) -> bool {
        (self.task_ids.is_empty() || self.task_ids.contains(&edge.task_id))
            && (self.depends_on.is_empty() || self.depends_on.contains(&edge.depends_on_task_id))
    }
}

/// Selects quality-gate executions.
#[derive(Debug, Clone, Default)]
pub struct GateQuery {
    pub gate_type: Option<String>,
    pub session_id: Option<String>,
    pub batch_id: Option<String>,
    pub status: Option<GateStatus>,
    /// Only executions started at or after this instant.
    pub started_after: Option<DateTime<Utc>>,
}

impl GateQuery {
    /// Whether `execution` is selected.
    pub fn matches(&self, execution: &QualityGateExecution) -> bool {
        opt_eq(self.gate_type.as_ref(), &execution.gate_type)
            && opt_eq_opt(self.session_id.as_ref(), execution.session_id.as_ref())
            && opt_eq_opt(self.batch_id.as_ref(), execution.batch_id.as_ref())
            && opt_eq(self.status.as_ref(), &execution.status)
            && self
                .started_after
                .map_or(true, |after| execution.started_at >= after)
    }
}

/// Selects registered agents.
#[derive(Debug, Clone, Default)]
pub struct AgentQuery {
    pub agent_type: Option<AgentType>,
    pub status: Option<AgentStatus>,
}

impl AgentQuery {
    /// Whether `agent` is selected.
    pub fn matches(&self, agent: &RegisteredAgent) -> bool {
        opt_eq(self.agent_type.as_ref(), &agent.agent_type)
            && opt_eq(self.status.as_ref(), &agent.status)
    }
}

/// Selects metric observations.
#[derive(Debug, Clone, Default)]
pub struct MetricQuery {
    pub metric_name: Option<String>,
    pub component: Option<String>,
    pub session_id: Option<String>,
    /// Only observations recorded at or after this instant.
    pub recorded_after: Option<DateTime<Utc>>,
}

impl MetricQuery {
    /// Whether `metric` is selected.
    pub fn matches(&self, metric: &MetricObservation) -> bool {
        opt_eq(self.metric_name.as_ref(), &metric.metric_name)
            && opt_eq_opt(self.component.as_ref(), metric.component.as_ref())
            && opt_eq_opt(self.session_id.as_ref(), metric.session_id.as_ref())
            && self
                .recorded_after
                .map_or(true, |after| metric.recorded_at >= after)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_empty_query_selects_everything() {
        let task = Task::new("t", "build", "exec-1");
        assert!(TaskQuery::default().matches(&task));
        assert!(DependencyQuery::default().matches(&TaskDependency::completion("a", "b")));
    }

    #[test]
    fn test_task_query_filters_by_batch() {
        let task = Task::new("t", "build", "exec-1").in_batch("b-1");
        let loose = Task::new("t", "build", "exec-1");
        let query = TaskQuery {
            batch_id: Some("b-1".into()),
            ..Default::default()
        };
        assert!(query.matches(&task));
        assert!(!query.matches(&loose));
    }

    #[test]
    fn test_message_query_applies_visibility() {
        let broadcast = AgentMessage::new("exec-1", "status", json!({}));
        let mine = MessageQuery {
            recipient: Some("exec-1".into()),
            ..Default::default()
        };
        let theirs = MessageQuery {
            recipient: Some("exec-2".into()),
            ..Default::default()
        };
        assert!(!mine.matches(&broadcast));
        assert!(theirs.matches(&broadcast));
    }

    #[test]
    fn test_dependency_query_directions() {
        let edge = TaskDependency::completion("t2", "t1");
        assert!(DependencyQuery::of_tasks(vec!["t2".into()]).matches(&edge));
        assert!(!DependencyQuery::of_tasks(vec!["t1".into()]).matches(&edge));
        assert!(DependencyQuery::dependents_of("t1").matches(&edge));
        assert!(!DependencyQuery::dependents_of("t2").matches(&edge));
    }

    #[test]
    fn test_batch_query_status_set() {
        let batch = TaskBatch::new("b");
        let active = BatchQuery {
            session_id: None,
            statuses: vec![BatchStatus::Pending, BatchStatus::Running],
        };
        let done = BatchQuery {
            session_id: None,
            statuses: vec![BatchStatus::Completed],
        };
        assert!(active.matches(&batch));
        assert!(!done.matches(&batch));
    }
}
