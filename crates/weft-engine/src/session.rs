use crate::newest_first;
use serde::Serialize;
use std::sync::Arc;
use tracing::{debug, info};
use weft_core::{
    AgentMessage, Clock, SessionStatus, TaskBatch, WeftResult, WorkflowCheckpoint,
    WorkflowSession,
};
use weft_store::{
    BatchQuery, CascadeReport, CheckpointQuery, MessageQuery, SessionQuery, WorkflowStore,
};

/// A session with everything it owns loaded alongside it.
#[derive(Debug, Clone, Serialize)]
pub struct SessionDetail {
    pub session: WorkflowSession,
    /// Newest first.
    pub checkpoints: Vec<WorkflowCheckpoint>,
    /// Oldest first.
    pub batches: Vec<TaskBatch>,
    /// Newest first.
    pub messages: Vec<AgentMessage>,
}

/// A session row plus counts of what it owns.
#[derive(Debug, Clone, Serialize)]
pub struct SessionSummary {
    pub session: WorkflowSession,
    pub batch_count: usize,
    pub checkpoint_count: usize,
}

/// Opens, looks up, lists, and transitions workflow sessions.
#[derive(Clone)]
pub struct SessionService {
    store: Arc<dyn WorkflowStore>,
    clock: Arc<dyn Clock>,
    default_limit: usize,
}

impl SessionService {
    pub fn new(store: Arc<dyn WorkflowStore>, clock: Arc<dyn Clock>, default_limit: usize) -> Self {
        Self {
            store,
            clock,
            default_limit,
        }
    }

    /// Persist `session` as a new `active` session stamped with the current
    /// time.
    pub async fn open(&self, mut session: WorkflowSession) -> WeftResult<WorkflowSession> {
        let now = self.clock.now();
        session.status = SessionStatus::Active;
        session.created_at = now;
        session.updated_at = now;
        session.completed_at = None;
        self.store.insert_session(&session).await?;
        info!(
            session_id = %session.session_id,
            created_by = %session.created_by,
            "Session opened"
        );
        Ok(session)
    }

    /// The session and the checkpoints, batches, and messages it owns.
    pub async fn get(&self, session_id: &str) -> WeftResult<Option<SessionDetail>> {
        let Some(session) = self.store.get_session(session_id).await? else {
            debug!(session_id, "Session not found");
            return Ok(None);
        };

        let mut checkpoints = self
            .store
            .list_checkpoints(&CheckpointQuery {
                session_id: Some(session_id.to_string()),
                ..Default::default()
            })
            .await?;
        newest_first(&mut checkpoints, |c| c.created_at);

        let mut batches = self
            .store
            .list_batches(&BatchQuery {
                session_id: Some(session_id.to_string()),
                statuses: Vec::new(),
            })
            .await?;
        batches.sort_by_key(|b| b.created_at);

        let mut messages = self
            .store
            .list_messages(&MessageQuery {
                session_id: Some(session_id.to_string()),
                ..Default::default()
            })
            .await?;
        newest_first(&mut messages, |m| m.created_at);

        Ok(Some(SessionDetail {
            session,
            checkpoints,
            batches,
            messages,
        }))
    }

    /// Active sessions, optionally only those opened by `created_by`, newest
    /// first.
    pub async fn list_active(
        &self,
        created_by: Option<&str>,
        limit: Option<usize>,
    ) -> WeftResult<Vec<WorkflowSession>> {
        let mut sessions = self
            .store
            .list_sessions(&SessionQuery {
                status: Some(SessionStatus::Active),
                created_by: created_by.map(str::to_string),
            })
            .await?;
        newest_first(&mut sessions, |s| s.created_at);
        sessions.truncate(limit.unwrap_or(self.default_limit));
        Ok(sessions)
    }

    /// Every session with its batch and checkpoint counts, newest first.
    pub async fn list_with_stats(
        &self,
        skip: usize,
        limit: Option<usize>,
    ) -> WeftResult<Vec<SessionSummary>> {
        let mut sessions = self.store.list_sessions(&SessionQuery::default()).await?;
        newest_first(&mut sessions, |s| s.created_at);

        let page = sessions
            .into_iter()
            .skip(skip)
            .take(limit.unwrap_or(self.default_limit));
        let mut summaries = Vec::new();
        for session in page {
            let batch_count = self
                .store
                .list_batches(&BatchQuery {
                    session_id: Some(session.session_id.clone()),
                    statuses: Vec::new(),
                })
                .await?
                .len();
            let checkpoint_count = self
                .store
                .list_checkpoints(&CheckpointQuery {
                    session_id: Some(session.session_id.clone()),
                    ..Default::default()
                })
                .await?
                .len();
            summaries.push(SessionSummary {
                session,
                batch_count,
                checkpoint_count,
            });
        }
        Ok(summaries)
    }

    /// Move a session to `status`. Transition policy belongs to the caller;
    /// any status may follow any other. With `stamp_completion`, the current
    /// time is recorded as `completed_at`.
    pub async fn transition(
        &self,
        session_id: &str,
        status: SessionStatus,
        stamp_completion: bool,
    ) -> WeftResult<Option<WorkflowSession>> {
        let Some(mut session) = self.store.get_session(session_id).await? else {
            debug!(session_id, "Transition of unknown session");
            return Ok(None);
        };
        let from = session.status;
        let now = self.clock.now();
        session.status = status;
        session.updated_at = now;
        if stamp_completion {
            session.completed_at = Some(now);
        }
        if !self.store.update_session(&session).await? {
            return Ok(None);
        }
        info!(session_id, from = %from, to = %status, "Session transitioned");
        Ok(Some(session))
    }

    /// Suspend an active session.
    pub async fn pause(&self, session_id: &str) -> WeftResult<Option<WorkflowSession>> {
        self.transition(session_id, SessionStatus::Paused, false).await
    }

    /// Return a paused session to `active`.
    pub async fn resume(&self, session_id: &str) -> WeftResult<Option<WorkflowSession>> {
        self.transition(session_id, SessionStatus::Active, false).await
    }

    /// Delete a session and everything it owns.
    pub async fn delete(&self, session_id: &str) -> WeftResult<Option<CascadeReport>> {
        let report = self.store.delete_session_cascade(session_id).await?;
        if let Some(report) = &report {
            info!(
                session_id,
                tasks = report.tasks,
                batches = report.batches,
                messages = report.messages,
                checkpoints = report.checkpoints,
                "Session deleted"
            );
        }
        Ok(report)
    }
}
