//! Behaviour every `WorkflowStore` backend must share.
#![allow(clippy::unwrap_used, clippy::expect_used, dead_code)]

use chrono::{Duration, TimeZone, Utc};
use serde_json::json;
use weft_core::*;
use weft_store::*;

pub async fn session_roundtrip(store: &dyn WorkflowStore) {
    let mut session = WorkflowSession::new("planner").with_name("release-42");
    store.insert_session(&session).await.unwrap();

    let loaded = store.get_session(&session.session_id).await.unwrap().unwrap();
    assert_eq!(loaded.name.as_deref(), Some("release-42"));
    assert_eq!(loaded.created_at, session.created_at);

    session.status = SessionStatus::Paused;
    assert!(store.update_session(&session).await.unwrap());
    let paused = store
        .list_sessions(&SessionQuery {
            status: Some(SessionStatus::Paused),
            ..Default::default()
        })
        .await
        .unwrap();
    assert_eq!(paused.len(), 1);

    assert!(store.get_session("missing").await.unwrap().is_none());
    let ghost = WorkflowSession::new("planner");
    assert!(!store.update_session(&ghost).await.unwrap());
}

pub async fn duplicate_ids_rejected(store: &dyn WorkflowStore) {
    let task = Task::new("t", "build", "exec-1");
    store.insert_task(&task).await.unwrap();
    assert!(matches!(
        store.insert_task(&task).await,
        Err(WeftError::Store(_))
    ));

    let edge = TaskDependency::completion("a", "b");
    store.insert_dependency(&edge).await.unwrap();
    assert!(store.insert_dependency(&edge).await.is_err());
}

pub async fn claim_is_compare_and_set(store: &dyn WorkflowStore) {
    let task = Task::new("t", "build", "exec-1");
    store.insert_task(&task).await.unwrap();

    let mut first = task.clone();
    first.status = TaskStatus::Running;
    first.attempts = 1;
    let mut second = task.clone();
    second.status = TaskStatus::Running;
    second.agent_id = "exec-2".into();

    assert!(store.update_task_if(&first, TaskStatus::Pending).await.unwrap());
    assert!(!store.update_task_if(&second, TaskStatus::Pending).await.unwrap());

    let stored = store.get_task(&task.task_id).await.unwrap().unwrap();
    assert_eq!(stored.agent_id, "exec-1");
    assert_eq!(stored.attempts, 1);
}

pub async fn inbox_visibility(store: &dyn WorkflowStore) {
    let broadcast = AgentMessage::new("exec-1", "status", json!({"ok": true}));
    let direct = AgentMessage::new("exec-2", "ping", json!({})).to("exec-1");
    store.insert_message(&broadcast).await.unwrap();
    store.insert_message(&direct).await.unwrap();

    let inbox = |agent: &str| MessageQuery {
        recipient: Some(agent.to_string()),
        ..Default::default()
    };
    let exec1 = store.list_messages(&inbox("exec-1")).await.unwrap();
    assert_eq!(exec1.len(), 1);
    assert_eq!(exec1[0].message_id, direct.message_id);

    let exec2 = store.list_messages(&inbox("exec-2")).await.unwrap();
    assert_eq!(exec2.len(), 1);
    assert_eq!(exec2[0].message_id, broadcast.message_id);

    let exec3 = store.list_messages(&inbox("exec-3")).await.unwrap();
    assert_eq!(exec3.len(), 1);
}

pub async fn expiry_delete_is_strict_and_idempotent(store: &dyn WorkflowStore) {
    let now = Utc::now();
    let old = AgentMessage::new("a", "t", json!(null)).expires_at(now - Duration::seconds(10));
    let fresh = AgentMessage::new("a", "t", json!(null)).expires_at(now + Duration::seconds(10));
    let forever = AgentMessage::new("a", "t", json!(null));
    for m in [&old, &fresh, &forever] {
        store.insert_message(m).await.unwrap();
    }

    assert_eq!(store.delete_messages_expired_before(now).await.unwrap(), 1);
    assert_eq!(store.delete_messages_expired_before(now).await.unwrap(), 0);
    assert!(store.get_message(&fresh.message_id).await.unwrap().is_some());
    assert!(store.get_message(&forever.message_id).await.unwrap().is_some());
}

pub async fn gate_completes_once(store: &dyn WorkflowStore) {
    let execution = QualityGateExecution::start("lint");
    store.insert_gate_execution(&execution).await.unwrap();

    let mut passed = execution.clone();
    passed.status = GateStatus::Passed;
    passed.score = Some(0.97);
    assert!(store.complete_gate_execution(&passed).await.unwrap());

    let mut failed = execution.clone();
    failed.status = GateStatus::Failed;
    assert!(!store.complete_gate_execution(&failed).await.unwrap());

    let stored = store
        .get_gate_execution(&execution.execution_id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(stored.status, GateStatus::Passed);
    assert_eq!(stored.score, Some(0.97));
}

pub async fn agent_flip_respects_racing_heartbeat(store: &dyn WorkflowStore) {
    let t0 = Utc::now();
    let mut agent = RegisteredAgent::new("exec-1", AgentType::Execution, "Executor");
    agent.last_heartbeat = Some(t0);
    store.upsert_agent(&agent).await.unwrap();

    // A heartbeat lands between the sweep's read and its write.
    let observed = agent.last_heartbeat;
    agent.last_heartbeat = Some(t0 + Duration::minutes(1));
    assert!(store.update_agent(&agent).await.unwrap());

    assert!(!store.mark_agent_inactive_if("exec-1", observed).await.unwrap());
    let stored = store.get_agent("exec-1").await.unwrap().unwrap();
    assert_eq!(stored.status, AgentStatus::Active);

    assert!(store
        .mark_agent_inactive_if("exec-1", agent.last_heartbeat)
        .await
        .unwrap());
    let stored = store.get_agent("exec-1").await.unwrap().unwrap();
    assert_eq!(stored.status, AgentStatus::Inactive);
}

pub async fn agent_field_writes_are_independent(store: &dyn WorkflowStore) {
    let t0 = Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap();
    let mut agent = RegisteredAgent::new("exec-1", AgentType::Execution, "Executor");
    agent.last_heartbeat = Some(t0);
    store.upsert_agent(&agent).await.unwrap();

    // The status report lands after the heartbeat read the row; the
    // heartbeat write must not undo it.
    assert!(store
        .set_agent_status("exec-1", AgentStatus::Error)
        .await
        .unwrap());
    let beat = t0 + Duration::seconds(30);
    assert!(store.touch_agent_heartbeat("exec-1", beat).await.unwrap());

    let stored = store.get_agent("exec-1").await.unwrap().unwrap();
    assert_eq!(stored.status, AgentStatus::Error);
    assert_eq!(stored.last_heartbeat, Some(beat));
    assert_eq!(stored.registered_at, agent.registered_at);

    let errored = store
        .list_agents(&AgentQuery {
            status: Some(AgentStatus::Error),
            ..Default::default()
        })
        .await
        .unwrap();
    assert_eq!(errored.len(), 1);

    assert!(!store.touch_agent_heartbeat("nobody", beat).await.unwrap());
    assert!(!store
        .set_agent_status("nobody", AgentStatus::Active)
        .await
        .unwrap());
}

pub async fn upsert_replaces_agent(store: &dyn WorkflowStore) {
    let agent = RegisteredAgent::new("q-1", AgentType::Quality, "Linter").with_version("1.0");
    store.upsert_agent(&agent).await.unwrap();
    store
        .upsert_agent(&agent.clone().with_version("1.1"))
        .await
        .unwrap();

    let all = store.list_agents(&AgentQuery::default()).await.unwrap();
    assert_eq!(all.len(), 1);
    assert_eq!(all[0].version.as_deref(), Some("1.1"));
}

pub async fn cascade_removes_owned_rows(store: &dyn WorkflowStore) {
    let session = WorkflowSession::new("planner");
    let other = WorkflowSession::new("planner");
    store.insert_session(&session).await.unwrap();
    store.insert_session(&other).await.unwrap();

    let batch = TaskBatch::new("build").in_session(&session.session_id);
    store.insert_batch(&batch).await.unwrap();
    let t1 = Task::new("compile", "build", "exec-1").in_batch(&batch.batch_id);
    let t2 = Task::new("package", "build", "exec-1").in_batch(&batch.batch_id);
    let loose = Task::new("lint", "check", "exec-2");
    for t in [&t1, &t2, &loose] {
        store.insert_task(t).await.unwrap();
    }
    store
        .insert_dependency(&TaskDependency::completion(&t2.task_id, &t1.task_id))
        .await
        .unwrap();
    store
        .insert_dependency(&TaskDependency::completion(&loose.task_id, &t2.task_id))
        .await
        .unwrap();

    let msg = AgentMessage::new("exec-1", "status", json!({})).in_session(&session.session_id);
    let kept_msg = AgentMessage::new("exec-1", "status", json!({})).in_session(&other.session_id);
    store.insert_message(&msg).await.unwrap();
    store.insert_message(&kept_msg).await.unwrap();
    let cp = WorkflowCheckpoint::new(&session.session_id, "exec-1", CheckpointType::Manual, json!({}));
    store.insert_checkpoint(&cp).await.unwrap();

    let report = store
        .delete_session_cascade(&session.session_id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(
        report,
        CascadeReport {
            dependencies: 2,
            tasks: 2,
            batches: 1,
            messages: 1,
            checkpoints: 1,
        }
    );
    assert_eq!(report.total(), 7);

    assert!(store.get_session(&session.session_id).await.unwrap().is_none());
    assert!(store.get_task(&t1.task_id).await.unwrap().is_none());
    assert!(store.get_task(&loose.task_id).await.unwrap().is_some());
    assert!(store.get_message(&kept_msg.message_id).await.unwrap().is_some());
    assert!(store
        .list_dependencies(&DependencyQuery::default())
        .await
        .unwrap()
        .is_empty());

    assert!(store
        .delete_session_cascade(&session.session_id)
        .await
        .unwrap()
        .is_none());
}

pub async fn metric_window(store: &dyn WorkflowStore) {
    let now = Utc::now();
    let mut old = MetricObservation::new("messages_expired", MetricKind::Counter, 3.0)
        .component("maintenance");
    old.recorded_at = now - Duration::hours(48);
    let recent = MetricObservation::new("messages_expired", MetricKind::Counter, 1.0)
        .component("maintenance");
    store.insert_metric(&old).await.unwrap();
    store.insert_metric(&recent).await.unwrap();

    let rows = store
        .list_metrics(&MetricQuery {
            metric_name: Some("messages_expired".into()),
            recorded_after: Some(now - Duration::hours(24)),
            ..Default::default()
        })
        .await
        .unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].value, 1.0);
}
