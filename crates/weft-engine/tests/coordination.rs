#![allow(clippy::unwrap_used, clippy::expect_used)]

use chrono::{DateTime, Duration, TimeZone, Utc};
use serde_json::json;
use std::collections::HashSet;
use std::sync::Arc;
use weft_core::{
    AgentStatus, AgentType, BatchStatus, CheckpointType, ExecutionStrategy, ManualClock,
    RegisteredAgent, SessionStatus, Task, TaskBatch, TaskDependency, TaskStatus, WeftError,
    WorkflowCheckpoint, WorkflowSession,
};
use weft_engine::{
    dispatch, EngineConfig, RetryDecision, TaskUpdate, WorkflowEngine,
};
use weft_store::WorkflowStore;

fn epoch() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap()
}

fn engine_with(store: Arc<dyn WorkflowStore>, config: EngineConfig) -> (WorkflowEngine, Arc<ManualClock>) {
    let clock = Arc::new(ManualClock::new(epoch()));
    let engine = WorkflowEngine::new(store, clock.clone(), config).unwrap();
    (engine, clock)
}

fn engine(store: Arc<dyn WorkflowStore>) -> (WorkflowEngine, Arc<ManualClock>) {
    engine_with(store, EngineConfig::default())
}

async fn complete(engine: &WorkflowEngine, task_id: &str) {
    engine
        .scheduler()
        .update_task_status(task_id, TaskUpdate::to(TaskStatus::Completed))
        .await
        .unwrap()
        .unwrap();
}

fn ids(tasks: &[Task]) -> Vec<String> {
    tasks.iter().map(|t| t.task_id.clone()).collect()
}

// T2 depends on T1: only T1 is ready until it completes.
async fn readiness_follows_completion(store: Arc<dyn WorkflowStore>) {
    let (engine, clock) = engine(store);
    let sched = engine.scheduler();
    let batch = sched.create_batch(TaskBatch::new("build")).await.unwrap();
    let t1 = sched
        .create_task(Task::new("t1", "compile", "exec-1").in_batch(&batch.batch_id))
        .await
        .unwrap();
    clock.advance(Duration::seconds(1));
    let t2 = sched
        .create_task(Task::new("t2", "link", "exec-1").in_batch(&batch.batch_id))
        .await
        .unwrap();
    sched
        .add_dependency(TaskDependency::completion(&t2.task_id, &t1.task_id))
        .await
        .unwrap();

    let ready = sched.ready_tasks(Some(&batch.batch_id), None).await.unwrap();
    assert_eq!(ids(&ready), vec![t1.task_id.clone()]);

    complete(&engine, &t1.task_id).await;
    let ready = sched.ready_tasks(Some(&batch.batch_id), None).await.unwrap();
    assert_eq!(ids(&ready), vec![t2.task_id.clone()]);
}

// Every task the ready query returns is pending with only completed
// dependencies, at every step of working through a diamond.
async fn ready_tasks_have_completed_dependencies(store: Arc<dyn WorkflowStore>) {
    let (engine, clock) = engine(store.clone());
    let sched = engine.scheduler();
    let mut tasks = Vec::new();
    for name in ["fetch", "lint", "test", "package", "publish"] {
        tasks.push(
            sched
                .create_task(Task::new(name, "step", "exec-1").in_batch("pipeline"))
                .await
                .unwrap(),
        );
        clock.advance(Duration::seconds(1));
    }
    let id = |i: usize| tasks[i].task_id.clone();
    for (task, dep) in [(1, 0), (2, 0), (3, 1), (3, 2), (4, 3)] {
        sched
            .add_dependency(TaskDependency::completion(id(task), id(dep)))
            .await
            .unwrap();
    }

    let mut finished = 0;
    loop {
        let ready = sched.ready_tasks(Some("pipeline"), None).await.unwrap();
        if ready.is_empty() {
            break;
        }
        for task in &ready {
            assert_eq!(task.status, TaskStatus::Pending);
            let detail = sched.get_task(&task.task_id).await.unwrap().unwrap();
            for edge in &detail.dependencies {
                let dep = store.get_task(&edge.depends_on_task_id).await.unwrap().unwrap();
                assert_eq!(dep.status, TaskStatus::Completed);
            }
        }
        let claimed = sched
            .claim_task(&ready[0].task_id, "exec-1")
            .await
            .unwrap()
            .unwrap();
        complete(&engine, &claimed.task_id).await;
        finished += 1;
    }
    assert_eq!(finished, 5);

    let graph = sched.batch_graph("pipeline").await.unwrap();
    assert_eq!(graph.len(), 5);
    assert!(graph.ready().is_empty());
}

// Two agents race for one ready task; exactly one wins.
async fn concurrent_claims_have_one_winner(store: Arc<dyn WorkflowStore>) {
    let (engine, _) = engine(store);
    let sched = engine.scheduler().clone();
    let task = sched
        .create_task(Task::new("deploy", "deploy", "exec-1"))
        .await
        .unwrap();

    let (a, b) = tokio::join!(
        sched.claim_task(&task.task_id, "exec-1"),
        sched.claim_task(&task.task_id, "exec-2"),
    );
    let winners: Vec<Task> = [a.unwrap(), b.unwrap()].into_iter().flatten().collect();
    assert_eq!(winners.len(), 1);
    let stored = sched.get_task(&task.task_id).await.unwrap().unwrap().task;
    assert_eq!(stored.status, TaskStatus::Running);
    assert_eq!(stored.attempts, 1);
    assert_eq!(stored.agent_id, winners[0].agent_id);
}

async fn cyclic_edge_rejected(store: Arc<dyn WorkflowStore>) {
    let (engine, _) = engine(store);
    let sched = engine.scheduler();
    let a = sched.create_task(Task::new("a", "step", "exec-1")).await.unwrap();
    let b = sched.create_task(Task::new("b", "step", "exec-1")).await.unwrap();
    sched
        .add_dependency(TaskDependency::completion(&b.task_id, &a.task_id))
        .await
        .unwrap();
    let err = sched
        .add_dependency(TaskDependency::completion(&a.task_id, &b.task_id))
        .await
        .unwrap_err();
    assert!(matches!(err, WeftError::DependencyCycle { .. }));
    let ready = sched.ready_tasks(None, None).await.unwrap();
    assert_eq!(ids(&ready), vec![a.task_id]);
}

// A broadcast reaches everyone but its sender; a direct message reaches only
// its addressee.
async fn broadcast_skips_sender(store: Arc<dyn WorkflowStore>) {
    let (engine, _) = engine(store);
    let bus = engine.messages();
    let broadcast = bus
        .broadcast("exec-1", "status", json!({"phase": "build"}), None)
        .await
        .unwrap();
    let direct = bus
        .send(bus.draft("exec-1", "handoff", json!({})).to("exec-3"))
        .await
        .unwrap();

    let inbox = |agent: &'static str| async move {
        bus.inbox(agent, None, None, None)
            .await
            .unwrap()
            .into_iter()
            .map(|m| m.message_id)
            .collect::<Vec<_>>()
    };
    assert_eq!(inbox("exec-2").await, vec![broadcast.message_id.clone()]);
    assert!(inbox("exec-1").await.is_empty());
    let mut third = inbox("exec-3").await;
    third.sort();
    let mut expected = vec![broadcast.message_id, direct.message_id];
    expected.sort();
    assert_eq!(third, expected);
}

// Equal priorities come out newest first; lower priority values first.
async fn inbox_orders_by_priority_then_newest(store: Arc<dyn WorkflowStore>) {
    let (engine, clock) = engine(store);
    let bus = engine.messages();
    let mut sent = Vec::new();
    for (priority, label) in [(5, "old"), (1, "urgent"), (5, "new")] {
        sent.push(
            bus.send(
                bus.draft("planner", "note", json!({"label": label}))
                    .to("exec-1")
                    .with_priority(priority),
            )
            .await
            .unwrap(),
        );
        clock.advance(Duration::seconds(1));
    }
    let inbox = bus.inbox("exec-1", None, None, None).await.unwrap();
    let labels: Vec<&str> = inbox
        .iter()
        .map(|m| m.payload["label"].as_str().unwrap())
        .collect();
    assert_eq!(labels, vec!["urgent", "new", "old"]);

    let acked = bus.acknowledge(&sent[0].message_id).await.unwrap().unwrap();
    assert!(acked.delivered_at.is_some());
    let err = bus.mark_delivered(&sent[0].message_id).await.unwrap_err();
    assert!(matches!(err, WeftError::InvalidTransition { .. }));
}

// A reply threads back to the original sender and shows up in the
// conversation in order.
async fn replies_share_a_thread(store: Arc<dyn WorkflowStore>) {
    let (engine, clock) = engine(store);
    let bus = engine.messages();
    let question = bus
        .send(
            bus.draft("planner", "question", json!({"q": "ready?"}))
                .to("exec-1")
                .with_correlation("thread-1"),
        )
        .await
        .unwrap();
    clock.advance(Duration::seconds(1));
    let answer = bus
        .reply(&question.message_id, "exec-1", "answer", json!({"a": "yes"}))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(answer.to_agent.as_deref(), Some("planner"));
    assert_eq!(answer.reply_to.as_deref(), Some(question.message_id.as_str()));

    let thread: Vec<String> = bus
        .conversation("thread-1", None)
        .await
        .unwrap()
        .into_iter()
        .map(|m| m.message_id)
        .collect();
    assert_eq!(thread, vec![question.message_id, answer.message_id]);
}

// The expiry sweep run twice removes nothing the second time.
async fn expiry_sweep_is_idempotent(store: Arc<dyn WorkflowStore>) {
    let config = EngineConfig {
        default_message_ttl_seconds: Some(60),
        ..Default::default()
    };
    let (engine, clock) = engine_with(store, config);
    let bus = engine.messages();
    bus.broadcast("exec-1", "ping", json!({}), None).await.unwrap();
    bus.broadcast("exec-1", "ping", json!({}), None).await.unwrap();
    clock.advance(Duration::seconds(30));
    let fresh = bus.broadcast("exec-1", "ping", json!({}), None).await.unwrap();

    clock.advance(Duration::seconds(31));
    assert_eq!(bus.expire_sweep().await.unwrap(), 2);
    assert_eq!(bus.expire_sweep().await.unwrap(), 0);
    assert!(bus.get(&fresh.message_id).await.unwrap().is_some());
}

// keep_count = 3 over C1..C4 leaves {C2, C3, C4}; sessions that finished are
// left alone.
async fn retention_keeps_newest(store: Arc<dyn WorkflowStore>) {
    let config = EngineConfig {
        checkpoint_keep_count: 3,
        ..Default::default()
    };
    let (engine, clock) = engine_with(store, config);
    let session = engine
        .sessions()
        .open(WorkflowSession::new("planner"))
        .await
        .unwrap();
    let done = engine
        .sessions()
        .open(WorkflowSession::new("planner"))
        .await
        .unwrap();

    let mut created = Vec::new();
    for step in 1..=4 {
        created.push(
            engine
                .checkpoints()
                .create(WorkflowCheckpoint::new(
                    &session.session_id,
                    "exec-1",
                    CheckpointType::Automatic,
                    json!({ "step": step }),
                ))
                .await
                .unwrap(),
        );
        engine
            .checkpoints()
            .create(WorkflowCheckpoint::new(
                &done.session_id,
                "exec-1",
                CheckpointType::Automatic,
                json!({ "step": step }),
            ))
            .await
            .unwrap();
        clock.advance(Duration::seconds(1));
    }
    engine
        .checkpoints()
        .create(WorkflowCheckpoint::new(
            &session.session_id,
            "exec-2",
            CheckpointType::Milestone,
            json!({}),
        ))
        .await
        .unwrap();
    engine
        .sessions()
        .transition(&done.session_id, SessionStatus::Completed, true)
        .await
        .unwrap();

    let report = engine.maintenance().run_once().await.unwrap();
    assert_eq!(report.checkpoints_pruned, 1);

    let remaining: HashSet<String> = engine
        .checkpoints()
        .list(&session.session_id, Some("exec-1"), None, None)
        .await
        .unwrap()
        .into_iter()
        .map(|c| c.checkpoint_id)
        .collect();
    let expected: HashSet<String> = created[1..].iter().map(|c| c.checkpoint_id.clone()).collect();
    assert_eq!(remaining, expected);

    let latest = engine
        .checkpoints()
        .latest(&session.session_id, "exec-1")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(latest.checkpoint_id, created[3].checkpoint_id);
    assert_eq!(
        latest.previous_checkpoint_id.as_deref(),
        Some(created[2].checkpoint_id.as_str())
    );
    assert_eq!(
        engine
            .checkpoints()
            .list(&done.session_id, None, None, None)
            .await
            .unwrap()
            .len(),
        4
    );
}

// Heartbeat at t=0, sweep at t=31m flips; heartbeat at t=29m, sweep at t=31m
// does not.
async fn staleness_follows_threshold(store: Arc<dyn WorkflowStore>) {
    let (engine, clock) = engine(store);
    let registry = engine.registry();
    for id in ["exec-1", "exec-2"] {
        registry
            .register(RegisteredAgent::new(id, AgentType::Execution, id))
            .await
            .unwrap();
    }
    clock.advance(Duration::minutes(29));
    registry.heartbeat("exec-2").await.unwrap().unwrap();
    clock.advance(Duration::minutes(2));

    let report = engine.maintenance().run_once().await.unwrap();
    assert_eq!(report.agents_marked_inactive, 1);
    assert_eq!(
        registry.get("exec-1").await.unwrap().unwrap().status,
        AgentStatus::Inactive
    );
    assert_eq!(
        registry.get("exec-2").await.unwrap().unwrap().status,
        AgentStatus::Active
    );

    let recorded = engine
        .metrics()
        .query(Some("agents_marked_inactive"), Some("maintenance"), None, None, None)
        .await
        .unwrap();
    assert_eq!(recorded.len(), 1);
    assert_eq!(recorded[0].value, 1.0);
}

// Deleting a session removes its batches, tasks, edges, messages and
// checkpoints, and nothing of another session.
async fn session_delete_cascades(store: Arc<dyn WorkflowStore>) {
    let (engine, _) = engine(store.clone());
    let doomed = engine
        .sessions()
        .open(WorkflowSession::new("planner"))
        .await
        .unwrap();
    let kept = engine
        .sessions()
        .open(WorkflowSession::new("planner"))
        .await
        .unwrap();

    for session in [&doomed, &kept] {
        let batch = engine
            .scheduler()
            .create_batch(TaskBatch::new("b").in_session(&session.session_id))
            .await
            .unwrap();
        let t1 = engine
            .scheduler()
            .create_task(Task::new("t1", "step", "exec-1").in_batch(&batch.batch_id))
            .await
            .unwrap();
        let t2 = engine
            .scheduler()
            .create_task(Task::new("t2", "step", "exec-1").in_batch(&batch.batch_id))
            .await
            .unwrap();
        engine
            .scheduler()
            .add_dependency(TaskDependency::completion(&t2.task_id, &t1.task_id))
            .await
            .unwrap();
        engine
            .messages()
            .broadcast("exec-1", "note", json!({}), Some(&session.session_id))
            .await
            .unwrap();
        engine
            .checkpoints()
            .create(WorkflowCheckpoint::new(
                &session.session_id,
                "exec-1",
                CheckpointType::Manual,
                json!({}),
            ))
            .await
            .unwrap();
    }

    let report = engine
        .sessions()
        .delete(&doomed.session_id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(report.batches, 1);
    assert_eq!(report.tasks, 2);
    assert_eq!(report.dependencies, 1);
    assert_eq!(report.messages, 1);
    assert_eq!(report.checkpoints, 1);
    assert!(engine.sessions().get(&doomed.session_id).await.unwrap().is_none());
    assert!(engine.sessions().delete(&doomed.session_id).await.unwrap().is_none());

    let survivor = engine
        .sessions()
        .get(&kept.session_id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(survivor.batches.len(), 1);
    assert_eq!(survivor.messages.len(), 1);
    assert_eq!(survivor.checkpoints.len(), 1);
}

// An orchestration loop over a sequential batch: one task at a time, a
// retry, then a terminal failure that rolls back completed siblings in
// reverse.
async fn sequential_batch_with_retry_and_rollback(store: Arc<dyn WorkflowStore>) {
    let (engine, clock) = engine(store);
    let sched = engine.scheduler();
    let batch = sched
        .create_batch(TaskBatch::new("release").with_strategy(ExecutionStrategy::Sequential))
        .await
        .unwrap();
    let b = batch.batch_id.as_str();
    for name in ["tag", "build", "upload"] {
        let retries = if name == "upload" { 1 } else { 3 };
        sched
            .create_task(
                Task::new(name, "release", "exec-1")
                    .in_batch(b)
                    .with_retries(retries, 5),
            )
            .await
            .unwrap();
        clock.advance(Duration::seconds(1));
    }
    sched.update_batch_status(b, BatchStatus::Running).await.unwrap().unwrap();

    let mut outcome = None;
    for _ in 0..10 {
        let ready = sched.ready_tasks(Some(b), None).await.unwrap();
        let now = dispatch(batch.execution_strategy, &ready);
        let Some(next) = now.first() else { break };
        assert!(now.len() <= 1);
        let task = sched.claim_task(&next.task_id, "exec-1").await.unwrap().unwrap();
        clock.advance(Duration::seconds(1));
        if task.name == "upload" {
            let (_, decision) = sched
                .record_failure(&task.task_id, "network unreachable")
                .await
                .unwrap()
                .unwrap();
            if decision == RetryDecision::Exhausted {
                outcome = Some(task.task_id.clone());
                break;
            }
        } else {
            complete(&engine, &task.task_id).await;
        }
    }

    let failed = outcome.expect("upload should exhaust its retries");
    let plan = sched.rollback_plan(&failed).await.unwrap();
    let order: Vec<&str> = plan.iter().map(|t| t.name.as_str()).collect();
    assert_eq!(order, vec!["build", "tag"]);
    for task in &plan {
        sched
            .update_task_status(&task.task_id, TaskUpdate::to(TaskStatus::RolledBack))
            .await
            .unwrap()
            .unwrap();
    }
    sched.update_batch_status(b, BatchStatus::Failed).await.unwrap().unwrap();

    let stats = sched.batch_statistics(b).await.unwrap();
    assert_eq!(stats.total, 3);
    assert_eq!(stats.count(TaskStatus::RolledBack), 2);
    assert_eq!(stats.count(TaskStatus::Failed), 1);
    let detail = sched.get_batch(b).await.unwrap().unwrap();
    assert_eq!(detail.batch.status, BatchStatus::Failed);
    assert!(detail.batch.completed_at.is_some());
    assert_eq!(detail.tasks.len(), 3);
}

// Large contexts are stored compressed and restore to the original value.
async fn large_checkpoint_roundtrips(store: Arc<dyn WorkflowStore>) {
    let config = EngineConfig {
        compression_threshold_bytes: 256,
        ..Default::default()
    };
    let (engine, _) = engine_with(store, config);
    let session = engine
        .sessions()
        .open(WorkflowSession::new("planner"))
        .await
        .unwrap();
    let context = json!({ "log": "x".repeat(4096) });
    let checkpoint = engine
        .checkpoints()
        .create(WorkflowCheckpoint::new(
            &session.session_id,
            "exec-1",
            CheckpointType::Milestone,
            context.clone(),
        ))
        .await
        .unwrap();
    assert!(checkpoint.compressed);
    let restored = engine
        .checkpoints()
        .restore(&checkpoint.checkpoint_id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(restored, context);
}

macro_rules! both_backends {
    ($($case:ident),+ $(,)?) => {
        mod memory {
            $(
                #[tokio::test]
                async fn $case() {
                    super::$case(std::sync::Arc::new(weft_store::InMemoryStore::new())).await;
                }
            )+
        }

        mod sqlite {
            $(
                #[tokio::test]
                async fn $case() {
                    let store = weft_store::SqliteStore::in_memory().unwrap();
                    super::$case(std::sync::Arc::new(store)).await;
                }
            )+
        }
    };
}

both_backends!(
    readiness_follows_completion,
    ready_tasks_have_completed_dependencies,
    concurrent_claims_have_one_winner,
    cyclic_edge_rejected,
    broadcast_skips_sender,
    inbox_orders_by_priority_then_newest,
    replies_share_a_thread,
    expiry_sweep_is_idempotent,
    retention_keeps_newest,
    staleness_follows_threshold,
    session_delete_cascades,
    sequential_batch_with_retry_and_rollback,
    large_checkpoint_roundtrips,
);

#[tokio::test]
async fn maintenance_loop_stops_on_shutdown() {
    let (engine, _) = engine(Arc::new(weft_store::InMemoryStore::new()));
    let (tx, rx) = tokio::sync::watch::channel(false);
    let handle = engine
        .maintenance()
        .spawn(std::time::Duration::from_millis(10), rx);
    tokio::time::sleep(std::time::Duration::from_millis(50)).await;
    tx.send(true).unwrap();
    tokio::time::timeout(std::time::Duration::from_secs(5), handle)
        .await
        .unwrap()
        .unwrap();

    let sweeps = engine
        .metrics()
        .query(Some("messages_expired"), Some("maintenance"), None, None, None)
        .await
        .unwrap();
    assert!(!sweeps.is_empty());
}
