use crate::checkpoint::CheckpointManager;
use crate::messaging::MessageBus;
use crate::metrics::MetricsSink;
use crate::registry::AgentRegistry;
use serde::Serialize;
use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{error, info};
use weft_core::{SessionStatus, WeftResult};
use weft_store::{CheckpointQuery, SessionQuery, WorkflowStore};

const COMPONENT: &str = "maintenance";

/// Counts from one sweep pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SweepReport {
    pub messages_expired: usize,
    pub agents_marked_inactive: usize,
    pub checkpoints_pruned: usize,
}

/// Background housekeeping: message expiry, agent staleness, and checkpoint
/// retention.
#[derive(Clone)]
pub struct Maintenance {
    store: Arc<dyn WorkflowStore>,
    messages: MessageBus,
    registry: AgentRegistry,
    checkpoints: CheckpointManager,
    metrics: MetricsSink,
    keep_count: usize,
}

impl Maintenance {
    pub fn new(
        store: Arc<dyn WorkflowStore>,
        messages: MessageBus,
        registry: AgentRegistry,
        checkpoints: CheckpointManager,
        metrics: MetricsSink,
        keep_count: usize,
    ) -> Self {
        Self {
            store,
            messages,
            registry,
            checkpoints,
            metrics,
            keep_count,
        }
    }

    /// Run every sweep once and record the counts as metrics.
    pub async fn run_once(&self) -> WeftResult<SweepReport> {
        let report = SweepReport {
            messages_expired: self.messages.expire_sweep().await?,
            agents_marked_inactive: self.registry.sweep_stale(None).await?,
            checkpoints_pruned: self.prune_checkpoints().await?,
        };

        for (name, value) in [
            ("messages_expired", report.messages_expired),
            ("agents_marked_inactive", report.agents_marked_inactive),
            ("checkpoints_pruned", report.checkpoints_pruned),
        ] {
            self.metrics.counter(name, COMPONENT, value as f64).await?;
        }
        info!(
            messages_expired = report.messages_expired,
            agents_marked_inactive = report.agents_marked_inactive,
            checkpoints_pruned = report.checkpoints_pruned,
            "Maintenance sweep complete"
        );
        Ok(report)
    }

    /// Apply checkpoint retention to every (session, agent) pair of sessions
    /// that are still active or paused.
    async fn prune_checkpoints(&self) -> WeftResult<usize> {
        let mut pruned = 0;
        for status in [SessionStatus::Active, SessionStatus::Paused] {
            let sessions = self
                .store
                .list_sessions(&SessionQuery {
                    status: Some(status),
                    ..Default::default()
                })
                .await?;
            for session in sessions {
                let agents: BTreeSet<String> = self
                    .store
                    .list_checkpoints(&CheckpointQuery {
                        session_id: Some(session.session_id.clone()),
                        ..Default::default()
                    })
                    .await?
                    .into_iter()
                    .map(|c| c.agent_id)
                    .collect();
                for agent_id in agents {
                    pruned += self
                        .checkpoints
                        .prune(&session.session_id, &agent_id, self.keep_count)
                        .await?;
                }
            }
        }
        Ok(pruned)
    }

    /// Run a sweep every `interval` until `shutdown` turns `true` or its
    /// sender is dropped. A failed sweep is logged and the loop continues.
    pub fn spawn(self, interval: Duration, mut shutdown: watch::Receiver<bool>) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut timer = tokio::time::interval(interval);
            loop {
                tokio::select! {
                    _ = timer.tick() => {
                        if let Err(e) = self.run_once().await {
                            error!(error = %e, "Maintenance sweep failed");
                        }
                    }
                    changed = shutdown.changed() => {
                        if changed.is_err() || *shutdown.borrow() {
                            info!("Maintenance loop stopping");
                            break;
                        }
                    }
                }
            }
        })
    }
}
