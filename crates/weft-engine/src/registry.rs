use crate::newest_first;
use chrono::Duration;
use std::sync::Arc;
use tracing::{debug, info, warn};
use weft_core::{AgentStatus, AgentType, Clock, RegisteredAgent, WeftResult};
use weft_store::{AgentQuery, WorkflowStore};

/// Liveness bookkeeping for agents.
///
/// Failure detection is pull-based: agents heartbeat, and a periodic
/// [`sweep_stale`](Self::sweep_stale) flips the silent ones to `inactive`.
#[derive(Clone)]
pub struct AgentRegistry {
    store: Arc<dyn WorkflowStore>,
    clock: Arc<dyn Clock>,
    stale_threshold: Duration,
    default_limit: usize,
}

impl AgentRegistry {
    pub fn new(
        store: Arc<dyn WorkflowStore>,
        clock: Arc<dyn Clock>,
        stale_threshold: Duration,
        default_limit: usize,
    ) -> Self {
        Self {
            store,
            clock,
            stale_threshold,
            default_limit,
        }
    }

    /// Register or re-register an agent.
    ///
    /// Re-registering keeps the original `registered_at`. Either way the
    /// agent comes back `active` with a fresh heartbeat.
    pub async fn register(&self, mut agent: RegisteredAgent) -> WeftResult<RegisteredAgent> {
        let now = self.clock.now();
        let existing = self.store.get_agent(&agent.agent_id).await?;
        agent.registered_at = existing.as_ref().map_or(now, |a| a.registered_at);
        agent.status = AgentStatus::Active;
        agent.last_heartbeat = Some(now);
        self.store.upsert_agent(&agent).await?;
        info!(
            agent_id = %agent.agent_id,
            agent_type = %agent.agent_type,
            reregistered = existing.is_some(),
            "Agent registered"
        );
        Ok(agent)
    }

    pub async fn get(&self, agent_id: &str) -> WeftResult<Option<RegisteredAgent>> {
        self.store.get_agent(agent_id).await
    }

    /// Active agents, most recently heartbeated first and never-heartbeated
    /// last.
    pub async fn list_active(
        &self,
        agent_type: Option<AgentType>,
        limit: Option<usize>,
    ) -> WeftResult<Vec<RegisteredAgent>> {
        let mut agents = self
            .store
            .list_agents(&AgentQuery {
                agent_type,
                status: Some(AgentStatus::Active),
            })
            .await?;
        newest_first(&mut agents, |a| a.last_heartbeat);
        agents.truncate(limit.unwrap_or(self.default_limit));
        Ok(agents)
    }

    /// Stamp the agent's heartbeat. Only the timestamp is written, so a
    /// status reported concurrently is kept.
    pub async fn heartbeat(&self, agent_id: &str) -> WeftResult<Option<RegisteredAgent>> {
        if !self
            .store
            .touch_agent_heartbeat(agent_id, self.clock.now())
            .await?
        {
            return Ok(None);
        }
        debug!(agent_id, "Heartbeat");
        self.store.get_agent(agent_id).await
    }

    /// Set an agent's status directly, e.g. to `error` when it reports a
    /// fault. The heartbeat is left as stored.
    pub async fn set_status(
        &self,
        agent_id: &str,
        status: AgentStatus,
    ) -> WeftResult<Option<RegisteredAgent>> {
        if !self.store.set_agent_status(agent_id, status).await? {
            return Ok(None);
        }
        info!(agent_id, to = %status, "Agent status changed");
        self.store.get_agent(agent_id).await
    }

    /// Flip every active agent that never heartbeated, or whose last
    /// heartbeat is older than the threshold, to `inactive`. Returns how many
    /// were flipped.
    ///
    /// Each flip is conditional on the heartbeat read here, so a heartbeat
    /// landing mid-sweep keeps its agent active.
    pub async fn sweep_stale(&self, threshold: Option<Duration>) -> WeftResult<usize> {
        let threshold = threshold.unwrap_or(self.stale_threshold);
        let now = self.clock.now();
        let active = self
            .store
            .list_agents(&AgentQuery {
                status: Some(AgentStatus::Active),
                ..Default::default()
            })
            .await?;

        let mut flipped = 0;
        for agent in active.iter().filter(|a| a.is_stale(now, threshold)) {
            if self
                .store
                .mark_agent_inactive_if(&agent.agent_id, agent.last_heartbeat)
                .await?
            {
                warn!(
                    agent_id = %agent.agent_id,
                    last_heartbeat = ?agent.last_heartbeat,
                    "Agent marked inactive"
                );
                flipped += 1;
            } else {
                debug!(agent_id = %agent.agent_id, "Agent heartbeated during sweep");
            }
        }
        if flipped > 0 {
            info!(flipped, "Staleness sweep complete");
        }
        Ok(flipped)
    }
}
