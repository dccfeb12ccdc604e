use crate::Metadata;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

wire_enum! {
    /// Role of a registered agent.
    pub enum AgentType {
        /// Claims and runs tasks.
        Execution => "execution",
        /// Watches sessions and agents.
        Monitoring => "monitoring",
        /// Runs quality gates.
        Quality => "quality",
        /// Anything else.
        Custom => "custom",
    }
}

wire_enum! {
    /// Liveness status of a registered agent.
    pub enum AgentStatus {
        /// Heartbeating within the staleness threshold.
        Active => "active",
        /// Flipped by the staleness sweep.
        Inactive => "inactive",
        /// Reported itself broken.
        Error => "error",
    }
}

/// A row of the agent registry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegisteredAgent {
    pub agent_id: String,
    pub agent_type: AgentType,
    pub name: String,
    pub description: Option<String>,
    pub status: AgentStatus,
    pub last_heartbeat: Option<DateTime<Utc>>,
    pub version: Option<String>,
    #[serde(default)]
    pub supported_task_types: Vec<String>,
    #[serde(default)]
    pub capabilities: Metadata,
    pub registered_at: DateTime<Utc>,
    pub registered_by: Option<String>,
    pub configuration: Option<serde_json::Value>,
    #[serde(default)]
    pub metadata: Metadata,
}

impl RegisteredAgent {
    /// A new active agent that has not heartbeated yet.
    pub fn new(agent_id: impl Into<String>, agent_type: AgentType, name: impl Into<String>) -> Self {
        Self {
            agent_id: agent_id.into(),
            agent_type,
            name: name.into(),
            description: None,
            status: AgentStatus::Active,
            last_heartbeat: None,
            version: None,
            supported_task_types: Vec::new(),
            capabilities: Metadata::new(),
            registered_at: Utc::now(),
            registered_by: None,
            configuration: None,
            metadata: Metadata::new(),
        }
    }

    /// Set the agent version string.
    pub fn with_version(mut self, version: impl Into<String>) -> Self {
        self.version = Some(version.into());
        self
    }

    /// Declare the task types this agent can run.
    pub fn supporting(mut self, task_types: Vec<String>) -> Self {
        self.supported_task_types = task_types;
        self
    }

    /// Whether the agent declared support for `task_type`.
    pub fn supports(&self, task_type: &str) -> bool {
        self.supported_task_types.iter().any(|t| t == task_type)
    }

    /// Staleness rule: no heartbeat ever, or the last one is older than
    /// `threshold` at `now`.
    pub fn is_stale(&self, now: DateTime<Utc>, threshold: chrono::Duration) -> bool {
        match self.last_heartbeat {
            None => true,
            Some(at) => now - at > threshold,
        }
    }
}
