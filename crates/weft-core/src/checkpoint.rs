use crate::Metadata;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

wire_enum! {
    /// Why a checkpoint was written.
    pub enum CheckpointType {
        /// Periodic snapshot taken by the agent loop.
        Automatic => "automatic",
        /// Explicitly requested snapshot.
        Manual => "manual",
        /// Snapshot at a workflow milestone.
        Milestone => "milestone",
    }
}

/// An opaque, timestamped snapshot of one agent's working state in a session.
///
/// Checkpoints for a (session, agent) pair form a chain ordered by
/// `created_at`; `previous_checkpoint_id` links each one to its predecessor.
/// A checkpoint is never mutated after it is written.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowCheckpoint {
    /// Unique checkpoint identifier.
    pub checkpoint_id: String,
    /// Owning session.
    pub session_id: String,
    /// Agent whose state this is.
    pub agent_id: String,
    /// Why it was written.
    pub checkpoint_type: CheckpointType,
    /// The stored context. When `compressed` is set this is a base64 string of
    /// gzip-compressed JSON.
    pub context: serde_json::Value,
    /// Whether `context` holds a compressed encoding.
    #[serde(default)]
    pub compressed: bool,
    /// Size in bytes of `context` as stored.
    pub size_bytes: u64,
    /// Predecessor in the (session, agent) chain.
    pub previous_checkpoint_id: Option<String>,
    /// Caller tags.
    #[serde(default)]
    pub tags: Vec<String>,
    /// Optional description.
    pub description: Option<String>,
    /// When the checkpoint was written.
    pub created_at: DateTime<Utc>,
    /// Arbitrary caller metadata.
    #[serde(default)]
    pub metadata: Metadata,
}

impl WorkflowCheckpoint {
    /// A new uncompressed checkpoint of `context`.
    pub fn new(
        session_id: impl Into<String>,
        agent_id: impl Into<String>,
        checkpoint_type: CheckpointType,
        context: serde_json::Value,
    ) -> Self {
        Self {
            checkpoint_id: crate::new_id(),
            session_id: session_id.into(),
            agent_id: agent_id.into(),
            checkpoint_type,
            context,
            compressed: false,
            size_bytes: 0,
            previous_checkpoint_id: None,
            tags: Vec::new(),
            description: None,
            created_at: Utc::now(),
            metadata: Metadata::new(),
        }
    }

    /// Link to an explicit predecessor.
    pub fn with_previous(mut self, checkpoint_id: impl Into<String>) -> Self {
        self.previous_checkpoint_id = Some(checkpoint_id.into());
        self
    }

    /// Attach tags.
    pub fn with_tags(mut self, tags: Vec<String>) -> Self {
        self.tags = tags;
        self
    }

    /// Set the description.
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }
}
