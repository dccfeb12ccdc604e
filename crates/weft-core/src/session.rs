use crate::Metadata;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

wire_enum! {
    /// Lifecycle status of a [`WorkflowSession`].
    pub enum SessionStatus {
        /// Open and accepting work.
        Active => "active",
        /// Finished successfully. Terminal.
        Completed => "completed",
        /// Finished unsuccessfully. Terminal.
        Failed => "failed",
        /// Suspended; may be resumed back to `active`.
        Paused => "paused",
    }
}

impl SessionStatus {
    /// `completed` and `failed` are terminal.
    pub fn is_terminal(&self) -> bool {
        matches!(self, SessionStatus::Completed | SessionStatus::Failed)
    }
}

/// Top-level container coordinating one logical workflow run.
///
/// A session owns its checkpoints, batches, and messages; deleting the
/// session deletes them too.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowSession {
    /// Unique session identifier.
    pub session_id: String,
    /// Optional human-readable name.
    pub name: Option<String>,
    /// Optional longer description.
    pub description: Option<String>,
    /// Current lifecycle status.
    pub status: SessionStatus,
    /// Agent or user that opened the session.
    pub created_by: String,
    /// When the session was opened.
    pub created_at: DateTime<Utc>,
    /// When the session row was last written.
    pub updated_at: DateTime<Utc>,
    /// When the session reached a terminal status, if stamped.
    pub completed_at: Option<DateTime<Utc>>,
    /// Arbitrary caller metadata.
    #[serde(default)]
    pub metadata: Metadata,
}

impl WorkflowSession {
    /// A new `active` session opened by `created_by`.
    pub fn new(created_by: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            session_id: crate::new_id(),
            name: None,
            description: None,
            status: SessionStatus::Active,
            created_by: created_by.into(),
            created_at: now,
            updated_at: now,
            completed_at: None,
            metadata: Metadata::new(),
        }
    }

    /// Use a caller-chosen session id.
    pub fn with_id(mut self, session_id: impl Into<String>) -> Self {
        self.session_id = session_id.into();
        self
    }

    /// Set the display name.
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Set the description.
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    /// Attach a metadata entry.
    pub fn with_metadata(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.metadata.insert(key.into(), value);
        self
    }
}
