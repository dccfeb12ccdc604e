use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

wire_enum! {
    /// Outcome of a quality-gate run.
    pub enum GateStatus {
        /// Criteria met.
        Passed => "passed",
        /// Criteria not met.
        Failed => "failed",
        /// Met with reservations.
        Warning => "warning",
        /// Not evaluated.
        Skipped => "skipped",
        /// Still evaluating.
        Running => "running",
    }
}

impl GateStatus {
    /// Every status except `running` is a completed outcome.
    pub fn is_finished(&self) -> bool {
        !matches!(self, GateStatus::Running)
    }
}

/// One run of a quality gate against a task or batch output.
///
/// Opened in `running` at gate start, written once more at completion, and
/// immutable afterwards.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QualityGateExecution {
    pub execution_id: String,
    pub gate_type: String,
    pub gate_name: Option<String>,
    pub status: GateStatus,
    pub score: Option<f64>,
    pub details: Option<serde_json::Value>,
    pub metrics: Option<serde_json::Value>,
    #[serde(default)]
    pub recommendations: Vec<String>,
    pub error_message: Option<String>,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    /// Elapsed wall time; zero while running.
    pub execution_time_seconds: f64,
    pub timeout_seconds: Option<u64>,
    pub session_id: Option<String>,
    pub batch_id: Option<String>,
    pub triggered_by: Option<String>,
    /// Snapshot of the gate configuration used for this run.
    pub configuration: Option<serde_json::Value>,
}

impl QualityGateExecution {
    /// A new `running` execution of `gate_type`.
    pub fn start(gate_type: impl Into<String>) -> Self {
        Self {
            execution_id: crate::new_id(),
            gate_type: gate_type.into(),
            gate_name: None,
            status: GateStatus::Running,
            score: None,
            details: None,
            metrics: None,
            recommendations: Vec::new(),
            error_message: None,
            started_at: Utc::now(),
            completed_at: None,
            execution_time_seconds: 0.0,
            timeout_seconds: None,
            session_id: None,
            batch_id: None,
            triggered_by: None,
            configuration: None,
        }
    }

    /// Set the gate's display name.
    pub fn named(mut self, name: impl Into<String>) -> Self {
        self.gate_name = Some(name.into());
        self
    }

    /// Record the session/batch context and trigger.
    pub fn with_context(
        mut self,
        session_id: Option<String>,
        batch_id: Option<String>,
        triggered_by: Option<String>,
    ) -> Self {
        self.session_id = session_id;
        self.batch_id = batch_id;
        self.triggered_by = triggered_by;
        self
    }

    /// Snapshot the configuration used.
    pub fn with_configuration(mut self, configuration: serde_json::Value) -> Self {
        self.configuration = Some(configuration);
        self
    }
}
