use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

wire_enum! {
    /// Kind of metric an observation belongs to.
    pub enum MetricKind {
        Counter => "counter",
        Gauge => "gauge",
        Histogram => "histogram",
        Summary => "summary",
    }
}

/// One append-only sample written by the metrics sink.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricObservation {
    pub metric_id: String,
    pub metric_name: String,
    pub metric_type: MetricKind,
    pub value: f64,
    #[serde(default)]
    pub labels: BTreeMap<String, String>,
    pub session_id: Option<String>,
    pub agent_id: Option<String>,
    /// Engine component that emitted the sample, e.g. `messaging`.
    pub component: Option<String>,
    pub recorded_at: DateTime<Utc>,
    /// Aggregation window tag such as `1m` or `1h`.
    pub time_window: Option<String>,
}

impl MetricObservation {
    /// A new observation of `metric_name`.
    pub fn new(metric_name: impl Into<String>, metric_type: MetricKind, value: f64) -> Self {
        Self {
            metric_id: crate::new_id(),
            metric_name: metric_name.into(),
            metric_type,
            value,
            labels: BTreeMap::new(),
            session_id: None,
            agent_id: None,
            component: None,
            recorded_at: Utc::now(),
            time_window: None,
        }
    }

    /// Attach a label.
    pub fn label(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.labels.insert(key.into(), value.into());
        self
    }

    /// Associate with an engine component.
    pub fn component(mut self, component: impl Into<String>) -> Self {
        self.component = Some(component.into());
        self
    }

    /// Associate with a session.
    pub fn session(mut self, session_id: impl Into<String>) -> Self {
        self.session_id = Some(session_id.into());
        self
    }

    /// Associate with an agent.
    pub fn agent(mut self, agent_id: impl Into<String>) -> Self {
        self.agent_id = Some(agent_id.into());
        self
    }
}
