use crate::newest_first;
use chrono::Duration;
use std::sync::Arc;
use tracing::debug;
use weft_core::{Clock, MetricKind, MetricObservation, WeftResult};
use weft_store::{MetricQuery, WorkflowStore};

/// Append-only sink for the engine's own time series.
///
/// Nothing is aggregated here; consumers query raw observations.
#[derive(Clone)]
pub struct MetricsSink {
    store: Arc<dyn WorkflowStore>,
    clock: Arc<dyn Clock>,
    default_window: Duration,
    default_limit: usize,
}

impl MetricsSink {
    pub fn new(
        store: Arc<dyn WorkflowStore>,
        clock: Arc<dyn Clock>,
        default_window: Duration,
        default_limit: usize,
    ) -> Self {
        Self {
            store,
            clock,
            default_window,
            default_limit,
        }
    }

    /// Store one observation stamped with the current time.
    pub async fn record(&self, mut metric: MetricObservation) -> WeftResult<MetricObservation> {
        metric.recorded_at = self.clock.now();
        self.store.insert_metric(&metric).await?;
        debug!(
            metric = %metric.metric_name,
            kind = %metric.metric_type,
            value = metric.value,
            "Metric recorded"
        );
        Ok(metric)
    }

    /// Record a counter increment attributed to `component`.
    pub async fn counter(
        &self,
        name: &str,
        component: &str,
        value: f64,
    ) -> WeftResult<MetricObservation> {
        self.record(MetricObservation::new(name, MetricKind::Counter, value).component(component))
            .await
    }

    /// Record a gauge reading attributed to `component`.
    pub async fn gauge(
        &self,
        name: &str,
        component: &str,
        value: f64,
    ) -> WeftResult<MetricObservation> {
        self.record(MetricObservation::new(name, MetricKind::Gauge, value).component(component))
            .await
    }

    /// Observations recorded within `window` (the configured window when
    /// `None`), newest first.
    pub async fn query(
        &self,
        metric_name: Option<&str>,
        component: Option<&str>,
        session_id: Option<&str>,
        window: Option<Duration>,
        limit: Option<usize>,
    ) -> WeftResult<Vec<MetricObservation>> {
        let since = self.clock.now() - window.unwrap_or(self.default_window);
        let mut rows = self
            .store
            .list_metrics(&MetricQuery {
                metric_name: metric_name.map(str::to_string),
                component: component.map(str::to_string),
                session_id: session_id.map(str::to_string),
                recorded_after: Some(since),
            })
            .await?;
        newest_first(&mut rows, |m| m.recorded_at);
        rows.truncate(limit.unwrap_or(self.default_limit));
        Ok(rows)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use weft_core::ManualClock;
    use weft_store::InMemoryStore;

    #[tokio::test]
    async fn test_query_window_newest_first() {
        let clock = Arc::new(ManualClock::default());
        let sink = MetricsSink::new(
            Arc::new(InMemoryStore::new()),
            clock.clone(),
            Duration::hours(1),
            50,
        );
        sink.counter("messages_sent", "messaging", 1.0).await.unwrap();
        clock.advance(Duration::hours(2));
        sink.counter("messages_sent", "messaging", 2.0).await.unwrap();
        clock.advance(Duration::minutes(1));
        sink.counter("messages_sent", "messaging", 3.0).await.unwrap();
        sink.gauge("queue_depth", "scheduler", 7.0).await.unwrap();
        sink.record(
            MetricObservation::new("messages_sent", MetricKind::Counter, 9.0)
                .component("messaging")
                .session("s-1"),
        )
        .await
        .unwrap();

        let rows = sink
            .query(Some("messages_sent"), Some("messaging"), None, None, Some(2))
            .await
            .unwrap();
        let values: Vec<f64> = rows.iter().map(|m| m.value).collect();
        assert_eq!(values, vec![9.0, 3.0]);

        let scoped = sink
            .query(None, None, Some("s-1"), None, None)
            .await
            .unwrap();
        assert_eq!(scoped.len(), 1);

        let all = sink
            .query(Some("messages_sent"), None, None, Some(Duration::hours(3)), None)
            .await
            .unwrap();
        assert_eq!(all.len(), 4);
    }
}
