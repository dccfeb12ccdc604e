use crate::newest_first;
use chrono::Duration;
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, info, warn};
use weft_core::{Clock, GateStatus, QualityGateExecution, WeftError, WeftResult};
use weft_store::{GateQuery, WorkflowStore};

/// The result a gate reports when it finishes.
#[derive(Debug, Clone)]
pub struct GateOutcome {
    pub status: GateStatus,
    pub score: Option<f64>,
    pub details: Option<serde_json::Value>,
    pub metrics: Option<serde_json::Value>,
    pub recommendations: Vec<String>,
    pub error_message: Option<String>,
}

impl GateOutcome {
    pub fn new(status: GateStatus) -> Self {
        Self {
            status,
            score: None,
            details: None,
            metrics: None,
            recommendations: Vec::new(),
            error_message: None,
        }
    }

    pub fn passed(score: f64) -> Self {
        Self::new(GateStatus::Passed).with_score(score)
    }

    pub fn failed(error: impl Into<String>) -> Self {
        let mut outcome = Self::new(GateStatus::Failed);
        outcome.error_message = Some(error.into());
        outcome
    }

    pub fn with_score(mut self, score: f64) -> Self {
        self.score = Some(score);
        self
    }

    pub fn with_details(mut self, details: serde_json::Value) -> Self {
        self.details = Some(details);
        self
    }

    pub fn with_metrics(mut self, metrics: serde_json::Value) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub fn recommend(mut self, recommendation: impl Into<String>) -> Self {
        self.recommendations.push(recommendation.into());
        self
    }
}

/// Aggregate view of gate runs started inside a window.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct GateStatistics {
    pub total: usize,
    /// `passed / total`, or 0 when there were no runs.
    pub success_rate: f64,
    /// Mean elapsed seconds over finished runs, or 0 when none finished.
    pub mean_execution_seconds: f64,
    pub by_status: BTreeMap<String, usize>,
}

/// Records quality-gate runs and summarizes them.
///
/// A gate is opened once and completed once. A failed gate is a reported
/// fact; there is no retry logic here.
#[derive(Clone)]
pub struct QualityGateTracker {
    store: Arc<dyn WorkflowStore>,
    clock: Arc<dyn Clock>,
    statistics_window: Duration,
    default_limit: usize,
}

impl QualityGateTracker {
    pub fn new(
        store: Arc<dyn WorkflowStore>,
        clock: Arc<dyn Clock>,
        statistics_window: Duration,
        default_limit: usize,
    ) -> Self {
        Self {
            store,
            clock,
            statistics_window,
            default_limit,
        }
    }

    /// Open a run in `running`, stamped with the current time.
    pub async fn start(&self, mut execution: QualityGateExecution) -> WeftResult<QualityGateExecution> {
        execution.status = GateStatus::Running;
        execution.started_at = self.clock.now();
        execution.completed_at = None;
        execution.execution_time_seconds = 0.0;
        self.store.insert_gate_execution(&execution).await?;
        info!(
            execution_id = %execution.execution_id,
            gate_type = %execution.gate_type,
            "Quality gate started"
        );
        Ok(execution)
    }

    /// Finish a running gate. Returns `Ok(None)` for an unknown id and
    /// `InvalidTransition` if the run already finished.
    pub async fn complete(
        &self,
        execution_id: &str,
        outcome: GateOutcome,
    ) -> WeftResult<Option<QualityGateExecution>> {
        let Some(mut execution) = self.store.get_gate_execution(execution_id).await? else {
            return Ok(None);
        };
        if execution.status.is_finished() || !outcome.status.is_finished() {
            warn!(
                execution_id,
                from = %execution.status,
                to = %outcome.status,
                "Rejected quality gate completion"
            );
            return Err(WeftError::transition("gate", execution.status, outcome.status));
        }

        let now = self.clock.now();
        execution.status = outcome.status;
        execution.score = outcome.score;
        execution.details = outcome.details;
        execution.metrics = outcome.metrics;
        execution.recommendations = outcome.recommendations;
        execution.error_message = outcome.error_message;
        execution.completed_at = Some(now);
        execution.execution_time_seconds =
            (now - execution.started_at).num_milliseconds().max(0) as f64 / 1000.0;

        if !self.store.complete_gate_execution(&execution).await? {
            // Another completer got there between our read and write.
            warn!(execution_id, "Quality gate completed concurrently");
            return Err(WeftError::transition(
                "gate",
                GateStatus::Running,
                execution.status,
            ));
        }
        info!(
            execution_id,
            status = %execution.status,
            elapsed = execution.execution_time_seconds,
            "Quality gate completed"
        );
        Ok(Some(execution))
    }

    pub async fn get(&self, execution_id: &str) -> WeftResult<Option<QualityGateExecution>> {
        self.store.get_gate_execution(execution_id).await
    }

    /// Past runs, newest first.
    pub async fn history(
        &self,
        gate_type: Option<&str>,
        session_id: Option<&str>,
        status: Option<GateStatus>,
        limit: Option<usize>,
    ) -> WeftResult<Vec<QualityGateExecution>> {
        let mut runs = self
            .store
            .list_gate_executions(&GateQuery {
                gate_type: gate_type.map(str::to_string),
                session_id: session_id.map(str::to_string),
                status,
                ..Default::default()
            })
            .await?;
        newest_first(&mut runs, |r| r.started_at);
        runs.truncate(limit.unwrap_or(self.default_limit));
        debug!(count = runs.len(), "Loaded quality gate history");
        Ok(runs)
    }

    /// Count, success rate, mean elapsed time and status breakdown of runs
    /// started within `window` (the configured window when `None`).
    pub async fn statistics(
        &self,
        gate_type: Option<&str>,
        window: Option<Duration>,
    ) -> WeftResult<GateStatistics> {
        let since = self.clock.now() - window.unwrap_or(self.statistics_window);
        let runs = self
            .store
            .list_gate_executions(&GateQuery {
                gate_type: gate_type.map(str::to_string),
                started_after: Some(since),
                ..Default::default()
            })
            .await?;

        let mut stats = GateStatistics {
            total: runs.len(),
            ..Default::default()
        };
        if runs.is_empty() {
            return Ok(stats);
        }

        let mut passed = 0usize;
        let mut elapsed = Vec::new();
        for run in &runs {
            *stats
                .by_status
                .entry(run.status.as_str().to_string())
                .or_insert(0) += 1;
            if run.status == GateStatus::Passed {
                passed += 1;
            }
            if run.status.is_finished() {
                elapsed.push(run.execution_time_seconds);
            }
        }
        stats.success_rate = passed as f64 / runs.len() as f64;
        if !elapsed.is_empty() {
            stats.mean_execution_seconds = elapsed.iter().sum::<f64>() / elapsed.len() as f64;
        }
        Ok(stats)
    }
}
