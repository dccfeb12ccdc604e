use crate::checkpoint::CheckpointManager;
use crate::config::EngineConfig;
use crate::maintenance::Maintenance;
use crate::messaging::{MessageBus, MessageDefaults};
use crate::metrics::MetricsSink;
use crate::quality::QualityGateTracker;
use crate::registry::AgentRegistry;
use crate::scheduler::TaskScheduler;
use crate::session::SessionService;
use std::sync::Arc;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::info;
use weft_core::{Clock, SystemClock, WeftResult};
use weft_store::WorkflowStore;

/// Every coordination component wired to one store and one clock.
///
/// Components are cheap handles; clone them out freely.
#[derive(Clone)]
pub struct WorkflowEngine {
    config: EngineConfig,
    store: Arc<dyn WorkflowStore>,
    sessions: SessionService,
    checkpoints: CheckpointManager,
    messages: MessageBus,
    scheduler: TaskScheduler,
    gates: QualityGateTracker,
    registry: AgentRegistry,
    metrics: MetricsSink,
}

impl WorkflowEngine {
    /// Build every component. Fails if `config` does not validate.
    pub fn new(
        store: Arc<dyn WorkflowStore>,
        clock: Arc<dyn Clock>,
        config: EngineConfig,
    ) -> WeftResult<Self> {
        config.validate()?;
        let limit = config.default_list_limit;
        let defaults = MessageDefaults {
            priority: config.default_message_priority,
            max_delivery_attempts: config.max_delivery_attempts,
            ttl: config.default_message_ttl(),
        };

        let engine = Self {
            sessions: SessionService::new(store.clone(), clock.clone(), limit),
            checkpoints: CheckpointManager::new(
                store.clone(),
                clock.clone(),
                config.compression_threshold_bytes,
                limit,
            ),
            messages: MessageBus::new(store.clone(), clock.clone(), defaults, limit),
            scheduler: TaskScheduler::new(store.clone(), clock.clone(), limit),
            gates: QualityGateTracker::new(
                store.clone(),
                clock.clone(),
                config.statistics_window(),
                limit,
            ),
            registry: AgentRegistry::new(
                store.clone(),
                clock.clone(),
                config.stale_agent_threshold(),
                limit,
            ),
            metrics: MetricsSink::new(store.clone(), clock, config.statistics_window(), limit),
            store,
            config,
        };
        info!(
            keep_count = engine.config.checkpoint_keep_count,
            stale_minutes = engine.config.stale_agent_threshold_minutes,
            "Workflow engine ready"
        );
        Ok(engine)
    }

    /// An engine on the wall clock.
    pub fn with_system_clock(store: Arc<dyn WorkflowStore>, config: EngineConfig) -> WeftResult<Self> {
        Self::new(store, Arc::new(SystemClock), config)
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn store(&self) -> &Arc<dyn WorkflowStore> {
        &self.store
    }

    pub fn sessions(&self) -> &SessionService {
        &self.sessions
    }

    pub fn checkpoints(&self) -> &CheckpointManager {
        &self.checkpoints
    }

    pub fn messages(&self) -> &MessageBus {
        &self.messages
    }

    pub fn scheduler(&self) -> &TaskScheduler {
        &self.scheduler
    }

    pub fn gates(&self) -> &QualityGateTracker {
        &self.gates
    }

    pub fn registry(&self) -> &AgentRegistry {
        &self.registry
    }

    pub fn metrics(&self) -> &MetricsSink {
        &self.metrics
    }

    /// The housekeeping runner over this engine's components.
    pub fn maintenance(&self) -> Maintenance {
        Maintenance::new(
            self.store.clone(),
            self.messages.clone(),
            self.registry.clone(),
            self.checkpoints.clone(),
            self.metrics.clone(),
            self.config.checkpoint_keep_count,
        )
    }

    /// Start the maintenance loop at the configured interval.
    pub fn spawn_maintenance(&self, shutdown: watch::Receiver<bool>) -> JoinHandle<()> {
        self.maintenance()
            .spawn(self.config.sweep_interval(), shutdown)
    }
}
