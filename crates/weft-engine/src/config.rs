use serde::{Deserialize, Serialize};
use weft_core::{WeftError, WeftResult, DEFAULT_MAX_DELIVERY_ATTEMPTS, DEFAULT_PRIORITY};

/// Tunables shared by every engine component.
///
/// Every field has a default, so an empty `[engine]` table (or none at all)
/// yields [`EngineConfig::default`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Checkpoints kept per (session, agent) by the retention sweep.
    #[serde(default = "default_keep_count")]
    pub checkpoint_keep_count: usize,
    /// Checkpoint contexts whose JSON is larger than this are stored
    /// compressed.
    #[serde(default = "default_compression_threshold")]
    pub compression_threshold_bytes: usize,
    /// Agents silent for longer than this are swept to `inactive`.
    #[serde(default = "default_stale_minutes")]
    pub stale_agent_threshold_minutes: i64,
    /// Priority applied to messages sent without one.
    #[serde(default = "default_priority")]
    pub default_message_priority: i32,
    /// Delivery attempts allowed per message.
    #[serde(default = "default_max_attempts")]
    pub max_delivery_attempts: u32,
    /// TTL applied to messages sent without an expiry. `None` means no TTL.
    #[serde(default)]
    pub default_message_ttl_seconds: Option<i64>,
    /// Row limit for list calls that are not given one.
    #[serde(default = "default_list_limit")]
    pub default_list_limit: usize,
    /// Trailing window for gate statistics.
    #[serde(default = "default_statistics_window")]
    pub statistics_window_hours: i64,
    /// Period of the maintenance loop.
    #[serde(default = "default_sweep_interval")]
    pub sweep_interval_seconds: u64,
}

fn default_keep_count() -> usize {
    50
}
fn default_compression_threshold() -> usize {
    1024 * 1024
}
fn default_stale_minutes() -> i64 {
    30
}
fn default_priority() -> i32 {
    DEFAULT_PRIORITY
}
fn default_max_attempts() -> u32 {
    DEFAULT_MAX_DELIVERY_ATTEMPTS
}
fn default_list_limit() -> usize {
    50
}
fn default_statistics_window() -> i64 {
    24
}
fn default_sweep_interval() -> u64 {
    60
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            checkpoint_keep_count: default_keep_count(),
            compression_threshold_bytes: default_compression_threshold(),
            stale_agent_threshold_minutes: default_stale_minutes(),
            default_message_priority: default_priority(),
            max_delivery_attempts: default_max_attempts(),
            default_message_ttl_seconds: None,
            default_list_limit: default_list_limit(),
            statistics_window_hours: default_statistics_window(),
            sweep_interval_seconds: default_sweep_interval(),
        }
    }
}

impl EngineConfig {
    /// Reject values that would make a sweep or a list call meaningless.
    pub fn validate(&self) -> WeftResult<()> {
        if self.checkpoint_keep_count == 0 {
            return Err(WeftError::Config(
                "checkpoint_keep_count must be at least 1".into(),
            ));
        }
        if self.stale_agent_threshold_minutes <= 0 {
            return Err(WeftError::Config(
                "stale_agent_threshold_minutes must be positive".into(),
            ));
        }
        if self.default_list_limit == 0 {
            return Err(WeftError::Config("default_list_limit must be at least 1".into()));
        }
        if self.statistics_window_hours <= 0 {
            return Err(WeftError::Config(
                "statistics_window_hours must be positive".into(),
            ));
        }
        if self.sweep_interval_seconds == 0 {
            return Err(WeftError::Config(
                "sweep_interval_seconds must be at least 1".into(),
            ));
        }
        if matches!(self.default_message_ttl_seconds, Some(ttl) if ttl <= 0) {
            return Err(WeftError::Config(
                "default_message_ttl_seconds must be positive when set".into(),
            ));
        }
        Ok(())
    }

    /// Agent staleness threshold.
    pub fn stale_agent_threshold(&self) -> chrono::Duration {
        chrono::Duration::minutes(self.stale_agent_threshold_minutes)
    }

    /// Gate statistics window.
    pub fn statistics_window(&self) -> chrono::Duration {
        chrono::Duration::hours(self.statistics_window_hours)
    }

    /// Default message TTL, if any.
    pub fn default_message_ttl(&self) -> Option<chrono::Duration> {
        self.default_message_ttl_seconds
            .map(chrono::Duration::seconds)
    }

    /// Maintenance loop period.
    pub fn sweep_interval(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.sweep_interval_seconds)
    }
}
