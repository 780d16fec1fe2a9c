//! Coordinator configuration
//!
//! Defaults for every component, overridable from `PULSE_*` environment
//! variables.

use std::str::FromStr;
use std::time::Duration;

use crate::coordinator::failure_detector::LivenessConfig;
use crate::coordinator::scoring::ScoringConfig;
use crate::coordinator::selector::SelectionConfig;
use crate::error::{PulseError, Result};
use crate::replication::ReplicationConfig;

/// Configuration for the coordinator
#[derive(Debug, Clone)]
pub struct CoordinatorConfig {
    /// Liveness thresholds
    pub liveness: LivenessConfig,
    /// Scoring parameters
    pub scoring: ScoringConfig,
    /// Target selection policy
    pub selection: SelectionConfig,
    /// Replication pipeline settings
    pub replication: ReplicationConfig,
    /// Period of the failure detection + selection cycle
    pub epoch_interval: Duration,
    /// Heartbeat samples kept per node
    pub history_capacity: usize,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            liveness: LivenessConfig::default(),
            scoring: ScoringConfig::default(),
            selection: SelectionConfig::default(),
            replication: ReplicationConfig::default(),
            epoch_interval: Duration::from_secs(5),
            history_capacity: crate::DEFAULT_HISTORY_CAPACITY,
        }
    }
}

impl CoordinatorConfig {
    /// Defaults overlaid with any `PULSE_*` environment variables
    pub fn from_env() -> Result<Self> {
        let mut config = Self::default();

        if let Some(v) = env_secs("PULSE_SUSPECT_TIMEOUT_SECS")? {
            config.liveness.suspect_timeout = v;
        }
        if let Some(v) = env_secs("PULSE_DEAD_TIMEOUT_SECS")? {
            config.liveness.dead_timeout = v;
        }
        if let Some(v) = env_secs("PULSE_GC_GRACE_SECS")? {
            config.liveness.gc_grace = v;
        }
        if let Some(v) = env_secs("PULSE_DECAY_CONSTANT_SECS")? {
            config.scoring.decay_constant = v;
        }
        if let Some(v) = env_secs("PULSE_GAP_PENALTY_SECS")? {
            config.scoring.gap_penalty_horizon = v;
        }
        if let Some(v) = env_parse::<usize>("PULSE_MAX_TARGETS")? {
            config.selection.max_targets = v;
        }
        if let Some(v) = env_parse::<f64>("PULSE_MIN_SCORE")? {
            config.selection.min_score = v;
        }
        if let Some(v) = env_parse::<usize>("PULSE_MAX_CONCURRENT_PUSHES")? {
            config.replication.max_concurrent_pushes = v;
        }
        if let Some(v) = env_millis("PULSE_PUSH_TIMEOUT_MS")? {
            config.replication.push_timeout = v;
        }
        if let Some(v) = env_millis("PULSE_BASE_BACKOFF_MS")? {
            config.replication.retry.base_backoff = v;
        }
        if let Some(v) = env_millis("PULSE_MAX_BACKOFF_MS")? {
            config.replication.retry.max_backoff = v;
        }
        if let Some(v) = env_parse::<u32>("PULSE_MAX_ATTEMPTS")? {
            config.replication.retry.max_attempts = v;
        }
        if let Some(v) = env_millis("PULSE_EPOCH_INTERVAL_MS")? {
            config.epoch_interval = v;
        }
        if let Some(v) = env_parse::<usize>("PULSE_HISTORY_CAPACITY")? {
            config.history_capacity = v;
        }

        config.validate()?;
        Ok(config)
    }

    /// Reject settings the coordinator cannot run with
    pub fn validate(&self) -> Result<()> {
        let invalid = |reason: &str| {
            Err(PulseError::InvalidConfig {
                reason: reason.to_string(),
            })
        };

        if self.liveness.suspect_timeout.is_zero() {
            return invalid("suspect timeout must be positive");
        }
        if self.liveness.dead_timeout < self.liveness.suspect_timeout {
            return invalid("dead timeout must not be shorter than suspect timeout");
        }
        if self.scoring.decay_constant.is_zero() || self.scoring.gap_penalty_horizon.is_zero() {
            return invalid("scoring time constants must be positive");
        }
        if !(0.0..=1.0).contains(&self.scoring.default_metric) {
            return invalid("default metric must lie in [0, 1]");
        }
        if !(self.scoring.min_base > 0.0 && self.scoring.min_base <= 1.0) {
            return invalid("minimum base score must lie in (0, 1]");
        }
        if self.selection.max_targets == 0 {
            return invalid("max targets must be at least 1");
        }
        if !(0.0..=1.0).contains(&self.selection.min_score) {
            return invalid("min score must lie in [0, 1]");
        }
        if self.replication.max_concurrent_pushes == 0 {
            return invalid("max concurrent pushes must be at least 1");
        }
        if self.replication.push_timeout.is_zero() {
            return invalid("push timeout must be positive");
        }
        if self.replication.retry.max_attempts == 0 {
            return invalid("max attempts must be at least 1");
        }
        if self.replication.retry.max_backoff < self.replication.retry.base_backoff {
            return invalid("max backoff must not be shorter than base backoff");
        }
        if self.epoch_interval.is_zero() {
            return invalid("epoch interval must be positive");
        }
        if self.history_capacity == 0 {
            return invalid("history capacity must be at least 1");
        }
        Ok(())
    }
}

fn env_parse<T: FromStr>(key: &str) -> Result<Option<T>> {
    match std::env::var(key) {
        Ok(raw) => raw.trim().parse().map(Some).map_err(|_| PulseError::InvalidConfig {
            reason: format!("{} has unparseable value '{}'", key, raw),
        }),
        Err(_) => Ok(None),
    }
}

fn env_secs(key: &str) -> Result<Option<Duration>> {
    Ok(env_parse::<u64>(key)?.map(Duration::from_secs))
}

fn env_millis(key: &str) -> Result<Option<Duration>> {
    Ok(env_parse::<u64>(key)?.map(Duration::from_millis))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        CoordinatorConfig::default().validate().unwrap();
    }

    #[test]
    fn test_dead_before_suspect_rejected() {
        let mut config = CoordinatorConfig::default();
        config.liveness.dead_timeout = Duration::from_secs(1);
        config.liveness.suspect_timeout = Duration::from_secs(2);
        assert!(matches!(config.validate(), Err(PulseError::InvalidConfig { .. })));
    }

    #[test]
    fn test_zero_targets_rejected() {
        let mut config = CoordinatorConfig::default();
        config.selection.max_targets = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_env_overlay() {
        std::env::set_var("PULSE_MAX_TARGETS", "7");
        std::env::set_var("PULSE_PUSH_TIMEOUT_MS", "250");
        let config = CoordinatorConfig::from_env().unwrap();
        std::env::remove_var("PULSE_MAX_TARGETS");
        std::env::remove_var("PULSE_PUSH_TIMEOUT_MS");

        assert_eq!(config.selection.max_targets, 7);
        assert_eq!(config.replication.push_timeout, Duration::from_millis(250));
    }
}
