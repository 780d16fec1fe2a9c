//! Availability scoring
//!
//! Derives a score in `[0, 1]` from a node's heartbeat history. The score is
//! a pure function of the history snapshot and the evaluation instant.

use std::time::{Duration, Instant};

use super::registry::{NodeInfo, NodeStatus};

/// Configuration for the scoring engine
#[derive(Debug, Clone)]
pub struct ScoringConfig {
    /// Sample weight decays as `exp(-age / decay_constant)`
    pub decay_constant: Duration,
    /// Freshness decays as `exp(-gap / gap_penalty_horizon)`
    pub gap_penalty_horizon: Duration,
    /// Base health used when no sample carries weight
    pub default_metric: f64,
    /// Lower bound on the base health
    pub min_base: f64,
}

impl Default for ScoringConfig {
    fn default() -> Self {
        Self {
            decay_constant: Duration::from_secs(10),
            gap_penalty_horizon: Duration::from_secs(20),
            default_metric: 0.5,
            min_base: 0.001,
        }
    }
}

/// Computes availability scores from heartbeat history
#[derive(Debug, Clone)]
pub struct ScoringEngine {
    config: ScoringConfig,
}

impl ScoringEngine {
    /// Create a scoring engine
    pub fn new(config: ScoringConfig) -> Self {
        Self { config }
    }

    /// Score a node as of `now`
    ///
    /// `base * freshness`, where `base` is the decay-weighted mean metric
    /// (floored at `min_base`) and `freshness` shrinks with the time since
    /// the last heartbeat. Since `base > 0`, a longer gap always scores lower.
    pub fn score(&self, node: &NodeInfo, now: Instant) -> f64 {
        let base = self.weighted_metric(node).max(self.config.min_base);
        let gap = now.saturating_duration_since(node.last_heartbeat);
        (base * self.freshness(gap)).clamp(0.0, 1.0)
    }

    /// Ranking key for selection; dead nodes sort below everything
    pub fn selection_key(&self, node: &NodeInfo, now: Instant) -> f64 {
        match node.status {
            NodeStatus::Dead => f64::NEG_INFINITY,
            _ => self.score(node, now),
        }
    }

    pub fn config(&self) -> &ScoringConfig {
        &self.config
    }

    fn weighted_metric(&self, node: &NodeInfo) -> f64 {
        // Ages are taken relative to the newest sample; the common factor
        // cancels in the mean and the newest weight stays 1
        let tau = self.config.decay_constant.as_secs_f64();
        let newest = node.last_heartbeat;
        let (weighted, total) = node.history.iter().fold((0.0, 0.0), |(sum, weights), sample| {
            let age = newest.saturating_duration_since(sample.timestamp).as_secs_f64();
            let weight = (-age / tau).exp();
            (sum + weight * sample.metric, weights + weight)
        });

        if total > f64::MIN_POSITIVE {
            (weighted / total).clamp(0.0, 1.0)
        } else {
            self.config.default_metric
        }
    }

    fn freshness(&self, gap: Duration) -> f64 {
        (-gap.as_secs_f64() / self.config.gap_penalty_horizon.as_secs_f64()).exp()
    }
}

impl Default for ScoringEngine {
    fn default() -> Self {
        Self::new(ScoringConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::coordinator::registry::{HeartbeatSample, NodeRegistry};

    fn node_with_metrics(metrics: &[f64], t0: Instant) -> NodeInfo {
        let registry = NodeRegistry::new(16);
        for (i, metric) in metrics.iter().enumerate() {
            registry
                .report_heartbeat("n1", HeartbeatSample::new(t0 + Duration::from_secs(i as u64), *metric))
                .unwrap();
        }
        registry.node("n1").unwrap()
    }

    #[test]
    fn test_score_in_unit_range() {
        let engine = ScoringEngine::default();
        let t0 = Instant::now();
        let node = node_with_metrics(&[1.0, 1.0, 1.0], t0);

        let score = engine.score(&node, t0 + Duration::from_secs(2));
        assert!(score > 0.0 && score <= 1.0);
        assert!((score - 1.0).abs() < 1e-9, "fresh perfect node should score 1, got {}", score);
    }

    #[test]
    fn test_score_decreases_with_gap() {
        let engine = ScoringEngine::default();
        let t0 = Instant::now();
        let node = node_with_metrics(&[0.9, 0.8, 0.95], t0);

        let mut last = f64::INFINITY;
        for secs in [2u64, 3, 5, 10, 30, 60] {
            let score = engine.score(&node, t0 + Duration::from_secs(secs));
            assert!(score < last, "score must strictly decrease, {} !< {}", score, last);
            last = score;
        }
    }

    #[test]
    fn test_zero_metric_still_monotonic() {
        let engine = ScoringEngine::default();
        let t0 = Instant::now();
        let node = node_with_metrics(&[0.0], t0);

        let near = engine.score(&node, t0 + Duration::from_secs(1));
        let far = engine.score(&node, t0 + Duration::from_secs(2));
        assert!(far < near);
    }

    #[test]
    fn test_recent_samples_dominate() {
        let engine = ScoringEngine::default();
        let t0 = Instant::now();
        let improving = node_with_metrics(&[0.1, 0.1, 0.9, 0.9], t0);
        let degrading = node_with_metrics(&[0.9, 0.9, 0.1, 0.1], t0);

        let at = t0 + Duration::from_secs(3);
        assert!(engine.score(&improving, at) > engine.score(&degrading, at));
    }

    #[test]
    fn test_empty_history_uses_default() {
        let engine = ScoringEngine::default();
        let t0 = Instant::now();
        let mut node = node_with_metrics(&[0.9], t0);
        node.history = crate::coordinator::registry::HeartbeatHistory::new(4);

        let score = engine.score(&node, t0);
        assert!((score - 0.5).abs() < 1e-9);
    }

    #[test]
    fn test_dead_node_selection_key() {
        let engine = ScoringEngine::default();
        let t0 = Instant::now();
        let mut node = node_with_metrics(&[0.9], t0);
        node.status = NodeStatus::Dead;
        assert_eq!(engine.selection_key(&node, t0), f64::NEG_INFINITY);
    }
}
