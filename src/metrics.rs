//! In-process metrics
//!
//! Counters, gauges, and histograms rendered in Prometheus text format.
//! Serving them is left to whatever layer embeds the coordinator.

use parking_lot::RwLock;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};

/// Counter metric (monotonically increasing)
pub struct Counter {
    value: AtomicU64,
    name: &'static str,
    help: &'static str,
}

impl Counter {
    /// Create a new counter
    pub const fn new(name: &'static str, help: &'static str) -> Self {
        Self {
            value: AtomicU64::new(0),
            name,
            help,
        }
    }

    pub fn inc(&self) {
        self.value.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_by(&self, delta: u64) {
        self.value.fetch_add(delta, Ordering::Relaxed);
    }

    pub fn get(&self) -> u64 {
        self.value.load(Ordering::Relaxed)
    }

    /// Format as Prometheus metric
    pub fn to_prometheus(&self) -> String {
        format!(
            "# HELP {} {}\n# TYPE {} counter\n{} {}\n",
            self.name, self.help, self.name, self.name, self.get()
        )
    }
}

/// Counter family keyed by a single label
pub struct LabeledCounter {
    values: RwLock<BTreeMap<String, u64>>,
    name: &'static str,
    help: &'static str,
    label: &'static str,
}

impl LabeledCounter {
    /// Create a new labeled counter
    pub const fn new(name: &'static str, help: &'static str, label: &'static str) -> Self {
        Self {
            values: parking_lot::const_rwlock(BTreeMap::new()),
            name,
            help,
            label,
        }
    }

    pub fn inc(&self, key: &str) {
        let mut values = self.values.write();
        match values.get_mut(key) {
            Some(value) => *value += 1,
            None => {
                values.insert(key.to_string(), 1);
            }
        }
    }

    pub fn get(&self, key: &str) -> u64 {
        self.values.read().get(key).copied().unwrap_or(0)
    }

    /// Every series, ordered by label value
    pub fn snapshot(&self) -> Vec<(String, u64)> {
        self.values
            .read()
            .iter()
            .map(|(key, value)| (key.clone(), *value))
            .collect()
    }

    /// Format as Prometheus metric
    pub fn to_prometheus(&self) -> String {
        let mut output = format!(
            "# HELP {} {}\n# TYPE {} counter\n",
            self.name, self.help, self.name
        );
        for (key, value) in self.values.read().iter() {
            output.push_str(&format!(
                "{}{{{}=\"{}\"}} {}\n",
                self.name, self.label, key, value
            ));
        }
        output
    }
}

/// Gauge metric (can go up or down)
pub struct Gauge {
    value: AtomicI64,
    name: &'static str,
    help: &'static str,
}

impl Gauge {
    /// Create a new gauge
    pub const fn new(name: &'static str, help: &'static str) -> Self {
        Self {
            value: AtomicI64::new(0),
            name,
            help,
        }
    }

    pub fn set(&self, val: i64) {
        self.value.store(val, Ordering::Relaxed);
    }

    pub fn get(&self) -> i64 {
        self.value.load(Ordering::Relaxed)
    }

    /// Format as Prometheus metric
    pub fn to_prometheus(&self) -> String {
        format!(
            "# HELP {} {}\n# TYPE {} gauge\n{} {}\n",
            self.name, self.help, self.name, self.name, self.get()
        )
    }
}

/// Histogram over fixed latency buckets (seconds)
pub struct Histogram {
    bounds: &'static [f64],
    counts: Vec<AtomicU64>,
    sum_micros: AtomicU64,
    count: AtomicU64,
    name: &'static str,
    help: &'static str,
}

/// Default latency buckets
pub const LATENCY_BUCKETS: &[f64] = &[0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0];

/// Buckets for time between epochs
pub const INTERVAL_BUCKETS: &[f64] = &[0.1, 0.25, 0.5, 1.0, 2.0, 5.0, 10.0, 30.0, 60.0];

impl Histogram {
    /// Create with the default latency buckets
    pub fn new(name: &'static str, help: &'static str) -> Self {
        Self::with_buckets(name, help, LATENCY_BUCKETS)
    }

    /// Create with custom buckets
    pub fn with_buckets(name: &'static str, help: &'static str, bounds: &'static [f64]) -> Self {
        Self {
            bounds,
            counts: bounds.iter().map(|_| AtomicU64::new(0)).collect(),
            sum_micros: AtomicU64::new(0),
            count: AtomicU64::new(0),
            name,
            help,
        }
    }

    /// Observe a value in seconds
    pub fn observe(&self, value: f64) {
        self.count.fetch_add(1, Ordering::Relaxed);
        self.sum_micros
            .fetch_add((value * 1_000_000.0) as u64, Ordering::Relaxed);

        for (bound, count) in self.bounds.iter().zip(&self.counts) {
            if value <= *bound {
                count.fetch_add(1, Ordering::Relaxed);
            }
        }
    }

    pub fn count(&self) -> u64 {
        self.count.load(Ordering::Relaxed)
    }

    /// Sum of observations in seconds
    pub fn sum(&self) -> f64 {
        self.sum_micros.load(Ordering::Relaxed) as f64 / 1_000_000.0
    }

    /// Mean observation, if any were made
    pub fn mean(&self) -> Option<f64> {
        match self.count() {
            0 => None,
            n => Some(self.sum() / n as f64),
        }
    }

    /// Format as Prometheus metric
    pub fn to_prometheus(&self) -> String {
        let mut output = format!(
            "# HELP {} {}\n# TYPE {} histogram\n",
            self.name, self.help, self.name
        );

        for (bound, count) in self.bounds.iter().zip(&self.counts) {
            output.push_str(&format!(
                "{}_bucket{{le=\"{}\"}} {}\n",
                self.name,
                bound,
                count.load(Ordering::Relaxed)
            ));
        }
        output.push_str(&format!("{}_bucket{{le=\"+Inf\"}} {}\n", self.name, self.count()));

        output.push_str(&format!("{}_sum {}\n", self.name, self.sum()));
        output.push_str(&format!("{}_count {}\n", self.name, self.count()));

        output
    }
}

/// Standard coordinator metrics
pub mod standard {
    use super::*;
    use std::sync::LazyLock;

    pub static HEARTBEATS_RECEIVED: Counter =
        Counter::new("pulse_heartbeats_received_total", "Heartbeats accepted");

    pub static HEARTBEATS_REJECTED: Counter =
        Counter::new("pulse_heartbeats_rejected_total", "Malformed heartbeats rejected");

    pub static PUSHES_SUCCEEDED: Counter =
        Counter::new("pulse_pushes_succeeded_total", "Verified block pushes");

    pub static PUSHES_FAILED: Counter =
        Counter::new("pulse_pushes_failed_total", "Failed or timed out block pushes");

    pub static NODE_PUSHES_SUCCEEDED: LabeledCounter = LabeledCounter::new(
        "pulse_node_pushes_succeeded_total",
        "Verified block pushes per node",
        "node",
    );

    pub static RETRIES_EXHAUSTED: Counter =
        Counter::new("pulse_retries_exhausted_total", "Targets that ran out of push attempts");

    pub static EPOCHS_RUN: Counter = Counter::new("pulse_epochs_total", "Completed epoch cycles");

    pub static ACTIVE_NODES: Gauge = Gauge::new("pulse_active_nodes", "Nodes currently active");

    pub static TARGET_SET_SIZE: Gauge =
        Gauge::new("pulse_target_set_size", "Members of the current target set");

    pub static CURRENT_EPOCH: Gauge = Gauge::new("pulse_current_epoch", "Latest selection epoch");

    pub static BLOCK_VERSION: Gauge = Gauge::new("pulse_block_version", "Current shared block version");

    pub static PUSH_DURATION: LazyLock<Histogram> =
        LazyLock::new(|| Histogram::new("pulse_push_duration_seconds", "Block push latency"));

    pub static HEARTBEAT_LATENCY: LazyLock<Histogram> = LazyLock::new(|| {
        Histogram::new(
            "pulse_heartbeat_latency_seconds",
            "Delay between a heartbeat's timestamp and its receipt",
        )
    });

    pub static EPOCH_INTERVAL: LazyLock<Histogram> = LazyLock::new(|| {
        Histogram::with_buckets(
            "pulse_epoch_interval_seconds",
            "Time between consecutive epochs",
            INTERVAL_BUCKETS,
        )
    });
}

/// Render all standard metrics
pub fn gather_metrics() -> String {
    let mut output = String::new();

    output.push_str(&standard::HEARTBEATS_RECEIVED.to_prometheus());
    output.push_str(&standard::HEARTBEATS_REJECTED.to_prometheus());
    output.push_str(&standard::PUSHES_SUCCEEDED.to_prometheus());
    output.push_str(&standard::PUSHES_FAILED.to_prometheus());
    output.push_str(&standard::NODE_PUSHES_SUCCEEDED.to_prometheus());
    output.push_str(&standard::RETRIES_EXHAUSTED.to_prometheus());
    output.push_str(&standard::EPOCHS_RUN.to_prometheus());

    output.push_str(&standard::ACTIVE_NODES.to_prometheus());
    output.push_str(&standard::TARGET_SET_SIZE.to_prometheus());
    output.push_str(&standard::CURRENT_EPOCH.to_prometheus());
    output.push_str(&standard::BLOCK_VERSION.to_prometheus());

    output.push_str(&standard::PUSH_DURATION.to_prometheus());
    output.push_str(&standard::HEARTBEAT_LATENCY.to_prometheus());
    output.push_str(&standard::EPOCH_INTERVAL.to_prometheus());

    output
}
