//! Simulation harness: N in-process nodes heartbeating into a coordinator

use pulse_core::coordinator::{Coordinator, HeartbeatSample};
use pulse_core::metrics::{self, standard};
use pulse_core::replication::InMemoryTransport;
use pulse_core::CoordinatorConfig;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};
use tracing_subscriber::EnvFilter;

struct SimConfig {
    nodes: usize,
    duration: Duration,
    failure_rate: f64,
    skip_rate: f64,
    crash_rate: f64,
    update_interval: Duration,
}

impl SimConfig {
    fn from_env() -> Result<Self, Box<dyn std::error::Error>> {
        Ok(Self {
            nodes: env_or("PULSE_SIM_NODES", 8)?,
            duration: Duration::from_secs(env_or("PULSE_SIM_DURATION_SECS", 60)?),
            failure_rate: env_or("PULSE_SIM_FAILURE_RATE", 0.1)?,
            skip_rate: env_or("PULSE_SIM_SKIP_RATE", 0.1)?,
            crash_rate: env_or("PULSE_SIM_CRASH_RATE", 0.25)?,
            update_interval: Duration::from_secs(env_or("PULSE_SIM_UPDATE_SECS", 7)?),
        })
    }
}

fn env_or<T>(key: &str, default: T) -> Result<T, Box<dyn std::error::Error>>
where
    T: std::str::FromStr,
    T::Err: std::error::Error + 'static,
{
    match std::env::var(key) {
        Ok(raw) => Ok(raw.trim().parse()?),
        Err(_) => Ok(default),
    }
}

/// One simulated node: heartbeats every 1-2s around a baseline health,
/// skipping the odd beat and possibly going silent for good
async fn run_node(coordinator: Arc<Coordinator>, node_id: String, skip_rate: f64, crash_after: Option<Duration>) {
    let mut rng = StdRng::from_entropy();
    let baseline: f64 = rng.gen_range(0.3..1.0);
    let started = tokio::time::Instant::now();

    loop {
        tokio::time::sleep(Duration::from_millis(rng.gen_range(1000..2000))).await;

        if crash_after.is_some_and(|after| started.elapsed() >= after) {
            warn!("Node {} crashed", node_id);
            return;
        }
        if rng.gen_bool(skip_rate) {
            debug!("Node {} skipped a heartbeat", node_id);
            continue;
        }

        let metric = (baseline + rng.gen_range(-0.15..0.15)).clamp(0.0, 1.0);
        let sample = HeartbeatSample::new(Instant::now(), metric);
        // Network delay between the node stamping and the coordinator receiving
        tokio::time::sleep(Duration::from_millis(rng.gen_range(1..50))).await;
        if let Err(e) = coordinator.report_heartbeat(&node_id, sample) {
            warn!("Node {} heartbeat rejected: {}", node_id, e);
        }
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let sim = SimConfig::from_env()?;
    let config = CoordinatorConfig::from_env()?;
    let epoch_interval = config.epoch_interval;

    info!(
        "Starting simulation: {} nodes for {:?}, push failure rate {}",
        sim.nodes, sim.duration, sim.failure_rate
    );

    let transport = Arc::new(InMemoryTransport::with_faults(
        sim.failure_rate,
        Duration::from_millis(20),
    ));
    let coordinator = Arc::new(Coordinator::with_system_clock(config, transport.clone())?);
    let mut handles = coordinator.start()?;

    let mut rng = StdRng::from_entropy();
    for i in 0..sim.nodes {
        let crash_after = rng
            .gen_bool(sim.crash_rate)
            .then(|| Duration::from_secs(rng.gen_range(10..=sim.duration.as_secs().max(11))));
        let node = tokio::spawn(run_node(
            coordinator.clone(),
            format!("node-{:02}", i),
            sim.skip_rate,
            crash_after,
        ));
        handles.push(node);
    }

    let updater = {
        let coordinator = coordinator.clone();
        let interval = sim.update_interval;
        let mut shutdown = coordinator.shutdown_signal().subscribe();
        tokio::spawn(async move {
            let mut generation = 0u64;
            loop {
                tokio::select! {
                    _ = shutdown.recv() => break,
                    _ = tokio::time::sleep(interval) => {
                        generation += 1;
                        let content = format!("shared block generation {}", generation);
                        if let Err(e) = coordinator.update_block(content) {
                            warn!("Block update failed: {}", e);
                            break;
                        }
                    }
                }
            }
        })
    };

    let reporter = {
        let coordinator = coordinator.clone();
        let mut shutdown = coordinator.shutdown_signal().subscribe();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(epoch_interval);
            loop {
                tokio::select! {
                    _ = shutdown.recv() => break,
                    _ = ticker.tick() => {
                        match serde_json::to_string_pretty(&coordinator.status()) {
                            Ok(json) => println!("{}", json),
                            Err(e) => error!("Cannot render status: {}", e),
                        }
                    }
                }
            }
        })
    };

    tokio::select! {
        _ = tokio::time::sleep(sim.duration) => info!("Simulation time elapsed"),
        _ = tokio::signal::ctrl_c() => info!("Interrupted"),
    }

    coordinator.shutdown();
    updater.await?;
    reporter.await?;
    for handle in handles {
        handle.abort();
        let _ = handle.await;
    }

    for (node_id, replica) in transport.replicas() {
        info!("{} holds version {}", node_id, replica.version);
    }
    report_metrics();
    print!("{}", metrics::gather_metrics());
    info!("Simulation finished");
    Ok(())
}

/// Human-readable summary of what the run achieved
fn report_metrics() {
    println!("Successful pushes per node:");
    for (node_id, pushes) in standard::NODE_PUSHES_SUCCEEDED.snapshot() {
        println!("  {}: {}", node_id, pushes);
    }
    match standard::HEARTBEAT_LATENCY.mean() {
        Some(mean) => println!(
            "Heartbeat latency: mean {:.2} ms over {} heartbeats",
            mean * 1000.0,
            standard::HEARTBEAT_LATENCY.count()
        ),
        None => println!("Heartbeat latency: no heartbeats"),
    }
    match standard::EPOCH_INTERVAL.mean() {
        Some(mean) => println!(
            "Epoch interval: mean {:.3} s over {} intervals",
            mean,
            standard::EPOCH_INTERVAL.count()
        ),
        None => println!("Epoch interval: fewer than two epochs"),
    }
}
