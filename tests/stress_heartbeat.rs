//! Stress tests for heartbeat ingestion under concurrent epochs
//!
//! Run with: cargo test --release --test stress_heartbeat -- --nocapture

use pulse_core::clock::{Clock, ManualClock};
use pulse_core::coordinator::{Coordinator, HeartbeatSample, NodeRegistry, NodeStatus};
use pulse_core::replication::{InMemoryTransport, SyncState};
use pulse_core::CoordinatorConfig;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Heartbeat throughput against the registry alone
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn stress_registry_heartbeat_throughput() {
    let num_nodes = 200;
    let beats_per_node = 200;
    let capacity = 16;
    let registry = Arc::new(NodeRegistry::new(capacity));
    let clock = Arc::new(ManualClock::new());

    let start = Instant::now();
    let mut handles = Vec::new();
    for node in 0..num_nodes {
        let registry = registry.clone();
        let clock = clock.clone();
        handles.push(tokio::spawn(async move {
            let id = format!("node-{:04}", node);
            for beat in 0..beats_per_node {
                let metric = (beat % 10) as f64 / 10.0;
                registry
                    .report_heartbeat(&id, HeartbeatSample::new(clock.now(), metric))
                    .unwrap();
                if beat % 50 == 0 {
                    tokio::task::yield_now().await;
                }
            }
        }));
    }
    for handle in handles {
        handle.await.unwrap();
    }
    let elapsed = start.elapsed();

    let total = num_nodes * beats_per_node;
    println!("Registry heartbeat stress test:");
    println!("  Nodes: {}", num_nodes);
    println!("  Heartbeats: {}", total);
    println!("  Elapsed: {:?}", elapsed);
    println!("  Heartbeats/sec: {:.0}", total as f64 / elapsed.as_secs_f64());

    let nodes = registry.list_nodes();
    assert_eq!(nodes.len(), num_nodes);
    assert!(nodes.windows(2).all(|w| w[0].node_id < w[1].node_id));
    for node in &nodes {
        assert_eq!(node.history.len(), capacity);
        assert_eq!(node.status, NodeStatus::Active);
    }
}

/// Heartbeats, clock advances, and epoch ticks interleaved across threads
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn stress_heartbeats_during_epochs() {
    let num_nodes: usize = 50;
    let rounds = 40;
    let clock = Arc::new(ManualClock::new());
    let transport = Arc::new(InMemoryTransport::new());

    let mut config = CoordinatorConfig::default();
    config.liveness.suspect_timeout = Duration::from_secs(3);
    config.liveness.dead_timeout = Duration::from_secs(6);
    config.liveness.gc_grace = Duration::from_secs(6);
    config.selection.max_targets = 5;
    let coordinator = Arc::new(Coordinator::new(config, transport.clone(), clock.clone()).unwrap());

    let start = Instant::now();
    let mut heartbeaters = Vec::new();
    for node in 0..num_nodes {
        let coordinator = coordinator.clone();
        heartbeaters.push(tokio::spawn(async move {
            let id = format!("node-{:03}", node);
            for round in 0..rounds {
                // Every third node goes quiet halfway through
                if node % 3 == 0 && round >= rounds / 2 {
                    break;
                }
                coordinator.heartbeat(&id, 0.5 + (node % 5) as f64 / 10.0).unwrap();
                tokio::time::sleep(Duration::from_millis(1)).await;
            }
        }));
    }

    let ticker = {
        let coordinator = coordinator.clone();
        let clock = clock.clone();
        tokio::spawn(async move {
            let mut last_epoch = 0;
            for _ in 0..rounds {
                clock.advance(Duration::from_millis(500));
                let report = coordinator.tick().unwrap();
                assert!(report.epoch > last_epoch);
                assert!(report.target_set.len() <= 5);
                last_epoch = report.epoch;
                tokio::time::sleep(Duration::from_millis(1)).await;
            }
        })
    };

    for handle in heartbeaters {
        handle.await.unwrap();
    }
    ticker.await.unwrap();

    // Survivors keep beating while the silent third dies and is evicted
    let survivors: Vec<String> = (0..num_nodes)
        .filter(|n| n % 3 != 0)
        .map(|n| format!("node-{:03}", n))
        .collect();
    for step in [7, 2, 2, 2, 2] {
        clock.advance(Duration::from_secs(step));
        for id in &survivors {
            coordinator.heartbeat(id, 0.9).unwrap();
        }
        coordinator.tick().unwrap();
    }
    coordinator.replication().wait_idle().await;

    println!("Heartbeat/epoch interleaving stress test:");
    println!("  Nodes: {}", num_nodes);
    println!("  Elapsed: {:?}", start.elapsed());
    println!("  Epochs: {}", coordinator.status().epoch);

    let statuses = coordinator.node_statuses();
    assert_eq!(statuses.len(), num_nodes - num_nodes.div_ceil(3));
    assert!(statuses.iter().all(|n| n.status == NodeStatus::Active));

    let targets = coordinator.target_statuses();
    assert_eq!(targets.len(), 5);
    for target in targets {
        assert_eq!(target.sync_state, SyncState::InSync);
        assert!(statuses.iter().any(|n| n.node_id == target.node_id));
    }
}
