//! Fleet fixtures and event helpers.

use fleet_engine::{FleetConfig, FleetEvent, NodeDescriptor, NodeRole};
use std::time::Duration;
use tokio::sync::broadcast;

/// Three-node fleet: primary `a`, backups `b` (priority 2) and `c` (priority 1).
#[allow(dead_code)]
pub fn three_node_config() -> FleetConfig {
    let mut config = FleetConfig::for_testing("test-fleet");
    config.nodes = vec![
        NodeDescriptor::new("a", 0, NodeRole::Primary).with_session("session-a"),
        NodeDescriptor::new("b", 2, NodeRole::Backup),
        NodeDescriptor::new("c", 1, NodeRole::Backup),
    ];
    config
}

#[allow(dead_code)]
pub fn single_node_config() -> FleetConfig {
    let mut config = FleetConfig::for_testing("solo-fleet");
    config.nodes = vec![NodeDescriptor::new("solo", 0, NodeRole::Primary)];
    config
}

/// Wait until an event of `kind` arrives, skipping everything else.
///
/// Returns `None` on timeout or a closed channel. Under paused time the
/// timeout advances the clock, so probe loops keep running while we wait.
#[allow(dead_code)]
pub async fn wait_for_event(
    rx: &mut broadcast::Receiver<FleetEvent>,
    kind: &str,
    within: Duration,
) -> Option<FleetEvent> {
    wait_for(rx, within, |event| event.kind() == kind).await
}

#[allow(dead_code)]
pub async fn wait_for<F>(
    rx: &mut broadcast::Receiver<FleetEvent>,
    within: Duration,
    pred: F,
) -> Option<FleetEvent>
where
    F: Fn(&FleetEvent) -> bool,
{
    tokio::time::timeout(within, async {
        loop {
            match rx.recv().await {
                Ok(event) if pred(&event) => return Some(event),
                Ok(_) | Err(broadcast::error::RecvError::Lagged(_)) => continue,
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    })
    .await
    .ok()
    .flatten()
}

/// Collect every event of `kind` seen within `window`.
#[allow(dead_code)]
pub async fn collect_events(
    rx: &mut broadcast::Receiver<FleetEvent>,
    kind: &str,
    window: Duration,
) -> Vec<FleetEvent> {
    let mut seen = Vec::new();
    let deadline = tokio::time::Instant::now() + window;
    loop {
        match tokio::time::timeout_at(deadline, rx.recv()).await {
            Ok(Ok(event)) if event.kind() == kind => seen.push(event),
            Ok(Ok(_)) | Ok(Err(broadcast::error::RecvError::Lagged(_))) => continue,
            Ok(Err(broadcast::error::RecvError::Closed)) | Err(_) => return seen,
        }
    }
}

/// Let spawned tasks run without moving the clock.
#[allow(dead_code)]
pub async fn settle() {
    for _ in 0..20 {
        tokio::task::yield_now().await;
    }
}

/// Poll `pred` every 100ms of (paused) time until it holds.
#[allow(dead_code)]
pub async fn eventually<F>(within: Duration, mut pred: F) -> bool
where
    F: FnMut() -> bool,
{
    let deadline = tokio::time::Instant::now() + within;
    loop {
        if pred() {
            return true;
        }
        if tokio::time::Instant::now() >= deadline {
            return false;
        }
        tokio::time::sleep(Duration::from_millis(100)).await;
    }
}
