// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Failure detector.
//!
//! Probes every node on a fixed interval, turns probe results into health
//! transitions, and owns per-node recovery: a failed node gets a bounded
//! number of delayed re-probes before recovery is abandoned.
//!
//! # Probe Cycle
//!
//! ```text
//! tick ──► begin_probe (seq) on every node
//!      ──► liveness probes run concurrently, each under probe_timeout
//!      ──► results applied per node in seq order
//!      ──► Degraded / Failed / Recovered events
//! ```
//!
//! Probes for different nodes run concurrently. Results for one node are
//! applied in the order the probes were issued; a result that arrives after
//! a newer one has been applied is discarded.
//!
//! # Recovery
//!
//! On `Failed` the detector calls [`FailureDetector::initiate_recovery`]:
//! the node's attempt counter is incremented and a re-probe is scheduled
//! after `recovery_timeout`. A re-probe that still fails takes the next
//! attempt. Once `max_recovery_attempts` are spent a single
//! `RecoveryExhausted` event is emitted and no more re-probes are scheduled
//! until [`FailureDetector::reset_recovery`].

use crate::config::DetectorConfig;
use crate::error::{FleetError, Result};
use crate::events::{EventSink, FleetEvent};
use crate::handle::ProbeSource;
use crate::metrics;
use crate::node::{HealthChange, HealthState, Node, NodeRegistry, ProbeOutcome, RecoveryStep};
use crate::scheduler::Scheduler;
use futures::future::join_all;
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::Instant;
use tracing::{debug, error, info, instrument, warn};

type Task = Pin<Box<dyn Future<Output = ()> + Send + 'static>>;

/// Periodic liveness prober and health classifier.
pub struct FailureDetector {
    config: DetectorConfig,
    registry: NodeRegistry,
    probe: Arc<dyn ProbeSource>,
    events: EventSink,
    reprobes: Scheduler<String>,
}

impl FailureDetector {
    pub fn new(
        config: DetectorConfig,
        registry: NodeRegistry,
        probe: Arc<dyn ProbeSource>,
        events: EventSink,
    ) -> Arc<Self> {
        Arc::new(Self {
            config,
            registry,
            probe,
            events,
            reprobes: Scheduler::new("detector"),
        })
    }

    pub fn config(&self) -> &DetectorConfig {
        &self.config
    }

    /// Probe loop. Runs until `shutdown_rx` turns `true`.
    pub async fn run(self: Arc<Self>, mut shutdown_rx: watch::Receiver<bool>) {
        // Mark initial shutdown value as seen so changed() only fires on actual changes
        let _ = shutdown_rx.borrow_and_update();

        let interval = self.config.probe_interval();
        info!(
            interval_ms = interval.as_millis() as u64,
            threshold = self.config.failure_threshold,
            "Starting failure detector"
        );

        let mut timer = tokio::time::interval(interval);
        // Skip missed ticks instead of bursting to catch up
        timer.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                biased;

                result = shutdown_rx.changed() => {
                    if result.is_err() || *shutdown_rx.borrow() {
                        info!("Shutdown signal received, stopping failure detector");
                        break;
                    }
                    continue;
                }

                _ = timer.tick() => {}
            }

            self.probe_all().await;
        }

        self.stop();
    }

    /// Probe every covered node once, concurrently.
    pub async fn probe_all(self: &Arc<Self>) -> Vec<(String, HealthChange)> {
        let nodes: Vec<_> = self
            .registry
            .all()
            .into_iter()
            .filter(|node| self.probe.covers(node.id()))
            .collect();
        if nodes.is_empty() {
            return Vec::new();
        }

        // Sequence numbers are taken before any probe runs
        let probes: Vec<_> = nodes
            .into_iter()
            .map(|node| {
                let seq = node.begin_probe();
                async move {
                    let outcome = self.run_probe(node.id()).await;
                    (node, seq, outcome)
                }
            })
            .collect();

        let results = join_all(probes).await;

        let changes: Vec<_> = results
            .into_iter()
            .map(|(node, seq, outcome)| {
                let change = self.apply_probe_result(&node, seq, &outcome);
                (node.id().to_string(), change)
            })
            .collect();

        let counts = self.registry.health_counts();
        metrics::set_nodes_by_health(counts.healthy, counts.degraded, counts.failed);
        changes
    }

    /// Probe a single node now.
    #[instrument(skip(self))]
    pub async fn probe_node(self: &Arc<Self>, node_id: &str) -> Result<HealthChange> {
        let node = self
            .registry
            .get(node_id)
            .ok_or_else(|| FleetError::NodeNotFound(node_id.to_string()))?;
        if !self.probe.covers(node_id) {
            debug!(node_id = %node_id, "Probe source does not cover node, skipping");
            return Ok(HealthChange::Unchanged);
        }
        let seq = node.begin_probe();
        let outcome = self.run_probe(node_id).await;
        Ok(self.apply_probe_result(&node, seq, &outcome))
    }

    async fn run_probe(&self, node_id: &str) -> ProbeOutcome {
        let timeout = self.config.probe_timeout();
        let started = Instant::now();
        let result = tokio::time::timeout(timeout, self.probe.liveness(node_id)).await;
        let response_time = started.elapsed();

        let outcome = match result {
            Ok(Ok(liveness)) => ProbeOutcome {
                connected: liveness.connected,
                error: liveness.error,
                response_time,
            },
            Ok(Err(e)) => ProbeOutcome {
                connected: false,
                error: Some(e.to_string()),
                response_time,
            },
            Err(_) => ProbeOutcome {
                connected: false,
                error: Some(format!("probe timed out after {}ms", timeout.as_millis())),
                response_time,
            },
        };
        metrics::record_probe(node_id, outcome.connected, response_time);
        outcome
    }

    /// Apply one probe result and emit whatever it caused.
    pub fn apply_probe_result(
        self: &Arc<Self>,
        node: &Node,
        seq: u64,
        outcome: &ProbeOutcome,
    ) -> HealthChange {
        let change = node.apply_probe(seq, outcome, self.config.failure_threshold);
        let node_id = node.id();

        match change {
            HealthChange::Stale => {
                debug!(node_id = %node_id, seq, "Discarding out-of-order probe result");
            }
            HealthChange::Unchanged => {}
            HealthChange::Healthy => {
                debug!(node_id = %node_id, "Node healthy");
                metrics::record_health_transition(node_id, HealthState::Healthy.as_str());
            }
            HealthChange::Degraded {
                consecutive_failures,
            } => {
                warn!(
                    node_id = %node_id,
                    consecutive_failures,
                    error = outcome.error.as_deref().unwrap_or(""),
                    "Node degraded"
                );
                metrics::record_health_transition(node_id, HealthState::Degraded.as_str());
                self.events.emit(FleetEvent::NodeDegraded {
                    node_id: node_id.to_string(),
                    consecutive_failures,
                    error: outcome.error.clone(),
                });
            }
            HealthChange::Failed {
                consecutive_failures,
            } => {
                warn!(
                    node_id = %node_id,
                    consecutive_failures,
                    error = outcome.error.as_deref().unwrap_or(""),
                    "Node failed"
                );
                metrics::record_health_transition(node_id, HealthState::Failed.as_str());
                self.events.emit(FleetEvent::NodeFailed {
                    node_id: node_id.to_string(),
                    consecutive_failures,
                    error: outcome.error.clone(),
                });
                self.initiate_recovery(node_id);
            }
            HealthChange::Recovered { downtime_ms } => {
                info!(node_id = %node_id, downtime_ms, "Node recovered");
                self.reprobes.cancel(&node_id.to_string());
                metrics::record_health_transition(node_id, HealthState::Healthy.as_str());
                metrics::record_recovery_time(node_id, Duration::from_millis(downtime_ms));
                self.events.emit(FleetEvent::NodeRecovered {
                    node_id: node_id.to_string(),
                    downtime_ms,
                });
            }
        }
        change
    }

    /// Take the next recovery attempt for `node_id`.
    ///
    /// Schedules a re-probe after `recovery_timeout`, or emits
    /// `RecoveryExhausted` once the budget is spent.
    pub fn initiate_recovery(self: &Arc<Self>, node_id: &str) -> Option<RecoveryStep> {
        let node = self.registry.get(node_id)?;
        let step = node.begin_recovery(self.config.max_recovery_attempts);

        match step {
            RecoveryStep::Scheduled { attempt } => {
                let delay = self.config.recovery_timeout();
                info!(
                    node_id = %node_id,
                    attempt,
                    max = self.config.max_recovery_attempts,
                    delay_sec = delay.as_secs(),
                    "Recovery attempt scheduled"
                );
                metrics::record_recovery_attempt(node_id, false);
                let weak = Arc::downgrade(self);
                let id = node_id.to_string();
                self.reprobes
                    .schedule_after(id.clone(), delay, move || Self::reprobe_task(weak, id));
            }
            RecoveryStep::Exhausted { attempts } => {
                error!(node_id = %node_id, attempts, "Recovery exhausted, manual reset required");
                metrics::record_recovery_attempt(node_id, true);
                self.reprobes.cancel(&node_id.to_string());
                self.events.emit(FleetEvent::RecoveryExhausted {
                    node_id: node_id.to_string(),
                    attempts,
                });
            }
            RecoveryStep::AlreadyExhausted => {
                debug!(node_id = %node_id, "Recovery already exhausted");
            }
        }
        Some(step)
    }

    fn reprobe_task(weak: Weak<Self>, node_id: String) -> Task {
        Box::pin(async move {
            let Some(this) = weak.upgrade() else {
                return;
            };
            debug!(node_id = %node_id, "Recovery re-probe");
            match this.probe_node(&node_id).await {
                Ok(HealthChange::Stale) | Err(_) => {}
                Ok(_) => {
                    let still_failed = this
                        .registry
                        .get(&node_id)
                        .map(|n| n.health_state() == HealthState::Failed)
                        .unwrap_or(false);
                    if still_failed {
                        this.initiate_recovery(&node_id);
                    }
                }
            }
        })
    }

    /// Operator action: restore a node's recovery budget.
    pub fn reset_recovery(self: &Arc<Self>, node_id: &str) -> Result<()> {
        let node = self
            .registry
            .get(node_id)
            .ok_or_else(|| FleetError::NodeNotFound(node_id.to_string()))?;
        self.reprobes.cancel(&node_id.to_string());
        node.reset_recovery();
        info!(node_id = %node_id, "Recovery budget reset");
        if node.health_state() == HealthState::Failed {
            self.initiate_recovery(node_id);
        }
        Ok(())
    }

    /// Operator action: clear a node's failure metrics.
    pub fn reset_metrics(&self, node_id: &str) -> Result<()> {
        let node = self
            .registry
            .get(node_id)
            .ok_or_else(|| FleetError::NodeNotFound(node_id.to_string()))?;
        node.reset_metrics();
        info!(node_id = %node_id, "Failure metrics reset");
        Ok(())
    }

    /// Drop any pending re-probe for a node being removed.
    pub fn forget(&self, node_id: &str) {
        self.reprobes.cancel(&node_id.to_string());
    }

    pub fn has_pending_reprobe(&self, node_id: &str) -> bool {
        self.reprobes.is_scheduled(&node_id.to_string())
    }

    /// Cancel every pending re-probe for good.
    pub fn stop(&self) {
        self.reprobes.cancel_all();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handle::{BoxFuture, Liveness};
    use parking_lot::Mutex;
    use std::collections::HashMap;

    /// Probe source with a settable answer per node.
    #[derive(Default)]
    struct SwitchProbe {
        up: Mutex<HashMap<String, bool>>,
    }

    impl SwitchProbe {
        fn set(&self, id: &str, up: bool) {
            self.up.lock().insert(id.to_string(), up);
        }
    }

    impl ProbeSource for SwitchProbe {
        fn liveness<'a>(&'a self, node_id: &'a str) -> BoxFuture<'a, Liveness> {
            let up = self.up.lock().get(node_id).copied().unwrap_or(false);
            Box::pin(async move {
                Ok(if up {
                    Liveness::up()
                } else {
                    Liveness::down("not connected")
                })
            })
        }
    }

    struct Fixture {
        detector: Arc<FailureDetector>,
        probe: Arc<SwitchProbe>,
        registry: NodeRegistry,
        events: tokio::sync::broadcast::Receiver<FleetEvent>,
    }

    fn fixture(ids: &[&str]) -> Fixture {
        let registry = NodeRegistry::new();
        let probe = Arc::new(SwitchProbe::default());
        for id in ids {
            registry.insert(Arc::new(Node::new(*id, None)));
            probe.set(id, true);
        }
        let sink = EventSink::new(256);
        let events = sink.subscribe();
        let detector = FailureDetector::new(
            DetectorConfig::default(),
            registry.clone(),
            Arc::clone(&probe) as Arc<dyn ProbeSource>,
            sink,
        );
        Fixture {
            detector,
            probe,
            registry,
            events,
        }
    }

    fn drain(rx: &mut tokio::sync::broadcast::Receiver<FleetEvent>) -> Vec<FleetEvent> {
        let mut out = Vec::new();
        while let Ok(e) = rx.try_recv() {
            out.push(e);
        }
        out
    }

    async fn settle() {
        for _ in 0..10 {
            tokio::task::yield_now().await;
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_exactly_one_failed_event() {
        let mut f = fixture(&["a"]);
        f.detector.probe_all().await;

        f.probe.set("a", false);
        for _ in 0..6 {
            f.detector.probe_all().await;
        }

        let events = drain(&mut f.events);
        let degraded = events
            .iter()
            .filter(|e| matches!(e, FleetEvent::NodeDegraded { .. }))
            .count();
        let failed = events
            .iter()
            .filter(|e| matches!(e, FleetEvent::NodeFailed { .. }))
            .count();
        assert_eq!(degraded, 1);
        assert_eq!(failed, 1);
        assert!(f.registry.get("a").unwrap().health().is_failed());
        assert!(f.detector.has_pending_reprobe("a"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_recovery_resets_attempts() {
        let mut f = fixture(&["a"]);
        f.detector.probe_all().await;
        f.probe.set("a", false);
        for _ in 0..3 {
            f.detector.probe_all().await;
        }
        assert_eq!(f.registry.get("a").unwrap().recovery().attempt_count, 1);

        f.probe.set("a", true);
        let changes = f.detector.probe_all().await;
        assert!(matches!(changes[0].1, HealthChange::Recovered { .. }));

        let node = f.registry.get("a").unwrap();
        assert_eq!(node.recovery().attempt_count, 0);
        assert_eq!(node.failure_metrics().total_recoveries, 1);
        assert!(!f.detector.has_pending_reprobe("a"));
        assert!(drain(&mut f.events)
            .iter()
            .any(|e| matches!(e, FleetEvent::NodeRecovered { .. })));
    }

    #[tokio::test(start_paused = true)]
    async fn test_recovery_exhausted_after_budget() {
        let mut f = fixture(&["a"]);
        f.probe.set("a", false);
        for _ in 0..3 {
            f.detector.probe_all().await;
        }

        // Five re-probes at 30s spacing, each failing, then exhaustion
        for _ in 0..6 {
            tokio::time::sleep(Duration::from_secs(31)).await;
            settle().await;
        }

        let node = f.registry.get("a").unwrap();
        assert!(node.recovery().exhausted);
        assert_eq!(node.recovery().attempt_count, 5);
        assert!(!f.detector.has_pending_reprobe("a"));

        let exhausted: Vec<_> = drain(&mut f.events)
            .into_iter()
            .filter(|e| matches!(e, FleetEvent::RecoveryExhausted { .. }))
            .collect();
        assert_eq!(exhausted.len(), 1);

        // Nothing further is scheduled
        tokio::time::sleep(Duration::from_secs(300)).await;
        settle().await;
        assert!(drain(&mut f.events).is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_reprobe_success_recovers() {
        let mut f = fixture(&["a"]);
        f.probe.set("a", false);
        for _ in 0..3 {
            f.detector.probe_all().await;
        }
        f.probe.set("a", true);

        tokio::time::sleep(Duration::from_secs(31)).await;
        settle().await;

        assert!(f.registry.get("a").unwrap().health().is_healthy());
        assert!(drain(&mut f.events)
            .iter()
            .any(|e| matches!(e, FleetEvent::NodeRecovered { .. })));
    }

    #[tokio::test(start_paused = true)]
    async fn test_reset_recovery_restarts_budget() {
        let f = fixture(&["a"]);
        f.probe.set("a", false);
        for _ in 0..3 {
            f.detector.probe_all().await;
        }
        for _ in 0..6 {
            tokio::time::sleep(Duration::from_secs(31)).await;
            settle().await;
        }
        assert!(f.registry.get("a").unwrap().recovery().exhausted);

        f.detector.reset_recovery("a").unwrap();
        let recovery = f.registry.get("a").unwrap().recovery();
        assert!(!recovery.exhausted);
        assert_eq!(recovery.attempt_count, 1);
        assert!(f.detector.has_pending_reprobe("a"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_probe_timeout_counts_as_failure() {
        struct SlowProbe;
        impl ProbeSource for SlowProbe {
            fn liveness<'a>(&'a self, _node_id: &'a str) -> BoxFuture<'a, Liveness> {
                Box::pin(async {
                    tokio::time::sleep(Duration::from_secs(60)).await;
                    Ok(Liveness::up())
                })
            }
        }

        let registry = NodeRegistry::new();
        registry.insert(Arc::new(Node::new("slow", None)));
        let detector = FailureDetector::new(
            DetectorConfig::default(),
            registry.clone(),
            Arc::new(SlowProbe),
            EventSink::new(16),
        );

        let change = detector.probe_node("slow").await.unwrap();
        assert_eq!(
            change,
            HealthChange::Degraded {
                consecutive_failures: 1
            }
        );
        let health = registry.get("slow").unwrap().health();
        assert!(health.last_error.unwrap().contains("timed out"));
    }

    #[tokio::test]
    async fn test_probe_unknown_node() {
        let f = fixture(&[]);
        assert!(matches!(
            f.detector.probe_node("ghost").await,
            Err(FleetError::NodeNotFound(_))
        ));
        assert!(f.detector.probe_all().await.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_loop_stops_on_shutdown() {
        let f = fixture(&["a"]);
        let (tx, rx) = watch::channel(false);
        let handle = tokio::spawn(Arc::clone(&f.detector).run(rx));

        tokio::time::sleep(Duration::from_secs(11)).await;
        assert!(f.registry.get("a").unwrap().health().is_healthy());

        tx.send(true).unwrap();
        handle.await.unwrap();
    }
}
