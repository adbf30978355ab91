// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Nodes and their health records.
//!
//! A [`Node`] owns its connection state machine plus the health, failure
//! metrics and recovery-attempt records the detector maintains. All three
//! records sit behind one lock per node and are only mutated through the
//! methods here, so a probe result and a recovery step for the same node
//! never interleave.
//!
//! # Health Transitions
//!
//! ```text
//! Unknown ──ok──► Healthy ──fail──► Degraded ──fail × threshold──► Failed
//!                    ▲                  │                             │
//!                    └───────ok─────────┴─────────────ok──────────────┘
//! ```

use crate::connection::NodeConnection;
use crate::epoch_millis;
use dashmap::DashMap;
use parking_lot::Mutex;
use serde::Serialize;
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

const DAY_MS: u64 = 24 * 60 * 60 * 1000;

/// Health classification of a node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum HealthState {
    /// Not probed yet.
    #[default]
    Unknown,
    Healthy,
    /// Failing, below the failure threshold.
    Degraded,
    Failed,
}

impl HealthState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Unknown => "unknown",
            Self::Healthy => "healthy",
            Self::Degraded => "degraded",
            Self::Failed => "failed",
        }
    }

    /// Ordering for "no worse than" comparisons (lower is better).
    pub(crate) fn rank(&self) -> u8 {
        match self {
            Self::Healthy => 0,
            Self::Unknown => 1,
            Self::Degraded => 2,
            Self::Failed => 3,
        }
    }
}

impl std::fmt::Display for HealthState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Per-node health as seen by the detector.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct HealthStatus {
    pub status: HealthState,
    pub consecutive_failures: u32,
    pub consecutive_successes: u32,
    pub last_error: Option<String>,
    /// Start of the current (or most recent) failure streak.
    pub last_failure_ms: Option<u64>,
    pub last_recovery_ms: Option<u64>,
    pub response_time_ms: Option<u64>,
    pub last_check_ms: Option<u64>,
}

impl HealthStatus {
    pub fn is_healthy(&self) -> bool {
        self.status == HealthState::Healthy
    }

    pub fn is_degraded(&self) -> bool {
        self.status == HealthState::Degraded
    }

    pub fn is_failed(&self) -> bool {
        self.status == HealthState::Failed
    }
}

/// Accumulated failure statistics. Reset only by [`Node::reset_metrics`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct FailureMetrics {
    pub total_failures: u64,
    pub total_recoveries: u64,
    pub failure_count_24h: u64,
    pub average_recovery_time_ms: u64,
    pub longest_recovery_time_ms: u64,
    pub shortest_recovery_time_ms: Option<u64>,
    /// Mean time between failures; needs at least two failures.
    pub mtbf_ms: Option<u64>,
    #[serde(skip)]
    total_recovery_time_ms: u64,
    #[serde(skip)]
    first_failure_ms: Option<u64>,
    #[serde(skip)]
    last_failure_ms: Option<u64>,
}

impl FailureMetrics {
    fn record_failure(&mut self, now_ms: u64) {
        self.total_failures += 1;
        if self.first_failure_ms.is_none() {
            self.first_failure_ms = Some(now_ms);
        }
        self.last_failure_ms = Some(now_ms);
        if let (Some(first), true) = (self.first_failure_ms, self.total_failures > 1) {
            self.mtbf_ms = Some(now_ms.saturating_sub(first) / (self.total_failures - 1));
        }
    }

    fn record_recovery(&mut self, downtime_ms: u64) {
        self.total_recoveries += 1;
        self.total_recovery_time_ms = self.total_recovery_time_ms.saturating_add(downtime_ms);
        self.average_recovery_time_ms = self.total_recovery_time_ms / self.total_recoveries;
        self.longest_recovery_time_ms = self.longest_recovery_time_ms.max(downtime_ms);
        self.shortest_recovery_time_ms = Some(match self.shortest_recovery_time_ms {
            Some(s) => s.min(downtime_ms),
            None => downtime_ms,
        });
    }
}

/// Recovery bookkeeping for one node.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RecoveryAttempt {
    pub attempt_count: u32,
    pub last_attempt_ms: Option<u64>,
    pub is_recovering: bool,
    /// Budget spent. Cleared by recovery or [`Node::reset_recovery`].
    pub exhausted: bool,
}

/// Effect of applying one probe result.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HealthChange {
    /// Result was older than one already applied; dropped.
    Stale,
    Unchanged,
    /// First probe succeeded.
    Healthy,
    Degraded { consecutive_failures: u32 },
    Failed { consecutive_failures: u32 },
    Recovered { downtime_ms: u64 },
}

/// Effect of a recovery step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecoveryStep {
    Scheduled { attempt: u32 },
    /// Budget just ran out.
    Exhausted { attempts: u32 },
    /// Budget ran out earlier; nothing to do.
    AlreadyExhausted,
}

/// A probe outcome as applied to a node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProbeOutcome {
    pub connected: bool,
    pub error: Option<String>,
    pub response_time: Duration,
}

#[derive(Debug, Default)]
struct NodeRecord {
    health: HealthStatus,
    metrics: FailureMetrics,
    recovery: RecoveryAttempt,
    failure_times_ms: VecDeque<u64>,
    streak_started: Option<Instant>,
    probes_issued: u64,
    probes_applied: u64,
}

/// One managed connection/account in the fleet.
pub struct Node {
    id: String,
    connection: Option<Arc<NodeConnection>>,
    record: Mutex<NodeRecord>,
}

impl Node {
    pub fn new(id: impl Into<String>, connection: Option<Arc<NodeConnection>>) -> Self {
        Self {
            id: id.into(),
            connection,
            record: Mutex::new(NodeRecord::default()),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn connection(&self) -> Option<&Arc<NodeConnection>> {
        self.connection.as_ref()
    }

    pub fn health(&self) -> HealthStatus {
        self.record.lock().health.clone()
    }

    pub fn health_state(&self) -> HealthState {
        self.record.lock().health.status
    }

    pub fn failure_metrics(&self) -> FailureMetrics {
        let mut record = self.record.lock();
        prune_window(&mut record.failure_times_ms, epoch_millis());
        record.metrics.failure_count_24h = record.failure_times_ms.len() as u64;
        record.metrics.clone()
    }

    pub fn recovery(&self) -> RecoveryAttempt {
        self.record.lock().recovery.clone()
    }

    /// Reserve a sequence number for a probe about to start.
    pub fn begin_probe(&self) -> u64 {
        let mut record = self.record.lock();
        record.probes_issued += 1;
        record.probes_issued
    }

    /// Apply a probe result, in sequence order.
    ///
    /// A result whose sequence number is not newer than the last applied
    /// one is discarded, so a slow probe can never overwrite a fresher one.
    pub fn apply_probe(&self, seq: u64, outcome: &ProbeOutcome, failure_threshold: u32) -> HealthChange {
        let mut record = self.record.lock();
        if seq <= record.probes_applied {
            return HealthChange::Stale;
        }
        record.probes_applied = seq;

        let now_ms = epoch_millis();
        record.health.last_check_ms = Some(now_ms);
        record.health.response_time_ms = Some(outcome.response_time.as_millis() as u64);

        if outcome.connected {
            record.health.consecutive_failures = 0;
            record.health.consecutive_successes += 1;
            match record.health.status {
                HealthState::Degraded | HealthState::Failed => {
                    let downtime_ms = record
                        .streak_started
                        .map(|t| t.elapsed().as_millis() as u64)
                        .unwrap_or(0);
                    record.streak_started = None;
                    record.health.status = HealthState::Healthy;
                    record.health.last_recovery_ms = Some(now_ms);
                    record.metrics.record_recovery(downtime_ms);
                    record.recovery = RecoveryAttempt::default();
                    HealthChange::Recovered { downtime_ms }
                }
                HealthState::Unknown => {
                    record.health.status = HealthState::Healthy;
                    HealthChange::Healthy
                }
                HealthState::Healthy => HealthChange::Unchanged,
            }
        } else {
            record.health.consecutive_successes = 0;
            record.health.consecutive_failures += 1;
            record.health.last_error = outcome.error.clone();
            let failures = record.health.consecutive_failures;

            if failures == 1 {
                record.streak_started = Some(Instant::now());
                record.health.last_failure_ms = Some(now_ms);
            }

            if failures >= failure_threshold.max(1) {
                if record.health.status == HealthState::Failed {
                    return HealthChange::Unchanged;
                }
                record.health.status = HealthState::Failed;
                record.metrics.record_failure(now_ms);
                record.failure_times_ms.push_back(now_ms);
                prune_window(&mut record.failure_times_ms, now_ms);
                record.metrics.failure_count_24h = record.failure_times_ms.len() as u64;
                HealthChange::Failed {
                    consecutive_failures: failures,
                }
            } else if matches!(record.health.status, HealthState::Healthy | HealthState::Unknown) {
                record.health.status = HealthState::Degraded;
                HealthChange::Degraded {
                    consecutive_failures: failures,
                }
            } else {
                HealthChange::Unchanged
            }
        }
    }

    /// Take one step of the recovery budget.
    pub fn begin_recovery(&self, max_attempts: u32) -> RecoveryStep {
        let mut record = self.record.lock();
        if record.recovery.exhausted {
            return RecoveryStep::AlreadyExhausted;
        }
        if record.recovery.attempt_count >= max_attempts {
            record.recovery.exhausted = true;
            record.recovery.is_recovering = false;
            return RecoveryStep::Exhausted {
                attempts: record.recovery.attempt_count,
            };
        }
        record.recovery.attempt_count += 1;
        record.recovery.last_attempt_ms = Some(epoch_millis());
        record.recovery.is_recovering = true;
        RecoveryStep::Scheduled {
            attempt: record.recovery.attempt_count,
        }
    }

    /// Operator action: clear accumulated failure metrics.
    pub fn reset_metrics(&self) {
        let mut record = self.record.lock();
        record.metrics = FailureMetrics::default();
        record.failure_times_ms.clear();
    }

    /// Operator action: restore the recovery budget.
    pub fn reset_recovery(&self) {
        self.record.lock().recovery = RecoveryAttempt::default();
    }
}

fn prune_window(times: &mut VecDeque<u64>, now_ms: u64) {
    while times
        .front()
        .is_some_and(|t| now_ms.saturating_sub(*t) > DAY_MS)
    {
        times.pop_front();
    }
}

/// Node count per health state.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct HealthCounts {
    pub unknown: usize,
    pub healthy: usize,
    pub degraded: usize,
    pub failed: usize,
}

/// Every node in the fleet, keyed by id.
///
/// The registry is the single access point for nodes: components look nodes
/// up by id and never hold them beyond an operation.
#[derive(Clone, Default)]
pub struct NodeRegistry {
    nodes: Arc<DashMap<String, Arc<Node>>>,
}

impl NodeRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a node, returning the one it replaced.
    pub fn insert(&self, node: Arc<Node>) -> Option<Arc<Node>> {
        self.nodes.insert(node.id().to_string(), node)
    }

    pub fn get(&self, id: &str) -> Option<Arc<Node>> {
        self.nodes.get(id).map(|r| Arc::clone(r.value()))
    }

    pub fn remove(&self, id: &str) -> Option<Arc<Node>> {
        self.nodes.remove(id).map(|(_, node)| node)
    }

    pub fn contains(&self, id: &str) -> bool {
        self.nodes.contains_key(id)
    }

    /// All nodes, sorted by id.
    pub fn all(&self) -> Vec<Arc<Node>> {
        let mut nodes: Vec<_> = self.nodes.iter().map(|r| Arc::clone(r.value())).collect();
        nodes.sort_by(|a, b| a.id().cmp(b.id()));
        nodes
    }

    pub fn ids(&self) -> Vec<String> {
        self.all().iter().map(|n| n.id().to_string()).collect()
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn health_counts(&self) -> HealthCounts {
        let mut counts = HealthCounts::default();
        for node in self.all() {
            match node.health_state() {
                HealthState::Unknown => counts.unknown += 1,
                HealthState::Healthy => counts.healthy += 1,
                HealthState::Degraded => counts.degraded += 1,
                HealthState::Failed => counts.failed += 1,
            }
        }
        counts
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ok() -> ProbeOutcome {
        ProbeOutcome {
            connected: true,
            error: None,
            response_time: Duration::from_millis(10),
        }
    }

    fn fail() -> ProbeOutcome {
        ProbeOutcome {
            connected: false,
            error: Some("connection closed".into()),
            response_time: Duration::from_millis(10),
        }
    }

    fn probe(node: &Node, outcome: &ProbeOutcome) -> HealthChange {
        let seq = node.begin_probe();
        node.apply_probe(seq, outcome, 3)
    }

    #[test]
    fn test_first_success_marks_healthy() {
        let node = Node::new("n", None);
        assert_eq!(probe(&node, &ok()), HealthChange::Healthy);
        assert_eq!(probe(&node, &ok()), HealthChange::Unchanged);
        let health = node.health();
        assert!(health.is_healthy());
        assert_eq!(health.consecutive_successes, 2);
    }

    #[test]
    fn test_degraded_then_failed_once() {
        let node = Node::new("n", None);
        probe(&node, &ok());

        assert_eq!(
            probe(&node, &fail()),
            HealthChange::Degraded {
                consecutive_failures: 1
            }
        );
        assert!(node.health().is_degraded());
        assert_eq!(probe(&node, &fail()), HealthChange::Unchanged);
        assert_eq!(
            probe(&node, &fail()),
            HealthChange::Failed {
                consecutive_failures: 3
            }
        );
        for _ in 0..5 {
            assert_eq!(probe(&node, &fail()), HealthChange::Unchanged);
        }

        let health = node.health();
        assert!(health.is_failed());
        assert!(!health.is_healthy());
        assert_eq!(health.last_error.as_deref(), Some("connection closed"));
        assert_eq!(node.failure_metrics().total_failures, 1);
        assert_eq!(node.failure_metrics().failure_count_24h, 1);
    }

    #[test]
    fn test_threshold_one_skips_degraded() {
        let node = Node::new("n", None);
        let seq = node.begin_probe();
        assert_eq!(
            node.apply_probe(seq, &fail(), 1),
            HealthChange::Failed {
                consecutive_failures: 1
            }
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_recovery_updates_metrics() {
        let node = Node::new("n", None);
        probe(&node, &ok());
        for _ in 0..3 {
            probe(&node, &fail());
        }
        node.begin_recovery(5);

        tokio::time::advance(Duration::from_secs(4)).await;
        match probe(&node, &ok()) {
            HealthChange::Recovered { downtime_ms } => assert_eq!(downtime_ms, 4000),
            other => panic!("expected recovery, got {:?}", other),
        }

        let metrics = node.failure_metrics();
        assert_eq!(metrics.total_recoveries, 1);
        assert_eq!(metrics.average_recovery_time_ms, 4000);
        assert_eq!(metrics.longest_recovery_time_ms, 4000);
        assert_eq!(metrics.shortest_recovery_time_ms, Some(4000));
        assert_eq!(node.recovery(), RecoveryAttempt::default());
        assert!(node.health().last_recovery_ms.is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn test_recovery_from_degraded() {
        let node = Node::new("n", None);
        probe(&node, &ok());
        probe(&node, &fail());
        tokio::time::advance(Duration::from_millis(500)).await;
        assert_eq!(
            probe(&node, &ok()),
            HealthChange::Recovered { downtime_ms: 500 }
        );
        assert_eq!(node.failure_metrics().total_failures, 0);
    }

    #[test]
    fn test_out_of_order_result_discarded() {
        let node = Node::new("n", None);
        let older = node.begin_probe();
        let newer = node.begin_probe();

        assert_eq!(node.apply_probe(newer, &ok(), 3), HealthChange::Healthy);
        assert_eq!(node.apply_probe(older, &fail(), 3), HealthChange::Stale);
        assert!(node.health().is_healthy());
    }

    #[test]
    fn test_recovery_budget() {
        let node = Node::new("n", None);
        for attempt in 1..=5 {
            assert_eq!(node.begin_recovery(5), RecoveryStep::Scheduled { attempt });
        }
        assert_eq!(node.begin_recovery(5), RecoveryStep::Exhausted { attempts: 5 });
        assert_eq!(node.begin_recovery(5), RecoveryStep::AlreadyExhausted);
        assert!(node.recovery().exhausted);

        node.reset_recovery();
        assert_eq!(node.begin_recovery(5), RecoveryStep::Scheduled { attempt: 1 });
    }

    #[test]
    fn test_mtbf_needs_two_failures() {
        let mut metrics = FailureMetrics::default();
        metrics.record_failure(1_000);
        assert_eq!(metrics.mtbf_ms, None);
        metrics.record_failure(5_000);
        metrics.record_failure(9_000);
        assert_eq!(metrics.mtbf_ms, Some(4_000));
    }

    #[test]
    fn test_reset_metrics() {
        let node = Node::new("n", None);
        for _ in 0..3 {
            probe(&node, &fail());
        }
        assert_eq!(node.failure_metrics().total_failures, 1);
        node.reset_metrics();
        assert_eq!(node.failure_metrics(), FailureMetrics::default());
    }

    #[test]
    fn test_registry_counts() {
        let registry = NodeRegistry::new();
        for id in ["c", "a", "b"] {
            registry.insert(Arc::new(Node::new(id, None)));
        }
        assert_eq!(registry.ids(), vec!["a", "b", "c"]);

        let a = registry.get("a").unwrap();
        probe(&a, &ok());
        let counts = registry.health_counts();
        assert_eq!(counts.healthy, 1);
        assert_eq!(counts.unknown, 2);

        assert!(registry.remove("a").is_some());
        assert!(!registry.contains("a"));
        assert_eq!(registry.len(), 2);
    }
}
