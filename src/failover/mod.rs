// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Failover coordinator.
//!
//! Replaces a failed node with an elected backup through a fixed pipeline:
//!
//! ```text
//! ┌──────────────┐   ┌──────────────┐   ┌──────────────┐   ┌──────────────┐   ┌──────────────┐
//! │ verify_backup│──►│prepare_backup│──►│transfer_state│──►│activate_backup──►│update_routing│
//! └──────────────┘   └──────────────┘   └──────────────┘   └──────────────┘   └──────────────┘
//!         any step fails or exceeds its timeout ──► rollback ──► FailoverFailed + Err
//! ```
//!
//! # Guarding
//!
//! An active-failover entry keyed by the failed node's id is taken before
//! election and held until the attempt finishes. A completed failover keeps
//! its entry for `retention` so a burst of failure notifications for the same
//! node can't immediately start another one. A failed attempt drops its entry
//! straight away.
//!
//! Failovers for different nodes run concurrently.
//!
//! # Rollback
//!
//! Before the pipeline touches anything the coordinator captures both nodes'
//! directory entries and a balancer snapshot. Rollback writes them back.
//! Rollback failures are logged and reported on the record but never mask the
//! step error returned to the caller.

mod election;
mod types;

pub use election::{elect_backup, Candidate, Election};
pub use types::{
    FailoverHistory, FailoverOutcome, FailoverRecord, FailoverStats, FailoverStatus, FailoverStep,
};

use crate::balancer::{BalancerSnapshot, LoadBalancer};
use crate::config::FailoverConfig;
use crate::directory::{Handover, NodeConfigPatch, NodeDescriptor, NodeDirectory, NodeRole};
use crate::epoch_millis;
use crate::error::{FleetError, Result};
use crate::events::{EventSink, FleetEvent};
use crate::metrics;
use crate::node::{HealthState, NodeRegistry};
use crate::scheduler::Scheduler;
use parking_lot::Mutex;
use serde::Serialize;
use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

type Task = Pin<Box<dyn Future<Output = ()> + Send + 'static>>;

/// Entry in the active-failover set.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ActiveFailover {
    pub failover_id: String,
    pub failed_node: String,
    pub backup_node: Option<String>,
    pub status: FailoverStatus,
    pub start_ms: u64,
}

/// State captured before the pipeline runs.
struct RollbackPoint {
    failed: Option<NodeDescriptor>,
    backup: Option<NodeDescriptor>,
    balancer: BalancerSnapshot,
}

/// Inputs shared by the pipeline steps.
struct Attempt<'a> {
    id: &'a str,
    failed_node: &'a str,
    backup: &'a Candidate,
}

/// Promotes backups for failed nodes.
///
/// Holds one guard per failed node for the whole pipeline and the
/// retention window after it, so concurrent triggers for the same node
/// collapse into one failover. Failovers for different nodes run
/// independently.
pub struct FailoverCoordinator {
    config: FailoverConfig,
    registry: NodeRegistry,
    directory: Arc<dyn NodeDirectory>,
    balancer: Arc<LoadBalancer>,
    events: EventSink,
    active: Mutex<HashMap<String, ActiveFailover>>,
    history: Mutex<FailoverHistory>,
    retention: Scheduler<String>,
}

impl FailoverCoordinator {
    /// Create a coordinator with no active failovers and empty history.
    pub fn new(
        config: FailoverConfig,
        registry: NodeRegistry,
        directory: Arc<dyn NodeDirectory>,
        balancer: Arc<LoadBalancer>,
        events: EventSink,
    ) -> Arc<Self> {
        let history = FailoverHistory::new(config.history_limit);
        Arc::new(Self {
            config,
            registry,
            directory,
            balancer,
            events,
            active: Mutex::new(HashMap::new()),
            history: Mutex::new(history),
            retention: Scheduler::new("failover"),
        })
    }

    /// Settings this coordinator was built with.
    pub fn config(&self) -> &FailoverConfig {
        &self.config
    }

    /// Fail over `failed_node`, optionally to a specific backup.
    ///
    /// Returns `AlreadyInProgress` without side effects when the node is
    /// already guarded, `NoBackup` when election finds nothing, and an error
    /// when a pipeline step fails.
    #[instrument(skip(self, failed_node), fields(failed_node = %failed_node))]
    pub async fn trigger_failover(
        self: &Arc<Self>,
        failed_node: &str,
        preferred_backup: Option<&str>,
    ) -> Result<FailoverOutcome> {
        let failover_id = Uuid::new_v4().to_string();
        let start_ms = epoch_millis();

        if !self.claim(failed_node, &failover_id, start_ms) {
            debug!(failed_node = %failed_node, "Failover already active, ignoring");
            return Ok(FailoverOutcome::AlreadyInProgress);
        }

        let election = match self.elect(failed_node, preferred_backup).await {
            Ok(election) => election,
            Err(e) => {
                self.release(failed_node, &failover_id);
                return Err(e);
            }
        };

        let Some(backup) = election.candidate().cloned() else {
            self.release(failed_node, &failover_id);
            error!(failed_node = %failed_node, "No backup available, failover not attempted");
            metrics::record_no_backup(failed_node);
            self.events.emit(FleetEvent::NoBackupAvailable {
                failed_node: failed_node.to_string(),
            });
            return Ok(FailoverOutcome::NoBackup);
        };

        if election.is_degraded() {
            warn!(
                failed_node = %failed_node,
                backup = %backup.node_id,
                health = %backup.health,
                "No healthy backup, falling back to best remaining node"
            );
        }

        if let Some(entry) = self.active.lock().get_mut(failed_node) {
            entry.backup_node = Some(backup.node_id.clone());
        }

        info!(
            failover_id = %failover_id,
            failed_node = %failed_node,
            backup = %backup.node_id,
            priority = backup.priority,
            "Starting failover"
        );
        self.events.emit(FleetEvent::FailoverStarted {
            failover_id: failover_id.clone(),
            failed_node: failed_node.to_string(),
            backup_node: backup.node_id.clone(),
        });

        let started = Instant::now();
        let attempt = Attempt {
            id: &failover_id,
            failed_node,
            backup: &backup,
        };
        let rollback_point = self.capture(&attempt).await;

        let mut record = FailoverRecord {
            id: failover_id.clone(),
            failed_node: failed_node.to_string(),
            backup_node: backup.node_id.clone(),
            status: FailoverStatus::InProgress,
            start_ms,
            end_ms: None,
            duration_ms: None,
            error: None,
            failed_step: None,
            rolled_back: false,
            degraded_election: election.is_degraded(),
        };

        match self.run_pipeline(&attempt).await {
            Ok(()) => {
                let duration = started.elapsed();
                record.status = FailoverStatus::Completed;
                record.end_ms = Some(epoch_millis());
                record.duration_ms = Some(duration.as_millis() as u64);

                self.history.lock().push(record.clone());
                if let Some(entry) = self.active.lock().get_mut(failed_node) {
                    entry.status = FailoverStatus::Completed;
                }
                self.schedule_release(failed_node, &failover_id);

                info!(
                    failover_id = %failover_id,
                    failed_node = %failed_node,
                    backup = %backup.node_id,
                    duration_ms = duration.as_millis() as u64,
                    "Failover completed"
                );
                metrics::record_failover(FailoverStatus::Completed.as_str(), duration);
                self.events.emit(FleetEvent::FailoverCompleted {
                    failover_id,
                    failed_node: failed_node.to_string(),
                    backup_node: backup.node_id.clone(),
                    duration_ms: duration.as_millis() as u64,
                });
                Ok(FailoverOutcome::Completed(record))
            }
            Err((step, err)) => {
                let rolled_back = if self.config.rollback_enabled {
                    self.rollback(&attempt, rollback_point).await
                } else {
                    false
                };

                let duration = started.elapsed();
                record.status = FailoverStatus::Failed;
                record.end_ms = Some(epoch_millis());
                record.duration_ms = Some(duration.as_millis() as u64);
                record.error = Some(err.to_string());
                record.failed_step = Some(step);
                record.rolled_back = rolled_back;

                self.history.lock().push(record);
                self.release(failed_node, &failover_id);

                error!(
                    failover_id = %failover_id,
                    failed_node = %failed_node,
                    backup = %backup.node_id,
                    step = %step,
                    rolled_back,
                    error = %err,
                    "Failover failed"
                );
                metrics::record_failover(FailoverStatus::Failed.as_str(), duration);
                metrics::record_failover_step_failure(step.as_str());
                self.events.emit(FleetEvent::FailoverFailed {
                    failover_id,
                    failed_node: failed_node.to_string(),
                    backup_node: backup.node_id.clone(),
                    step,
                    error: err.to_string(),
                    rolled_back,
                });
                Err(err)
            }
        }
    }

    fn claim(&self, failed_node: &str, failover_id: &str, start_ms: u64) -> bool {
        let mut active = self.active.lock();
        if active.contains_key(failed_node) {
            return false;
        }
        active.insert(
            failed_node.to_string(),
            ActiveFailover {
                failover_id: failover_id.to_string(),
                failed_node: failed_node.to_string(),
                backup_node: None,
                status: FailoverStatus::InProgress,
                start_ms,
            },
        );
        metrics::set_active_failovers(active.len());
        true
    }

    /// Drop the guard for `failed_node` if it still belongs to `failover_id`.
    fn release(&self, failed_node: &str, failover_id: &str) {
        let mut active = self.active.lock();
        if active
            .get(failed_node)
            .is_some_and(|e| e.failover_id == failover_id)
        {
            active.remove(failed_node);
        }
        metrics::set_active_failovers(active.len());
    }

    fn schedule_release(self: &Arc<Self>, failed_node: &str, failover_id: &str) {
        let weak = Arc::downgrade(self);
        let node = failed_node.to_string();
        let id = failover_id.to_string();
        self.retention.schedule_after(
            failed_node.to_string(),
            self.config.retention(),
            move || Self::release_task(weak, node, id),
        );
    }

    fn release_task(weak: Weak<Self>, failed_node: String, failover_id: String) -> Task {
        Box::pin(async move {
            if let Some(this) = weak.upgrade() {
                debug!(failed_node = %failed_node, "Failover retention elapsed");
                this.release(&failed_node, &failover_id);
            }
        })
    }

    async fn elect(&self, failed_node: &str, preferred: Option<&str>) -> Result<Election> {
        let descriptors = self.directory.list_nodes().await?;
        let candidates: Vec<Candidate> = descriptors
            .iter()
            .filter(|d| d.enabled && self.registry.contains(&d.id))
            .map(|d| Candidate::new(d.id.clone(), d.priority, self.health_of(&d.id)))
            .collect();

        if let Some(preferred) = preferred {
            if preferred == failed_node {
                return Err(FleetError::InvalidState {
                    expected: "backup other than the failed node".to_string(),
                    actual: preferred.to_string(),
                });
            }
            let candidate = candidates
                .into_iter()
                .find(|c| c.node_id == preferred)
                .ok_or_else(|| FleetError::NodeNotFound(preferred.to_string()))?;
            return Ok(if candidate.health == HealthState::Healthy {
                Election::Healthy(candidate)
            } else {
                Election::Fallback(candidate)
            });
        }

        Ok(elect_backup(
            failed_node,
            &candidates,
            self.config.allow_unhealthy_backup,
        ))
    }

    fn health_of(&self, node_id: &str) -> HealthState {
        self.registry
            .get(node_id)
            .map(|n| n.health_state())
            .unwrap_or_default()
    }

    async fn capture(&self, attempt: &Attempt<'_>) -> RollbackPoint {
        RollbackPoint {
            failed: self.directory.get_node_config(attempt.failed_node).await.ok(),
            backup: self
                .directory
                .get_node_config(&attempt.backup.node_id)
                .await
                .ok(),
            balancer: self.balancer.snapshot(),
        }
    }

    async fn run_pipeline(
        &self,
        attempt: &Attempt<'_>,
    ) -> std::result::Result<(), (FailoverStep, FleetError)> {
        for step in FailoverStep::ALL {
            let timeout = self.step_timeout(step);
            debug!(failover_id = %attempt.id, step = %step, "Running failover step");

            let result = tokio::time::timeout(timeout, self.run_step(step, attempt)).await;
            match result {
                Ok(Ok(())) => {}
                Ok(Err(message)) => {
                    return Err((
                        step,
                        FleetError::FailoverStep {
                            failover_id: attempt.id.to_string(),
                            step,
                            message,
                        },
                    ));
                }
                Err(_) => {
                    return Err((
                        step,
                        FleetError::StepTimeout {
                            failover_id: attempt.id.to_string(),
                            step,
                            timeout_ms: timeout.as_millis() as u64,
                        },
                    ));
                }
            }
        }
        Ok(())
    }

    fn step_timeout(&self, step: FailoverStep) -> Duration {
        match step {
            FailoverStep::VerifyBackup | FailoverStep::PrepareBackup => {
                self.config.prepare_timeout_duration()
            }
            FailoverStep::TransferState => self.config.transfer_timeout_duration(),
            FailoverStep::ActivateBackup => self.config.activation_timeout_duration(),
            FailoverStep::UpdateRouting => self.config.routing_timeout_duration(),
        }
    }

    async fn run_step(
        &self,
        step: FailoverStep,
        attempt: &Attempt<'_>,
    ) -> std::result::Result<(), String> {
        let backup = &attempt.backup.node_id;
        match step {
            FailoverStep::VerifyBackup => {
                // Health may not have got worse since election
                let now = self.health_of(backup);
                if now.rank() > attempt.backup.health.rank() {
                    return Err(format!(
                        "backup {backup} went from {} to {now} since election",
                        attempt.backup.health
                    ));
                }
                Ok(())
            }
            FailoverStep::PrepareBackup => {
                if !self.registry.contains(backup) {
                    return Err(format!("backup {backup} is no longer registered"));
                }
                let descriptor = self
                    .directory
                    .get_node_config(backup)
                    .await
                    .map_err(|e| e.to_string())?;
                if !descriptor.enabled {
                    return Err(format!("backup {backup} is disabled"));
                }
                Ok(())
            }
            FailoverStep::TransferState => {
                let source = self
                    .directory
                    .get_node_config(attempt.failed_node)
                    .await
                    .ok();
                let handover = Handover {
                    from: attempt.failed_node.to_string(),
                    session: source.as_ref().and_then(|d| d.session.clone()),
                    auth_context: source.as_ref().and_then(|d| d.auth_context.clone()),
                    pending_work: self.balancer.queue_length(attempt.failed_node),
                    at_ms: epoch_millis(),
                };
                self.directory
                    .update_node_config(backup, NodeConfigPatch::handover(handover))
                    .await
                    .map_err(|e| e.to_string())?;
                self.balancer.transfer_queue(attempt.failed_node, backup);
                Ok(())
            }
            FailoverStep::ActivateBackup => {
                self.directory
                    .update_node_config(backup, NodeConfigPatch::role(NodeRole::Primary))
                    .await
                    .map_err(|e| e.to_string())?;
                // The failed node may have no directory entry
                if let Err(e) = self
                    .directory
                    .update_node_config(attempt.failed_node, NodeConfigPatch::role(NodeRole::Backup))
                    .await
                {
                    debug!(failed_node = %attempt.failed_node, error = %e, "Could not demote failed node");
                }
                Ok(())
            }
            FailoverStep::UpdateRouting => {
                self.balancer.activate(backup);
                self.balancer.deactivate(attempt.failed_node);
                self.balancer.redirect(attempt.failed_node, backup);
                Ok(())
            }
        }
    }

    /// Put back what the pipeline changed. Returns true if every restore succeeded.
    async fn rollback(&self, attempt: &Attempt<'_>, point: RollbackPoint) -> bool {
        warn!(failover_id = %attempt.id, "Rolling back failover");
        let mut clean = true;

        let limit = self.step_timeout(FailoverStep::PrepareBackup);
        for descriptor in [point.backup, point.failed].into_iter().flatten() {
            let patch = NodeConfigPatch::restoring(&descriptor);
            let restore = self.directory.update_node_config(&descriptor.id, patch);
            match tokio::time::timeout(limit, restore).await {
                Ok(Ok(_)) => {}
                Ok(Err(e)) => {
                    warn!(
                        failover_id = %attempt.id,
                        node_id = %descriptor.id,
                        error = %e,
                        "Rollback could not restore node config"
                    );
                    clean = false;
                }
                Err(_) => {
                    warn!(
                        failover_id = %attempt.id,
                        node_id = %descriptor.id,
                        timeout_ms = limit.as_millis() as u64,
                        "Rollback restore timed out"
                    );
                    clean = false;
                }
            }
        }

        self.balancer.restore(point.balancer);
        clean
    }

    /// Snapshot of the active-failover set.
    pub fn active_failovers(&self) -> Vec<ActiveFailover> {
        let mut active: Vec<_> = self.active.lock().values().cloned().collect();
        active.sort_by(|a, b| a.failed_node.cmp(&b.failed_node));
        active
    }

    /// Whether `failed_node` is guarded by a running or retained failover.
    pub fn is_active(&self, failed_node: &str) -> bool {
        self.active.lock().contains_key(failed_node)
    }

    /// Oldest first.
    pub fn history(&self) -> Vec<FailoverRecord> {
        self.history.lock().records()
    }

    /// Totals and success rate over the retained history.
    pub fn stats(&self) -> FailoverStats {
        self.history.lock().stats()
    }

    /// Drop the guard and retention timer of a deprovisioned node.
    pub fn forget(&self, node_id: &str) {
        self.retention.cancel(&node_id.to_string());
        let mut active = self.active.lock();
        active.remove(node_id);
        metrics::set_active_failovers(active.len());
    }

    /// Cancel every retention timer. Called once on engine shutdown.
    pub fn stop(&self) {
        self.retention.cancel_all();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::BalancerConfig;
    use crate::directory::{DirectoryError, DirectoryFuture, InMemoryDirectory};
    use crate::node::{Node, ProbeOutcome};
    use std::sync::atomic::{AtomicBool, Ordering};

    /// Directory that can be told to fail or stall specific updates.
    struct FaultyDirectory {
        inner: InMemoryDirectory,
        fail_role_updates: AtomicBool,
        stall_handover: AtomicBool,
    }

    impl FaultyDirectory {
        fn new(nodes: Vec<NodeDescriptor>) -> Self {
            Self {
                inner: InMemoryDirectory::new(nodes),
                fail_role_updates: AtomicBool::new(false),
                stall_handover: AtomicBool::new(false),
            }
        }
    }

    impl NodeDirectory for FaultyDirectory {
        fn list_nodes(&self) -> DirectoryFuture<'_, Vec<NodeDescriptor>> {
            self.inner.list_nodes()
        }

        fn get_node_config<'a>(&'a self, id: &'a str) -> DirectoryFuture<'a, NodeDescriptor> {
            self.inner.get_node_config(id)
        }

        fn update_node_config<'a>(
            &'a self,
            id: &'a str,
            patch: NodeConfigPatch,
        ) -> DirectoryFuture<'a, NodeDescriptor> {
            let is_role = patch.role.is_some() && patch.handover.is_none();
            let is_handover = patch.handover.is_some() && patch.role.is_none();
            let fail = is_role && self.fail_role_updates.load(Ordering::SeqCst);
            let stall = is_handover && self.stall_handover.load(Ordering::SeqCst);
            Box::pin(async move {
                if fail {
                    return Err(DirectoryError::Unavailable("config store offline".into()));
                }
                if stall {
                    tokio::time::sleep(Duration::from_secs(60)).await;
                }
                self.inner.update_node_config(id, patch).await
            })
        }
    }

    fn set_health(node: &Node, healthy: bool, times: usize) {
        for _ in 0..times {
            let seq = node.begin_probe();
            node.apply_probe(
                seq,
                &ProbeOutcome {
                    connected: healthy,
                    error: (!healthy).then(|| "down".to_string()),
                    response_time: Duration::ZERO,
                },
                3,
            );
        }
    }

    struct Fixture {
        coordinator: Arc<FailoverCoordinator>,
        directory: Arc<FaultyDirectory>,
        balancer: Arc<LoadBalancer>,
        events: tokio::sync::broadcast::Receiver<FleetEvent>,
    }

    /// A primary, B backup priority 2, C backup priority 1; A failed.
    fn fixture() -> Fixture {
        let registry = NodeRegistry::new();
        for id in ["a", "b", "c"] {
            let node = Arc::new(Node::new(id, None));
            set_health(&node, true, 1);
            registry.insert(node);
        }
        set_health(&registry.get("a").unwrap(), false, 3);

        let directory = Arc::new(FaultyDirectory::new(vec![
            NodeDescriptor::new("a", 0, NodeRole::Primary)
                .with_session("session-a")
                .with_auth_context("auth-a"),
            NodeDescriptor::new("b", 2, NodeRole::Backup),
            NodeDescriptor::new("c", 1, NodeRole::Backup),
        ]));

        let balancer = Arc::new(LoadBalancer::new(&BalancerConfig::default(), registry.clone()));
        balancer.register_node("a", true);
        balancer.register_node("b", false);
        balancer.register_node("c", false);
        balancer.record_enqueued("a", 4);

        let sink = EventSink::new(64);
        let events = sink.subscribe();
        let coordinator = FailoverCoordinator::new(
            FailoverConfig::default(),
            registry,
            Arc::clone(&directory) as Arc<dyn NodeDirectory>,
            Arc::clone(&balancer),
            sink,
        );
        Fixture {
            coordinator,
            directory,
            balancer,
            events,
        }
    }

    fn kinds(rx: &mut tokio::sync::broadcast::Receiver<FleetEvent>) -> Vec<&'static str> {
        let mut out = Vec::new();
        while let Ok(e) = rx.try_recv() {
            out.push(e.kind());
        }
        out
    }

    #[tokio::test]
    async fn test_failover_elects_lowest_priority_and_reroutes() {
        let mut f = fixture();
        let outcome = f.coordinator.trigger_failover("a", None).await.unwrap();

        let FailoverOutcome::Completed(record) = outcome else {
            panic!("expected completion, got {outcome:?}");
        };
        assert_eq!(record.backup_node, "c");
        assert_eq!(record.status, FailoverStatus::Completed);

        let c = f.directory.inner.get("c").unwrap();
        assert_eq!(c.role, NodeRole::Primary);
        let handover = c.handover.unwrap();
        assert_eq!(handover.from, "a");
        assert_eq!(handover.session.as_deref(), Some("session-a"));
        assert_eq!(handover.pending_work, 4);
        assert_eq!(f.directory.inner.get("a").unwrap().role, NodeRole::Backup);

        assert_eq!(f.balancer.queue_length("c"), 4);
        assert_eq!(f.balancer.resolve("a"), "c");
        for _ in 0..5 {
            assert_eq!(f.balancer.select_node_for_work().unwrap(), "c");
        }

        assert_eq!(
            kinds(&mut f.events),
            vec!["failover_started", "failover_completed"]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_completed_failover_retained_then_released() {
        let f = fixture();
        f.coordinator.trigger_failover("a", None).await.unwrap();

        assert_eq!(
            f.coordinator.trigger_failover("a", None).await.unwrap(),
            FailoverOutcome::AlreadyInProgress
        );
        assert_eq!(f.coordinator.history().len(), 1);

        tokio::time::sleep(Duration::from_secs(61)).await;
        assert!(!f.coordinator.is_active("a"));
    }

    #[tokio::test]
    async fn test_step_failure_rolls_back() {
        let mut f = fixture();
        f.directory.fail_role_updates.store(true, Ordering::SeqCst);

        let err = f.coordinator.trigger_failover("a", None).await.unwrap_err();
        assert!(matches!(
            err,
            FleetError::FailoverStep {
                step: FailoverStep::ActivateBackup,
                ..
            }
        ));

        // Handover and queue transfer were undone
        assert_eq!(f.directory.inner.get("c").unwrap().handover, None);
        assert_eq!(f.balancer.queue_length("a"), 4);
        assert_eq!(f.balancer.queue_length("c"), 0);
        assert!(f.balancer.is_routable("a"));

        let record = &f.coordinator.history()[0];
        assert_eq!(record.status, FailoverStatus::Failed);
        assert_eq!(record.failed_step, Some(FailoverStep::ActivateBackup));
        assert!(record.error.is_some());
        assert!(record.rolled_back);

        assert!(!f.coordinator.is_active("a"));
        assert_eq!(
            kinds(&mut f.events),
            vec!["failover_started", "failover_failed"]
        );
        assert_eq!(f.coordinator.stats().failure_rate_percent, 100.0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_step_timeout() {
        let f = fixture();
        f.directory.stall_handover.store(true, Ordering::SeqCst);

        let err = f.coordinator.trigger_failover("a", None).await.unwrap_err();
        assert!(matches!(
            err,
            FleetError::StepTimeout {
                step: FailoverStep::TransferState,
                timeout_ms: 5000,
                ..
            }
        ));
        assert!(f.coordinator.history()[0].rolled_back);
        assert_eq!(f.balancer.queue_length("a"), 4);
    }

    #[tokio::test]
    async fn test_no_backup_emits_signal_without_record() {
        let registry = NodeRegistry::new();
        let solo = Arc::new(Node::new("solo", None));
        set_health(&solo, false, 3);
        registry.insert(solo);

        let sink = EventSink::new(16);
        let mut rx = sink.subscribe();
        let coordinator = FailoverCoordinator::new(
            FailoverConfig::default(),
            registry.clone(),
            Arc::new(InMemoryDirectory::new([NodeDescriptor::new(
                "solo",
                1,
                NodeRole::Primary,
            )])),
            Arc::new(LoadBalancer::new(&BalancerConfig::default(), registry)),
            sink,
        );

        assert_eq!(
            coordinator.trigger_failover("solo", None).await.unwrap(),
            FailoverOutcome::NoBackup
        );
        assert!(coordinator.history().is_empty());
        assert!(!coordinator.is_active("solo"));
        assert_eq!(kinds(&mut rx), vec!["no_backup_available"]);
    }

    #[tokio::test]
    async fn test_preferred_backup() {
        let f = fixture();
        let outcome = f.coordinator.trigger_failover("a", Some("b")).await.unwrap();
        let FailoverOutcome::Completed(record) = outcome else {
            panic!("expected completion");
        };
        assert_eq!(record.backup_node, "b");
    }

    #[tokio::test]
    async fn test_preferred_backup_must_differ() {
        let f = fixture();
        assert!(matches!(
            f.coordinator.trigger_failover("a", Some("a")).await,
            Err(FleetError::InvalidState { .. })
        ));
        assert!(matches!(
            f.coordinator.trigger_failover("a", Some("ghost")).await,
            Err(FleetError::NodeNotFound(_))
        ));
        assert!(!f.coordinator.is_active("a"));
    }

    #[tokio::test]
    async fn test_disabled_backup_skipped() {
        let f = fixture();
        f.directory.inner.insert(NodeDescriptor {
            enabled: false,
            ..NodeDescriptor::new("c", 1, NodeRole::Backup)
        });
        let outcome = f.coordinator.trigger_failover("a", None).await.unwrap();
        let FailoverOutcome::Completed(record) = outcome else {
            panic!("expected completion");
        };
        assert_eq!(record.backup_node, "b");
    }

    #[tokio::test]
    async fn test_forget_clears_guard() {
        let f = fixture();
        f.coordinator.trigger_failover("a", None).await.unwrap();
        assert_eq!(f.coordinator.active_failovers().len(), 1);
        f.coordinator.forget("a");
        assert!(f.coordinator.active_failovers().is_empty());
    }
}
