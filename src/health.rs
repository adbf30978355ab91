// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Fleet health score, alerts and dashboard snapshot.
//!
//! # Score
//!
//! ```text
//! score = 100
//!       - 20  * failed nodes
//!       - 5   * degraded nodes
//!       - 0.3 * (100 - balance quality)
//!       - 0.5 * failover failure rate (%)
//! clamped to [0, 100]
//! ```
//!
//! Labels: `EXCELLENT` from 90, `GOOD` from 75, `WARNING` from 50, else
//! `CRITICAL`.
//!
//! # Alerts
//!
//! Edge-triggered alerts come from fleet events (node failed, degraded,
//! recovered, failover outcomes). Level-triggered alerts come from
//! [`HealthAggregator::evaluate_load`]: a queue or balance condition raises
//! once when it is entered and re-arms after it clears.

use crate::alerts::{Alert, AlertLog, Severity};
use crate::balancer::{LoadBalancer, LoadDistribution};
use crate::config::AlertConfig;
use crate::connection::ConnectionState;
use crate::epoch_millis;
use crate::events::{EventSink, FleetEvent};
use crate::failover::{ActiveFailover, FailoverCoordinator, FailoverRecord, FailoverStats};
use crate::metrics;
use crate::node::{FailureMetrics, HealthCounts, HealthStatus, Node, NodeRegistry, RecoveryAttempt};
use parking_lot::Mutex;
use serde::Serialize;
use serde_json::json;
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{info, warn};

/// Recent entries included in a dashboard snapshot.
const DASHBOARD_RECENT: usize = 20;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum HealthLabel {
    Excellent,
    Good,
    Warning,
    Critical,
}

impl HealthLabel {
    /// Band a 0-100 score.
    pub fn from_score(score: f64) -> Self {
        if score >= 90.0 {
            Self::Excellent
        } else if score >= 75.0 {
            Self::Good
        } else if score >= 50.0 {
            Self::Warning
        } else {
            Self::Critical
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Excellent => "EXCELLENT",
            Self::Good => "GOOD",
            Self::Warning => "WARNING",
            Self::Critical => "CRITICAL",
        }
    }
}

pub fn health_score(counts: &HealthCounts, balance_quality: f64, failover_failure_rate: f64) -> f64 {
    let score = 100.0
        - 20.0 * counts.failed as f64
        - 5.0 * counts.degraded as f64
        - 0.3 * (100.0 - balance_quality)
        - 0.5 * failover_failure_rate;
    score.clamp(0.0, 100.0)
}

/// One node as shown in reports.
#[derive(Debug, Clone, Serialize)]
pub struct NodeHealthReport {
    pub node_id: String,
    pub is_healthy: bool,
    pub is_degraded: bool,
    pub is_failed: bool,
    pub health: HealthStatus,
    pub failure_metrics: FailureMetrics,
    pub recovery: RecoveryAttempt,
    pub connection_state: Option<ConnectionState>,
}

impl NodeHealthReport {
    async fn of(node: &Node) -> Self {
        let health = node.health();
        let connection_state = match node.connection() {
            Some(connection) => Some(connection.state().await),
            None => None,
        };
        Self {
            node_id: node.id().to_string(),
            is_healthy: health.is_healthy(),
            is_degraded: health.is_degraded(),
            is_failed: health.is_failed(),
            health,
            failure_metrics: node.failure_metrics(),
            recovery: node.recovery(),
            connection_state,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct FleetHealthReport {
    pub generated_ms: u64,
    pub score: f64,
    pub label: HealthLabel,
    pub counts: HealthCounts,
    pub nodes: Vec<NodeHealthReport>,
    pub failover: FailoverStats,
    pub active_failovers: Vec<ActiveFailover>,
    pub load: LoadDistribution,
}

impl FleetHealthReport {
    pub fn node(&self, node_id: &str) -> Option<&NodeHealthReport> {
        self.nodes.iter().find(|n| n.node_id == node_id)
    }
}

/// Everything a dashboard renders, in one serializable value.
#[derive(Debug, Clone, Serialize)]
pub struct DashboardSnapshot {
    pub report: FleetHealthReport,
    pub recent_alerts: Vec<Alert>,
    pub unacknowledged_alerts: usize,
    pub recent_failovers: Vec<FailoverRecord>,
}

pub struct HealthAggregator {
    config: AlertConfig,
    registry: NodeRegistry,
    coordinator: Arc<FailoverCoordinator>,
    balancer: Arc<LoadBalancer>,
    events: EventSink,
    alerts: Mutex<AlertLog>,
    /// Level-triggered conditions currently raised.
    raised: Mutex<HashSet<String>>,
}

impl HealthAggregator {
    /// Create an aggregator with an empty alert log.
    pub fn new(
        config: AlertConfig,
        registry: NodeRegistry,
        coordinator: Arc<FailoverCoordinator>,
        balancer: Arc<LoadBalancer>,
        events: EventSink,
    ) -> Self {
        let alerts = AlertLog::new(config.history_limit);
        Self {
            config,
            registry,
            coordinator,
            balancer,
            events,
            alerts: Mutex::new(alerts),
            raised: Mutex::new(HashSet::new()),
        }
    }

    /// Turn a fleet event into an alert, if it warrants one.
    pub fn observe(&self, event: &FleetEvent) -> Option<Alert> {
        let (severity, alert_type, data) = match event {
            FleetEvent::NodeFailed {
                node_id,
                consecutive_failures,
                error,
            } => (
                Severity::Critical,
                "node_failed",
                json!({ "node_id": node_id, "consecutive_failures": consecutive_failures, "error": error }),
            ),
            FleetEvent::NodeDegraded {
                node_id,
                consecutive_failures,
                error,
            } => (
                Severity::Warning,
                "node_degraded",
                json!({ "node_id": node_id, "consecutive_failures": consecutive_failures, "error": error }),
            ),
            FleetEvent::NodeRecovered {
                node_id,
                downtime_ms,
            } => (
                Severity::Info,
                "node_recovered",
                json!({ "node_id": node_id, "downtime_ms": downtime_ms }),
            ),
            FleetEvent::RecoveryExhausted { node_id, attempts } => (
                Severity::Critical,
                "recovery_exhausted",
                json!({ "node_id": node_id, "attempts": attempts }),
            ),
            FleetEvent::FailoverCompleted {
                failover_id,
                failed_node,
                backup_node,
                duration_ms,
            } => (
                Severity::Info,
                "failover_completed",
                json!({
                    "failover_id": failover_id,
                    "failed_node": failed_node,
                    "backup_node": backup_node,
                    "duration_ms": duration_ms,
                }),
            ),
            FleetEvent::FailoverFailed {
                failover_id,
                failed_node,
                backup_node,
                step,
                error,
                rolled_back,
            } => (
                Severity::Critical,
                "failover_failed",
                json!({
                    "failover_id": failover_id,
                    "failed_node": failed_node,
                    "backup_node": backup_node,
                    "step": step,
                    "error": error,
                    "rolled_back": rolled_back,
                }),
            ),
            FleetEvent::NoBackupAvailable { failed_node } => (
                Severity::Critical,
                "no_backup_available",
                json!({ "failed_node": failed_node }),
            ),
            _ => return None,
        };
        Some(self.raise(severity, alert_type, data))
    }

    /// Check queue lengths and balance quality against thresholds.
    pub fn evaluate_load(&self) -> Vec<Alert> {
        let distribution = self.balancer.get_load_distribution();
        let mut raised = Vec::new();

        for node in &distribution.nodes {
            let critical_key = format!("queue_critical:{}", node.node_id);
            let warning_key = format!("queue_warning:{}", node.node_id);
            let data = json!({
                "node_id": node.node_id,
                "queue_length": node.queue_length,
            });

            if node.queue_length >= self.config.queue_critical {
                if self.enter(&critical_key) {
                    raised.push(self.raise(Severity::Critical, "queue_critical", data));
                }
            } else if node.queue_length >= self.config.queue_warning {
                self.leave(&critical_key);
                if self.enter(&warning_key) {
                    raised.push(self.raise(Severity::Warning, "queue_warning", data));
                }
            } else {
                self.leave(&critical_key);
                self.leave(&warning_key);
            }
        }

        if distribution.balance_quality < self.config.balance_quality_warning {
            if self.enter("balance_quality") {
                raised.push(self.raise(
                    Severity::Warning,
                    "load_imbalance",
                    json!({
                        "balance_quality": distribution.balance_quality,
                        "threshold": self.config.balance_quality_warning,
                    }),
                ));
            }
        } else {
            self.leave("balance_quality");
        }

        raised
    }

    fn enter(&self, key: &str) -> bool {
        self.raised.lock().insert(key.to_string())
    }

    fn leave(&self, key: &str) {
        self.raised.lock().remove(key);
    }

    fn raise(&self, severity: Severity, alert_type: &str, data: serde_json::Value) -> Alert {
        let alert = Alert::new(severity, alert_type, data);
        match severity {
            Severity::Critical | Severity::Warning => {
                warn!(severity = %severity, alert_type, alert_id = %alert.id, "Alert raised");
            }
            Severity::Info => {
                info!(alert_type, alert_id = %alert.id, "Alert raised");
            }
        }
        metrics::record_alert(severity.as_str(), alert_type);
        self.alerts.lock().push(alert.clone());
        self.events.emit(FleetEvent::AlertRaised {
            alert: alert.clone(),
        });
        alert
    }

    /// Report for one node, `None` if it is not registered.
    pub async fn node_health(&self, node_id: &str) -> Option<NodeHealthReport> {
        let node = self.registry.get(node_id)?;
        Some(NodeHealthReport::of(&node).await)
    }

    /// Score, label, per-node reports, failover stats and load in one pass.
    pub async fn fleet_health_report(&self) -> FleetHealthReport {
        let mut nodes = Vec::new();
        for node in self.registry.all() {
            nodes.push(NodeHealthReport::of(&node).await);
        }

        let counts = self.registry.health_counts();
        let failover = self.coordinator.stats();
        let load = self.balancer.get_load_distribution();
        let score = health_score(&counts, load.balance_quality, failover.failure_rate_percent);
        metrics::set_health_score(score);

        FleetHealthReport {
            generated_ms: epoch_millis(),
            score,
            label: HealthLabel::from_score(score),
            counts,
            nodes,
            failover,
            active_failovers: self.coordinator.active_failovers(),
            load,
        }
    }

    pub async fn dashboard_snapshot(&self) -> DashboardSnapshot {
        let report = self.fleet_health_report().await;
        let (recent_alerts, unacknowledged_alerts) = {
            let alerts = self.alerts.lock();
            (alerts.recent(DASHBOARD_RECENT), alerts.unacknowledged().len())
        };
        let mut recent_failovers = self.coordinator.history();
        let skip = recent_failovers.len().saturating_sub(DASHBOARD_RECENT);
        recent_failovers.drain(..skip);
        recent_failovers.reverse();

        DashboardSnapshot {
            report,
            recent_alerts,
            unacknowledged_alerts,
            recent_failovers,
        }
    }

    /// Retained alerts, oldest first.
    pub fn alerts(&self) -> Vec<Alert> {
        self.alerts.lock().list()
    }

    /// Mark an alert acknowledged. Returns whether it exists.
    pub fn acknowledge(&self, alert_id: &str) -> bool {
        self.alerts.lock().acknowledge(alert_id)
    }

    /// Drop all alert history and re-arm level-triggered conditions.
    pub fn clear_history(&self) {
        self.alerts.lock().clear();
        self.raised.lock().clear();
    }
}
