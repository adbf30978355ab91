// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Metrics for observability.
//!
//! Exports Prometheus-compatible metrics for:
//! - Node connection state and reconnect scheduling
//! - Circuit breaker trips and pairing challenges
//! - Liveness probes and health transitions
//! - Failover outcomes
//! - Load distribution and fleet health score
//!
//! # Metric Naming Convention
//!
//! All metrics are prefixed with `fleet_` and follow Prometheus conventions:
//! - Counters end in `_total`
//! - Gauges represent current state
//! - Histograms track distributions (duration)
//!
//! # Usage
//!
//! ```rust,no_run
//! use fleet_engine::metrics;
//! use std::time::Duration;
//!
//! metrics::record_probe("+15550001", true, Duration::from_millis(12));
//! metrics::record_failover("completed", Duration::from_millis(340));
//! ```

use metrics::{counter, gauge, histogram};
use std::time::Duration;

// =============================================================================
// Connection Metrics
// =============================================================================

/// Record a node's current connection state.
pub fn set_connection_state(node_id: &str, state: &str) {
    let value = match state {
        "idle" => 0.0,
        "connecting" => 1.0,
        "connected" => 2.0,
        "disconnected" => 3.0,
        "error" => 4.0,
        "suspended" => 5.0,
        _ => -1.0,
    };
    gauge!("fleet_connection_state", "node_id" => node_id.to_string()).set(value);
}

/// Record a connection attempt outcome.
pub fn record_connection(node_id: &str, success: bool) {
    let status = if success { "success" } else { "failure" };
    counter!("fleet_connections_total", "node_id" => node_id.to_string(), "status" => status)
        .increment(1);
}

/// Record a classified connection error.
pub fn record_connection_error(node_id: &str, class: &str) {
    counter!("fleet_connection_errors_total", "node_id" => node_id.to_string(), "class" => class.to_string())
        .increment(1);
}

/// Record a scheduled reconnect and its delay.
pub fn record_reconnect_scheduled(node_id: &str, delay: Duration) {
    counter!("fleet_reconnects_scheduled_total", "node_id" => node_id.to_string()).increment(1);
    histogram!("fleet_reconnect_delay_seconds", "node_id" => node_id.to_string())
        .record(delay.as_secs_f64());
}

/// Record a circuit breaker trip.
pub fn record_circuit_trip(node_id: &str, trip: u32, cooldown: Duration) {
    counter!("fleet_circuit_trips_total", "node_id" => node_id.to_string()).increment(1);
    gauge!("fleet_circuit_trip_count", "node_id" => node_id.to_string()).set(trip as f64);
    histogram!("fleet_circuit_cooldown_seconds").record(cooldown.as_secs_f64());
}

/// Record a pairing challenge (accepted or debounced).
pub fn record_pairing_challenge(node_id: &str, accepted: bool) {
    let outcome = if accepted { "accepted" } else { "debounced" };
    counter!("fleet_pairing_challenges_total", "node_id" => node_id.to_string(), "outcome" => outcome)
        .increment(1);
}

/// Record a stale-session teardown from the keep-alive check.
pub fn record_stale_session(node_id: &str) {
    counter!("fleet_stale_sessions_total", "node_id" => node_id.to_string()).increment(1);
}

/// Record a lock-recovery run.
pub fn record_lock_recovery(node_id: &str, escalated: bool) {
    let outcome = if escalated { "escalated" } else { "retried" };
    counter!("fleet_lock_recoveries_total", "node_id" => node_id.to_string(), "outcome" => outcome)
        .increment(1);
}

// =============================================================================
// Detector Metrics
// =============================================================================

/// Record a liveness probe result and its latency.
pub fn record_probe(node_id: &str, success: bool, latency: Duration) {
    let status = if success { "success" } else { "failure" };
    counter!("fleet_probes_total", "node_id" => node_id.to_string(), "status" => status)
        .increment(1);
    histogram!("fleet_probe_latency_seconds", "node_id" => node_id.to_string())
        .record(latency.as_secs_f64());
}

/// Record a health state transition.
pub fn record_health_transition(node_id: &str, to: &str) {
    counter!("fleet_health_transitions_total", "node_id" => node_id.to_string(), "to" => to.to_string())
        .increment(1);
}

/// Record a recovery attempt (or its exhaustion).
pub fn record_recovery_attempt(node_id: &str, exhausted: bool) {
    let outcome = if exhausted { "exhausted" } else { "scheduled" };
    counter!("fleet_recovery_attempts_total", "node_id" => node_id.to_string(), "outcome" => outcome)
        .increment(1);
}

/// Record a completed recovery and how long the node was down.
pub fn record_recovery_time(node_id: &str, downtime: Duration) {
    histogram!("fleet_recovery_time_seconds", "node_id" => node_id.to_string())
        .record(downtime.as_secs_f64());
}

/// Set the number of nodes per health state.
pub fn set_nodes_by_health(healthy: usize, degraded: usize, failed: usize) {
    gauge!("fleet_nodes", "health" => "healthy").set(healthy as f64);
    gauge!("fleet_nodes", "health" => "degraded").set(degraded as f64);
    gauge!("fleet_nodes", "health" => "failed").set(failed as f64);
}

// =============================================================================
// Failover Metrics
// =============================================================================

/// Record a finished failover.
pub fn record_failover(status: &str, duration: Duration) {
    counter!("fleet_failovers_total", "status" => status.to_string()).increment(1);
    histogram!("fleet_failover_duration_seconds", "status" => status.to_string())
        .record(duration.as_secs_f64());
}

/// Record a failover step failure.
pub fn record_failover_step_failure(step: &str) {
    counter!("fleet_failover_step_failures_total", "step" => step.to_string()).increment(1);
}

/// Record a failover attempt that found no backup.
pub fn record_no_backup(node_id: &str) {
    counter!("fleet_no_backup_total", "node_id" => node_id.to_string()).increment(1);
}

/// Set the number of in-flight failovers.
pub fn set_active_failovers(count: usize) {
    gauge!("fleet_active_failovers").set(count as f64);
}

// =============================================================================
// Load and Health Metrics
// =============================================================================

/// Record the node chosen for a unit of work.
pub fn record_work_routed(node_id: &str) {
    counter!("fleet_work_routed_total", "node_id" => node_id.to_string()).increment(1);
}

/// Record a routing request that found no healthy node.
pub fn record_no_healthy_node() {
    counter!("fleet_no_healthy_node_total").increment(1);
}

/// Set a node's queue length.
pub fn set_queue_length(node_id: &str, length: u64) {
    gauge!("fleet_queue_length", "node_id" => node_id.to_string()).set(length as f64);
}

/// Set the fleet balance quality (0-100).
pub fn set_balance_quality(quality: f64) {
    gauge!("fleet_balance_quality").set(quality);
}

/// Set the fleet health score (0-100).
pub fn set_health_score(score: f64) {
    gauge!("fleet_health_score").set(score);
}

/// Record a raised alert.
pub fn record_alert(severity: &str, alert_type: &str) {
    counter!("fleet_alerts_total", "severity" => severity.to_string(), "type" => alert_type.to_string())
        .increment(1);
}

/// Set engine state.
pub fn set_engine_state(state: &str) {
    // Numeric encoding for alerting rules
    let value = match state {
        "Created" => 0.0,
        "Starting" => 1.0,
        "Running" => 2.0,
        "ShuttingDown" => 3.0,
        "Stopped" => 4.0,
        "Failed" => 5.0,
        _ => -1.0,
    };
    gauge!("fleet_engine_state").set(value);
}
