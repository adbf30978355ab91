// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Configuration for the fleet engine.
//!
//! This module defines all configuration types needed to run the fleet engine.
//! Configuration is passed to [`FleetEngine::new()`](crate::FleetEngine::new)
//! and can be constructed programmatically or deserialized from YAML/JSON.
//!
//! # Quick Start
//!
//! ```rust
//! use fleet_engine::config::FleetConfig;
//! use fleet_engine::directory::{NodeDescriptor, NodeRole};
//!
//! let config = FleetConfig {
//!     fleet_id: "support-desk".into(),
//!     nodes: vec![
//!         NodeDescriptor::new("+15550001", 1, NodeRole::Primary),
//!         NodeDescriptor::new("+15550002", 2, NodeRole::Backup),
//!     ],
//!     ..Default::default()
//! };
//! assert!(config.validate().is_ok());
//! ```
//!
//! # Configuration Structure
//!
//! ```text
//! FleetConfig
//! ├── fleet_id: String
//! ├── settings: FleetSettings
//! │   ├── connection: ConnectionConfig  # backoff, circuit breaker, pairing, keep-alive
//! │   ├── detector: DetectorConfig      # liveness probing and recovery
//! │   ├── failover: FailoverConfig      # step budgets, rollback, election policy
//! │   ├── balancer: BalancerConfig      # routing strategy
//! │   ├── alerts: AlertConfig           # alert thresholds
//! │   └── event_capacity: usize
//! └── nodes: Vec<NodeDescriptor>        # seed for the in-memory directory
//! ```
//!
//! # YAML Example
//!
//! ```yaml
//! fleet_id: "support-desk"
//!
//! settings:
//!   connection:
//!     max_reconnect_attempts: 10
//!     circuit_cooldowns_sec: [60, 300, 900, 1800]
//!   detector:
//!     probe_interval_ms: 5000
//!     failure_threshold: 3
//!   failover:
//!     prepare_timeout: "10s"
//!     allow_unhealthy_backup: false
//!
//! nodes:
//!   - id: "+15550001"
//!     priority: 1
//!     role: primary
//! ```

use crate::balancer::BalanceStrategy;
use crate::directory::NodeDescriptor;
use crate::error::{FleetError, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::time::Duration;

// ═══════════════════════════════════════════════════════════════════════════════
// Top-level config: passed to FleetEngine::new()
// ═══════════════════════════════════════════════════════════════════════════════

/// The top-level config object passed to `FleetEngine::new()`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FleetConfig {
    /// Name of this fleet (used in logs and the dashboard snapshot).
    #[serde(default = "default_fleet_id")]
    pub fleet_id: String,

    /// Tunables for every component.
    #[serde(default)]
    pub settings: FleetSettings,

    /// Static node list used to seed the in-memory directory.
    #[serde(default)]
    pub nodes: Vec<NodeDescriptor>,
}

fn default_fleet_id() -> String {
    "fleet.default".to_string()
}

impl Default for FleetConfig {
    fn default() -> Self {
        Self {
            fleet_id: default_fleet_id(),
            settings: FleetSettings::default(),
            nodes: Vec::new(),
        }
    }
}

impl FleetConfig {
    /// Create a minimal config for testing.
    pub fn for_testing(fleet_id: &str) -> Self {
        Self {
            fleet_id: fleet_id.to_string(),
            settings: FleetSettings::default(),
            nodes: Vec::new(),
        }
    }

    /// Reject configurations the engine cannot run with.
    pub fn validate(&self) -> Result<()> {
        let connection = &self.settings.connection;
        if connection.circuit_breaker_threshold == 0 {
            return Err(FleetError::Config(
                "connection.circuit_breaker_threshold must be at least 1".into(),
            ));
        }
        if connection.circuit_cooldowns_sec.is_empty() {
            return Err(FleetError::Config(
                "connection.circuit_cooldowns_sec must not be empty".into(),
            ));
        }
        if connection.reconnect_base_delay_ms > connection.reconnect_max_delay_ms {
            return Err(FleetError::Config(
                "connection.reconnect_base_delay_ms exceeds reconnect_max_delay_ms".into(),
            ));
        }

        let detector = &self.settings.detector;
        if detector.failure_threshold == 0 {
            return Err(FleetError::Config(
                "detector.failure_threshold must be at least 1".into(),
            ));
        }
        if detector.probe_interval_ms == 0 {
            return Err(FleetError::Config(
                "detector.probe_interval_ms must be non-zero".into(),
            ));
        }

        if self.settings.balancer.evaluation_interval_sec == 0 {
            return Err(FleetError::Config(
                "balancer.evaluation_interval_sec must be non-zero".into(),
            ));
        }

        let alerts = &self.settings.alerts;
        if alerts.queue_warning > alerts.queue_critical {
            return Err(FleetError::Config(format!(
                "alerts.queue_warning ({}) exceeds alerts.queue_critical ({})",
                alerts.queue_warning, alerts.queue_critical
            )));
        }
        if !(0.0..=100.0).contains(&alerts.balance_quality_warning) {
            return Err(FleetError::Config(
                "alerts.balance_quality_warning must be within 0..=100".into(),
            ));
        }

        let mut seen = HashSet::new();
        for node in &self.nodes {
            if node.id.is_empty() {
                return Err(FleetError::Config("node id must not be empty".into()));
            }
            if !seen.insert(node.id.as_str()) {
                return Err(FleetError::Config(format!("duplicate node id {}", node.id)));
            }
        }

        Ok(())
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// FleetSettings
// ═══════════════════════════════════════════════════════════════════════════════

/// Tunable parameters for every component.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FleetSettings {
    #[serde(default)]
    pub connection: ConnectionConfig,
    #[serde(default)]
    pub detector: DetectorConfig,
    #[serde(default)]
    pub failover: FailoverConfig,
    #[serde(default)]
    pub balancer: BalancerConfig,
    #[serde(default)]
    pub alerts: AlertConfig,
    /// Capacity of the broadcast event channel.
    /// Slow subscribers that fall further behind than this miss events.
    #[serde(default = "default_event_capacity")]
    pub event_capacity: usize,
}

fn default_event_capacity() -> usize {
    1024
}

impl Default for FleetSettings {
    fn default() -> Self {
        Self {
            connection: ConnectionConfig::default(),
            detector: DetectorConfig::default(),
            failover: FailoverConfig::default(),
            balancer: BalancerConfig::default(),
            alerts: AlertConfig::default(),
            event_capacity: default_event_capacity(),
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// ConnectionConfig: per-node state machine
// ═══════════════════════════════════════════════════════════════════════════════

/// Per-node connection state machine configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConnectionConfig {
    /// Base reconnect delay (first attempt).
    #[serde(default = "default_reconnect_base_delay_ms")]
    pub reconnect_base_delay_ms: u64,

    /// Ceiling for the exponential reconnect delay (before jitter).
    #[serde(default = "default_reconnect_max_delay_ms")]
    pub reconnect_max_delay_ms: u64,

    /// Upper bound (exclusive) of the random jitter added to each delay.
    #[serde(default = "default_reconnect_jitter_ms")]
    pub reconnect_jitter_ms: u64,

    /// Scheduled reconnects without success before the node is suspended for good.
    #[serde(default = "default_max_reconnect_attempts")]
    pub max_reconnect_attempts: u32,

    /// Critical errors that trip the circuit breaker.
    #[serde(default = "default_circuit_breaker_threshold")]
    pub circuit_breaker_threshold: u32,

    /// Cooldown per trip; trips past the end reuse the last entry.
    #[serde(default = "default_circuit_cooldowns_sec")]
    pub circuit_cooldowns_sec: Vec<u64>,

    /// Minimum spacing between accepted pairing challenges.
    #[serde(default = "default_pairing_debounce_ms")]
    pub pairing_debounce_ms: u64,

    /// A pairing attempt not completed within this window is abandoned.
    #[serde(default = "default_pairing_timeout_sec")]
    pub pairing_timeout_sec: u64,

    /// Keep-alive check period while connected.
    #[serde(default = "default_keepalive_interval_sec")]
    pub keepalive_interval_sec: u64,

    /// A connected node with no activity for this long is torn down and reconnected.
    #[serde(default = "default_inactivity_timeout_sec")]
    pub inactivity_timeout_sec: u64,

    /// Wait after lock cleanup before retrying initialization.
    #[serde(default = "default_lock_recovery_settle_ms")]
    pub lock_recovery_settle_ms: u64,

    /// Consecutive lock recoveries before escalating to the circuit breaker.
    #[serde(default = "default_max_lock_recoveries")]
    pub max_lock_recoveries: u32,

    /// State transitions retained per node.
    #[serde(default = "default_history_limit")]
    pub history_limit: usize,
}

fn default_reconnect_base_delay_ms() -> u64 {
    5_000
}

fn default_reconnect_max_delay_ms() -> u64 {
    60_000
}

fn default_reconnect_jitter_ms() -> u64 {
    1_000
}

fn default_max_reconnect_attempts() -> u32 {
    10
}

fn default_circuit_breaker_threshold() -> u32 {
    5
}

fn default_circuit_cooldowns_sec() -> Vec<u64> {
    vec![60, 300, 900, 1800]
}

fn default_pairing_debounce_ms() -> u64 {
    2_000
}

fn default_pairing_timeout_sec() -> u64 {
    120
}

fn default_keepalive_interval_sec() -> u64 {
    30
}

fn default_inactivity_timeout_sec() -> u64 {
    300
}

fn default_lock_recovery_settle_ms() -> u64 {
    3_000
}

fn default_max_lock_recoveries() -> u32 {
    2
}

fn default_history_limit() -> usize {
    50
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            reconnect_base_delay_ms: default_reconnect_base_delay_ms(),
            reconnect_max_delay_ms: default_reconnect_max_delay_ms(),
            reconnect_jitter_ms: default_reconnect_jitter_ms(),
            max_reconnect_attempts: default_max_reconnect_attempts(),
            circuit_breaker_threshold: default_circuit_breaker_threshold(),
            circuit_cooldowns_sec: default_circuit_cooldowns_sec(),
            pairing_debounce_ms: default_pairing_debounce_ms(),
            pairing_timeout_sec: default_pairing_timeout_sec(),
            keepalive_interval_sec: default_keepalive_interval_sec(),
            inactivity_timeout_sec: default_inactivity_timeout_sec(),
            lock_recovery_settle_ms: default_lock_recovery_settle_ms(),
            max_lock_recoveries: default_max_lock_recoveries(),
            history_limit: default_history_limit(),
        }
    }
}

impl ConnectionConfig {
    /// Reconnect delay without jitter for a 1-based attempt number.
    ///
    /// `min(base * 2^(attempt-1), max)`
    pub fn base_reconnect_delay(&self, attempt: u32) -> Duration {
        let exp = attempt.saturating_sub(1).min(32);
        let delay_ms = self
            .reconnect_base_delay_ms
            .saturating_mul(1u64 << exp)
            .min(self.reconnect_max_delay_ms);
        Duration::from_millis(delay_ms)
    }

    /// Reconnect delay with jitter drawn from `[0, reconnect_jitter_ms)`.
    pub fn reconnect_delay(&self, attempt: u32) -> Duration {
        let jitter_ms = if self.reconnect_jitter_ms == 0 {
            0
        } else {
            rand::random::<u64>() % self.reconnect_jitter_ms
        };
        self.base_reconnect_delay(attempt) + Duration::from_millis(jitter_ms)
    }

    /// Circuit breaker cooldown for a 1-based trip count.
    ///
    /// Trips beyond the configured sequence reuse its last entry.
    pub fn cooldown_for_trip(&self, trip: u32) -> Duration {
        let idx = (trip.max(1) as usize - 1).min(self.circuit_cooldowns_sec.len().saturating_sub(1));
        let secs = self.circuit_cooldowns_sec.get(idx).copied().unwrap_or(60);
        Duration::from_secs(secs)
    }

    pub fn pairing_debounce(&self) -> Duration {
        Duration::from_millis(self.pairing_debounce_ms)
    }

    pub fn pairing_timeout(&self) -> Duration {
        Duration::from_secs(self.pairing_timeout_sec)
    }

    pub fn keepalive_interval(&self) -> Duration {
        Duration::from_secs(self.keepalive_interval_sec)
    }

    pub fn inactivity_timeout(&self) -> Duration {
        Duration::from_secs(self.inactivity_timeout_sec)
    }

    pub fn lock_recovery_settle(&self) -> Duration {
        Duration::from_millis(self.lock_recovery_settle_ms)
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// DetectorConfig: liveness probing
// ═══════════════════════════════════════════════════════════════════════════════

/// Failure detector configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DetectorConfig {
    /// Whether the periodic probe loop runs.
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// How often every node is probed.
    #[serde(default = "default_probe_interval_ms")]
    pub probe_interval_ms: u64,

    /// A probe that takes longer than this counts as failed.
    #[serde(default = "default_probe_timeout_ms")]
    pub probe_timeout_ms: u64,

    /// Consecutive failed probes before a node is classified failed.
    #[serde(default = "default_failure_threshold")]
    pub failure_threshold: u32,

    /// Recovery attempts per node before recovery is abandoned.
    #[serde(default = "default_max_recovery_attempts")]
    pub max_recovery_attempts: u32,

    /// Delay before the re-probe scheduled by a recovery attempt.
    #[serde(default = "default_recovery_timeout_sec")]
    pub recovery_timeout_sec: u64,
}

fn default_probe_interval_ms() -> u64 {
    5_000
}

fn default_probe_timeout_ms() -> u64 {
    3_000
}

fn default_failure_threshold() -> u32 {
    3
}

fn default_max_recovery_attempts() -> u32 {
    5
}

fn default_recovery_timeout_sec() -> u64 {
    30
}

impl Default for DetectorConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            probe_interval_ms: default_probe_interval_ms(),
            probe_timeout_ms: default_probe_timeout_ms(),
            failure_threshold: default_failure_threshold(),
            max_recovery_attempts: default_max_recovery_attempts(),
            recovery_timeout_sec: default_recovery_timeout_sec(),
        }
    }
}

impl DetectorConfig {
    pub fn probe_interval(&self) -> Duration {
        Duration::from_millis(self.probe_interval_ms)
    }

    pub fn probe_timeout(&self) -> Duration {
        Duration::from_millis(self.probe_timeout_ms)
    }

    pub fn recovery_timeout(&self) -> Duration {
        Duration::from_secs(self.recovery_timeout_sec)
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// FailoverConfig: backup election and the failover pipeline
// ═══════════════════════════════════════════════════════════════════════════════

/// Failover coordinator configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FailoverConfig {
    /// Start a failover automatically when a node is classified failed.
    #[serde(default = "default_true")]
    pub auto_failover: bool,

    /// Restore routing and activation state when a step fails.
    #[serde(default = "default_true")]
    pub rollback_enabled: bool,

    /// Budget for the prepare-backup step (e.g. "10s").
    #[serde(default = "default_prepare_timeout")]
    pub prepare_timeout: String,

    /// Budget for the state-transfer step.
    #[serde(default = "default_step_timeout")]
    pub transfer_timeout: String,

    /// Budget for the activate-backup step.
    #[serde(default = "default_step_timeout")]
    pub activation_timeout: String,

    /// Budget for the routing update step.
    #[serde(default = "default_step_timeout")]
    pub routing_timeout: String,

    /// How long a completed failover keeps its node in the active set.
    #[serde(default = "default_retention_sec")]
    pub retention_sec: u64,

    /// Failover records retained in history.
    #[serde(default = "default_failover_history_limit")]
    pub history_limit: usize,

    /// When no candidate is healthy, fall back to any remaining node.
    #[serde(default = "default_true")]
    pub allow_unhealthy_backup: bool,
}

fn default_prepare_timeout() -> String {
    "10s".to_string()
}

fn default_step_timeout() -> String {
    "5s".to_string()
}

fn default_retention_sec() -> u64 {
    60
}

fn default_failover_history_limit() -> usize {
    1000
}

impl Default for FailoverConfig {
    fn default() -> Self {
        Self {
            auto_failover: true,
            rollback_enabled: true,
            prepare_timeout: default_prepare_timeout(),
            transfer_timeout: default_step_timeout(),
            activation_timeout: default_step_timeout(),
            routing_timeout: default_step_timeout(),
            retention_sec: default_retention_sec(),
            history_limit: default_failover_history_limit(),
            allow_unhealthy_backup: true,
        }
    }
}

impl FailoverConfig {
    pub fn prepare_timeout_duration(&self) -> Duration {
        parse_duration_or(&self.prepare_timeout, Duration::from_secs(10))
    }

    pub fn transfer_timeout_duration(&self) -> Duration {
        parse_duration_or(&self.transfer_timeout, Duration::from_secs(5))
    }

    pub fn activation_timeout_duration(&self) -> Duration {
        parse_duration_or(&self.activation_timeout, Duration::from_secs(5))
    }

    pub fn routing_timeout_duration(&self) -> Duration {
        parse_duration_or(&self.routing_timeout, Duration::from_secs(5))
    }

    pub fn retention(&self) -> Duration {
        Duration::from_secs(self.retention_sec)
    }
}

fn parse_duration_or(value: &str, fallback: Duration) -> Duration {
    humantime::parse_duration(value).unwrap_or(fallback)
}

// ═══════════════════════════════════════════════════════════════════════════════
// BalancerConfig / AlertConfig
// ═══════════════════════════════════════════════════════════════════════════════

/// Load balancer configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BalancerConfig {
    #[serde(default)]
    pub strategy: BalanceStrategy,

    /// How often queue and balance alerts are evaluated.
    #[serde(default = "default_evaluation_interval_sec")]
    pub evaluation_interval_sec: u64,
}

fn default_evaluation_interval_sec() -> u64 {
    10
}

impl Default for BalancerConfig {
    fn default() -> Self {
        Self {
            strategy: BalanceStrategy::default(),
            evaluation_interval_sec: default_evaluation_interval_sec(),
        }
    }
}

impl BalancerConfig {
    pub fn evaluation_interval(&self) -> Duration {
        Duration::from_secs(self.evaluation_interval_sec)
    }
}

/// Alert thresholds.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AlertConfig {
    /// Queue length per node that raises a WARNING.
    #[serde(default = "default_queue_warning")]
    pub queue_warning: u64,

    /// Queue length per node that raises a CRITICAL.
    #[serde(default = "default_queue_critical")]
    pub queue_critical: u64,

    /// Balance quality below this raises a WARNING.
    #[serde(default = "default_balance_quality_warning")]
    pub balance_quality_warning: f64,

    /// Alerts retained in history.
    #[serde(default = "default_alert_history_limit")]
    pub history_limit: usize,
}

fn default_queue_warning() -> u64 {
    1_000
}

fn default_queue_critical() -> u64 {
    5_000
}

fn default_balance_quality_warning() -> f64 {
    80.0
}

fn default_alert_history_limit() -> usize {
    1000
}

impl Default for AlertConfig {
    fn default() -> Self {
        Self {
            queue_warning: default_queue_warning(),
            queue_critical: default_queue_critical(),
            balance_quality_warning: default_balance_quality_warning(),
            history_limit: default_alert_history_limit(),
        }
    }
}

fn default_true() -> bool {
    true
}

// ═══════════════════════════════════════════════════════════════════════════════
// Tests
// ═══════════════════════════════════════════════════════════════════════════════

#[cfg(test)]
mod tests {
    use super::*;
    use crate::directory::NodeRole;

    #[test]
    fn test_connection_config_defaults() {
        let config = ConnectionConfig::default();
        assert_eq!(config.reconnect_base_delay_ms, 5_000);
        assert_eq!(config.reconnect_max_delay_ms, 60_000);
        assert_eq!(config.reconnect_jitter_ms, 1_000);
        assert_eq!(config.max_reconnect_attempts, 10);
        assert_eq!(config.circuit_breaker_threshold, 5);
        assert_eq!(config.circuit_cooldowns_sec, vec![60, 300, 900, 1800]);
        assert_eq!(config.pairing_debounce(), Duration::from_secs(2));
        assert_eq!(config.pairing_timeout(), Duration::from_secs(120));
        assert_eq!(config.keepalive_interval(), Duration::from_secs(30));
        assert_eq!(config.inactivity_timeout(), Duration::from_secs(300));
    }

    #[test]
    fn test_base_reconnect_delay() {
        let config = ConnectionConfig::default();

        // 5s * 2^(attempt-1), capped at 60s
        assert_eq!(config.base_reconnect_delay(1), Duration::from_secs(5));
        assert_eq!(config.base_reconnect_delay(2), Duration::from_secs(10));
        assert_eq!(config.base_reconnect_delay(3), Duration::from_secs(20));
        assert_eq!(config.base_reconnect_delay(4), Duration::from_secs(40));
        assert_eq!(config.base_reconnect_delay(5), Duration::from_secs(60));
        assert_eq!(config.base_reconnect_delay(10), Duration::from_secs(60));
        assert_eq!(config.base_reconnect_delay(u32::MAX), Duration::from_secs(60));
    }

    #[test]
    fn test_base_reconnect_delay_attempt_zero() {
        let config = ConnectionConfig::default();
        assert_eq!(config.base_reconnect_delay(0), Duration::from_secs(5));
    }

    #[test]
    fn test_reconnect_delay_jitter_bounds() {
        let config = ConnectionConfig::default();
        for attempt in 1..=12 {
            let base = config.base_reconnect_delay(attempt);
            let delay = config.reconnect_delay(attempt);
            assert!(delay >= base);
            assert!(delay < base + Duration::from_secs(1));
        }
    }

    #[test]
    fn test_reconnect_delay_no_jitter() {
        let config = ConnectionConfig {
            reconnect_jitter_ms: 0,
            ..Default::default()
        };
        assert_eq!(config.reconnect_delay(2), Duration::from_secs(10));
    }

    #[test]
    fn test_cooldown_sequence() {
        let config = ConnectionConfig::default();
        assert_eq!(config.cooldown_for_trip(1), Duration::from_secs(60));
        assert_eq!(config.cooldown_for_trip(2), Duration::from_secs(300));
        assert_eq!(config.cooldown_for_trip(3), Duration::from_secs(900));
        assert_eq!(config.cooldown_for_trip(4), Duration::from_secs(1800));
        assert_eq!(config.cooldown_for_trip(5), Duration::from_secs(1800));
        assert_eq!(config.cooldown_for_trip(40), Duration::from_secs(1800));
    }

    #[test]
    fn test_detector_config_default() {
        let config = DetectorConfig::default();
        assert!(config.enabled);
        assert_eq!(config.probe_interval(), Duration::from_secs(5));
        assert_eq!(config.failure_threshold, 3);
        assert_eq!(config.max_recovery_attempts, 5);
        assert_eq!(config.recovery_timeout(), Duration::from_secs(30));
    }

    #[test]
    fn test_failover_timeouts_parse() {
        let config = FailoverConfig::default();
        assert_eq!(config.prepare_timeout_duration(), Duration::from_secs(10));
        assert_eq!(config.transfer_timeout_duration(), Duration::from_secs(5));
        assert_eq!(config.retention(), Duration::from_secs(60));
        assert!(config.rollback_enabled);
        assert!(config.allow_unhealthy_backup);
    }

    #[test]
    fn test_failover_timeout_various_formats() {
        let test_cases = [
            ("5s", Duration::from_secs(5)),
            ("1m", Duration::from_secs(60)),
            ("250ms", Duration::from_millis(250)),
        ];

        for (input, expected) in test_cases {
            let config = FailoverConfig {
                prepare_timeout: input.to_string(),
                ..Default::default()
            };
            assert_eq!(config.prepare_timeout_duration(), expected, "Failed for input: {}", input);
        }
    }

    #[test]
    fn test_failover_timeout_invalid_fallback() {
        let config = FailoverConfig {
            transfer_timeout: "soon".to_string(),
            ..Default::default()
        };
        assert_eq!(config.transfer_timeout_duration(), Duration::from_secs(5));
    }

    #[test]
    fn test_alert_config_default() {
        let config = AlertConfig::default();
        assert_eq!(config.queue_warning, 1000);
        assert_eq!(config.queue_critical, 5000);
        assert_eq!(config.balance_quality_warning, 80.0);
        assert_eq!(config.history_limit, 1000);
    }

    #[test]
    fn test_validate_default_ok() {
        assert!(FleetConfig::default().validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_zero_threshold() {
        let mut config = FleetConfig::default();
        config.settings.detector.failure_threshold = 0;
        assert!(matches!(config.validate(), Err(FleetError::Config(_))));
    }

    #[test]
    fn test_validate_rejects_empty_cooldowns() {
        let mut config = FleetConfig::default();
        config.settings.connection.circuit_cooldowns_sec.clear();
        assert!(matches!(config.validate(), Err(FleetError::Config(_))));
    }

    #[test]
    fn test_validate_rejects_inverted_queue_thresholds() {
        let mut config = FleetConfig::default();
        config.settings.alerts.queue_warning = 9000;
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("queue_warning"));
    }

    #[test]
    fn test_validate_rejects_duplicate_nodes() {
        let config = FleetConfig {
            nodes: vec![
                NodeDescriptor::new("node-1", 1, NodeRole::Primary),
                NodeDescriptor::new("node-1", 2, NodeRole::Backup),
            ],
            ..Default::default()
        };
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("duplicate"));
    }

    #[test]
    fn test_config_json_roundtrip() {
        let config = FleetConfig {
            fleet_id: "fleet-roundtrip".to_string(),
            settings: FleetSettings::default(),
            nodes: vec![
                NodeDescriptor::new("node-1", 1, NodeRole::Primary),
                NodeDescriptor::new("node-2", 2, NodeRole::Backup),
            ],
        };

        let json = serde_json::to_string(&config).unwrap();
        let parsed: FleetConfig = serde_json::from_str(&json).unwrap();

        assert_eq!(parsed.fleet_id, "fleet-roundtrip");
        assert_eq!(parsed.nodes.len(), 2);
        assert_eq!(parsed.nodes[1].role, NodeRole::Backup);
    }

    #[test]
    fn test_config_yaml_partial() {
        let yaml = r#"
fleet_id: "support-desk"
settings:
  detector:
    failure_threshold: 4
  balancer:
    strategy: least_loaded
nodes:
  - id: "+15550001"
    priority: 1
    role: primary
"#;
        let config: FleetConfig = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(config.settings.detector.failure_threshold, 4);
        assert_eq!(config.settings.detector.probe_interval_ms, 5_000);
        assert_eq!(config.settings.balancer.strategy, BalanceStrategy::LeastLoaded);
        assert_eq!(config.settings.connection.max_reconnect_attempts, 10);
        assert_eq!(config.nodes[0].id, "+15550001");
        assert!(config.nodes[0].enabled);
    }
}
