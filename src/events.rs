// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Fleet event stream.
//!
//! Every component receives the same [`EventSink`] at construction and emits
//! typed [`FleetEvent`]s into it. Dashboards, notifiers and the engine's own
//! dispatcher subscribe at wiring time.
//!
//! The sink is a `tokio::sync::broadcast` channel. Emitting never blocks, and
//! emitting with nobody listening is fine. A subscriber that falls more than
//! `event_capacity` events behind observes a `Lagged` error and skips ahead.
//!
//! Consumers that act on events and cannot afford to skip one (the engine's
//! dispatcher starts failovers from `NodeFailed`) use
//! [`EventSink::subscribe_lossless`] instead: an unbounded `mpsc` queue fed
//! alongside the broadcast channel.

use crate::alerts::Alert;
use crate::connection::ConnectionState;
use crate::failover::FailoverStep;
use parking_lot::Mutex;
use serde::Serialize;
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc};
use tracing::trace;

/// Something observable happened in the fleet.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum FleetEvent {
    /// A node's connection state machine changed state.
    NodeStateChanged {
        node_id: String,
        from: ConnectionState,
        to: ConnectionState,
        reason: Option<String>,
        at_ms: u64,
    },
    /// A pairing challenge was accepted and should be shown to the operator.
    PairingChallenge {
        node_id: String,
        code: String,
        attempt: u32,
    },
    /// A pairing attempt was not completed in time.
    PairingExpired { node_id: String },
    /// First failed probe after a healthy run.
    NodeDegraded {
        node_id: String,
        consecutive_failures: u32,
        error: Option<String>,
    },
    /// Failure threshold reached.
    NodeFailed {
        node_id: String,
        consecutive_failures: u32,
        error: Option<String>,
    },
    /// A degraded or failed node probed healthy again.
    NodeRecovered { node_id: String, downtime_ms: u64 },
    /// The node used up its recovery budget and needs a manual reset.
    RecoveryExhausted { node_id: String, attempts: u32 },
    FailoverStarted {
        failover_id: String,
        failed_node: String,
        backup_node: String,
    },
    FailoverCompleted {
        failover_id: String,
        failed_node: String,
        backup_node: String,
        duration_ms: u64,
    },
    FailoverFailed {
        failover_id: String,
        failed_node: String,
        backup_node: String,
        step: FailoverStep,
        error: String,
        rolled_back: bool,
    },
    /// Election found no usable backup; no failover was attempted.
    NoBackupAvailable { failed_node: String },
    AlertRaised { alert: Alert },
}

impl FleetEvent {
    /// Short stable name of the variant (matches the serialized `type` tag).
    pub fn kind(&self) -> &'static str {
        match self {
            Self::NodeStateChanged { .. } => "node_state_changed",
            Self::PairingChallenge { .. } => "pairing_challenge",
            Self::PairingExpired { .. } => "pairing_expired",
            Self::NodeDegraded { .. } => "node_degraded",
            Self::NodeFailed { .. } => "node_failed",
            Self::NodeRecovered { .. } => "node_recovered",
            Self::RecoveryExhausted { .. } => "recovery_exhausted",
            Self::FailoverStarted { .. } => "failover_started",
            Self::FailoverCompleted { .. } => "failover_completed",
            Self::FailoverFailed { .. } => "failover_failed",
            Self::NoBackupAvailable { .. } => "no_backup_available",
            Self::AlertRaised { .. } => "alert_raised",
        }
    }

    /// The node the event is about, if any.
    pub fn node_id(&self) -> Option<&str> {
        match self {
            Self::NodeStateChanged { node_id, .. }
            | Self::PairingChallenge { node_id, .. }
            | Self::PairingExpired { node_id }
            | Self::NodeDegraded { node_id, .. }
            | Self::NodeFailed { node_id, .. }
            | Self::NodeRecovered { node_id, .. }
            | Self::RecoveryExhausted { node_id, .. } => Some(node_id),
            Self::FailoverStarted { failed_node, .. }
            | Self::FailoverCompleted { failed_node, .. }
            | Self::FailoverFailed { failed_node, .. }
            | Self::NoBackupAvailable { failed_node } => Some(failed_node),
            Self::AlertRaised { .. } => None,
        }
    }
}

/// Fan-out point for [`FleetEvent`]s. Cheap to clone.
#[derive(Debug, Clone)]
pub struct EventSink {
    tx: broadcast::Sender<FleetEvent>,
    lossless: Arc<Mutex<Vec<mpsc::UnboundedSender<FleetEvent>>>>,
}

impl EventSink {
    /// Create a sink whose broadcast subscribers may lag by `capacity` events.
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self {
            tx,
            lossless: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Publish an event. Returns the number of subscribers that received it,
    /// lossless ones included.
    pub fn emit(&self, event: FleetEvent) -> usize {
        trace!(kind = event.kind(), node_id = ?event.node_id(), "Emitting event");
        let mut delivered = {
            let mut lossless = self.lossless.lock();
            // Dropped receivers fall out here
            lossless.retain(|tx| tx.send(event.clone()).is_ok());
            lossless.len()
        };
        // No receivers is not an error
        delivered += self.tx.send(event).unwrap_or(0);
        delivered
    }

    /// Subscribe to the broadcast stream. Slow receivers skip events.
    pub fn subscribe(&self) -> broadcast::Receiver<FleetEvent> {
        self.tx.subscribe()
    }

    /// Subscribe with a queue that never drops an event.
    ///
    /// The queue is unbounded, so the receiver must keep draining it.
    pub fn subscribe_lossless(&self) -> mpsc::UnboundedReceiver<FleetEvent> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.lossless.lock().push(tx);
        rx
    }

    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count() + self.lossless.lock().len()
    }
}
