// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Connection state types.

use serde::Serialize;
use std::fmt;

/// State of a node's connection.
///
/// See the [module docs](super) for the transition diagram.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    /// Never started, or reset by an operator.
    Idle,
    /// `initialize()` was called and readiness has not been reported yet.
    Connecting,
    /// Session is ready.
    Connected,
    /// Session dropped; a reconnect is pending.
    Disconnected,
    /// Last connect attempt failed; a reconnect or lock recovery is pending.
    Error,
    /// Circuit open, or reconnects exhausted. No connect attempts are made.
    Suspended,
}

impl ConnectionState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Connecting => "connecting",
            Self::Connected => "connected",
            Self::Disconnected => "disconnected",
            Self::Error => "error",
            Self::Suspended => "suspended",
        }
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One recorded state change.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StateTransition {
    pub from: ConnectionState,
    pub to: ConnectionState,
    pub reason: Option<String>,
    pub at_ms: u64,
}

/// Why a node is `Suspended`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Suspension {
    /// Circuit breaker tripped; lifts by itself after the cooldown.
    CircuitOpen { trip: u32, cooldown_ms: u64 },
    /// Reconnect budget spent. Terminal until `reset()`.
    ReconnectsExhausted { attempts: u32 },
}

/// Timers a connection can have pending.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TimerKind {
    Reconnect,
    CircuitCooldown,
    PairingTimeout,
    Keepalive,
    LockRecovery,
    SignalPump,
}

/// Point-in-time view of a connection.
#[derive(Debug, Clone, Serialize)]
pub struct ConnectionSnapshot {
    pub node_id: String,
    pub state: ConnectionState,
    /// Critical errors since the last successful connect.
    pub error_count: u32,
    pub reconnect_attempts: u32,
    pub circuit_trips: u32,
    pub lock_recoveries: u32,
    pub pairing_attempts: u32,
    pub suspension: Option<Suspension>,
    pub last_error: Option<String>,
    pub last_activity_ms: Option<u64>,
    pub connected_since_ms: Option<u64>,
    /// Most recent transitions, oldest first.
    pub history: Vec<StateTransition>,
}

impl ConnectionSnapshot {
    pub fn is_connected(&self) -> bool {
        self.state == ConnectionState::Connected
    }

    pub fn is_circuit_open(&self) -> bool {
        matches!(self.suspension, Some(Suspension::CircuitOpen { .. }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_state_display() {
        assert_eq!(ConnectionState::Suspended.to_string(), "suspended");
        assert_eq!(format!("{}", ConnectionState::Connecting), "connecting");
    }

    #[test]
    fn test_suspension_serializes_tagged() {
        let s = Suspension::CircuitOpen {
            trip: 2,
            cooldown_ms: 300_000,
        };
        let json = serde_json::to_value(s).unwrap();
        assert_eq!(json["kind"], "circuit_open");
        assert_eq!(json["cooldown_ms"], 300_000);
    }
}
