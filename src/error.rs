// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Error types for the fleet engine.
//!
//! Errors are categorized by where they originate (a node's connection, a
//! health probe, a failover step, the node directory) and carry the node or
//! failover id they belong to.
//!
//! # Error Categories
//!
//! | Error Type | Retryable | Description |
//! |------------|-----------|-------------|
//! | `Connection` | Yes | Connection handle failed to start or dropped |
//! | `ResourceLocked` | Yes | Stale lock held by a previous session (cleanup-and-retry) |
//! | `Probe` | Yes | Liveness probe failed or timed out |
//! | `Directory` | Yes | Node configuration provider unavailable |
//! | `NodeNotFound` | No | Unknown node id |
//! | `FailoverStep` | No | A failover step failed (rolled back) |
//! | `StepTimeout` | No | A failover step exceeded its budget (rolled back) |
//! | `NoBackupAvailable` | No | Backup election found no candidate |
//! | `RecoveryExhausted` | No | Node exceeded its recovery budget, needs manual reset |
//! | `Config` | No | Configuration invalid |
//! | `InvalidState` | No | Engine state machine violation |
//! | `Shutdown` | No | Engine is shutting down |
//! | `Internal` | No | Unexpected internal error |
//!
//! Node-local connection errors are normally absorbed by the node's state
//! machine (they drive backoff and the circuit breaker). Failover errors are
//! returned to the caller *and* emitted as events.

use crate::failover::FailoverStep;
use thiserror::Error;

/// Result type alias for fleet operations.
pub type Result<T> = std::result::Result<T, FleetError>;

/// Errors that can occur while operating the fleet.
#[derive(Error, Debug)]
pub enum FleetError {
    /// No node with this id is registered.
    #[error("Node not found: {0}")]
    NodeNotFound(String),

    /// Connection handle failure.
    ///
    /// Retryable via the node's reconnect backoff.
    #[error("Connection error ({node_id}): {message}")]
    Connection { node_id: String, message: String },

    /// A previous session still holds the node's resources.
    ///
    /// Handled by the dedicated lock-recovery procedure.
    #[error("Resource locked ({node_id}): {message}")]
    ResourceLocked { node_id: String, message: String },

    /// Liveness probe failure.
    #[error("Probe failed ({node_id}): {message}")]
    Probe { node_id: String, message: String },

    /// A failover pipeline step failed.
    #[error("Failover {failover_id} failed at {step}: {message}")]
    FailoverStep {
        failover_id: String,
        step: FailoverStep,
        message: String,
    },

    /// A failover pipeline step exceeded its timeout budget.
    #[error("Failover {failover_id} timed out at {step} after {timeout_ms}ms")]
    StepTimeout {
        failover_id: String,
        step: FailoverStep,
        timeout_ms: u64,
    },

    /// No healthy routable node can take work.
    #[error("No healthy node available")]
    NoHealthyNode,

    /// Backup election found no usable node.
    #[error("No backup available for failed node {failed_node}")]
    NoBackupAvailable { failed_node: String },

    /// The node used up its recovery budget.
    ///
    /// Terminal until an operator resets the node.
    #[error("Recovery exhausted for {node_id} after {attempts} attempts")]
    RecoveryExhausted { node_id: String, attempts: u32 },

    /// Node configuration provider error.
    #[error("Directory error: {0}")]
    Directory(String),

    /// Invalid or missing configuration.
    #[error("Configuration error: {0}")]
    Config(String),

    /// Engine state machine violation.
    #[error("Invalid state: expected {expected}, got {actual}")]
    InvalidState { expected: String, actual: String },

    /// Shutdown in progress.
    #[error("Shutdown in progress")]
    Shutdown,

    /// Unexpected internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl FleetError {
    /// Create a connection error.
    pub fn connection(node_id: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Connection {
            node_id: node_id.into(),
            message: message.into(),
        }
    }

    /// Create a probe error.
    pub fn probe(node_id: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Probe {
            node_id: node_id.into(),
            message: message.into(),
        }
    }

    /// Check if this error is retryable
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Connection { .. } => true,
            Self::ResourceLocked { .. } => true,
            Self::Probe { .. } => true,
            Self::Directory(_) => true,
            Self::NodeNotFound(_) => false,
            Self::FailoverStep { .. } => false,
            Self::StepTimeout { .. } => false,
            Self::NoBackupAvailable { .. } => false,
            Self::NoHealthyNode => true,
            Self::RecoveryExhausted { .. } => false,
            Self::Config(_) => false,
            Self::InvalidState { .. } => false,
            Self::Shutdown => false,
            Self::Internal(_) => false,
        }
    }

    /// Check if this error came out of the failover pipeline.
    pub fn is_failover_failure(&self) -> bool {
        matches!(
            self,
            Self::FailoverStep { .. } | Self::StepTimeout { .. } | Self::NoBackupAvailable { .. }
        )
    }
}

impl From<crate::directory::DirectoryError> for FleetError {
    fn from(e: crate::directory::DirectoryError) -> Self {
        Self::Directory(e.to_string())
    }
}
