// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Connection handle and probe source traits.
//!
//! The engine never speaks the messaging protocol itself. Each node is driven
//! through an opaque [`ConnectionHandle`] supplied by the embedding
//! application, and liveness is read through a [`ProbeSource`].
//!
//! # Example
//!
//! ```rust,no_run
//! use fleet_engine::handle::{BoxFuture, ConnectionHandle, HandleSignal, SignalSender};
//!
//! struct MyClient { /* ... */ }
//!
//! impl ConnectionHandle for MyClient {
//!     fn initialize(&self, signals: SignalSender) -> BoxFuture<'_, ()> {
//!         Box::pin(async move {
//!             // launch the client, forward its lifecycle callbacks
//!             let _ = signals.send(HandleSignal::Connecting);
//!             Ok(())
//!         })
//!     }
//!
//!     fn destroy(&self) -> BoxFuture<'_, ()> {
//!         Box::pin(async move { Ok(()) })
//!     }
//! }
//! ```

use crate::connection::ConnectionState;
use crate::node::NodeRegistry;
use std::future::Future;
use std::pin::Pin;
use tokio::sync::mpsc;

/// Result type for collaborator operations.
pub type HandleResult<T> = std::result::Result<T, HandleError>;

/// Type alias for boxed async futures (keeps the traits object-safe).
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = HandleResult<T>> + Send + 'a>>;

/// Error reported by a connection handle or probe source.
///
/// The message text is what the state machine classifies, so implementations
/// should pass through the underlying client's error text unchanged.
#[derive(Debug, Clone)]
pub struct HandleError(pub String);

impl std::fmt::Display for HandleError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::error::Error for HandleError {}

impl From<&str> for HandleError {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for HandleError {
    fn from(s: String) -> Self {
        Self(s)
    }
}

/// Lifecycle notification from a connection handle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HandleSignal {
    Connecting,
    Authenticated,
    /// The session is usable. Moves the node to `Connected`.
    Ready,
    Disconnected(String),
    Error(String),
    /// Device-linking challenge (e.g. the payload of a QR code).
    PairingChallenge(String),
    /// Any traffic on the session; feeds the inactivity check.
    Activity,
}

/// Channel a handle uses to report [`HandleSignal`]s.
pub type SignalSender = mpsc::UnboundedSender<HandleSignal>;

/// What the engine needs from a node's underlying client.
pub trait ConnectionHandle: Send + Sync + 'static {
    /// Start connecting.
    ///
    /// Resolves once the launch call returns. Readiness is reported later
    /// through `signals`. An `Err` here is treated as a connect failure and
    /// classified like an `Error` signal.
    fn initialize(&self, signals: SignalSender) -> BoxFuture<'_, ()>;

    /// Tear the session down and release its resources.
    fn destroy(&self) -> BoxFuture<'_, ()>;

    /// Remove stale lock artifacts left by a previous session.
    ///
    /// Default: nothing to clean.
    fn clean_locks(&self) -> BoxFuture<'_, ()> {
        Box::pin(async { Ok(()) })
    }

    /// Forcibly stop the underlying process.
    ///
    /// Returns whether a process was tracked and terminated.
    fn terminate_process(&self) -> BoxFuture<'_, bool> {
        Box::pin(async { Ok(false) })
    }
}

/// Result of a liveness probe.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Liveness {
    pub connected: bool,
    pub error: Option<String>,
}

impl Liveness {
    pub fn up() -> Self {
        Self {
            connected: true,
            error: None,
        }
    }

    pub fn down(error: impl Into<String>) -> Self {
        Self {
            connected: false,
            error: Some(error.into()),
        }
    }
}

/// Source of per-node liveness.
pub trait ProbeSource: Send + Sync + 'static {
    /// Probe `node_id` once.
    fn liveness<'a>(&'a self, node_id: &'a str) -> BoxFuture<'a, Liveness>;

    /// Whether this source can judge `node_id` at all.
    ///
    /// Nodes it cannot judge are skipped by the detector and keep `Unknown`
    /// health, so they are neither routed to nor failed over. Default: every
    /// node.
    fn covers(&self, node_id: &str) -> bool {
        let _ = node_id;
        true
    }
}

/// Default probe source: a node is live iff its state machine is `Connected`.
///
/// Only nodes registered with a connection handle are covered. A node
/// without one has nothing to observe and stays `Unknown` rather than
/// being reported down.
pub struct ConnectionProbe {
    registry: NodeRegistry,
}

impl ConnectionProbe {
    /// Probe the connections of nodes in `registry`.
    pub fn new(registry: NodeRegistry) -> Self {
        Self { registry }
    }
}

impl ProbeSource for ConnectionProbe {
    fn covers(&self, node_id: &str) -> bool {
        self.registry
            .get(node_id)
            .map(|node| node.connection().is_some())
            .unwrap_or(false)
    }

    fn liveness<'a>(&'a self, node_id: &'a str) -> BoxFuture<'a, Liveness> {
        Box::pin(async move {
            let connection = self
                .registry
                .get(node_id)
                .and_then(|node| node.connection().cloned());
            let Some(connection) = connection else {
                return Ok(Liveness::down("no connection handle"));
            };

            let snapshot = connection.snapshot().await;
            if snapshot.state == ConnectionState::Connected {
                Ok(Liveness::up())
            } else {
                let reason = snapshot
                    .last_error
                    .unwrap_or_else(|| format!("connection {}", snapshot.state));
                Ok(Liveness::down(reason))
            }
        })
    }
}
