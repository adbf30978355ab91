// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Engine state types.
//!
//! # State Transitions
//!
//! ```text
//!                  start()
//! Created ───────────────────→ Starting
//!    │                              │
//!    │ shutdown()                   │ (nodes registered, loops spawned)
//!    ↓                              ↓
//! Stopped ←── ShuttingDown ←──── Running
//!                                   
//!          Starting ──(directory unreachable)──→ Failed
//! ```
//!
//! - **Created**: after `FleetEngine::new()`. Nodes may be registered, nothing runs.
//! - **Starting**: `start()` called, loading the directory and connecting nodes.
//! - **Running**: probing, failing over, routing and alerting.
//! - **ShuttingDown**: `shutdown()` called. Loops draining, connections being destroyed.
//! - **Stopped**: clean shutdown complete. Safe to drop.
//! - **Failed**: start could not complete. Check logs.

use serde::Serialize;

/// State of the fleet engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum EngineState {
    Created,
    Starting,
    Running,
    ShuttingDown,
    Stopped,
    Failed,
}

impl std::fmt::Display for EngineState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EngineState::Created => write!(f, "Created"),
            EngineState::Starting => write!(f, "Starting"),
            EngineState::Running => write!(f, "Running"),
            EngineState::ShuttingDown => write!(f, "ShuttingDown"),
            EngineState::Stopped => write!(f, "Stopped"),
            EngineState::Failed => write!(f, "Failed"),
        }
    }
}
