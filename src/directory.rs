// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Node configuration provider.
//!
//! The [`NodeDirectory`] is where node descriptors live: priority, role, and
//! the session material a backup adopts during failover. The engine reads it
//! at start-up and patches it during failover and rollback.
//!
//! [`InMemoryDirectory`] is the default implementation, seeded from
//! [`FleetConfig::nodes`](crate::config::FleetConfig::nodes).

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::future::Future;
use std::pin::Pin;
use thiserror::Error;

/// Errors from a node directory.
#[derive(Debug, Clone, Error)]
pub enum DirectoryError {
    #[error("node {0} is not in the directory")]
    NotFound(String),

    #[error("directory unavailable: {0}")]
    Unavailable(String),
}

/// Boxed future returned by [`NodeDirectory`] methods.
pub type DirectoryFuture<'a, T> =
    Pin<Box<dyn Future<Output = std::result::Result<T, DirectoryError>> + Send + 'a>>;

/// Whether a node carries work or stands by.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeRole {
    #[default]
    Primary,
    Backup,
}

/// Session material moved from a failed node onto its backup.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Handover {
    /// Node the material came from.
    pub from: String,
    pub session: Option<String>,
    pub auth_context: Option<String>,
    /// Queued work units moved with the handover.
    pub pending_work: u64,
    pub at_ms: u64,
}

/// One node's directory entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeDescriptor {
    /// Stable node id (account or phone number).
    pub id: String,

    /// Election priority; lower is preferred.
    #[serde(default = "default_priority")]
    pub priority: u32,

    #[serde(default)]
    pub role: NodeRole,

    /// Disabled nodes cannot be prepared as backups.
    #[serde(default = "default_enabled")]
    pub enabled: bool,

    #[serde(default)]
    pub session: Option<String>,

    #[serde(default)]
    pub auth_context: Option<String>,

    /// Set on a backup that adopted another node's session.
    #[serde(default)]
    pub handover: Option<Handover>,
}

fn default_priority() -> u32 {
    100
}

fn default_enabled() -> bool {
    true
}

impl NodeDescriptor {
    pub fn new(id: impl Into<String>, priority: u32, role: NodeRole) -> Self {
        Self {
            id: id.into(),
            priority,
            role,
            enabled: true,
            session: None,
            auth_context: None,
            handover: None,
        }
    }

    pub fn with_session(mut self, session: impl Into<String>) -> Self {
        self.session = Some(session.into());
        self
    }

    pub fn with_auth_context(mut self, auth: impl Into<String>) -> Self {
        self.auth_context = Some(auth.into());
        self
    }
}

/// Partial update to a [`NodeDescriptor`]. `None` fields are left alone.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NodeConfigPatch {
    pub role: Option<NodeRole>,
    pub enabled: Option<bool>,
    /// `Some(None)` clears the handover.
    pub handover: Option<Option<Handover>>,
}

impl NodeConfigPatch {
    pub fn role(role: NodeRole) -> Self {
        Self {
            role: Some(role),
            ..Default::default()
        }
    }

    pub fn handover(handover: Handover) -> Self {
        Self {
            handover: Some(Some(handover)),
            ..Default::default()
        }
    }

    /// Patch that puts every patchable field back to `descriptor`'s values.
    pub fn restoring(descriptor: &NodeDescriptor) -> Self {
        Self {
            role: Some(descriptor.role),
            enabled: Some(descriptor.enabled),
            handover: Some(descriptor.handover.clone()),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.role.is_none() && self.enabled.is_none() && self.handover.is_none()
    }

    pub fn apply(&self, descriptor: &mut NodeDescriptor) {
        if let Some(role) = self.role {
            descriptor.role = role;
        }
        if let Some(enabled) = self.enabled {
            descriptor.enabled = enabled;
        }
        if let Some(handover) = &self.handover {
            descriptor.handover = handover.clone();
        }
    }
}

/// Node configuration provider.
pub trait NodeDirectory: Send + Sync + 'static {
    fn list_nodes(&self) -> DirectoryFuture<'_, Vec<NodeDescriptor>>;

    fn get_node_config<'a>(&'a self, id: &'a str) -> DirectoryFuture<'a, NodeDescriptor>;

    /// Apply `patch` and return the updated descriptor.
    fn update_node_config<'a>(
        &'a self,
        id: &'a str,
        patch: NodeConfigPatch,
    ) -> DirectoryFuture<'a, NodeDescriptor>;
}

/// Directory kept in process memory.
#[derive(Debug, Default)]
pub struct InMemoryDirectory {
    nodes: RwLock<BTreeMap<String, NodeDescriptor>>,
}

impl InMemoryDirectory {
    pub fn new(nodes: impl IntoIterator<Item = NodeDescriptor>) -> Self {
        Self {
            nodes: RwLock::new(nodes.into_iter().map(|n| (n.id.clone(), n)).collect()),
        }
    }

    /// Insert or replace a descriptor.
    pub fn insert(&self, descriptor: NodeDescriptor) {
        self.nodes.write().insert(descriptor.id.clone(), descriptor);
    }

    pub fn remove(&self, id: &str) -> Option<NodeDescriptor> {
        self.nodes.write().remove(id)
    }

    /// Synchronous lookup.
    pub fn get(&self, id: &str) -> Option<NodeDescriptor> {
        self.nodes.read().get(id).cloned()
    }

    pub fn len(&self) -> usize {
        self.nodes.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.read().is_empty()
    }
}

impl NodeDirectory for InMemoryDirectory {
    fn list_nodes(&self) -> DirectoryFuture<'_, Vec<NodeDescriptor>> {
        let nodes = self.nodes.read().values().cloned().collect();
        Box::pin(async move { Ok(nodes) })
    }

    fn get_node_config<'a>(&'a self, id: &'a str) -> DirectoryFuture<'a, NodeDescriptor> {
        let found = self.get(id);
        Box::pin(async move { found.ok_or_else(|| DirectoryError::NotFound(id.to_string())) })
    }

    fn update_node_config<'a>(
        &'a self,
        id: &'a str,
        patch: NodeConfigPatch,
    ) -> DirectoryFuture<'a, NodeDescriptor> {
        let result = {
            let mut nodes = self.nodes.write();
            match nodes.get_mut(id) {
                Some(descriptor) => {
                    patch.apply(descriptor);
                    Ok(descriptor.clone())
                }
                None => Err(DirectoryError::NotFound(id.to_string())),
            }
        };
        Box::pin(async move { result })
    }
}
