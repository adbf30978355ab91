// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Work routing across healthy nodes.
//!
//! Only *routable* nodes carry work: primaries are routable on registration,
//! backups stand by until a failover activates them. Within the routable set
//! a node is eligible only while its health is `Healthy`.
//!
//! Queue lengths are tracked per node: [`LoadBalancer::select_node_for_work`]
//! increments the chosen node's queue, [`LoadBalancer::record_completed`] and
//! [`LoadBalancer::record_failed`] decrement it.

use crate::config::BalancerConfig;
use crate::error::{FleetError, Result};
use crate::metrics;
use crate::node::{HealthState, NodeRegistry};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use tracing::{debug, info, warn};

/// Node selection strategy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BalanceStrategy {
    #[default]
    RoundRobin,
    /// Shortest queue first, ties broken by node id.
    LeastLoaded,
}

/// Routing state captured before a failover mutates it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BalancerSnapshot {
    queues: BTreeMap<String, u64>,
    routable: BTreeSet<String>,
    redirects: HashMap<String, String>,
}

/// Per-node load as reported by [`LoadBalancer::get_load_distribution`].
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NodeLoad {
    pub node_id: String,
    pub queue_length: u64,
    pub routable: bool,
    pub healthy: bool,
}

/// Fleet-wide load picture.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LoadDistribution {
    pub strategy: BalanceStrategy,
    pub nodes: Vec<NodeLoad>,
    pub total_queue: u64,
    pub max_queue: u64,
    /// 0-100, 100 is perfectly even load across eligible nodes.
    pub balance_quality: f64,
}

#[derive(Debug, Default)]
struct BalancerState {
    queues: BTreeMap<String, u64>,
    routable: BTreeSet<String>,
    redirects: HashMap<String, String>,
    cursor: usize,
}

/// Routes work across the fleet and tracks per-node queues.
///
/// Health comes from the shared [`NodeRegistry`]; routability, queues and
/// redirects are owned here behind one lock.
pub struct LoadBalancer {
    strategy: BalanceStrategy,
    registry: NodeRegistry,
    state: Mutex<BalancerState>,
}

impl LoadBalancer {
    /// Create a balancer with no nodes tracked yet.
    pub fn new(config: &BalancerConfig, registry: NodeRegistry) -> Self {
        Self {
            strategy: config.strategy,
            registry,
            state: Mutex::new(BalancerState::default()),
        }
    }

    /// Configured selection strategy.
    pub fn strategy(&self) -> BalanceStrategy {
        self.strategy
    }

    /// Track a node. `routable` is true for nodes that carry work from the start.
    pub fn register_node(&self, node_id: &str, routable: bool) {
        let mut state = self.state.lock();
        state.queues.entry(node_id.to_string()).or_insert(0);
        if routable {
            state.routable.insert(node_id.to_string());
        }
        debug!(node_id = %node_id, routable, "Node registered with balancer");
    }

    /// Forget a node entirely, including redirects that point at it.
    pub fn remove_node(&self, node_id: &str) {
        let mut state = self.state.lock();
        state.queues.remove(node_id);
        state.routable.remove(node_id);
        state.redirects.remove(node_id);
        state.redirects.retain(|_, to| to != node_id);
    }

    /// Pick a node for one unit of work and count it against that node's queue.
    pub fn select_node_for_work(&self) -> Result<String> {
        let mut state = self.state.lock();

        let eligible: Vec<String> = state
            .routable
            .iter()
            .filter(|id| self.is_healthy(id))
            .cloned()
            .collect();

        if eligible.is_empty() {
            metrics::record_no_healthy_node();
            warn!(routable = state.routable.len(), "No healthy node available for work");
            return Err(FleetError::NoHealthyNode);
        }

        let chosen = match self.strategy {
            BalanceStrategy::RoundRobin => {
                let index = state.cursor % eligible.len();
                state.cursor = state.cursor.wrapping_add(1);
                eligible[index].clone()
            }
            BalanceStrategy::LeastLoaded => eligible
                .iter()
                .min_by_key(|id| (state.queues.get(*id).copied().unwrap_or(0), (*id).clone()))
                .cloned()
                .ok_or(FleetError::NoHealthyNode)?,
        };

        let queue = state.queues.entry(chosen.clone()).or_insert(0);
        *queue += 1;
        metrics::record_work_routed(&chosen);
        metrics::set_queue_length(&chosen, *queue);
        Ok(chosen)
    }

    /// Work addressed to a specific node, queued without selection.
    pub fn record_enqueued(&self, node_id: &str, count: u64) {
        let mut state = self.state.lock();
        let queue = state.queues.entry(node_id.to_string()).or_insert(0);
        *queue = queue.saturating_add(count);
        metrics::set_queue_length(node_id, *queue);
    }

    /// One unit of work on `node_id` finished.
    pub fn record_completed(&self, node_id: &str) {
        self.dequeue(node_id);
    }

    /// One unit of work on `node_id` failed. It leaves the queue all the same.
    pub fn record_failed(&self, node_id: &str) {
        self.dequeue(node_id);
    }

    fn dequeue(&self, node_id: &str) {
        let mut state = self.state.lock();
        if let Some(queue) = state.queues.get_mut(node_id) {
            *queue = queue.saturating_sub(1);
            metrics::set_queue_length(node_id, *queue);
        }
    }

    /// Current queue length, 0 for unknown nodes.
    pub fn queue_length(&self, node_id: &str) -> u64 {
        self.state.lock().queues.get(node_id).copied().unwrap_or(0)
    }

    /// Move every queued unit from `from` to `to`. Returns how many moved.
    pub fn transfer_queue(&self, from: &str, to: &str) -> u64 {
        let mut state = self.state.lock();
        let moved = state.queues.insert(from.to_string(), 0).unwrap_or(0);
        let target = state.queues.entry(to.to_string()).or_insert(0);
        *target = target.saturating_add(moved);
        let target_len = *target;
        metrics::set_queue_length(from, 0);
        metrics::set_queue_length(to, target_len);
        if moved > 0 {
            info!(from = %from, to = %to, moved, "Transferred queued work");
        }
        moved
    }

    /// Make a node carry work.
    pub fn activate(&self, node_id: &str) {
        let mut state = self.state.lock();
        state.queues.entry(node_id.to_string()).or_insert(0);
        state.routable.insert(node_id.to_string());
    }

    /// Stop sending work to a node.
    pub fn deactivate(&self, node_id: &str) {
        self.state.lock().routable.remove(node_id);
    }

    /// Whether `node_id` is in the routable set (health not considered).
    pub fn is_routable(&self, node_id: &str) -> bool {
        self.state.lock().routable.contains(node_id)
    }

    /// Send work addressed to `from` to `to` instead.
    pub fn redirect(&self, from: &str, to: &str) {
        self.state
            .lock()
            .redirects
            .insert(from.to_string(), to.to_string());
    }

    /// Resolve the node that actually serves work addressed to `node_id`.
    pub fn resolve(&self, node_id: &str) -> String {
        let state = self.state.lock();
        let mut current = node_id;
        // Bounded walk so a redirect cycle can't spin
        for _ in 0..=state.redirects.len() {
            match state.redirects.get(current) {
                Some(next) if next != current => current = next,
                _ => break,
            }
        }
        current.to_string()
    }

    /// A recovered node takes work again if it is a primary, and the
    /// redirect away from it is dropped. A node demoted to standby keeps its
    /// redirect, so work addressed to it still reaches the node that took over.
    pub fn rejoin(&self, node_id: &str, primary: bool) {
        let mut state = self.state.lock();
        if primary {
            state.redirects.remove(node_id);
            state.routable.insert(node_id.to_string());
        }
        debug!(node_id = %node_id, primary, "Node rejoined routing");
    }

    /// Capture queues, routable set and redirects for a later [`restore`](Self::restore).
    pub fn snapshot(&self) -> BalancerSnapshot {
        let state = self.state.lock();
        BalancerSnapshot {
            queues: state.queues.clone(),
            routable: state.routable.clone(),
            redirects: state.redirects.clone(),
        }
    }

    /// Put back state captured by [`snapshot`](Self::snapshot). The
    /// round-robin cursor is left where it is.
    pub fn restore(&self, snapshot: BalancerSnapshot) {
        let mut state = self.state.lock();
        state.queues = snapshot.queues;
        state.routable = snapshot.routable;
        state.redirects = snapshot.redirects;
        for (id, len) in &state.queues {
            metrics::set_queue_length(id, *len);
        }
    }

    /// Per-node queues plus totals and balance quality over healthy routable nodes.
    pub fn get_load_distribution(&self) -> LoadDistribution {
        let state = self.state.lock();

        let nodes: Vec<NodeLoad> = state
            .queues
            .iter()
            .map(|(id, len)| NodeLoad {
                node_id: id.clone(),
                queue_length: *len,
                routable: state.routable.contains(id),
                healthy: self.is_healthy(id),
            })
            .collect();

        let eligible: Vec<u64> = nodes
            .iter()
            .filter(|n| n.routable && n.healthy)
            .map(|n| n.queue_length)
            .collect();

        let quality = balance_quality(&eligible);
        metrics::set_balance_quality(quality);

        LoadDistribution {
            strategy: self.strategy,
            total_queue: nodes.iter().map(|n| n.queue_length).sum(),
            max_queue: nodes.iter().map(|n| n.queue_length).max().unwrap_or(0),
            nodes,
            balance_quality: quality,
        }
    }

    fn is_healthy(&self, node_id: &str) -> bool {
        self.registry
            .get(node_id)
            .map(|n| n.health_state() == HealthState::Healthy)
            .unwrap_or(false)
    }
}

/// Evenness of `queues` on a 0-100 scale: `100 * (1 - cv)` where `cv` is the
/// coefficient of variation, clamped. Empty, single-node and idle fleets are
/// perfectly balanced.
pub fn balance_quality(queues: &[u64]) -> f64 {
    if queues.len() <= 1 {
        return 100.0;
    }
    let total: u64 = queues.iter().sum();
    if total == 0 {
        return 100.0;
    }
    let n = queues.len() as f64;
    let mean = total as f64 / n;
    let variance = queues
        .iter()
        .map(|q| {
            let d = *q as f64 - mean;
            d * d
        })
        .sum::<f64>()
        / n;
    let cv = variance.sqrt() / mean;
    (100.0 * (1.0 - cv)).clamp(0.0, 100.0)
}
