// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Backup election.
//!
//! The failed node is never a candidate. Healthy candidates win; among them
//! the lowest `priority` is chosen, ties broken by node id. When nothing is
//! healthy and the policy allows it, the best remaining node is taken as a
//! degraded-mode fallback, ranked by health first (unknown before degraded
//! before failed) and then by priority.

use crate::node::HealthState;

/// A node considered for the backup role.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Candidate {
    pub node_id: String,
    pub priority: u32,
    pub health: HealthState,
}

impl Candidate {
    pub fn new(node_id: impl Into<String>, priority: u32, health: HealthState) -> Self {
        Self {
            node_id: node_id.into(),
            priority,
            health,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Election {
    Healthy(Candidate),
    /// No healthy candidate; best remaining node taken anyway.
    Fallback(Candidate),
    None,
}

impl Election {
    pub fn candidate(&self) -> Option<&Candidate> {
        match self {
            Self::Healthy(c) | Self::Fallback(c) => Some(c),
            Self::None => None,
        }
    }

    pub fn is_degraded(&self) -> bool {
        matches!(self, Self::Fallback(_))
    }
}

pub fn elect_backup(failed_node: &str, candidates: &[Candidate], allow_unhealthy: bool) -> Election {
    let remaining = candidates.iter().filter(|c| c.node_id != failed_node);

    let healthy = remaining
        .clone()
        .filter(|c| c.health == HealthState::Healthy)
        .min_by(|a, b| (a.priority, &a.node_id).cmp(&(b.priority, &b.node_id)));

    if let Some(c) = healthy {
        return Election::Healthy(c.clone());
    }
    if !allow_unhealthy {
        return Election::None;
    }

    remaining
        .min_by(|a, b| {
            (a.health.rank(), a.priority, &a.node_id).cmp(&(b.health.rank(), b.priority, &b.node_id))
        })
        .map(|c| Election::Fallback(c.clone()))
        .unwrap_or(Election::None)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn c(id: &str, priority: u32, health: HealthState) -> Candidate {
        Candidate::new(id, priority, health)
    }

    #[test]
    fn test_lowest_priority_healthy_wins() {
        let candidates = vec![
            c("a", 0, HealthState::Failed),
            c("b", 2, HealthState::Healthy),
            c("c", 1, HealthState::Healthy),
        ];
        assert_eq!(
            elect_backup("a", &candidates, true),
            Election::Healthy(c("c", 1, HealthState::Healthy))
        );
    }

    #[test]
    fn test_never_elects_failed_node() {
        let candidates = vec![c("a", 0, HealthState::Healthy), c("b", 5, HealthState::Healthy)];
        let election = elect_backup("a", &candidates, true);
        assert_eq!(election.candidate().unwrap().node_id, "b");
    }

    #[test]
    fn test_tie_broken_by_id() {
        let candidates = vec![c("z", 1, HealthState::Healthy), c("m", 1, HealthState::Healthy)];
        assert_eq!(elect_backup("x", &candidates, true).candidate().unwrap().node_id, "m");
    }

    #[test]
    fn test_healthy_beats_lower_priority_unhealthy() {
        let candidates = vec![c("b", 1, HealthState::Degraded), c("c", 9, HealthState::Healthy)];
        assert_eq!(elect_backup("a", &candidates, true).candidate().unwrap().node_id, "c");
    }

    #[test]
    fn test_fallback_policy() {
        let candidates = vec![
            c("a", 0, HealthState::Failed),
            c("b", 1, HealthState::Failed),
            c("c", 5, HealthState::Degraded),
        ];
        let election = elect_backup("a", &candidates, true);
        assert!(election.is_degraded());
        assert_eq!(election.candidate().unwrap().node_id, "c");

        assert_eq!(elect_backup("a", &candidates, false), Election::None);
    }

    #[test]
    fn test_single_node_fleet() {
        let candidates = vec![c("solo", 1, HealthState::Failed)];
        assert_eq!(elect_backup("solo", &candidates, true), Election::None);
        assert_eq!(elect_backup("solo", &[], true), Election::None);
    }
}
