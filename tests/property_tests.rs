//! Property-based tests using proptest.
//!
//! These tests verify invariants that should hold for all inputs,
//! helping catch edge cases that unit tests might miss.

use fleet_engine::balancer::balance_quality;
use fleet_engine::connection::{classify, ErrorClass};
use fleet_engine::failover::{elect_backup, Candidate, Election};
use fleet_engine::health::health_score;
use fleet_engine::node::{HealthChange, HealthCounts, ProbeOutcome};
use fleet_engine::{ConnectionConfig, HealthLabel, HealthState, Node};
use proptest::prelude::*;
use std::time::Duration;

const LOCK_MARKERS: &[&str] = &[
    "already running",
    "singletonlock",
    "processsingleton",
    "resource locked",
    "already in use",
    "ebusy",
];

fn health_state() -> impl Strategy<Value = HealthState> {
    prop_oneof![
        Just(HealthState::Unknown),
        Just(HealthState::Healthy),
        Just(HealthState::Degraded),
        Just(HealthState::Failed),
    ]
}

fn candidates() -> impl Strategy<Value = Vec<Candidate>> {
    prop::collection::vec((0u32..10, health_state()), 0..8).prop_map(|specs| {
        specs
            .into_iter()
            .enumerate()
            .map(|(i, (priority, health))| Candidate::new(format!("n{i}"), priority, health))
            .collect()
    })
}

// =============================================================================
// Reconnect Backoff Properties
// =============================================================================

proptest! {
    /// Delay stays within [base, base + jitter) and base never exceeds the cap
    #[test]
    fn reconnect_delay_bounded(attempt in 1u32..200) {
        let config = ConnectionConfig::default();
        let base = config.base_reconnect_delay(attempt);
        let delay = config.reconnect_delay(attempt);

        prop_assert!(base <= Duration::from_millis(config.reconnect_max_delay_ms));
        prop_assert!(base >= Duration::from_millis(config.reconnect_base_delay_ms));
        prop_assert!(delay >= base);
        prop_assert!(delay < base + Duration::from_millis(config.reconnect_jitter_ms));
    }

    /// Base delay never shrinks as attempts grow
    #[test]
    fn reconnect_delay_monotonic(attempt in 1u32..100) {
        let config = ConnectionConfig::default();
        prop_assert!(config.base_reconnect_delay(attempt) <= config.base_reconnect_delay(attempt + 1));
    }

    /// Cooldown follows the configured sequence and clamps to its last entry
    #[test]
    fn cooldown_clamps_to_last_entry(trip in 0u32..1000) {
        let config = ConnectionConfig::default();
        let cooldowns = &config.circuit_cooldowns_sec;
        let cooldown = config.cooldown_for_trip(trip);

        prop_assert!(cooldowns.iter().any(|s| Duration::from_secs(*s) == cooldown));
        prop_assert!(cooldown <= config.cooldown_for_trip(trip + 1));
        if trip as usize >= cooldowns.len() {
            prop_assert_eq!(cooldown, Duration::from_secs(*cooldowns.last().unwrap()));
        }
    }
}

// =============================================================================
// Error Classification Properties
// =============================================================================

proptest! {
    /// Classification never panics and ignores case
    #[test]
    fn classify_case_insensitive(message in ".{0,80}") {
        prop_assert_eq!(classify(&message), classify(&message.to_ascii_uppercase()));
    }

    /// Anything mentioning a timeout without a lock marker is transient
    #[test]
    fn classify_timeout_is_transient(prefix in "[a-z ]{0,20}", suffix in "[0-9 ]{0,20}") {
        let message = format!("{prefix}timeout{suffix}");
        prop_assume!(!LOCK_MARKERS.iter().any(|m| message.contains(m)));
        prop_assert_eq!(classify(&message), ErrorClass::Transient);
    }
}

// =============================================================================
// Election Properties
// =============================================================================

proptest! {
    /// The failed node is never elected
    #[test]
    fn election_never_returns_failed_node(candidates in candidates(), failed in 0usize..8, allow in any::<bool>()) {
        let failed = format!("n{failed}");
        if let Some(chosen) = elect_backup(&failed, &candidates, allow).candidate() {
            prop_assert_ne!(&chosen.node_id, &failed);
        }
    }

    /// A healthy candidate, when one exists, wins with the lowest priority
    #[test]
    fn election_prefers_lowest_priority_healthy(candidates in candidates(), allow in any::<bool>()) {
        let failed = "n0";
        let best = candidates
            .iter()
            .filter(|c| c.node_id != failed && c.health == HealthState::Healthy)
            .map(|c| c.priority)
            .min();

        match (elect_backup(failed, &candidates, allow), best) {
            (Election::Healthy(chosen), Some(priority)) => prop_assert_eq!(chosen.priority, priority),
            (Election::Healthy(_), None) => prop_assert!(false, "healthy election without healthy candidate"),
            (other, Some(_)) => prop_assert!(false, "expected healthy election, got {:?}", other),
            (Election::Fallback(_), None) => prop_assert!(allow),
            (Election::None, None) => {}
        }
    }
}

// =============================================================================
// Health Scoring Properties
// =============================================================================

proptest! {
    /// Score stays within [0, 100] and maps onto a label
    #[test]
    fn health_score_clamped(
        failed in 0usize..50,
        degraded in 0usize..50,
        healthy in 0usize..50,
        quality in 0.0f64..=100.0,
        failure_rate in 0.0f64..=100.0,
    ) {
        let counts = HealthCounts { unknown: 0, healthy, degraded, failed };
        let score = health_score(&counts, quality, failure_rate);
        prop_assert!((0.0..=100.0).contains(&score));

        let label = HealthLabel::from_score(score);
        if score >= 90.0 {
            prop_assert_eq!(label, HealthLabel::Excellent);
        } else if score < 50.0 {
            prop_assert_eq!(label, HealthLabel::Critical);
        }
    }

    /// Balance quality stays within [0, 100]; equal queues are perfectly balanced
    #[test]
    fn balance_quality_in_range(queues in prop::collection::vec(0u64..10_000, 0..16), level in 0u64..10_000) {
        let quality = balance_quality(&queues);
        prop_assert!((0.0..=100.0).contains(&quality));

        let equal = vec![level; queues.len()];
        prop_assert_eq!(balance_quality(&equal), 100.0);
    }
}

// =============================================================================
// Failure Detection Properties
// =============================================================================

proptest! {
    /// Status always agrees with the failure streak, and each streak reaching
    /// the threshold is counted exactly once
    #[test]
    fn probe_sequence_consistent(outcomes in prop::collection::vec(any::<bool>(), 1..64), threshold in 1u32..6) {
        let node = Node::new("n", None);
        let mut failed_events = 0u64;
        let mut streak = 0u32;
        let mut streaks_failed = 0u64;

        for connected in outcomes {
            let seq = node.begin_probe();
            let outcome = ProbeOutcome {
                connected,
                error: (!connected).then(|| "down".to_string()),
                response_time: Duration::from_millis(1),
            };
            if let HealthChange::Failed { .. } = node.apply_probe(seq, &outcome, threshold) {
                failed_events += 1;
            }

            if connected {
                streak = 0;
            } else {
                streak += 1;
                if streak == threshold {
                    streaks_failed += 1;
                }
            }

            let health = node.health();
            prop_assert_eq!(health.consecutive_failures, streak);
            let expected = match streak {
                0 => HealthState::Healthy,
                s if s >= threshold => HealthState::Failed,
                _ => HealthState::Degraded,
            };
            prop_assert_eq!(health.status, expected);
        }

        prop_assert_eq!(failed_events, streaks_failed);
        prop_assert_eq!(node.failure_metrics().total_failures, streaks_failed);
    }
}
