//! Fuzz target for reconnect backoff and circuit cooldowns.
//!
//! Arbitrary (possibly absurd) settings must never overflow or panic, and
//! the base delay must respect its cap.

#![no_main]

use fleet_engine::ConnectionConfig;
use libfuzzer_sys::fuzz_target;
use std::time::Duration;

fuzz_target!(|data: (u64, u64, u64, u32, Vec<u64>, u32)| {
    let (base_ms, max_ms, jitter_ms, attempt, cooldowns, trip) = data;
    let config = ConnectionConfig {
        reconnect_base_delay_ms: base_ms,
        reconnect_max_delay_ms: max_ms,
        reconnect_jitter_ms: jitter_ms % 1_000_000,
        circuit_cooldowns_sec: cooldowns.into_iter().map(|s| s % 1_000_000).collect(),
        ..ConnectionConfig::default()
    };

    let base = config.base_reconnect_delay(attempt);
    assert!(base <= Duration::from_millis(max_ms));
    let _ = config.reconnect_delay(attempt);
    let _ = config.cooldown_for_trip(trip);
});
