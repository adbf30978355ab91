//! Fuzz target for configuration parsing.
//!
//! Any JSON document either fails to parse, fails validation, or yields a
//! config whose duration accessors all succeed.

#![no_main]

use fleet_engine::FleetConfig;
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    let Ok(config) = serde_json::from_slice::<FleetConfig>(data) else {
        return;
    };
    if config.validate().is_err() {
        return;
    }
    let failover = &config.settings.failover;
    let _ = failover.prepare_timeout_duration();
    let _ = failover.transfer_timeout_duration();
    let _ = failover.activation_timeout_duration();
    let _ = failover.routing_timeout_duration();
    let _ = config.settings.detector.probe_interval();
});
