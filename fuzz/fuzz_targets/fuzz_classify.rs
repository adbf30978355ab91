//! Fuzz target for connect error classification.
//!
//! This tests that `classify` never panics on arbitrary input and ignores
//! ASCII case.

#![no_main]

use fleet_engine::connection::classify;
use libfuzzer_sys::fuzz_target;

fuzz_target!(|message: &str| {
    // Should never panic
    let class = classify(message);
    let _ = class.as_str();

    // Case must not matter
    assert_eq!(class, classify(&message.to_ascii_uppercase()));
});
