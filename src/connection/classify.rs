// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Connect error classification.
//!
//! Errors are matched case-insensitively against fixed substring tables.
//! Lock errors win over transient ones; anything unmatched is critical.

use serde::Serialize;

/// How a connect failure is handled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorClass {
    /// Retried via backoff, not counted toward the circuit breaker.
    Transient,
    /// Counted toward the circuit breaker.
    Critical,
    /// Another session holds the node's resources. Cleanup-and-retry.
    ResourceLocked,
}

impl ErrorClass {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Transient => "transient",
            Self::Critical => "critical",
            Self::ResourceLocked => "resource_locked",
        }
    }
}

const LOCK_PATTERNS: &[&str] = &[
    "already running",
    "singletonlock",
    "processsingleton",
    "resource locked",
    "already in use",
    "ebusy",
];

const TRANSIENT_PATTERNS: &[&str] = &[
    "timeout",
    "timed out",
    "target closed",
    "protocol error",
    "execution context was destroyed",
    "session closed",
    "net::err_",
    "navigation failed",
];

pub fn classify(message: &str) -> ErrorClass {
    let lower = message.to_ascii_lowercase();
    if LOCK_PATTERNS.iter().any(|p| lower.contains(p)) {
        ErrorClass::ResourceLocked
    } else if TRANSIENT_PATTERNS.iter().any(|p| lower.contains(p)) {
        ErrorClass::Transient
    } else {
        ErrorClass::Critical
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transient_patterns() {
        for msg in [
            "Navigation timeout of 30000 ms exceeded",
            "Protocol error (Runtime.callFunctionOn): Target closed.",
            "Execution context was destroyed, most likely because of a navigation",
            "net::ERR_CONNECTION_RESET at https://example.invalid",
            "Session closed. Most likely the page has been closed.",
            "request TIMED OUT",
        ] {
            assert_eq!(classify(msg), ErrorClass::Transient, "{msg}");
        }
    }

    #[test]
    fn test_lock_patterns() {
        for msg in [
            "Failed to create SingletonLock: File exists",
            "The browser is already running for this profile",
            "ProcessSingleton: profile in use",
            "EBUSY: resource busy or locked",
        ] {
            assert_eq!(classify(msg), ErrorClass::ResourceLocked, "{msg}");
        }
    }

    #[test]
    fn test_lock_wins_over_transient() {
        assert_eq!(
            classify("timeout waiting for SingletonLock"),
            ErrorClass::ResourceLocked
        );
    }

    #[test]
    fn test_unmatched_is_critical() {
        assert_eq!(classify("auth failure: logged out"), ErrorClass::Critical);
        assert_eq!(classify(""), ErrorClass::Critical);
    }
}
