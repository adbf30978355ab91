// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Pairing challenge debounce.

use std::time::Duration;
use tokio::time::Instant;

/// Outcome of offering a pairing challenge.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PairingDecision {
    /// Show it. `first` is set when this starts a new pairing attempt.
    Accepted { attempt: u32, first: bool },
    /// Arrived inside the debounce window; drop it.
    Debounced,
}

#[derive(Debug, Default)]
pub(crate) struct PairingState {
    last_challenge: Option<Instant>,
    attempts: u32,
}

impl PairingState {
    pub(crate) fn offer(&mut self, now: Instant, debounce: Duration) -> PairingDecision {
        if let Some(last) = self.last_challenge {
            if now.saturating_duration_since(last) < debounce {
                return PairingDecision::Debounced;
            }
        }
        self.last_challenge = Some(now);
        self.attempts += 1;
        PairingDecision::Accepted {
            attempt: self.attempts,
            first: self.attempts == 1,
        }
    }

    pub(crate) fn attempts(&self) -> u32 {
        self.attempts
    }

    pub(crate) fn reset(&mut self) {
        self.last_challenge = None;
        self.attempts = 0;
    }
}
