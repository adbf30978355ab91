//! Mock ProbeSource for testing.
//!
//! Liveness is set per node; unknown nodes probe live. Optional per-node
//! delays exercise the probe timeout.

use fleet_engine::handle::{BoxFuture, Liveness, ProbeSource};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::time::Duration;

/// Scripted liveness source.
///
/// # Example
/// ```rust,ignore
/// let probe = Arc::new(MockProbe::new());
/// probe.set_down("a", "socket closed");
///
/// // Three probe cycles later "a" is failed
///
/// assert!(probe.calls("a") >= 3);
/// ```
#[derive(Default)]
pub struct MockProbe {
    liveness: Mutex<HashMap<String, Liveness>>,
    delays: Mutex<HashMap<String, Duration>>,
    calls: Mutex<HashMap<String, u32>>,
}

#[allow(dead_code)]
impl MockProbe {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_up(&self, node_id: &str) {
        self.liveness
            .lock()
            .insert(node_id.to_string(), Liveness::up());
    }

    pub fn set_down(&self, node_id: &str, error: &str) {
        self.liveness
            .lock()
            .insert(node_id.to_string(), Liveness::down(error));
    }

    /// Hold every probe of `node_id` for `delay` before answering.
    pub fn set_delay(&self, node_id: &str, delay: Duration) {
        self.delays.lock().insert(node_id.to_string(), delay);
    }

    pub fn calls(&self, node_id: &str) -> u32 {
        self.calls.lock().get(node_id).copied().unwrap_or(0)
    }
}

impl ProbeSource for MockProbe {
    fn liveness<'a>(&'a self, node_id: &'a str) -> BoxFuture<'a, Liveness> {
        *self.calls.lock().entry(node_id.to_string()).or_default() += 1;
        let liveness = self
            .liveness
            .lock()
            .get(node_id)
            .cloned()
            .unwrap_or_else(Liveness::up);
        let delay = self.delays.lock().get(node_id).copied();

        Box::pin(async move {
            if let Some(delay) = delay {
                tokio::time::sleep(delay).await;
            }
            Ok(liveness)
        })
    }
}
