// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Alert records and the bounded alert history.

use crate::epoch_millis;
use serde::Serialize;
use std::collections::VecDeque;
use uuid::Uuid;

/// Alert severity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Severity {
    Info,
    Warning,
    Critical,
}

impl Severity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Info => "INFO",
            Self::Warning => "WARNING",
            Self::Critical => "CRITICAL",
        }
    }
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One raised alert. Acknowledgment is the only mutation after creation.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Alert {
    pub id: String,
    pub severity: Severity,
    /// Stable machine-readable type, e.g. `node_failed`, `queue_critical`.
    #[serde(rename = "type")]
    pub alert_type: String,
    pub data: serde_json::Value,
    pub timestamp_ms: u64,
    pub acknowledged: bool,
}

impl Alert {
    pub fn new(severity: Severity, alert_type: impl Into<String>, data: serde_json::Value) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            severity,
            alert_type: alert_type.into(),
            data,
            timestamp_ms: epoch_millis(),
            acknowledged: false,
        }
    }
}

/// Append-only alert history, oldest evicted first once full.
#[derive(Debug)]
pub struct AlertLog {
    limit: usize,
    alerts: VecDeque<Alert>,
}

impl AlertLog {
    pub fn new(limit: usize) -> Self {
        Self {
            limit: limit.max(1),
            alerts: VecDeque::new(),
        }
    }

    pub fn push(&mut self, alert: Alert) {
        if self.alerts.len() == self.limit {
            self.alerts.pop_front();
        }
        self.alerts.push_back(alert);
    }

    /// Returns false if no alert has this id.
    pub fn acknowledge(&mut self, id: &str) -> bool {
        match self.alerts.iter_mut().find(|a| a.id == id) {
            Some(alert) => {
                alert.acknowledged = true;
                true
            }
            None => false,
        }
    }

    pub fn clear(&mut self) {
        self.alerts.clear();
    }

    /// Newest last.
    pub fn list(&self) -> Vec<Alert> {
        self.alerts.iter().cloned().collect()
    }

    pub fn unacknowledged(&self) -> Vec<Alert> {
        self.alerts
            .iter()
            .filter(|a| !a.acknowledged)
            .cloned()
            .collect()
    }

    /// The `n` most recent alerts, newest first.
    pub fn recent(&self, n: usize) -> Vec<Alert> {
        self.alerts.iter().rev().take(n).cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.alerts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.alerts.is_empty()
    }
}
