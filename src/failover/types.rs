// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Failover records, pipeline steps and history.

use serde::Serialize;
use std::collections::VecDeque;

/// One step of the failover pipeline, in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FailoverStep {
    VerifyBackup,
    PrepareBackup,
    TransferState,
    ActivateBackup,
    UpdateRouting,
}

impl FailoverStep {
    pub const ALL: [FailoverStep; 5] = [
        Self::VerifyBackup,
        Self::PrepareBackup,
        Self::TransferState,
        Self::ActivateBackup,
        Self::UpdateRouting,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::VerifyBackup => "verify_backup",
            Self::PrepareBackup => "prepare_backup",
            Self::TransferState => "transfer_state",
            Self::ActivateBackup => "activate_backup",
            Self::UpdateRouting => "update_routing",
        }
    }
}

impl std::fmt::Display for FailoverStep {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FailoverStatus {
    InProgress,
    Completed,
    Failed,
}

impl FailoverStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::InProgress => "in_progress",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }
}

/// One failover attempt. Immutable once appended to history.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FailoverRecord {
    pub id: String,
    pub failed_node: String,
    pub backup_node: String,
    pub status: FailoverStatus,
    pub start_ms: u64,
    pub end_ms: Option<u64>,
    pub duration_ms: Option<u64>,
    pub error: Option<String>,
    pub failed_step: Option<FailoverStep>,
    /// Set when a failed attempt's rollback ran to completion.
    pub rolled_back: bool,
    /// Election fell back to a node that was not healthy.
    pub degraded_election: bool,
}

/// Result of asking for a failover.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FailoverOutcome {
    /// A failover for this node is active or retained; nothing was done.
    AlreadyInProgress,
    /// Election found no backup; a `NoBackupAvailable` event was emitted.
    NoBackup,
    Completed(FailoverRecord),
}

/// Aggregate over the retained history.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct FailoverStats {
    pub total: usize,
    pub completed: usize,
    pub failed: usize,
    /// Percent of finished failovers that failed, 0 with no history.
    pub failure_rate_percent: f64,
    pub success_rate_percent: f64,
    pub average_duration_ms: Option<u64>,
}

/// Bounded failover history, oldest evicted first.
#[derive(Debug)]
pub struct FailoverHistory {
    limit: usize,
    records: VecDeque<FailoverRecord>,
}

impl FailoverHistory {
    pub fn new(limit: usize) -> Self {
        Self {
            limit: limit.max(1),
            records: VecDeque::new(),
        }
    }

    pub fn push(&mut self, record: FailoverRecord) {
        if self.records.len() == self.limit {
            self.records.pop_front();
        }
        self.records.push_back(record);
    }

    pub fn records(&self) -> Vec<FailoverRecord> {
        self.records.iter().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn stats(&self) -> FailoverStats {
        let completed = self
            .records
            .iter()
            .filter(|r| r.status == FailoverStatus::Completed)
            .count();
        let failed = self
            .records
            .iter()
            .filter(|r| r.status == FailoverStatus::Failed)
            .count();
        let finished = completed + failed;

        let (failure_rate_percent, success_rate_percent) = if finished == 0 {
            (0.0, 0.0)
        } else {
            (
                failed as f64 * 100.0 / finished as f64,
                completed as f64 * 100.0 / finished as f64,
            )
        };

        let durations: Vec<u64> = self
            .records
            .iter()
            .filter(|r| r.status == FailoverStatus::Completed)
            .filter_map(|r| r.duration_ms)
            .collect();
        let average_duration_ms = if durations.is_empty() {
            None
        } else {
            Some(durations.iter().sum::<u64>() / durations.len() as u64)
        };

        FailoverStats {
            total: self.records.len(),
            completed,
            failed,
            failure_rate_percent,
            success_rate_percent,
            average_duration_ms,
        }
    }
}
