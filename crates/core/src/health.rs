// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Per-agent health: success/failure counters and backoff windows.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Backoff window per consecutive-failure index, saturating at the last.
pub const BACKOFF_SCHEDULE_SECS: [u64; 5] = [30, 60, 120, 240, 480];

/// Backoff for the `n`th consecutive failure (1-indexed).
pub fn backoff_secs(consecutive_failures: u32) -> u64 {
    let idx = (consecutive_failures.saturating_sub(1) as usize).min(BACKOFF_SCHEDULE_SECS.len() - 1);
    BACKOFF_SCHEDULE_SECS[idx]
}

/// How a completion failed, for health accounting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// Agent crashed or exited nonzero.
    Failed,
    /// Transient network failure — backs off, then retries.
    Network,
    /// Agent needs a human to grant permissions — no retry delay.
    Permission,
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            FailureKind::Failed => "failed",
            FailureKind::Network => "network",
            FailureKind::Permission => "permission",
        };
        write!(f, "{s}")
    }
}

/// Health record for one agent, keyed by agent name.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentHealth {
    pub agent: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_success_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_failure_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub consecutive_failures: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub backoff_until: Option<DateTime<Utc>>,
    #[serde(default)]
    pub total_runs: u64,
    #[serde(default)]
    pub total_successes: u64,
}

impl AgentHealth {
    pub fn new(agent: impl Into<String>) -> Self {
        Self {
            agent: agent.into(),
            last_success_at: None,
            last_failure_at: None,
            consecutive_failures: 0,
            backoff_until: None,
            total_runs: 0,
            total_successes: 0,
        }
    }

    /// An agent is available when no backoff window is open.
    pub fn is_available(&self, now: DateTime<Utc>) -> bool {
        match self.backoff_until {
            None => true,
            Some(until) => until <= now,
        }
    }

    /// An agent is dead once it has failed `max_retries` times in a row.
    pub fn is_dead(&self, max_retries: u32) -> bool {
        self.consecutive_failures >= max_retries
    }
}

#[cfg(test)]
#[path = "health_tests.rs"]
mod tests;
