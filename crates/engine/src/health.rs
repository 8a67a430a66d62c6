// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Health tracker: per-agent success/failure accounting and backoff.
//!
//! The canonical state lives in the store; every method commits a single
//! event carrying the new counters and the computed backoff window, so
//! records stay correct under replay.

use crate::error::EngineError;
use crate::store::Store;
use chrono::Duration;
use fuel_core::{backoff_secs, AgentHealth, Clock, FailureKind, StoreEvent};
use std::sync::Arc;

/// Coarse availability classification for one agent.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HealthStatus {
    #[default]
    Healthy,
    Backoff,
    Dead,
}

impl std::fmt::Display for HealthStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            HealthStatus::Healthy => "healthy",
            HealthStatus::Backoff => "backoff",
            HealthStatus::Dead => "dead",
        };
        write!(f, "{s}")
    }
}

pub struct HealthTracker {
    store: Arc<Store>,
    clock: Arc<dyn Clock>,
}

impl HealthTracker {
    pub fn new(store: Arc<Store>, clock: Arc<dyn Clock>) -> Self {
        Self { store, clock }
    }

    /// Record a successful run: counters reset, backoff cleared.
    pub fn record_success(&self, agent: &str) -> Result<(), EngineError> {
        let (total_runs, total_successes) = self.store.with_state(|state| {
            let record = state.health.get(agent);
            (
                record.map(|h| h.total_runs).unwrap_or(0) + 1,
                record.map(|h| h.total_successes).unwrap_or(0) + 1,
            )
        });

        self.store.commit(StoreEvent::HealthSuccess {
            agent: agent.to_string(),
            at: self.clock.now(),
            total_runs,
            total_successes,
        })?;
        Ok(())
    }

    /// Record a failed run and open the next backoff window.
    ///
    /// Permission failures record the counter but set no backoff — the
    /// agent needs human intervention, not a retry delay.
    pub fn record_failure(&self, agent: &str, kind: FailureKind) -> Result<(), EngineError> {
        let (consecutive_failures, total_runs) = self.store.with_state(|state| {
            let record = state.health.get(agent);
            (
                record.map(|h| h.consecutive_failures).unwrap_or(0) + 1,
                record.map(|h| h.total_runs).unwrap_or(0) + 1,
            )
        });

        let now = self.clock.now();
        let backoff_until = match kind {
            FailureKind::Permission => None,
            FailureKind::Failed | FailureKind::Network => {
                Some(now + Duration::seconds(backoff_secs(consecutive_failures) as i64))
            }
        };

        self.store.commit(StoreEvent::HealthFailure {
            agent: agent.to_string(),
            kind,
            at: now,
            consecutive_failures,
            backoff_until,
            total_runs,
        })?;
        Ok(())
    }

    /// True when no backoff window is open for the agent.
    pub fn is_available(&self, agent: &str) -> bool {
        let now = self.clock.now();
        self.store.with_state(|state| {
            state
                .health
                .get(agent)
                .map(|h| h.is_available(now))
                .unwrap_or(true)
        })
    }

    /// Seconds remaining in the agent's backoff window (0 when available).
    pub fn backoff_seconds(&self, agent: &str) -> u64 {
        let now = self.clock.now();
        self.store.with_state(|state| {
            state
                .health
                .get(agent)
                .and_then(|h| h.backoff_until)
                .map(|until| (until - now).num_seconds().max(0) as u64)
                .unwrap_or(0)
        })
    }

    /// True once the agent has hit `max_retries` consecutive failures.
    pub fn is_dead(&self, agent: &str, max_retries: u32) -> bool {
        self.store.with_state(|state| {
            state
                .health
                .get(agent)
                .map(|h| h.is_dead(max_retries))
                .unwrap_or(false)
        })
    }

    /// Forget everything recorded about the agent.
    pub fn clear_health(&self, agent: &str) -> Result<(), EngineError> {
        self.store.commit(StoreEvent::HealthCleared {
            agent: agent.to_string(),
        })?;
        Ok(())
    }

    /// All health records, sorted by agent name.
    pub fn all_health(&self) -> Vec<AgentHealth> {
        let mut records: Vec<AgentHealth> =
            self.store.with_state(|state| state.health.values().cloned().collect());
        records.sort_by(|a, b| a.agent.cmp(&b.agent));
        records
    }

    /// Coarse status for snapshots and change detection.
    pub fn status(&self, agent: &str, max_retries: u32) -> HealthStatus {
        if self.is_dead(agent, max_retries) {
            HealthStatus::Dead
        } else if !self.is_available(agent) {
            HealthStatus::Backoff
        } else {
            HealthStatus::Healthy
        }
    }
}

#[cfg(test)]
#[path = "health_tests.rs"]
mod tests;
