// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Store events: the write-ahead-logged facts every board mutation
//! reduces to.
//!
//! Serializes with `{"type": "entity:verb", ...fields}` format. Each event
//! is one transaction: compound writes (start a task + create its run,
//! trigger a review) are single events so they commit and replay
//! atomically. Events carry assigned values — new counters, computed
//! backoff windows — never deltas, so applying an event twice produces the
//! same state as applying it once.

use crate::epic::Epic;
use crate::health::FailureKind;
use crate::review::Review;
use crate::run::{Run, RunPatch};
use crate::task::{Task, TaskPatch};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum StoreEvent {
    // -- task --
    #[serde(rename = "task:created")]
    TaskCreated { task: Task },

    #[serde(rename = "task:updated")]
    TaskUpdated {
        id: String,
        patch: TaskPatch,
        updated_at: DateTime<Utc>,
    },

    /// Task handed to an agent: status → in_progress, consumed, run row
    /// created — one transaction.
    #[serde(rename = "task:spawned")]
    TaskSpawned {
        task_id: String,
        run: Run,
        updated_at: DateTime<Utc>,
    },

    /// Spawn failed after the task was claimed: status back to open.
    /// The run row is left for orphan cleanup.
    #[serde(rename = "task:spawn_reverted")]
    TaskSpawnReverted {
        task_id: String,
        run_id: String,
        updated_at: DateTime<Utc>,
    },

    #[serde(rename = "task:dependency_added")]
    DependencyAdded {
        task_id: String,
        blocker_id: String,
        updated_at: DateTime<Utc>,
    },

    #[serde(rename = "task:dependency_removed")]
    DependencyRemoved {
        task_id: String,
        blocker_id: String,
        updated_at: DateTime<Utc>,
    },

    // -- run --
    #[serde(rename = "run:created")]
    RunCreated { run: Run },

    #[serde(rename = "run:updated")]
    RunUpdated { run_id: String, patch: RunPatch },

    // -- review --
    /// Review launched: review row + reviewer run row + task status →
    /// review — one transaction.
    #[serde(rename = "review:triggered")]
    ReviewTriggered {
        task_id: String,
        review: Review,
        run: Run,
        updated_at: DateTime<Utc>,
    },

    #[serde(rename = "review:completed")]
    ReviewCompleted {
        review_id: String,
        passed: bool,
        issues: Vec<String>,
        completed_at: DateTime<Utc>,
    },

    // -- agent health --
    #[serde(rename = "health:success")]
    HealthSuccess {
        agent: String,
        at: DateTime<Utc>,
        /// Post-increment totals, assigned not accumulated.
        total_runs: u64,
        total_successes: u64,
    },

    #[serde(rename = "health:failure")]
    HealthFailure {
        agent: String,
        kind: FailureKind,
        at: DateTime<Utc>,
        /// Post-increment counter, assigned not accumulated.
        consecutive_failures: u32,
        /// None for permission failures (no retry delay).
        #[serde(default, skip_serializing_if = "Option::is_none")]
        backoff_until: Option<DateTime<Utc>>,
        total_runs: u64,
    },

    #[serde(rename = "health:cleared")]
    HealthCleared { agent: String },

    // -- epic --
    #[serde(rename = "epic:created")]
    EpicCreated { epic: Epic },

    #[serde(rename = "epic:updated")]
    EpicUpdated {
        id: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        status: Option<crate::epic::EpicStatus>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        title: Option<String>,
        updated_at: DateTime<Utc>,
    },
}

impl StoreEvent {
    /// Short id of the task this event touches, if any.
    pub fn task_id(&self) -> Option<&str> {
        match self {
            StoreEvent::TaskCreated { task } => Some(&task.short_id),
            StoreEvent::TaskUpdated { id, .. } => Some(id),
            StoreEvent::TaskSpawned { task_id, .. }
            | StoreEvent::TaskSpawnReverted { task_id, .. }
            | StoreEvent::DependencyAdded { task_id, .. }
            | StoreEvent::DependencyRemoved { task_id, .. }
            | StoreEvent::ReviewTriggered { task_id, .. } => Some(task_id),
            _ => None,
        }
    }
}

#[cfg(test)]
#[path = "event_tests.rs"]
mod tests;
