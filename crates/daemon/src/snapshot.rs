// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Board snapshot assembly and the content hash gating periodic
//! broadcasts.
//!
//! A snapshot is a point-in-time view; events emitted after its capture
//! supersede it per entity. The content hash covers only the stable
//! projection (per-status id sets, active task ids, paused flag) so that
//! timestamp churn alone never re-broadcasts.

use chrono::{DateTime, Utc};
use fuel_core::{Task, TaskStatus, NEEDS_HUMAN_LABEL};
use fuel_engine::{ActiveProcess, HealthStatus};
use fuel_storage::MaterializedState;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::{BTreeMap, HashMap};

/// Done column is capped; `done_count` carries the true total.
const DONE_COLUMN_LIMIT: usize = 50;

/// Client-facing projection of a task.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskView {
    pub short_id: String,
    pub title: String,
    pub status: TaskStatus,
    #[serde(rename = "type")]
    pub task_type: fuel_core::TaskType,
    pub priority: u8,
    pub complexity: fuel_core::Complexity,
    #[serde(default)]
    pub labels: Vec<String>,
    #[serde(default)]
    pub blocked_by: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub epic_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub agent: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_review_issues: Option<Vec<String>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<&Task> for TaskView {
    fn from(task: &Task) -> Self {
        Self {
            short_id: task.short_id.clone(),
            title: task.title.clone(),
            status: task.status,
            task_type: task.task_type,
            priority: task.priority,
            complexity: task.complexity,
            labels: task.labels.iter().cloned().collect(),
            blocked_by: task.blocked_by.clone(),
            epic_id: task.epic_id.clone(),
            agent: task.agent.clone(),
            last_review_issues: task.last_review_issues.clone(),
            created_at: task.created_at,
            updated_at: task.updated_at,
        }
    }
}

/// One board column per scheduling state.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BoardState {
    pub ready: Vec<TaskView>,
    pub in_progress: Vec<TaskView>,
    pub review: Vec<TaskView>,
    pub blocked: Vec<TaskView>,
    /// Open tasks tagged `needs-human`.
    pub human: Vec<TaskView>,
    pub done: Vec<TaskView>,
}

/// Active process projection including the live output ring tail.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActiveProcessView {
    #[serde(flatten)]
    pub process: ActiveProcess,
    #[serde(default)]
    pub output_tail: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct HealthSummaryEntry {
    pub status: HealthStatus,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunnerState {
    pub paused: bool,
    pub started_at: DateTime<Utc>,
    pub instance_id: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ConfigView {
    pub interval_seconds: u64,
    /// Configured agent names.
    pub agents: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EpicView {
    pub short_id: String,
    pub title: String,
    pub status: fuel_core::EpicStatus,
}

/// Point-in-time view of the whole board.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BoardSnapshot {
    pub board_state: BoardState,
    pub active_processes: BTreeMap<String, ActiveProcessView>,
    pub health_summary: BTreeMap<String, HealthSummaryEntry>,
    pub runner_state: RunnerState,
    pub config: ConfigView,
    pub epics: Vec<EpicView>,
    pub done_count: usize,
    pub blocked_count: usize,
}

/// Inputs the runner contributes beyond the stored state.
pub struct SnapshotInputs<'a> {
    pub active: &'a HashMap<String, ActiveProcessView>,
    pub health: &'a BTreeMap<String, HealthStatus>,
    pub paused: bool,
    pub started_at: DateTime<Utc>,
    pub instance_id: &'a str,
    pub interval_seconds: u64,
    pub agent_names: Vec<String>,
}

/// Assemble a snapshot from the materialized state.
pub fn build_snapshot(state: &MaterializedState, inputs: &SnapshotInputs<'_>) -> BoardSnapshot {
    let blocked_ids: std::collections::HashSet<String> =
        state.blocked_task_ids().into_iter().collect();

    let mut board = BoardState::default();
    let mut done: Vec<&Task> = Vec::new();
    let mut done_count = 0usize;

    for task in state.tasks.values() {
        match task.status {
            TaskStatus::Open => {
                if task.labels.contains(NEEDS_HUMAN_LABEL) {
                    board.human.push(TaskView::from(task));
                } else if blocked_ids.contains(&task.short_id) {
                    board.blocked.push(TaskView::from(task));
                } else if task.is_schedulable() {
                    board.ready.push(TaskView::from(task));
                }
                // reality-type tasks are visible nowhere on the board
            }
            TaskStatus::InProgress => board.in_progress.push(TaskView::from(task)),
            TaskStatus::Review => board.review.push(TaskView::from(task)),
            TaskStatus::Done => {
                done_count += 1;
                done.push(task);
            }
            TaskStatus::Someday | TaskStatus::Cancelled => {}
        }
    }

    for column in [
        &mut board.ready,
        &mut board.in_progress,
        &mut board.review,
        &mut board.blocked,
        &mut board.human,
    ] {
        column.sort_by(|a, b| {
            a.priority
                .cmp(&b.priority)
                .then_with(|| a.created_at.cmp(&b.created_at))
                .then_with(|| a.short_id.cmp(&b.short_id))
        });
    }

    // Most recently finished first
    done.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
    board.done = done
        .into_iter()
        .take(DONE_COLUMN_LIMIT)
        .map(TaskView::from)
        .collect();

    let mut epics: Vec<EpicView> = state
        .epics
        .values()
        .map(|e| EpicView {
            short_id: e.short_id.clone(),
            title: e.title.clone(),
            status: e.status,
        })
        .collect();
    epics.sort_by(|a, b| a.short_id.cmp(&b.short_id));

    let blocked_count = board.blocked.len();

    BoardSnapshot {
        board_state: board,
        active_processes: inputs
            .active
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect(),
        health_summary: inputs
            .health
            .iter()
            .map(|(agent, status)| (agent.clone(), HealthSummaryEntry { status: *status }))
            .collect(),
        runner_state: RunnerState {
            paused: inputs.paused,
            started_at: inputs.started_at,
            instance_id: inputs.instance_id.to_string(),
        },
        config: ConfigView {
            interval_seconds: inputs.interval_seconds,
            agents: inputs.agent_names.clone(),
        },
        epics,
        done_count,
        blocked_count,
    }
}

/// Content hash over the stable projection of a snapshot.
///
/// Covers the per-status task id sets, the active task ids, and the
/// paused flag; timestamps and other volatile fields are excluded, so
/// two ticks with an unchanged board hash identically.
pub fn snapshot_content_hash(snapshot: &BoardSnapshot) -> String {
    let mut hasher = Sha256::new();

    let mut column = |name: &str, tasks: &[TaskView]| {
        hasher.update(name.as_bytes());
        let mut ids: Vec<&str> = tasks.iter().map(|t| t.short_id.as_str()).collect();
        ids.sort_unstable();
        for id in ids {
            hasher.update(id.as_bytes());
            hasher.update(b",");
        }
        hasher.update(b";");
    };

    column("ready", &snapshot.board_state.ready);
    column("in_progress", &snapshot.board_state.in_progress);
    column("review", &snapshot.board_state.review);
    column("blocked", &snapshot.board_state.blocked);
    column("human", &snapshot.board_state.human);
    column("done", &snapshot.board_state.done);

    hasher.update(b"active:");
    for task_id in snapshot.active_processes.keys() {
        hasher.update(task_id.as_bytes());
        hasher.update(b",");
    }

    hasher.update(if snapshot.runner_state.paused {
        b"paused".as_slice()
    } else {
        b"running".as_slice()
    });

    format!("{:x}", hasher.finalize())
}

#[cfg(test)]
#[path = "snapshot_tests.rs"]
mod tests;
