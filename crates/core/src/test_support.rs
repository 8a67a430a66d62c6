// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Test builders shared across crates (behind the `test-support` feature).

use crate::run::{Run, RunStatus};
use crate::task::{Complexity, Task, TaskStatus, TaskType};
use chrono::{DateTime, Utc};

/// A fixed timestamp (2026-01-15T12:00:00Z) for deterministic tests.
pub fn epoch() -> DateTime<Utc> {
    DateTime::from_timestamp(1_768_478_400, 0).unwrap_or(DateTime::<Utc>::UNIX_EPOCH)
}

/// A minimal open task with defaults a test can override.
pub fn task(short_id: &str, title: &str) -> Task {
    Task {
        short_id: short_id.to_string(),
        title: title.to_string(),
        description: None,
        status: TaskStatus::Open,
        task_type: TaskType::Task,
        priority: 2,
        complexity: Complexity::Simple,
        labels: Default::default(),
        blocked_by: Vec::new(),
        epic_id: None,
        agent: None,
        last_review_issues: None,
        commit_hash: None,
        reason: None,
        consumed: false,
        consumed_at: None,
        created_at: epoch(),
        updated_at: epoch(),
    }
}

/// A running run record for the given task.
pub fn running_run(short_id: &str, task_id: &str, agent: &str) -> Run {
    Run::started(
        short_id.to_string(),
        task_id.to_string(),
        agent.to_string(),
        epoch(),
    )
}

/// A terminal run record with the given exit code.
pub fn finished_run(short_id: &str, task_id: &str, agent: &str, exit_code: i32) -> Run {
    let mut run = running_run(short_id, task_id, agent);
    run.status = if exit_code == 0 {
        RunStatus::Completed
    } else {
        RunStatus::Failed
    };
    run.exit_code = Some(exit_code);
    run.ended_at = Some(epoch());
    run.duration_seconds = Some(0);
    run
}
