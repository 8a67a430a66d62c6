// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Run records: one per agent invocation against a task.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// `run.output` is truncated to its final bytes at this limit.
pub const OUTPUT_TAIL_LIMIT: usize = 10 * 1024;

/// Lifecycle status of a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Running,
    Completed,
    Failed,
}

impl RunStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, RunStatus::Completed | RunStatus::Failed)
    }
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            RunStatus::Running => "running",
            RunStatus::Completed => "completed",
            RunStatus::Failed => "failed",
        };
        write!(f, "{s}")
    }
}

/// One agent invocation for a task.
///
/// Invariants: `Running` ⇒ `ended_at` is `None`; terminal ⇒ `ended_at` is
/// set and `duration_seconds == ended_at − started_at`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Run {
    /// Globally unique `run-<6 hex>` id.
    pub short_id: String,
    /// Short id of the task this run executed.
    pub task_id: String,
    pub agent: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    pub started_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ended_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exit_code: Option<i32>,
    /// Tail-truncated combined output (at most [`OUTPUT_TAIL_LIMIT`] bytes).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cost_usd: Option<f64>,
    pub status: RunStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration_seconds: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pid: Option<u32>,
    /// Instance id of the runner that spawned this run.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub runner_instance_id: Option<String>,
}

impl Run {
    /// Create a fresh running record.
    pub fn started(
        short_id: String,
        task_id: String,
        agent: String,
        started_at: DateTime<Utc>,
    ) -> Self {
        Self {
            short_id,
            task_id,
            agent,
            model: None,
            started_at,
            ended_at: None,
            exit_code: None,
            output: None,
            session_id: None,
            cost_usd: None,
            status: RunStatus::Running,
            duration_seconds: None,
            pid: None,
            runner_instance_id: None,
        }
    }
}

/// Partial update to a run, applied as one store event.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RunPatch {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<RunStatus>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ended_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exit_code: Option<i32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cost_usd: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pid: Option<u32>,
}

impl RunPatch {
    pub fn apply_to(&self, run: &mut Run) {
        if let Some(status) = self.status {
            run.status = status;
        }
        if let Some(ended_at) = self.ended_at {
            run.ended_at = Some(ended_at);
        }
        if let Some(exit_code) = self.exit_code {
            run.exit_code = Some(exit_code);
        }
        if let Some(ref output) = self.output {
            run.output = Some(truncate_output_tail(output));
        }
        if let Some(ref session_id) = self.session_id {
            run.session_id = Some(session_id.clone());
        }
        if let Some(cost_usd) = self.cost_usd {
            run.cost_usd = Some(cost_usd);
        }
        if let Some(ref model) = self.model {
            run.model = Some(model.clone());
        }
        if let Some(pid) = self.pid {
            run.pid = Some(pid);
        }
        // Derived field: kept consistent on every terminal write
        if let Some(ended_at) = run.ended_at {
            run.duration_seconds = Some((ended_at - run.started_at).num_seconds());
        }
    }
}

/// Keep only the final [`OUTPUT_TAIL_LIMIT`] bytes, aligned to a char boundary.
///
/// Truncation is silent: no marker is inserted.
pub fn truncate_output_tail(output: &str) -> String {
    if output.len() <= OUTPUT_TAIL_LIMIT {
        return output.to_string();
    }
    let mut start = output.len() - OUTPUT_TAIL_LIMIT;
    while !output.is_char_boundary(start) {
        start += 1;
    }
    output[start..].to_string()
}

#[cfg(test)]
#[path = "run_tests.rs"]
mod tests;
