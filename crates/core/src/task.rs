// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Task record and status state machine.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

/// Label that keeps a task out of the ready set until a human clears it.
pub const NEEDS_HUMAN_LABEL: &str = "needs-human";

/// Label applied when the daemon closes a task without review.
pub const AUTO_CLOSED_LABEL: &str = "auto-closed";

/// Lowest priority value (0 is the highest priority).
pub const MAX_PRIORITY: u8 = 4;

/// Lifecycle status of a task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Open,
    InProgress,
    Review,
    Done,
    Someday,
    Cancelled,
}

impl TaskStatus {
    /// Check whether `self → to` is a legal transition.
    ///
    /// `Cancelled` is a terminal tombstone; `Done` can only be reopened.
    pub fn can_transition(self, to: TaskStatus) -> bool {
        use TaskStatus::*;
        if self == to {
            // Idempotent re-assertion of the current status is always allowed
            // (e.g. `done` on an already-done task).
            return true;
        }
        match self {
            Open => matches!(to, InProgress | Someday | Done | Cancelled),
            InProgress => matches!(to, Done | Review | Open | Cancelled),
            Review => matches!(to, Done | Open | Cancelled),
            Someday => matches!(to, Open | Cancelled),
            Done => matches!(to, Open),
            Cancelled => false,
        }
    }

    /// True for statuses no scheduler decision will ever touch again.
    pub fn is_terminal(self) -> bool {
        matches!(self, TaskStatus::Cancelled)
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            TaskStatus::Open => "open",
            TaskStatus::InProgress => "in_progress",
            TaskStatus::Review => "review",
            TaskStatus::Done => "done",
            TaskStatus::Someday => "someday",
            TaskStatus::Cancelled => "cancelled",
        };
        write!(f, "{s}")
    }
}

impl FromStr for TaskStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "open" => Ok(TaskStatus::Open),
            "in_progress" => Ok(TaskStatus::InProgress),
            "review" => Ok(TaskStatus::Review),
            "done" => Ok(TaskStatus::Done),
            "someday" => Ok(TaskStatus::Someday),
            "cancelled" => Ok(TaskStatus::Cancelled),
            other => Err(format!("unknown task status: {other}")),
        }
    }
}

/// Closed set of task kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskType {
    Bug,
    Fix,
    Feature,
    Task,
    Epic,
    Chore,
    Docs,
    Test,
    Refactor,
    /// Captures observed reality rather than work to do — never scheduled.
    Reality,
}

impl fmt::Display for TaskType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            TaskType::Bug => "bug",
            TaskType::Fix => "fix",
            TaskType::Feature => "feature",
            TaskType::Task => "task",
            TaskType::Epic => "epic",
            TaskType::Chore => "chore",
            TaskType::Docs => "docs",
            TaskType::Test => "test",
            TaskType::Refactor => "refactor",
            TaskType::Reality => "reality",
        };
        write!(f, "{s}")
    }
}

impl FromStr for TaskType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "bug" => Ok(TaskType::Bug),
            "fix" => Ok(TaskType::Fix),
            "feature" => Ok(TaskType::Feature),
            "task" => Ok(TaskType::Task),
            "epic" => Ok(TaskType::Epic),
            "chore" => Ok(TaskType::Chore),
            "docs" => Ok(TaskType::Docs),
            "test" => Ok(TaskType::Test),
            "refactor" => Ok(TaskType::Refactor),
            "reality" => Ok(TaskType::Reality),
            other => Err(format!("unknown task type: {other}")),
        }
    }
}

/// Estimated complexity, used to pick the agent for a task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Complexity {
    Trivial,
    Simple,
    Moderate,
    Complex,
}

impl fmt::Display for Complexity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Complexity::Trivial => "trivial",
            Complexity::Simple => "simple",
            Complexity::Moderate => "moderate",
            Complexity::Complex => "complex",
        };
        write!(f, "{s}")
    }
}

impl FromStr for Complexity {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "trivial" => Ok(Complexity::Trivial),
            "simple" => Ok(Complexity::Simple),
            "moderate" => Ok(Complexity::Moderate),
            "complex" => Ok(Complexity::Complex),
            other => Err(format!("unknown complexity: {other}")),
        }
    }
}

/// A unit of work with a status lifecycle and dependencies.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    /// Globally unique, immutable `f-<6 hex>` id.
    pub short_id: String,
    pub title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub status: TaskStatus,
    #[serde(rename = "type")]
    pub task_type: TaskType,
    /// 0 (highest) through 4 (lowest).
    pub priority: u8,
    pub complexity: Complexity,
    /// Labels are a set: no duplicates, strings only.
    #[serde(default)]
    pub labels: BTreeSet<String>,
    /// Ordered list of blocker task short_ids. The graph must stay acyclic.
    #[serde(default)]
    pub blocked_by: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub epic_id: Option<String>,
    /// Preferred agent override for this task.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub agent: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_review_issues: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub commit_hash: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    /// True once the daemon has spawned an agent for this task.
    #[serde(default)]
    pub consumed: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub consumed_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Task {
    /// True when the task is eligible for the ready set, ignoring blockers.
    ///
    /// Blocker resolution needs the full board and lives in the task service.
    pub fn is_schedulable(&self) -> bool {
        self.status == TaskStatus::Open
            && self.task_type != TaskType::Reality
            && !self.labels.contains(NEEDS_HUMAN_LABEL)
    }
}

/// Partial update to a task, applied as one store event.
///
/// `add_labels` / `remove_labels` are the only label mutators; both are
/// idempotent under re-application.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TaskPatch {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<TaskStatus>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub task_type: Option<TaskType>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub priority: Option<u8>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub complexity: Option<Complexity>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub add_labels: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub remove_labels: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub epic_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub agent: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_review_issues: Option<Vec<String>>,
    /// Clears `last_review_issues` (takes precedence over setting them).
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub clear_review_issues: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub commit_hash: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub consumed: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub consumed_at: Option<DateTime<Utc>>,
}

impl TaskPatch {
    /// Patch that only changes the status.
    pub fn status(status: TaskStatus) -> Self {
        Self {
            status: Some(status),
            ..Self::default()
        }
    }

    pub fn apply_to(&self, task: &mut Task) {
        if let Some(ref title) = self.title {
            task.title = title.clone();
        }
        if let Some(ref description) = self.description {
            task.description = Some(description.clone());
        }
        if let Some(status) = self.status {
            task.status = status;
        }
        if let Some(task_type) = self.task_type {
            task.task_type = task_type;
        }
        if let Some(priority) = self.priority {
            task.priority = priority;
        }
        if let Some(complexity) = self.complexity {
            task.complexity = complexity;
        }
        for label in &self.add_labels {
            task.labels.insert(label.clone());
        }
        for label in &self.remove_labels {
            task.labels.remove(label);
        }
        if let Some(ref epic_id) = self.epic_id {
            task.epic_id = Some(epic_id.clone());
        }
        if let Some(ref agent) = self.agent {
            task.agent = Some(agent.clone());
        }
        if self.clear_review_issues {
            task.last_review_issues = None;
        } else if let Some(ref issues) = self.last_review_issues {
            task.last_review_issues = Some(issues.clone());
        }
        if let Some(ref commit_hash) = self.commit_hash {
            task.commit_hash = Some(commit_hash.clone());
        }
        if let Some(ref reason) = self.reason {
            task.reason = Some(reason.clone());
        }
        if let Some(consumed) = self.consumed {
            task.consumed = consumed;
        }
        if let Some(consumed_at) = self.consumed_at {
            task.consumed_at = Some(consumed_at);
        }
    }
}

#[cfg(test)]
#[path = "task_tests.rs"]
mod tests;
