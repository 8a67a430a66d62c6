// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Materialized board state from WAL replay.

use fuel_core::{
    AgentHealth, Epic, Review, ReviewStatus, Run, RunStatus, StoreEvent, Task, TaskStatus,
    TASK_PREFIX,
};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Result of resolving a user-supplied task id.
#[derive(Debug, Clone, PartialEq)]
pub enum TaskLookup {
    Found(String),
    NotFound,
    /// The given prefix matched several tasks; their short ids are listed.
    Ambiguous(Vec<String>),
}

/// Materialized state built from WAL events.
///
/// All entities are keyed by their `short_id` (agent health by agent
/// name). State is derived from events; events are facts about what
/// happened.
///
/// # Idempotency Requirement
///
/// **All event handlers MUST be idempotent.** Applying the same event
/// twice must produce the same state as applying it once — startup replay
/// may re-apply events the snapshot already contains. Guidelines:
///
/// - Use assignment (`=`) instead of mutation (`+=`, `-=`); counters
///   arrive pre-computed in the event payload.
/// - Guard inserts with existence checks (`if !map.contains_key(...)`).
#[derive(Debug, Default, Clone, Serialize, Deserialize)]
pub struct MaterializedState {
    pub tasks: HashMap<String, Task>,
    #[serde(default)]
    pub epics: HashMap<String, Epic>,
    #[serde(default)]
    pub runs: HashMap<String, Run>,
    #[serde(default)]
    pub reviews: HashMap<String, Review>,
    /// Agent name → health record.
    #[serde(default)]
    pub health: HashMap<String, AgentHealth>,
}

impl MaterializedState {
    /// Resolve a user-supplied task id.
    ///
    /// Accepts the exact `short_id`, the bare hex suffix (implicit `f-`
    /// prefix), or a unique prefix. Ambiguous prefixes report every match.
    pub fn lookup_task(&self, id: &str) -> TaskLookup {
        if self.tasks.contains_key(id) {
            return TaskLookup::Found(id.to_string());
        }

        // Bare suffix with implicit kind prefix
        let prefixed = format!("{TASK_PREFIX}-{id}");
        if self.tasks.contains_key(&prefixed) {
            return TaskLookup::Found(prefixed);
        }

        // Unique prefix (like git commit hashes)
        let mut matches: Vec<String> = self
            .tasks
            .keys()
            .filter(|k| k.starts_with(id) || k.starts_with(&prefixed))
            .cloned()
            .collect();
        matches.sort();

        match matches.len() {
            0 => TaskLookup::NotFound,
            1 => TaskLookup::Found(matches.remove(0)),
            _ => TaskLookup::Ambiguous(matches),
        }
    }

    /// All runs for a task, oldest first.
    pub fn runs_for_task(&self, task_id: &str) -> Vec<&Run> {
        let mut runs: Vec<&Run> = self
            .runs
            .values()
            .filter(|r| r.task_id == task_id)
            .collect();
        runs.sort_by(|a, b| {
            a.started_at
                .cmp(&b.started_at)
                .then_with(|| a.short_id.cmp(&b.short_id))
        });
        runs
    }

    /// Latest run for a task, if any.
    pub fn latest_run(&self, task_id: &str) -> Option<&Run> {
        self.runs_for_task(task_id).into_iter().next_back()
    }

    /// Latest review for a task, if any.
    pub fn latest_review(&self, task_id: &str) -> Option<&Review> {
        self.reviews
            .values()
            .filter(|r| r.task_id == task_id)
            .max_by(|a, b| {
                a.started_at
                    .cmp(&b.started_at)
                    .then_with(|| a.short_id.cmp(&b.short_id))
            })
    }

    /// Short ids of open tasks blocked by at least one non-done blocker.
    ///
    /// A blocker counts while its status is anything other than `done`
    /// (a cancelled blocker still blocks — it needs human untangling).
    pub fn blocked_task_ids(&self) -> Vec<String> {
        let mut blocked: Vec<String> = self
            .tasks
            .values()
            .filter(|t| t.status == TaskStatus::Open)
            .filter(|t| {
                t.blocked_by.iter().any(|blocker_id| {
                    self.tasks
                        .get(blocker_id)
                        .map(|b| b.status != TaskStatus::Done)
                        .unwrap_or(false)
                })
            })
            .map(|t| t.short_id.clone())
            .collect();
        blocked.sort();
        blocked
    }

    /// Apply an event to derive state changes.
    pub fn apply_event(&mut self, event: &StoreEvent) {
        match event {
            StoreEvent::TaskCreated { task } => {
                // Idempotency: skip if already present
                if !self.tasks.contains_key(&task.short_id) {
                    self.tasks.insert(task.short_id.clone(), task.clone());
                }
            }

            StoreEvent::TaskUpdated {
                id,
                patch,
                updated_at,
            } => {
                if let Some(task) = self.tasks.get_mut(id) {
                    patch.apply_to(task);
                    task.updated_at = *updated_at;
                }
            }

            StoreEvent::TaskSpawned {
                task_id,
                run,
                updated_at,
            } => {
                if let Some(task) = self.tasks.get_mut(task_id) {
                    task.status = TaskStatus::InProgress;
                    task.consumed = true;
                    task.consumed_at = Some(*updated_at);
                    task.updated_at = *updated_at;
                }
                if !self.runs.contains_key(&run.short_id) {
                    self.runs.insert(run.short_id.clone(), run.clone());
                }
            }

            StoreEvent::TaskSpawnReverted {
                task_id,
                run_id: _,
                updated_at,
            } => {
                if let Some(task) = self.tasks.get_mut(task_id) {
                    if task.status == TaskStatus::InProgress {
                        task.status = TaskStatus::Open;
                        task.updated_at = *updated_at;
                    }
                }
            }

            StoreEvent::DependencyAdded {
                task_id,
                blocker_id,
                updated_at,
            } => {
                if let Some(task) = self.tasks.get_mut(task_id) {
                    // blocked_by is an ordered list with set semantics
                    if !task.blocked_by.contains(blocker_id) {
                        task.blocked_by.push(blocker_id.clone());
                    }
                    task.updated_at = *updated_at;
                }
            }

            StoreEvent::DependencyRemoved {
                task_id,
                blocker_id,
                updated_at,
            } => {
                if let Some(task) = self.tasks.get_mut(task_id) {
                    task.blocked_by.retain(|b| b != blocker_id);
                    task.updated_at = *updated_at;
                }
            }

            StoreEvent::RunCreated { run } => {
                if !self.runs.contains_key(&run.short_id) {
                    self.runs.insert(run.short_id.clone(), run.clone());
                }
            }

            StoreEvent::RunUpdated { run_id, patch } => {
                if let Some(run) = self.runs.get_mut(run_id) {
                    patch.apply_to(run);
                }
            }

            StoreEvent::ReviewTriggered {
                task_id,
                review,
                run,
                updated_at,
            } => {
                if !self.reviews.contains_key(&review.short_id) {
                    self.reviews.insert(review.short_id.clone(), review.clone());
                }
                if !self.runs.contains_key(&run.short_id) {
                    self.runs.insert(run.short_id.clone(), run.clone());
                }
                if let Some(task) = self.tasks.get_mut(task_id) {
                    task.status = TaskStatus::Review;
                    task.updated_at = *updated_at;
                }
            }

            StoreEvent::ReviewCompleted {
                review_id,
                passed,
                issues,
                completed_at,
            } => {
                if let Some(review) = self.reviews.get_mut(review_id) {
                    review.status = if *passed {
                        ReviewStatus::Passed
                    } else {
                        ReviewStatus::Failed
                    };
                    review.issues = issues.clone();
                    review.completed_at = Some(*completed_at);
                }
            }

            StoreEvent::HealthSuccess {
                agent,
                at,
                total_runs,
                total_successes,
            } => {
                let record = self
                    .health
                    .entry(agent.clone())
                    .or_insert_with(|| AgentHealth::new(agent.clone()));
                record.last_success_at = Some(*at);
                record.consecutive_failures = 0;
                record.backoff_until = None;
                record.total_runs = *total_runs;
                record.total_successes = *total_successes;
            }

            StoreEvent::HealthFailure {
                agent,
                kind: _,
                at,
                consecutive_failures,
                backoff_until,
                total_runs,
            } => {
                let record = self
                    .health
                    .entry(agent.clone())
                    .or_insert_with(|| AgentHealth::new(agent.clone()));
                record.last_failure_at = Some(*at);
                record.consecutive_failures = *consecutive_failures;
                record.backoff_until = *backoff_until;
                record.total_runs = *total_runs;
            }

            StoreEvent::HealthCleared { agent } => {
                self.health.remove(agent);
            }

            StoreEvent::EpicCreated { epic } => {
                if !self.epics.contains_key(&epic.short_id) {
                    self.epics.insert(epic.short_id.clone(), epic.clone());
                }
            }

            StoreEvent::EpicUpdated {
                id,
                status,
                title,
                updated_at,
            } => {
                if let Some(epic) = self.epics.get_mut(id) {
                    if let Some(status) = status {
                        epic.status = *status;
                    }
                    if let Some(title) = title {
                        epic.title = title.clone();
                    }
                    epic.updated_at = *updated_at;
                }
            }
        }
    }

    /// Invariant check used by tests and debug assertions: every terminal
    /// run has `ended_at`, every running run does not.
    pub fn check_run_invariants(&self) -> Result<(), String> {
        for run in self.runs.values() {
            match run.status {
                RunStatus::Running => {
                    if run.ended_at.is_some() {
                        return Err(format!("running run {} has ended_at", run.short_id));
                    }
                }
                RunStatus::Completed | RunStatus::Failed => {
                    if run.ended_at.is_none() {
                        return Err(format!("terminal run {} missing ended_at", run.short_id));
                    }
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
#[path = "state_tests.rs"]
mod tests;
