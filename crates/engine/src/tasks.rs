// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Task service: creation, status transitions, dependencies, and the
//! ready/blocked/failed sets.

use crate::error::EngineError;
use crate::store::Store;
use fuel_core::{
    next_unique, Clock, Complexity, IdGen, StoreEvent, Task, TaskPatch, TaskStatus, TaskType,
    MAX_PRIORITY, TASK_PREFIX,
};
use fuel_storage::TaskLookup;
use std::collections::{HashSet, VecDeque};
use std::sync::Arc;

/// Parameters for creating a task.
#[derive(Debug, Clone, Default)]
pub struct NewTask {
    pub title: String,
    pub description: Option<String>,
    pub task_type: Option<TaskType>,
    pub priority: Option<u8>,
    pub complexity: Option<Complexity>,
    pub labels: Vec<String>,
    pub epic_id: Option<String>,
    pub blocked_by: Vec<String>,
    pub agent: Option<String>,
}

pub struct TaskService {
    store: Arc<Store>,
    ids: Arc<dyn IdGen>,
    clock: Arc<dyn Clock>,
}

impl TaskService {
    pub fn new(store: Arc<Store>, ids: Arc<dyn IdGen>, clock: Arc<dyn Clock>) -> Self {
        Self { store, ids, clock }
    }

    /// Create a task. Blockers and the epic are resolved before the write.
    pub fn create(&self, new: NewTask) -> Result<Task, EngineError> {
        if new.title.trim().is_empty() {
            return Err(EngineError::InvalidInput("title must not be empty".into()));
        }
        let priority = new.priority.unwrap_or(2);
        if priority > MAX_PRIORITY {
            return Err(EngineError::InvalidInput(format!(
                "priority must be 0..={MAX_PRIORITY}, got {priority}"
            )));
        }

        let blocked_by = new
            .blocked_by
            .iter()
            .map(|id| self.resolve_id(id))
            .collect::<Result<Vec<_>, _>>()?;

        if let Some(ref epic_id) = new.epic_id {
            let exists = self
                .store
                .with_state(|state| state.epics.contains_key(epic_id));
            if !exists {
                return Err(EngineError::NotFound(format!("epic {epic_id}")));
            }
        }

        let short_id = self
            .store
            .with_state(|state| {
                next_unique(self.ids.as_ref(), TASK_PREFIX, |id| {
                    state.tasks.contains_key(id)
                })
            })
            .ok_or_else(|| EngineError::InvalidInput("task id space exhausted".into()))?;

        let now = self.clock.now();
        let task = Task {
            short_id,
            title: new.title,
            description: new.description,
            status: TaskStatus::Open,
            task_type: new.task_type.unwrap_or(TaskType::Task),
            priority,
            complexity: new.complexity.unwrap_or(Complexity::Simple),
            labels: new.labels.into_iter().collect(),
            blocked_by,
            epic_id: new.epic_id,
            agent: new.agent,
            last_review_issues: None,
            commit_hash: None,
            reason: None,
            consumed: false,
            consumed_at: None,
            created_at: now,
            updated_at: now,
        };

        self.store.commit(StoreEvent::TaskCreated { task: task.clone() })?;
        Ok(task)
    }

    /// Resolve a user-supplied id to a task.
    pub fn find(&self, id: &str) -> Result<Task, EngineError> {
        let short_id = self.resolve_id(id)?;
        self.store
            .with_state(|state| state.tasks.get(&short_id).cloned())
            .ok_or_else(|| EngineError::NotFound(format!("task {id}")))
    }

    /// Apply a validated patch to a task.
    ///
    /// Status changes must follow the state machine; priority stays in
    /// range; labels only change via the add/remove mutators.
    pub fn update(&self, id: &str, patch: TaskPatch) -> Result<Task, EngineError> {
        let task = self.find(id)?;

        if let Some(priority) = patch.priority {
            if priority > MAX_PRIORITY {
                return Err(EngineError::InvalidInput(format!(
                    "priority must be 0..={MAX_PRIORITY}, got {priority}"
                )));
            }
        }
        if let Some(to) = patch.status {
            self.check_transition(&task, to)?;
        }
        if let Some(ref epic_id) = patch.epic_id {
            let exists = self
                .store
                .with_state(|state| state.epics.contains_key(epic_id));
            if !exists {
                return Err(EngineError::NotFound(format!("epic {epic_id}")));
            }
        }

        self.commit_patch(&task.short_id, patch)
    }

    /// Move an open task to `in_progress`.
    pub fn start(&self, id: &str) -> Result<Task, EngineError> {
        let task = self.find(id)?;
        self.check_transition(&task, TaskStatus::InProgress)?;
        self.commit_patch(&task.short_id, TaskPatch::status(TaskStatus::InProgress))
    }

    /// Mark a task done. Idempotent for already-done tasks; clears any
    /// review issues.
    pub fn done(
        &self,
        id: &str,
        reason: Option<String>,
        commit_hash: Option<String>,
    ) -> Result<Task, EngineError> {
        let task = self.find(id)?;
        self.check_transition(&task, TaskStatus::Done)?;

        let patch = TaskPatch {
            status: Some(TaskStatus::Done),
            reason,
            commit_hash,
            clear_review_issues: true,
            ..TaskPatch::default()
        };
        self.commit_patch(&task.short_id, patch)
    }

    /// Reopen a task for another attempt. Invalid from `open` or `someday`.
    pub fn reopen(&self, id: &str) -> Result<Task, EngineError> {
        let task = self.find(id)?;
        if matches!(task.status, TaskStatus::Open | TaskStatus::Someday) {
            return Err(EngineError::InvalidInput(format!(
                "cannot reopen task {} from status {}",
                task.short_id, task.status
            )));
        }
        self.check_transition(&task, TaskStatus::Open)?;
        self.commit_patch(&task.short_id, TaskPatch::status(TaskStatus::Open))
    }

    /// Reopen a failed task with a fresh consume slate.
    pub fn retry(&self, id: &str) -> Result<Task, EngineError> {
        let task = self.find(id)?;
        self.check_transition(&task, TaskStatus::Open)?;
        let patch = TaskPatch {
            status: Some(TaskStatus::Open),
            consumed: Some(false),
            ..TaskPatch::default()
        };
        self.commit_patch(&task.short_id, patch)
    }

    /// Park an open task in `someday`.
    pub fn defer(&self, id: &str) -> Result<Task, EngineError> {
        let task = self.find(id)?;
        self.check_transition(&task, TaskStatus::Someday)?;
        self.commit_patch(&task.short_id, TaskPatch::status(TaskStatus::Someday))
    }

    /// Bring a `someday` task back to `open`.
    pub fn promote(&self, id: &str) -> Result<Task, EngineError> {
        let task = self.find(id)?;
        if task.status != TaskStatus::Someday {
            return Err(EngineError::InvalidInput(format!(
                "cannot promote task {} from status {}",
                task.short_id, task.status
            )));
        }
        self.commit_patch(&task.short_id, TaskPatch::status(TaskStatus::Open))
    }

    /// Soft-delete: the task becomes a `cancelled` tombstone.
    pub fn cancel(&self, id: &str) -> Result<Task, EngineError> {
        let task = self.find(id)?;
        self.check_transition(&task, TaskStatus::Cancelled)?;
        self.commit_patch(&task.short_id, TaskPatch::status(TaskStatus::Cancelled))
    }

    /// Record review issues on the task (or clear them with `None`).
    pub fn set_last_review_issues(
        &self,
        id: &str,
        issues: Option<Vec<String>>,
    ) -> Result<Task, EngineError> {
        let task = self.find(id)?;
        let patch = match issues {
            Some(issues) => TaskPatch {
                last_review_issues: Some(issues),
                ..TaskPatch::default()
            },
            None => TaskPatch {
                clear_review_issues: true,
                ..TaskPatch::default()
            },
        };
        self.commit_patch(&task.short_id, patch)
    }

    /// Add `blocker` to `id`'s blockers, rejecting self-blocks and cycles.
    pub fn add_dependency(&self, id: &str, blocker: &str) -> Result<Task, EngineError> {
        let task_id = self.resolve_id(id)?;
        let blocker_id = self.resolve_id(blocker)?;

        if task_id == blocker_id {
            return Err(EngineError::InvalidInput(format!(
                "task {task_id} cannot block itself"
            )));
        }

        // BFS from the blocker: reaching `task_id` via blocked_by edges
        // means this edge would close a cycle.
        let closes_cycle = self.store.with_state(|state| {
            let mut queue: VecDeque<String> = VecDeque::from([blocker_id.clone()]);
            let mut seen: HashSet<String> = HashSet::new();
            while let Some(current) = queue.pop_front() {
                if current == task_id {
                    return true;
                }
                if !seen.insert(current.clone()) {
                    continue;
                }
                if let Some(task) = state.tasks.get(&current) {
                    for next in &task.blocked_by {
                        queue.push_back(next.clone());
                    }
                }
            }
            false
        });
        if closes_cycle {
            return Err(EngineError::CycleDetected(format!(
                "{task_id} -> {blocker_id} would close a dependency cycle"
            )));
        }

        self.store.commit(StoreEvent::DependencyAdded {
            task_id: task_id.clone(),
            blocker_id,
            updated_at: self.clock.now(),
        })?;
        self.find(&task_id)
    }

    pub fn remove_dependency(&self, id: &str, blocker: &str) -> Result<Task, EngineError> {
        let task_id = self.resolve_id(id)?;
        let blocker_id = self.resolve_id(blocker)?;
        self.store.commit(StoreEvent::DependencyRemoved {
            task_id: task_id.clone(),
            blocker_id,
            updated_at: self.clock.now(),
        })?;
        self.find(&task_id)
    }

    /// The blocker tasks of `id`, in blocked_by order.
    pub fn get_blockers(&self, id: &str) -> Result<Vec<Task>, EngineError> {
        let task = self.find(id)?;
        Ok(self.store.with_state(|state| {
            task.blocked_by
                .iter()
                .filter_map(|blocker_id| state.tasks.get(blocker_id).cloned())
                .collect()
        }))
    }

    /// Open, unblocked, human-free, non-reality tasks, ordered by
    /// `(priority asc, created_at asc)`.
    pub fn ready(&self) -> Vec<Task> {
        let mut ready = self.store.with_state(|state| {
            let blocked: HashSet<String> = state.blocked_task_ids().into_iter().collect();
            state
                .tasks
                .values()
                .filter(|t| t.is_schedulable() && !blocked.contains(&t.short_id))
                .cloned()
                .collect::<Vec<_>>()
        });
        ready.sort_by(|a, b| {
            a.priority
                .cmp(&b.priority)
                .then_with(|| a.created_at.cmp(&b.created_at))
                .then_with(|| a.short_id.cmp(&b.short_id))
        });
        ready
    }

    /// Open tasks with at least one unfinished blocker.
    pub fn blocked(&self) -> Vec<Task> {
        self.store.with_state(|state| {
            state
                .blocked_task_ids()
                .into_iter()
                .filter_map(|id| state.tasks.get(&id).cloned())
                .collect()
        })
    }

    /// Tasks whose latest run evidence says the work is lost.
    pub fn failed(
        &self,
        exclude_pids: &HashSet<u32>,
        is_alive: impl Fn(u32) -> bool + Copy,
    ) -> Vec<Task> {
        let tasks: Vec<Task> = self.store.with_state(|state| state.tasks.values().cloned().collect());
        tasks
            .into_iter()
            .filter(|t| self.is_failed(t, exclude_pids, is_alive))
            .collect()
    }

    /// Failure detection used by retry and housekeeping.
    ///
    /// A task is failed iff:
    /// 1. it was consumed and its latest run exited nonzero, or
    /// 2. it is in_progress + consumed and the latest run never got a pid
    ///    (spawn lost), or
    /// 3. it is in_progress and the latest run's pid is dead (and not one
    ///    of ours in `exclude_pids`).
    pub fn is_failed(
        &self,
        task: &Task,
        exclude_pids: &HashSet<u32>,
        is_alive: impl Fn(u32) -> bool,
    ) -> bool {
        let latest = self
            .store
            .with_state(|state| state.latest_run(&task.short_id).cloned());
        let Some(latest) = latest else {
            return false;
        };

        if task.consumed && latest.exit_code.map(|c| c != 0).unwrap_or(false) {
            return true;
        }

        if task.status == TaskStatus::InProgress {
            match latest.pid {
                None if task.consumed => return true,
                Some(pid) if !exclude_pids.contains(&pid) && !is_alive(pid) => return true,
                _ => {}
            }
        }

        false
    }

    // ── helpers ──────────────────────────────────────────────────────────

    fn resolve_id(&self, id: &str) -> Result<String, EngineError> {
        match self.store.with_state(|state| state.lookup_task(id)) {
            TaskLookup::Found(short_id) => Ok(short_id),
            TaskLookup::NotFound => Err(EngineError::NotFound(format!("task {id}"))),
            TaskLookup::Ambiguous(matches) => Err(EngineError::Ambiguous {
                id: id.to_string(),
                matches,
            }),
        }
    }

    fn check_transition(&self, task: &Task, to: TaskStatus) -> Result<(), EngineError> {
        if !task.status.can_transition(to) {
            return Err(EngineError::InvalidInput(format!(
                "task {}: illegal status transition {} -> {}",
                task.short_id, task.status, to
            )));
        }
        Ok(())
    }

    fn commit_patch(&self, short_id: &str, patch: TaskPatch) -> Result<Task, EngineError> {
        self.store.commit(StoreEvent::TaskUpdated {
            id: short_id.to_string(),
            patch,
            updated_at: self.clock.now(),
        })?;
        self.find(short_id)
    }
}

#[cfg(test)]
#[path = "tasks_tests.rs"]
mod tests;
