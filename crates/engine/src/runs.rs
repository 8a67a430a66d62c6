// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Run service: run lifecycle, orphan recovery, and aggregate stats.

use crate::error::EngineError;
use crate::store::Store;
use chrono::{DateTime, Utc};
use fuel_core::{next_unique, Clock, IdGen, Run, RunPatch, RunStatus, StoreEvent, RUN_PREFIX};
use std::sync::Arc;
use tracing::warn;

/// Sentinel output for runs whose daemon died before completion.
const ORPHAN_NO_PID_OUTPUT: &str = "[Run orphaned — consume process died before completion]";

/// Parameters for creating a run record.
#[derive(Debug, Clone, Default)]
pub struct NewRun {
    pub agent: String,
    pub model: Option<String>,
    pub started_at: Option<DateTime<Utc>>,
    pub session_id: Option<String>,
    pub cost_usd: Option<f64>,
    pub pid: Option<u32>,
    pub runner_instance_id: Option<String>,
}

/// Aggregate run counters.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RunStats {
    pub total: usize,
    pub running: usize,
    pub completed: usize,
    pub failed: usize,
    pub total_cost_usd: f64,
}

/// Duration statistics over terminal runs.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TimingStats {
    pub count: usize,
    pub avg_seconds: i64,
    pub min_seconds: i64,
    pub max_seconds: i64,
}

pub struct RunService {
    store: Arc<Store>,
    ids: Arc<dyn IdGen>,
    clock: Arc<dyn Clock>,
}

impl RunService {
    pub fn new(store: Arc<Store>, ids: Arc<dyn IdGen>, clock: Arc<dyn Clock>) -> Self {
        Self { store, ids, clock }
    }

    /// Build a running record with a fresh unique id, without committing.
    ///
    /// Used by the spawn path, which commits the run together with the
    /// task transition in one event.
    pub fn build_run(&self, task_id: &str, new: NewRun) -> Result<Run, EngineError> {
        let short_id = self
            .store
            .with_state(|state| {
                next_unique(self.ids.as_ref(), RUN_PREFIX, |id| {
                    state.runs.contains_key(id)
                })
            })
            .ok_or_else(|| EngineError::InvalidInput("run id space exhausted".into()))?;

        let mut run = Run::started(
            short_id,
            task_id.to_string(),
            new.agent,
            new.started_at.unwrap_or_else(|| self.clock.now()),
        );
        run.model = new.model;
        run.session_id = new.session_id;
        run.cost_usd = new.cost_usd;
        run.pid = new.pid;
        run.runner_instance_id = new.runner_instance_id;
        Ok(run)
    }

    /// Create and commit a standalone run record.
    pub fn create_run(&self, task_id: &str, new: NewRun) -> Result<String, EngineError> {
        let run = self.build_run(task_id, new)?;
        let short_id = run.short_id.clone();
        self.store.commit(StoreEvent::RunCreated { run })?;
        Ok(short_id)
    }

    pub fn update_run(&self, run_id: &str, patch: RunPatch) -> Result<(), EngineError> {
        let exists = self
            .store
            .with_state(|state| state.runs.contains_key(run_id));
        if !exists {
            return Err(EngineError::NotFound(format!("run {run_id}")));
        }
        self.store.commit(StoreEvent::RunUpdated {
            run_id: run_id.to_string(),
            patch,
        })?;
        Ok(())
    }

    /// Patch the most recent run for a task.
    pub fn update_latest_run(&self, task_id: &str, patch: RunPatch) -> Result<(), EngineError> {
        let run_id = self
            .store
            .with_state(|state| state.latest_run(task_id).map(|r| r.short_id.clone()))
            .ok_or_else(|| EngineError::NotFound(format!("no runs for task {task_id}")))?;
        self.update_run(&run_id, patch)
    }

    pub fn get_latest_run(&self, task_id: &str) -> Option<Run> {
        self.store
            .with_state(|state| state.latest_run(task_id).cloned())
    }

    pub fn get_runs(&self, task_id: &str) -> Vec<Run> {
        self.store.with_state(|state| {
            state
                .runs_for_task(task_id)
                .into_iter()
                .cloned()
                .collect()
        })
    }

    /// Mark runs whose child died without the daemon observing completion.
    ///
    /// Runs whose recorded pid is still alive are left untouched: a live
    /// child outlived its runner and will be picked up when it exits.
    /// Returns the number of runs marked failed. Idempotent — a second
    /// pass with no intervening work changes nothing.
    pub fn cleanup_orphaned_runs(
        &self,
        is_alive: impl Fn(u32) -> bool,
    ) -> Result<usize, EngineError> {
        let running: Vec<Run> = self.store.with_state(|state| {
            state
                .runs
                .values()
                .filter(|r| r.status == RunStatus::Running)
                .cloned()
                .collect()
        });

        let now = self.clock.now();
        let mut cleaned = 0;

        for run in running {
            let output = match run.pid {
                None => ORPHAN_NO_PID_OUTPUT.to_string(),
                Some(pid) if !is_alive(pid) => {
                    format!("[Run orphaned — process {pid} no longer running]")
                }
                Some(pid) => {
                    warn!(
                        run_id = %run.short_id,
                        pid,
                        "run outlived its runner; leaving it for the next completion poll"
                    );
                    continue;
                }
            };

            self.store.commit(StoreEvent::RunUpdated {
                run_id: run.short_id.clone(),
                patch: RunPatch {
                    status: Some(RunStatus::Failed),
                    exit_code: Some(-1),
                    output: Some(output),
                    ended_at: Some(now),
                    ..RunPatch::default()
                },
            })?;
            cleaned += 1;
        }

        Ok(cleaned)
    }

    pub fn get_stats(&self) -> RunStats {
        self.store.with_state(|state| {
            let mut stats = RunStats::default();
            for run in state.runs.values() {
                stats.total += 1;
                match run.status {
                    RunStatus::Running => stats.running += 1,
                    RunStatus::Completed => stats.completed += 1,
                    RunStatus::Failed => stats.failed += 1,
                }
                stats.total_cost_usd += run.cost_usd.unwrap_or(0.0);
            }
            stats
        })
    }

    pub fn get_timing_stats(&self) -> TimingStats {
        self.store.with_state(|state| {
            let durations: Vec<i64> = state
                .runs
                .values()
                .filter(|r| r.status.is_terminal())
                .filter_map(|r| r.duration_seconds)
                .collect();

            if durations.is_empty() {
                return TimingStats::default();
            }

            let count = durations.len();
            let sum: i64 = durations.iter().sum();
            TimingStats {
                count,
                avg_seconds: sum / count as i64,
                min_seconds: durations.iter().copied().min().unwrap_or(0),
                max_seconds: durations.iter().copied().max().unwrap_or(0),
            }
        })
    }
}

#[cfg(test)]
#[path = "runs_tests.rs"]
mod tests;
