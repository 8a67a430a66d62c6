// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Review service: arbitrates whether a task an agent claims done truly
//! is done.
//!
//! A review spawns the configured reviewer agent against the task's
//! project with the recent git diff in its prompt. The reviewer reports a
//! structured verdict (`{"result":"pass"|"fail","issues":[...]}`) on
//! stdout; parsing scans the combined output and the **last** candidate
//! wins. Without a verdict, a task the reviewer marked done directly
//! counts as a pass; anything else fails closed.

use crate::error::EngineError;
use crate::exec::{run_with_timeout, GIT_CAPTURE_TIMEOUT};
use crate::store::Store;
use crate::json_scan::extract_json_objects;
use crate::supervisor::{ProcessSupervisor, ProcessType, SpawnRequest};
use fuel_config::{render_prompt, AgentConfig, Config, DEFAULT_REVIEW_PROMPT};
use fuel_core::{
    next_unique, Clock, IdGen, Review, ReviewStatus, ReviewVerdict, Run, StoreEvent, TaskPatch,
    TaskStatus, REVIEW_PREFIX, RUN_PREFIX,
};
use parking_lot::Mutex;
use serde_json::Value;
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use tokio::process::Command;
use tracing::{info, warn};

/// Issue reported when the reviewer produced no structured verdict.
const NO_VERDICT_ISSUE: &str = "Review agent did not output structured result";

/// Supervisor key for a task's review child.
pub fn review_task_key(task_id: &str) -> String {
    format!("review-{task_id}")
}

/// Per-call context for triggering reviews.
pub struct ReviewContext<'a> {
    pub data_dir: &'a Path,
    pub project_root: &'a Path,
    /// Reviewer agent, when one is configured.
    pub reviewer: Option<(&'a str, &'a AgentConfig)>,
    pub runner_instance_id: &'a str,
}

/// Outcome of a completed review, for the runner to act on.
#[derive(Debug, Clone, PartialEq)]
pub struct ReviewOutcome {
    pub task_id: String,
    pub passed: bool,
    pub issues: Vec<String>,
    pub was_already_done: bool,
}

pub struct ReviewService {
    store: Arc<Store>,
    ids: Arc<dyn IdGen>,
    clock: Arc<dyn Clock>,
    /// task_id → review short id for reviews launched by this runner.
    pending: Mutex<HashMap<String, String>>,
}

impl ReviewService {
    pub fn new(store: Arc<Store>, ids: Arc<dyn IdGen>, clock: Arc<dyn Clock>) -> Self {
        Self {
            store,
            ids,
            clock,
            pending: Mutex::new(HashMap::new()),
        }
    }

    /// Launch a review for a task.
    ///
    /// Returns `Ok(false)` when no reviewer is configured — the caller
    /// decides what the task becomes. On success the task is in `review`
    /// and a pending [`Review`] row plus the reviewer's run row exist.
    pub async fn trigger_review(
        &self,
        supervisor: &ProcessSupervisor,
        ctx: &ReviewContext<'_>,
        task_id: &str,
    ) -> Result<bool, EngineError> {
        let Some((reviewer_name, reviewer_cfg)) = ctx.reviewer else {
            return Ok(false);
        };

        let task = self
            .store
            .with_state(|state| state.tasks.get(task_id).cloned())
            .ok_or_else(|| EngineError::NotFound(format!("task {task_id}")))?;
        let original_status = task.status;

        let (git_diff, git_status) = capture_git_context(ctx.project_root).await;

        let mut vars = HashMap::new();
        vars.insert("task_id".to_string(), task.short_id.clone());
        vars.insert("title".to_string(), task.title.clone());
        vars.insert(
            "description".to_string(),
            task.description.clone().unwrap_or_default(),
        );
        vars.insert("git_diff".to_string(), git_diff);
        vars.insert("git_status".to_string(), git_status);
        let prompt = render_prompt(ctx.data_dir, "review", DEFAULT_REVIEW_PROMPT, &vars);

        let now = self.clock.now();
        let (run_id, review_id) = self.store.with_state(|state| {
            (
                next_unique(self.ids.as_ref(), RUN_PREFIX, |id| {
                    state.runs.contains_key(id)
                }),
                next_unique(self.ids.as_ref(), REVIEW_PREFIX, |id| {
                    state.reviews.contains_key(id)
                }),
            )
        });
        let run_id =
            run_id.ok_or_else(|| EngineError::InvalidInput("run id space exhausted".into()))?;
        let review_id =
            review_id.ok_or_else(|| EngineError::InvalidInput("review id space exhausted".into()))?;

        let mut run = Run::started(
            run_id.clone(),
            task.short_id.clone(),
            reviewer_name.to_string(),
            now,
        );
        run.model = reviewer_cfg.model.clone();
        run.runner_instance_id = Some(ctx.runner_instance_id.to_string());

        let spawned = supervisor
            .spawn(
                ctx.data_dir,
                SpawnRequest {
                    task_key: review_task_key(&task.short_id),
                    agent: reviewer_name.to_string(),
                    argv: Config::build_argv(reviewer_cfg, &prompt),
                    env: reviewer_cfg.env.iter().map(|(k, v)| (k.clone(), v.clone())).collect(),
                    cwd: ctx.project_root.to_path_buf(),
                    process_type: ProcessType::Review,
                    run_id: run_id.clone(),
                },
            )
            .await?;
        run.pid = Some(spawned.pid);

        let review = Review {
            short_id: review_id.clone(),
            task_id: task.short_id.clone(),
            run_id: Some(run_id),
            agent: reviewer_name.to_string(),
            status: ReviewStatus::Pending,
            issues: Vec::new(),
            started_at: now,
            completed_at: None,
            original_status,
        };

        self.store.commit(StoreEvent::ReviewTriggered {
            task_id: task.short_id.clone(),
            review,
            run,
            updated_at: now,
        })?;

        self.pending
            .lock()
            .insert(task.short_id.clone(), review_id);
        info!(task = %task.short_id, reviewer = %reviewer_name, "review triggered");
        Ok(true)
    }

    /// Task ids with a review launched and not yet resolved.
    pub fn pending_reviews(&self) -> Vec<String> {
        let mut tasks: Vec<String> = self.pending.lock().keys().cloned().collect();
        tasks.sort();
        tasks
    }

    /// True once the review child for the task has exited.
    pub fn is_review_complete(&self, supervisor: &ProcessSupervisor, task_id: &str) -> bool {
        !supervisor.is_running(&review_task_key(task_id))
    }

    /// Parse the reviewer's output, record the review row, and return the
    /// outcome for the runner to act on.
    pub fn review_result(
        &self,
        task_id: &str,
        combined_output: &str,
    ) -> Result<ReviewOutcome, EngineError> {
        let tracked = self.pending.lock().get(task_id).cloned();
        let review_id = tracked
            .or_else(|| {
                // Recovery path: fall back to the latest pending row.
                self.store.with_state(|state| {
                    state
                        .latest_review(task_id)
                        .filter(|r| r.status == ReviewStatus::Pending)
                        .map(|r| r.short_id.clone())
                })
            })
            .ok_or_else(|| EngineError::NotFound(format!("no pending review for {task_id}")))?;

        let (task_status, original_status) = self.store.with_state(|state| {
            (
                state.tasks.get(task_id).map(|t| t.status),
                state
                    .reviews
                    .get(&review_id)
                    .map(|r| r.original_status),
            )
        });
        let task_status =
            task_status.ok_or_else(|| EngineError::NotFound(format!("task {task_id}")))?;

        let verdict = parse_review_verdict(combined_output);
        let (passed, issues, fallback_done) = match verdict {
            Some(v) => (v.passed, v.issues, false),
            // No structured result: a task the reviewer closed directly
            // counts as a pass, anything else fails closed.
            None if task_status == TaskStatus::Done => (true, Vec::new(), true),
            None => (false, vec![NO_VERDICT_ISSUE.to_string()], false),
        };

        self.store.commit(StoreEvent::ReviewCompleted {
            review_id,
            passed,
            issues: issues.clone(),
            completed_at: self.clock.now(),
        })?;
        self.pending.lock().remove(task_id);

        let was_already_done = original_status == Some(TaskStatus::Done) || fallback_done;
        Ok(ReviewOutcome {
            task_id: task_id.to_string(),
            passed,
            issues,
            was_already_done,
        })
    }

    /// On restart, re-arm reviews whose child is gone.
    ///
    /// Every task sitting in `review` without a running review child is
    /// re-triggered; when review is unconfigured the task is marked done
    /// so it cannot stay pending forever. Returns the touched task ids.
    pub async fn recover_stuck_reviews(
        &self,
        supervisor: &ProcessSupervisor,
        ctx: &ReviewContext<'_>,
    ) -> Vec<String> {
        let stuck: Vec<String> = self.store.with_state(|state| {
            state
                .tasks
                .values()
                .filter(|t| t.status == TaskStatus::Review)
                .map(|t| t.short_id.clone())
                .collect()
        });

        let mut recovered = Vec::new();
        for task_id in stuck {
            if !self.is_review_complete(supervisor, &task_id) {
                continue;
            }

            match self.trigger_review(supervisor, ctx, &task_id).await {
                Ok(true) => {
                    info!(task = %task_id, "stuck review re-triggered");
                    recovered.push(task_id);
                }
                Ok(false) => {
                    // No reviewer configured anymore — close the task
                    // rather than leaving it permanently pending.
                    let patch = TaskPatch {
                        status: Some(TaskStatus::Done),
                        reason: Some("Review skipped: no review agent configured".to_string()),
                        clear_review_issues: true,
                        ..TaskPatch::default()
                    };
                    let commit = self.store.commit(StoreEvent::TaskUpdated {
                        id: task_id.clone(),
                        patch,
                        updated_at: self.clock.now(),
                    });
                    if let Err(e) = commit {
                        warn!(task = %task_id, error = %e, "failed to close unreviewable task");
                    } else {
                        recovered.push(task_id);
                    }
                }
                Err(e) => {
                    warn!(task = %task_id, error = %e, "failed to re-trigger stuck review");
                }
            }
        }
        recovered
    }
}

/// Extract the review verdict from combined output, last candidate wins.
pub fn parse_review_verdict(output: &str) -> Option<ReviewVerdict> {
    extract_json_objects(output)
        .into_iter()
        .rev()
        .find_map(|value| {
            let passed = match value.get("result").and_then(Value::as_str) {
                Some("pass") => true,
                Some("fail") => false,
                _ => return None,
            };
            let issues = value
                .get("issues")
                .and_then(Value::as_array)
                .map(|entries| entries.iter().filter_map(issue_text).collect())
                .unwrap_or_default();
            Some(ReviewVerdict { passed, issues })
        })
}

/// Issues may be plain strings or `{"description": "..."}` objects.
fn issue_text(entry: &Value) -> Option<String> {
    match entry {
        Value::String(s) => Some(s.clone()),
        Value::Object(obj) => obj
            .get("description")
            .and_then(Value::as_str)
            .map(String::from),
        _ => None,
    }
}

/// Best-effort capture of `git diff HEAD~1` and `git status --porcelain`.
async fn capture_git_context(project_root: &Path) -> (String, String) {
    let mut diff_cmd = Command::new("git");
    diff_cmd.args(["diff", "HEAD~1"]).current_dir(project_root);
    let diff = match run_with_timeout(diff_cmd, GIT_CAPTURE_TIMEOUT, "git diff").await {
        Ok(output) if output.status.success() => {
            String::from_utf8_lossy(&output.stdout).into_owned()
        }
        _ => String::new(),
    };

    let mut status_cmd = Command::new("git");
    status_cmd
        .args(["status", "--porcelain"])
        .current_dir(project_root);
    let status = match run_with_timeout(status_cmd, GIT_CAPTURE_TIMEOUT, "git status").await {
        Ok(output) if output.status.success() => {
            String::from_utf8_lossy(&output.stdout).into_owned()
        }
        _ => String::new(),
    };

    (diff, status)
}

#[cfg(test)]
#[path = "reviews_tests.rs"]
mod tests;
