// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Runner core: the cooperative tick that composes every subsystem.
//!
//! Each tick: accept clients → dispatch commands → observe the shutdown
//! flag → detect health transitions → fill spawn slots → stream output →
//! poll completions → drive reviews → periodic diff-gated snapshot →
//! sleep 100 ms. Only the sleep blocks; everything else drains channels
//! or takes short locks.

use crate::protocol::{
    decode_command, encode_event, ClientEvent, Command, DecodeError, StopMode, PROTOCOL_VERSION,
};
use crate::server::IpcServer;
use crate::snapshot::{
    build_snapshot, snapshot_content_hash, ActiveProcessView, BoardSnapshot, SnapshotInputs,
    TaskView,
};
use chrono::{DateTime, Utc};
use fuel_config::{render_prompt, Config, DEFAULT_TASK_PROMPT};
use fuel_core::{
    Clock, HashIdGen, StoreEvent, Task, TaskPatch, TaskStatus, AUTO_CLOSED_LABEL,
    NEEDS_HUMAN_LABEL,
};
use fuel_engine::{
    classify_completion, is_process_alive, parse_result_metadata, ChildExit, CompletionType,
    EngineError, HealthStatus, HealthTracker, NewRun, NewTask, ProcessSupervisor, ProcessType,
    ReviewContext, ReviewService, RunService, SpawnRequest, Store, TaskService,
};
use fuel_core::{RunPatch, RunStatus};
use std::collections::{BTreeMap, HashMap};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

/// Tick sleep: the only suspension point.
const TICK_INTERVAL: Duration = Duration::from_millis(100);

/// Ready-set cache TTL.
const READY_CACHE_TTL: Duration = Duration::from_secs(2);

/// Reason recorded when the daemon auto-closes a task.
const AUTO_DONE_REASON: &str = "Auto-completed by consume (agent exit 0)";

pub struct Runner {
    data_dir: PathBuf,
    project_root: PathBuf,
    config: Config,
    store: Arc<Store>,
    clock: Arc<dyn Clock>,
    tasks: TaskService,
    runs: RunService,
    reviews: ReviewService,
    health: HealthTracker,
    supervisor: ProcessSupervisor,
    server: IpcServer,
    instance_id: String,
    started_at: DateTime<Utc>,

    paused: bool,
    review_enabled: bool,
    stop_requested: Option<StopMode>,
    /// Per-task attempt counters. Deliberately in-memory: a runner
    /// restart grants every task a fresh slate.
    retry_counts: HashMap<String, u32>,
    ready_cache: Option<(Instant, Vec<Task>)>,
    /// Review children that exited, keyed by the reviewed task id.
    review_exits: HashMap<String, ChildExit>,
    prev_health: BTreeMap<String, HealthStatus>,
    last_broadcast: Instant,
    last_snapshot_hash: Option<String>,
}

pub struct RunnerParams {
    pub data_dir: PathBuf,
    pub project_root: PathBuf,
    pub config: Config,
    pub store: Arc<Store>,
    pub clock: Arc<dyn Clock>,
    pub supervisor: ProcessSupervisor,
    pub server: IpcServer,
    pub instance_id: String,
}

impl Runner {
    pub fn new(params: RunnerParams) -> Self {
        let ids: Arc<dyn fuel_core::IdGen> = Arc::new(HashIdGen);
        let tasks = TaskService::new(
            Arc::clone(&params.store),
            Arc::clone(&ids),
            Arc::clone(&params.clock),
        );
        let runs = RunService::new(
            Arc::clone(&params.store),
            Arc::clone(&ids),
            Arc::clone(&params.clock),
        );
        let reviews = ReviewService::new(
            Arc::clone(&params.store),
            Arc::clone(&ids),
            Arc::clone(&params.clock),
        );
        let health = HealthTracker::new(Arc::clone(&params.store), Arc::clone(&params.clock));
        let started_at = params.clock.now();

        Self {
            data_dir: params.data_dir,
            project_root: params.project_root,
            config: params.config,
            store: params.store,
            clock: params.clock,
            tasks,
            runs,
            reviews,
            health,
            supervisor: params.supervisor,
            server: params.server,
            instance_id: params.instance_id,
            started_at,
            paused: false,
            review_enabled: true,
            stop_requested: None,
            retry_counts: HashMap::new(),
            ready_cache: None,
            review_exits: HashMap::new(),
            prev_health: BTreeMap::new(),
            last_broadcast: Instant::now(),
            last_snapshot_hash: None,
        }
    }

    /// Recover state from a previous runner: orphaned runs and stuck
    /// reviews. Called once before the loop.
    pub async fn recover(&mut self) {
        match self.runs.cleanup_orphaned_runs(is_process_alive) {
            Ok(0) => {}
            Ok(cleaned) => info!(cleaned, "orphaned runs marked failed"),
            Err(e) => error!(error = %e, "orphan cleanup failed"),
        }

        let ctx = ReviewContext {
            data_dir: &self.data_dir,
            project_root: &self.project_root,
            reviewer: self.config.reviewer(),
            runner_instance_id: &self.instance_id,
        };
        let recovered = self
            .reviews
            .recover_stuck_reviews(&self.supervisor, &ctx)
            .await;
        if !recovered.is_empty() {
            info!(count = recovered.len(), "stuck reviews recovered");
        }
    }

    /// Run ticks until a stop is requested, then drain and return the mode.
    pub async fn run(&mut self) -> StopMode {
        info!(instance = %self.instance_id, "runner loop started");
        loop {
            self.tick().await;
            if let Some(mode) = self.effective_stop() {
                self.shutdown(mode).await;
                return mode;
            }
            tokio::time::sleep(TICK_INTERVAL).await;
        }
    }

    fn effective_stop(&self) -> Option<StopMode> {
        if let Some(mode) = self.stop_requested {
            return Some(mode);
        }
        if self.supervisor.is_shutting_down() {
            return Some(StopMode::Graceful);
        }
        None
    }

    /// One pass of the core loop.
    pub async fn tick(&mut self) {
        // 1. Accept new clients: hello, then a fresh snapshot.
        for client_id in self.server.take_joined() {
            self.send_to(
                client_id,
                &ClientEvent::Hello {
                    version: PROTOCOL_VERSION.to_string(),
                    instance_id: self.instance_id.clone(),
                },
            );
            let snapshot = self.build_snapshot();
            self.send_to(client_id, &ClientEvent::Snapshot { snapshot });
        }

        // 2. Decode and dispatch all pending commands.
        for (client_id, line) in self.server.poll() {
            match decode_command(&line) {
                Ok(command) => self.dispatch(client_id, command).await,
                Err(e) => self.send_decode_error(client_id, e),
            }
        }

        // 3. Shutdown flag observed by the caller after this tick.
        if self.effective_stop().is_some() {
            return;
        }

        // 4. Health transitions.
        self.detect_health_changes();

        // 5. Fill available slots.
        if !self.paused {
            self.fill_slots().await;
        }

        // Stream captured child output, best-effort.
        for chunk in self.supervisor.poll_output() {
            self.broadcast(&ClientEvent::OutputChunk {
                task_id: chunk.task_key,
                run_id: chunk.run_id,
                stream: chunk.stream,
                chunk: chunk.chunk,
            });
        }

        // 6. Completions.
        for exit in self.supervisor.poll() {
            self.handle_completion(exit).await;
        }

        // 7. Reviews whose child has exited.
        self.check_reviews().await;

        // 8. Periodic diff-gated snapshot broadcast.
        let interval = Duration::from_secs(self.config.consume.interval_seconds.max(1));
        if self.last_broadcast.elapsed() >= interval {
            self.broadcast_snapshot(false);
            self.last_broadcast = Instant::now();
        }

        if let Err(e) = self.store.maybe_flush() {
            error!(error = %e, "WAL flush failed");
        }
    }

    // ── Command dispatch ─────────────────────────────────────────────────

    async fn dispatch(&mut self, client_id: u64, command: Command) {
        debug!(client = client_id, ?command, "dispatching command");
        match command {
            Command::Attach | Command::RequestSnapshot => {
                let snapshot = self.build_snapshot();
                self.send_to(client_id, &ClientEvent::Snapshot { snapshot });
            }

            Command::Detach => self.server.disconnect(client_id),

            Command::Pause => {
                self.paused = true;
                self.status_line("info", "runner paused");
                self.broadcast_snapshot(true);
            }

            Command::Resume => {
                self.paused = false;
                self.status_line("info", "runner resumed");
                self.broadcast_snapshot(true);
            }

            Command::Stop { mode } => {
                info!(?mode, "stop requested via IPC");
                self.stop_requested = Some(mode);
            }

            Command::ReloadConfig => match Config::load(&self.data_dir) {
                Ok(config) => {
                    self.config = config;
                    self.invalidate_ready_cache();
                    self.broadcast(&ClientEvent::ConfigReloaded);
                }
                Err(e) => self.send_error(client_id, &format!("config reload failed: {e}")),
            },

            Command::SetTaskReviewEnabled { enabled } => {
                self.review_enabled = enabled;
                self.status_line(
                    "info",
                    if enabled {
                        "task review enabled"
                    } else {
                        "task review disabled"
                    },
                );
            }

            Command::TaskStart {
                task_id,
                agent_override,
            } => match self.tasks.find(&task_id) {
                Ok(task) => {
                    self.invalidate_ready_cache();
                    if let Err(e) = self.try_spawn(&task, agent_override.as_deref()).await {
                        self.send_error(client_id, &e.to_string());
                    }
                    self.broadcast_snapshot(true);
                }
                Err(e) => self.send_error(client_id, &e.to_string()),
            },

            Command::TaskReopen { task_id } => {
                self.mutate(client_id, |runner| runner.tasks.reopen(&task_id).map(|_| ()));
            }

            Command::TaskDone {
                task_id,
                reason,
                commit_hash,
            } => {
                self.mutate(client_id, |runner| {
                    runner.tasks.done(&task_id, reason, commit_hash).map(|_| ())
                });
            }

            Command::TaskCreate {
                title,
                description,
                labels,
                priority,
                task_type,
                complexity,
                epic_id,
                blocked_by,
                request_id,
            } => {
                let result = self.tasks.create(NewTask {
                    title,
                    description,
                    task_type,
                    priority,
                    complexity,
                    labels,
                    epic_id,
                    blocked_by,
                    agent: None,
                });
                let response = match result {
                    Ok(task) => ClientEvent::TaskCreateResponse {
                        request_id,
                        success: true,
                        task_id: Some(task.short_id),
                        error: None,
                    },
                    Err(e) => ClientEvent::TaskCreateResponse {
                        request_id,
                        success: false,
                        task_id: None,
                        error: Some(e.to_string()),
                    },
                };
                self.send_to(client_id, &response);
                self.invalidate_ready_cache();
                self.broadcast_snapshot(true);
            }

            Command::DependencyAdd {
                task_id,
                blocker_task_id,
            } => {
                self.mutate(client_id, |runner| {
                    runner
                        .tasks
                        .add_dependency(&task_id, &blocker_task_id)
                        .map(|_| ())
                });
            }

            Command::RequestDoneTasks => {
                let (tasks, total) = self.tasks_with_status(&[TaskStatus::Done]);
                self.send_to(client_id, &ClientEvent::DoneTasks { tasks, total });
            }

            Command::RequestBlockedTasks => {
                let blocked = self.tasks.blocked();
                let total = blocked.len();
                let tasks = blocked.iter().map(TaskView::from).collect();
                self.send_to(client_id, &ClientEvent::BlockedTasks { tasks, total });
            }

            Command::RequestCompletedTasks => {
                let (tasks, total) =
                    self.tasks_with_status(&[TaskStatus::Done, TaskStatus::Cancelled]);
                self.send_to(client_id, &ClientEvent::CompletedTasks { tasks, total });
            }

            Command::Browser { kind, .. } => {
                self.send_error(
                    client_id,
                    &format!("browser helper not connected (command {kind})"),
                );
            }
        }
    }

    /// Run a board mutation: ack the client, report errors, refresh state.
    fn mutate(
        &mut self,
        client_id: u64,
        op: impl FnOnce(&mut Self) -> Result<(), EngineError>,
    ) {
        match op(self) {
            Ok(()) => {
                self.send_to(
                    client_id,
                    &ClientEvent::StatusLine {
                        level: "ok".to_string(),
                        text: "accepted".to_string(),
                    },
                );
                self.invalidate_ready_cache();
                self.broadcast_snapshot(true);
            }
            Err(e) => self.send_error(client_id, &e.to_string()),
        }
    }

    fn send_decode_error(&self, client_id: u64, error: DecodeError) {
        warn!(client = client_id, %error, "rejected command");
        self.send_error(client_id, &error.to_string());
    }

    // ── Health transitions ───────────────────────────────────────────────

    fn current_health(&self) -> BTreeMap<String, HealthStatus> {
        let mut agents: Vec<String> = self.config.agents.keys().cloned().collect();
        for record in self.health.all_health() {
            if !agents.contains(&record.agent) {
                agents.push(record.agent);
            }
        }

        agents
            .into_iter()
            .map(|agent| {
                let max_retries = self
                    .config
                    .agents
                    .get(&agent)
                    .map(|a| a.max_retries)
                    .unwrap_or(3);
                let status = self.health.status(&agent, max_retries);
                (agent, status)
            })
            .collect()
    }

    fn detect_health_changes(&mut self) {
        let current = self.current_health();
        for (agent, status) in &current {
            let previous = self
                .prev_health
                .get(agent)
                .copied()
                .unwrap_or(HealthStatus::Healthy);
            if *status != previous {
                info!(agent = %agent, from = %previous, to = %status, "agent health changed");
                self.broadcast(&ClientEvent::HealthChange {
                    agent: agent.clone(),
                    status: *status,
                });
            }
        }
        self.prev_health = current;
    }

    // ── Spawning ─────────────────────────────────────────────────────────

    fn ready_tasks(&mut self) -> Vec<Task> {
        if let Some((at, cached)) = &self.ready_cache {
            if at.elapsed() < READY_CACHE_TTL {
                return cached.clone();
            }
        }
        let ready = self.tasks.ready();
        self.ready_cache = Some((Instant::now(), ready.clone()));
        ready
    }

    fn invalidate_ready_cache(&mut self) {
        self.ready_cache = None;
    }

    async fn fill_slots(&mut self) {
        for task in self.ready_tasks() {
            match self.try_spawn(&task, None).await {
                Ok(true) => self.invalidate_ready_cache(),
                Ok(false) => {}
                Err(e) => warn!(task = %task.short_id, error = %e, "spawn attempt failed"),
            }
        }
    }

    /// Attempt one spawn for a task. Returns whether a child was started.
    async fn try_spawn(
        &mut self,
        task: &Task,
        agent_override: Option<&str>,
    ) -> Result<bool, EngineError> {
        if self.supervisor.is_running(&task.short_id) {
            return Ok(false);
        }
        if task.status != TaskStatus::Open {
            return Err(EngineError::InvalidInput(format!(
                "task {} is {}, only open tasks can start",
                task.short_id, task.status
            )));
        }

        let agent_name = agent_override
            .map(str::to_string)
            .or_else(|| task.agent.clone())
            .or_else(|| {
                self.config
                    .agent_for_complexity(task.complexity)
                    .map(|(name, _)| name.to_string())
            });
        let Some(agent_name) = agent_name else {
            debug!(task = %task.short_id, "no agent configured for task");
            return Ok(false);
        };
        let Some(agent_cfg) = self.config.agents.get(&agent_name).cloned() else {
            warn!(task = %task.short_id, agent = %agent_name, "unknown agent");
            return Ok(false);
        };

        if !self.supervisor.can_spawn(&agent_name, agent_cfg.concurrency_limit)
            || !self.health.is_available(&agent_name)
            || self.health.is_dead(&agent_name, agent_cfg.max_retries)
        {
            return Ok(false);
        }

        // Claim the task and create its run in one transaction.
        let run = self.runs.build_run(
            &task.short_id,
            NewRun {
                agent: agent_name.clone(),
                model: agent_cfg.model.clone(),
                runner_instance_id: Some(self.instance_id.clone()),
                ..NewRun::default()
            },
        )?;
        let run_id = run.short_id.clone();
        self.store.commit(StoreEvent::TaskSpawned {
            task_id: task.short_id.clone(),
            run,
            updated_at: self.clock.now(),
        })?;

        let prompt = self.task_prompt(task);
        let spawn_result = self
            .supervisor
            .spawn(
                &self.data_dir,
                SpawnRequest {
                    task_key: task.short_id.clone(),
                    agent: agent_name.clone(),
                    argv: Config::build_argv(&agent_cfg, &prompt),
                    env: agent_cfg
                        .env
                        .iter()
                        .map(|(k, v)| (k.clone(), v.clone()))
                        .collect(),
                    cwd: self.project_root.clone(),
                    process_type: ProcessType::Task,
                    run_id: run_id.clone(),
                },
            )
            .await;

        let process = match spawn_result {
            Ok(process) => process,
            Err(e) => {
                // Revert the claim; the run stays for orphan cleanup.
                warn!(task = %task.short_id, error = %e, "spawn failed, reverting task");
                self.store.commit(StoreEvent::TaskSpawnReverted {
                    task_id: task.short_id.clone(),
                    run_id,
                    updated_at: self.clock.now(),
                })?;
                return Ok(false);
            }
        };

        self.runs.update_run(
            &run_id,
            RunPatch {
                pid: Some(process.pid),
                ..RunPatch::default()
            },
        )?;

        self.broadcast(&ClientEvent::TaskSpawned {
            task_id: task.short_id.clone(),
            run_id,
            agent: agent_name,
        });
        Ok(true)
    }

    fn task_prompt(&self, task: &Task) -> String {
        let mut vars = HashMap::new();
        vars.insert("task_id".to_string(), task.short_id.clone());
        vars.insert("title".to_string(), task.title.clone());
        vars.insert(
            "description".to_string(),
            task.description.clone().unwrap_or_default(),
        );
        vars.insert(
            "review_issues".to_string(),
            task.last_review_issues
                .as_deref()
                .unwrap_or_default()
                .join("\n- "),
        );
        render_prompt(&self.data_dir, "task", DEFAULT_TASK_PROMPT, &vars)
    }

    // ── Completion handling ──────────────────────────────────────────────

    async fn handle_completion(&mut self, exit: ChildExit) {
        if exit.process_type == ProcessType::Review {
            self.finish_review_run(&exit);
            return;
        }

        let task_id = exit.task_key.clone();
        let meta = parse_result_metadata(&exit.output);

        let run_patch = RunPatch {
            status: Some(if exit.exit_code == Some(0) {
                RunStatus::Completed
            } else {
                RunStatus::Failed
            }),
            ended_at: Some(self.clock.now()),
            exit_code: exit.exit_code,
            output: Some(exit.output.clone()),
            session_id: meta.session_id.clone(),
            cost_usd: meta.cost_usd,
            model: meta.model.clone(),
            ..RunPatch::default()
        };
        if let Err(e) = self.runs.update_run(&exit.run_id, run_patch) {
            error!(run = %exit.run_id, error = %e, "failed to record completion");
        }

        let agent_cfg = self.config.agents.get(&exit.agent).cloned().unwrap_or_default();
        let completion_type = classify_completion(exit.exit_code, &exit.output, &agent_cfg);

        self.broadcast(&ClientEvent::TaskCompleted {
            task_id: task_id.clone(),
            run_id: exit.run_id.clone(),
            exit_code: exit.exit_code,
            completion_type,
        });
        info!(
            task = %task_id,
            agent = %exit.agent,
            exit_code = ?exit.exit_code,
            kind = %completion_type,
            "task run completed"
        );

        match completion_type {
            CompletionType::Success => {
                self.record_health(&exit.agent, None);
                self.retry_counts.remove(&task_id);

                // No new review children once a stop is underway
                let review_possible = self.review_enabled
                    && self.config.reviewer().is_some()
                    && !self.supervisor.is_shutting_down()
                    && self.stop_requested.is_none();
                if review_possible {
                    let ctx = ReviewContext {
                        data_dir: &self.data_dir,
                        project_root: &self.project_root,
                        reviewer: self.config.reviewer(),
                        runner_instance_id: &self.instance_id,
                    };
                    match self.reviews.trigger_review(&self.supervisor, &ctx, &task_id).await {
                        Ok(true) => {}
                        Ok(false) => self.auto_done(&task_id),
                        Err(e) => {
                            error!(task = %task_id, error = %e, "review trigger failed");
                            self.auto_done(&task_id);
                        }
                    }
                } else {
                    self.auto_done(&task_id);
                }
            }

            CompletionType::Failed => {
                self.record_health(&exit.agent, Some(fuel_core::FailureKind::Failed));
                self.retry_task(&task_id, agent_cfg.max_attempts);
            }

            CompletionType::NetworkError => {
                self.record_health(&exit.agent, Some(fuel_core::FailureKind::Network));
                self.retry_task(&task_id, agent_cfg.max_attempts);
            }

            CompletionType::PermissionBlocked => {
                self.record_health(&exit.agent, Some(fuel_core::FailureKind::Permission));
                self.retry_counts.remove(&task_id);
                self.block_on_permissions(&task_id, &exit.agent);
            }
        }

        self.invalidate_ready_cache();
    }

    fn record_health(&self, agent: &str, failure: Option<fuel_core::FailureKind>) {
        let result = match failure {
            None => self.health.record_success(agent),
            Some(kind) => self.health.record_failure(agent, kind),
        };
        if let Err(e) = result {
            error!(agent = %agent, error = %e, "health update failed");
        }
    }

    /// Auto-done policy for successful completions without review.
    fn auto_done(&mut self, task_id: &str) {
        let label = self.tasks.update(
            task_id,
            TaskPatch {
                add_labels: vec![AUTO_CLOSED_LABEL.to_string()],
                ..TaskPatch::default()
            },
        );
        if let Err(e) = label {
            error!(task = %task_id, error = %e, "failed to label auto-closed task");
        }
        if let Err(e) = self
            .tasks
            .done(task_id, Some(AUTO_DONE_REASON.to_string()), None)
        {
            error!(task = %task_id, error = %e, "failed to auto-complete task");
        }
    }

    /// Reopen for another attempt while attempts remain, else leave the
    /// task stuck in_progress for a human.
    fn retry_task(&mut self, task_id: &str, max_attempts: u32) {
        let count = self.retry_counts.entry(task_id.to_string()).or_insert(0);
        if *count + 1 < max_attempts {
            *count += 1;
            debug!(task = %task_id, attempt = *count, "reopening for retry");
            if let Err(e) = self.tasks.reopen(task_id) {
                warn!(task = %task_id, error = %e, "retry reopen failed");
            }
        } else {
            warn!(task = %task_id, max_attempts, "attempts exhausted, leaving in_progress");
        }
    }

    /// Permission-blocked flow: file a human remediation task and park
    /// the original behind it.
    fn block_on_permissions(&mut self, task_id: &str, agent: &str) {
        let remediation = self.tasks.create(NewTask {
            title: format!("Configure agent permissions for {agent}"),
            description: Some(format!(
                "Agent '{agent}' was blocked on a permission prompt while consuming a task. \
                 Grant the required permissions, then reopen or delete this task."
            )),
            priority: Some(1),
            labels: vec![NEEDS_HUMAN_LABEL.to_string()],
            ..NewTask::default()
        });

        match remediation {
            Ok(remediation) => {
                if let Err(e) = self.tasks.add_dependency(task_id, &remediation.short_id) {
                    error!(task = %task_id, error = %e, "failed to link remediation task");
                }
            }
            Err(e) => error!(task = %task_id, error = %e, "failed to create remediation task"),
        }

        if let Err(e) = self.tasks.reopen(task_id) {
            warn!(task = %task_id, error = %e, "failed to reopen permission-blocked task");
        }
    }

    // ── Reviews ──────────────────────────────────────────────────────────

    /// Record the reviewer's run row and stash the exit for step 7.
    fn finish_review_run(&mut self, exit: &ChildExit) {
        let patch = RunPatch {
            status: Some(if exit.exit_code == Some(0) {
                RunStatus::Completed
            } else {
                RunStatus::Failed
            }),
            ended_at: Some(self.clock.now()),
            exit_code: exit.exit_code,
            output: Some(exit.output.clone()),
            ..RunPatch::default()
        };
        if let Err(e) = self.runs.update_run(&exit.run_id, patch) {
            error!(run = %exit.run_id, error = %e, "failed to record review run");
        }

        if let Some(task_id) = exit.task_key.strip_prefix("review-") {
            self.review_exits.insert(task_id.to_string(), exit.clone());
        }
    }

    async fn check_reviews(&mut self) {
        for task_id in self.reviews.pending_reviews() {
            let Some(exit) = self.review_exits.remove(&task_id) else {
                continue;
            };

            let outcome = match self.reviews.review_result(&task_id, &exit.output) {
                Ok(outcome) => outcome,
                Err(e) => {
                    error!(task = %task_id, error = %e, "review result failed");
                    continue;
                }
            };

            if outcome.passed {
                if let Err(e) = self.tasks.done(&task_id, None, None) {
                    error!(task = %task_id, error = %e, "failed to close passed task");
                }
            } else {
                if let Err(e) = self
                    .tasks
                    .set_last_review_issues(&task_id, Some(outcome.issues.clone()))
                {
                    error!(task = %task_id, error = %e, "failed to record review issues");
                }
                if let Err(e) = self.tasks.reopen(&task_id) {
                    error!(task = %task_id, error = %e, "failed to reopen failed task");
                }
            }

            info!(task = %task_id, passed = outcome.passed, "review completed");
            self.broadcast(&ClientEvent::ReviewCompleted {
                task_id: outcome.task_id,
                passed: outcome.passed,
                issues: outcome.issues,
                was_already_done: outcome.was_already_done,
            });
            self.invalidate_ready_cache();
        }
    }

    // ── Snapshots & events ───────────────────────────────────────────────

    fn build_snapshot(&self) -> BoardSnapshot {
        let active: HashMap<String, ActiveProcessView> = self
            .supervisor
            .active_processes()
            .into_iter()
            .map(|(key, process)| {
                let output_tail = self.supervisor.ring_contents(&key).unwrap_or_default();
                (
                    key,
                    ActiveProcessView {
                        process,
                        output_tail,
                    },
                )
            })
            .collect();

        let health = self.current_health();
        let state = self.store.state_clone();
        build_snapshot(
            &state,
            &SnapshotInputs {
                active: &active,
                health: &health,
                paused: self.paused,
                started_at: self.started_at,
                instance_id: &self.instance_id,
                interval_seconds: self.config.consume.interval_seconds,
                agent_names: {
                    let mut names: Vec<String> = self.config.agents.keys().cloned().collect();
                    names.sort();
                    names
                },
            },
        )
    }

    /// Broadcast the snapshot; unless forced, only when its content hash
    /// moved since the last broadcast.
    fn broadcast_snapshot(&mut self, force: bool) {
        let snapshot = self.build_snapshot();
        let hash = snapshot_content_hash(&snapshot);
        if !force && self.last_snapshot_hash.as_deref() == Some(hash.as_str()) {
            return;
        }
        self.last_snapshot_hash = Some(hash);
        self.broadcast(&ClientEvent::Snapshot { snapshot });
    }

    /// Terminal-history listings, most recently updated first.
    fn tasks_with_status(&self, statuses: &[TaskStatus]) -> (Vec<TaskView>, usize) {
        let mut matching: Vec<Task> = self.store.with_state(|state| {
            state
                .tasks
                .values()
                .filter(|t| statuses.contains(&t.status))
                .cloned()
                .collect()
        });
        matching.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
        let total = matching.len();
        (matching.iter().map(TaskView::from).collect(), total)
    }

    fn status_line(&self, level: &str, text: &str) {
        self.broadcast(&ClientEvent::StatusLine {
            level: level.to_string(),
            text: text.to_string(),
        });
    }

    fn send_error(&self, client_id: u64, message: &str) {
        self.send_to(
            client_id,
            &ClientEvent::Error {
                message: message.to_string(),
            },
        );
    }

    fn broadcast(&self, event: &ClientEvent) {
        match encode_event(event, &self.instance_id, self.clock.now()) {
            Ok(line) => self.server.broadcast(&line),
            Err(e) => error!(error = %e, "event encode failed"),
        }
    }

    fn send_to(&self, client_id: u64, event: &ClientEvent) {
        match encode_event(event, &self.instance_id, self.clock.now()) {
            Ok(line) => self.server.send_to(client_id, &line),
            Err(e) => error!(error = %e, "event encode failed"),
        }
    }

    // ── Shutdown ─────────────────────────────────────────────────────────

    async fn shutdown(&mut self, mode: StopMode) {
        info!(?mode, "runner stopping");
        if mode == StopMode::Force {
            // Immediate kill of every child before the supervisor drain.
            for task_key in self.supervisor.active_processes().into_keys() {
                self.supervisor.kill(&task_key).await;
            }
        }
        self.supervisor.shutdown().await;

        // Record whatever the shutdown reaped.
        for exit in self.supervisor.poll() {
            self.handle_completion(exit).await;
        }

        if let Err(e) = self.store.flush() {
            error!(error = %e, "final WAL flush failed");
        }
    }
}

#[cfg(test)]
#[path = "runner_tests.rs"]
mod tests;
