// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use crate::protocol::{decode_event, ClientEvent};
use crate::server::IpcServer;
use fuel_config::{AgentConfig, Config, ConsumeConfig};
use fuel_core::test_support::epoch;
use fuel_core::{Complexity, FakeClock, RunStatus, Task, TaskStatus, NEEDS_HUMAN_LABEL};
use fuel_engine::{CompletionType, NewTask, ProcessSupervisor, Store};
use fuel_storage::MaterializedState;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::tcp::OwnedReadHalf;
use tokio::net::TcpStream;

fn sh_agent(script: &str) -> AgentConfig {
    AgentConfig {
        command: "/bin/sh".to_string(),
        args: vec!["-c".to_string(), script.to_string()],
        concurrency_limit: 3,
        max_retries: 3,
        max_attempts: 3,
        ..AgentConfig::default()
    }
}

fn test_config(agents: Vec<(&str, AgentConfig)>, review_agent: Option<&str>) -> Config {
    let first = agents.first().map(|(name, _)| name.to_string());
    let mut config = Config {
        consume: ConsumeConfig {
            port: None,
            interval_seconds: 2,
        },
        agents: agents
            .into_iter()
            .map(|(name, cfg)| (name.to_string(), cfg))
            .collect(),
        complexity_to_agent: HashMap::new(),
        review_agent: review_agent.map(String::from),
    };
    if let Some(first) = first {
        for complexity in [
            Complexity::Trivial,
            Complexity::Simple,
            Complexity::Moderate,
            Complexity::Complex,
        ] {
            config.complexity_to_agent.insert(complexity, first.clone());
        }
    }
    config
}

struct Harness {
    // NOTE(lifetime): keeps the data directory alive for the runner
    #[allow(dead_code)]
    dir: tempfile::TempDir,
    runner: Runner,
    store: Arc<Store>,
    clock: Arc<FakeClock>,
}

impl Harness {
    async fn new(config: Config) -> Self {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(Store::open(dir.path()).unwrap());
        let clock = Arc::new(FakeClock::at(epoch()));
        let server = IpcServer::start(0).await.unwrap();

        let runner = Runner::new(RunnerParams {
            data_dir: dir.path().to_path_buf(),
            project_root: dir.path().to_path_buf(),
            config,
            store: Arc::clone(&store),
            clock: clock.clone(),
            supervisor: ProcessSupervisor::new(),
            server,
            instance_id: "test-instance".to_string(),
        });

        Self {
            dir,
            runner,
            store,
            clock,
        }
    }

    fn create_task(&self, title: &str) -> Task {
        self.runner
            .tasks
            .create(NewTask {
                title: title.to_string(),
                ..NewTask::default()
            })
            .unwrap()
    }

    async fn connect(&self) -> TcpStream {
        TcpStream::connect(self.runner.server.local_addr())
            .await
            .unwrap()
    }

    /// Tick until the predicate holds on the state, or panic.
    async fn pump_until(&mut self, what: &str, pred: impl Fn(&MaterializedState) -> bool) {
        for _ in 0..300 {
            self.runner.tick().await;
            if self.store.with_state(&pred) {
                return;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        panic!("timed out waiting for: {what}");
    }

    async fn pump(&mut self, ticks: usize) {
        for _ in 0..ticks {
            self.runner.tick().await;
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    }
}

/// Drain whatever events are currently readable from the client.
async fn drain_events(lines: &mut tokio::io::Lines<BufReader<OwnedReadHalf>>) -> Vec<ClientEvent> {
    let mut events = Vec::new();
    while let Ok(Ok(Some(line))) =
        tokio::time::timeout(Duration::from_millis(200), lines.next_line()).await
    {
        if let Ok(event) = decode_event(&line) {
            events.push(event);
        }
    }
    events
}

// ── E1: happy spawn-to-done ──────────────────────────────────────────────────

#[tokio::test]
async fn spawn_to_auto_done() {
    let config = test_config(vec![("a", sh_agent("echo finished"))], None);
    let mut harness = Harness::new(config).await;

    let client = harness.connect().await;
    let (read_half, _write_half) = client.into_split();
    let mut lines = BufReader::new(read_half).lines();

    let task = harness.create_task("t");
    let task_id = task.short_id.clone();

    harness
        .pump_until("task auto-done", |state| {
            state.tasks[&task_id].status == TaskStatus::Done
        })
        .await;

    let task = harness.store.with_state(|s| s.tasks[&task_id].clone());
    assert!(task.labels.contains("auto-closed"));
    assert_eq!(
        task.reason.as_deref(),
        Some("Auto-completed by consume (agent exit 0)")
    );
    assert!(task.consumed);

    let run = harness
        .store
        .with_state(|s| s.latest_run(&task_id).cloned())
        .unwrap();
    assert_eq!(run.status, RunStatus::Completed);
    assert_eq!(run.exit_code, Some(0));
    assert!(run.duration_seconds.unwrap_or(-1) >= 0);
    assert_eq!(run.agent, "a");
    assert!(run.pid.is_some());

    let events = drain_events(&mut lines).await;
    assert!(events
        .iter()
        .any(|e| matches!(e, ClientEvent::Hello { .. })));
    assert!(events.iter().any(
        |e| matches!(e, ClientEvent::TaskSpawned { agent, .. } if agent == "a")
    ));
    assert!(events.iter().any(|e| matches!(
        e,
        ClientEvent::TaskCompleted {
            exit_code: Some(0),
            completion_type: CompletionType::Success,
            ..
        }
    )));
}

// ── E2: review fail → reopen ─────────────────────────────────────────────────

#[tokio::test]
async fn failed_review_reopens_with_issues() {
    let reviewer =
        sh_agent(r#"echo '{"result":"fail","issues":[{"description":"missing tests"}]}'"#);
    let config = test_config(
        vec![("a", sh_agent("echo did the work")), ("r", reviewer)],
        Some("r"),
    );
    let mut harness = Harness::new(config).await;

    let client = harness.connect().await;
    let (read_half, _write_half) = client.into_split();
    let mut lines = BufReader::new(read_half).lines();

    let task = harness.create_task("needs review");
    let task_id = task.short_id.clone();

    harness
        .pump_until("review failure reopened the task", |state| {
            state.tasks[&task_id].status == TaskStatus::Open
                && state.tasks[&task_id].last_review_issues.is_some()
        })
        .await;

    let task = harness.store.with_state(|s| s.tasks[&task_id].clone());
    assert_eq!(
        task.last_review_issues,
        Some(vec!["missing tests".to_string()])
    );

    let review = harness
        .store
        .with_state(|s| s.latest_review(&task_id).cloned())
        .unwrap();
    assert_eq!(review.status, fuel_core::ReviewStatus::Failed);
    assert_eq!(review.issues, vec!["missing tests".to_string()]);
    assert_eq!(review.agent, "r");

    let events = drain_events(&mut lines).await;
    assert!(events.iter().any(
        |e| matches!(e, ClientEvent::TaskCompleted { completion_type: CompletionType::Success, .. })
    ));
    assert!(events.iter().any(|e| matches!(
        e,
        ClientEvent::ReviewCompleted { passed: false, issues, was_already_done: false, .. }
            if issues == &vec!["missing tests".to_string()]
    )));
}

// ── E3: permission-blocked flow ──────────────────────────────────────────────

#[tokio::test]
async fn permission_blocked_files_a_human_task() {
    let config = test_config(
        vec![("a", sh_agent("echo Claude needs permission for Bash; exit 2"))],
        None,
    );
    let mut harness = Harness::new(config).await;

    let task = harness.create_task("blocked work");
    let task_id = task.short_id.clone();

    harness
        .pump_until("remediation task filed", |state| {
            state
                .tasks
                .values()
                .any(|t| t.title == "Configure agent permissions for a")
        })
        .await;

    let remediation = harness.store.with_state(|s| {
        s.tasks
            .values()
            .find(|t| t.title == "Configure agent permissions for a")
            .cloned()
            .unwrap()
    });
    assert!(remediation.labels.contains(NEEDS_HUMAN_LABEL));
    assert_eq!(remediation.priority, 1);

    let original = harness.store.with_state(|s| s.tasks[&task_id].clone());
    assert_eq!(original.status, TaskStatus::Open);
    assert!(original.blocked_by.contains(&remediation.short_id));

    let health = harness.store.with_state(|s| s.health["a"].clone());
    assert_eq!(health.consecutive_failures, 1);
    assert_eq!(health.backoff_until, None);

    // The original is blocked behind the remediation task: no respawn
    harness.pump(5).await;
    assert_eq!(
        harness
            .store
            .with_state(|s| s.runs_for_task(&task_id).len()),
        1
    );
}

// ── E4: backoff after consecutive failures ───────────────────────────────────

#[tokio::test]
async fn consecutive_failures_back_the_agent_off() {
    let mut agent = sh_agent("exit 1");
    agent.max_attempts = 1; // fail once per task, no reopen churn
    agent.max_retries = 5; // keep "dead" out of this scenario
    let config = test_config(vec![("a", agent)], None);
    let mut harness = Harness::new(config).await;

    for n in 0..3 {
        harness.create_task(&format!("doomed {n}"));
    }

    harness
        .pump_until("three consecutive failures", |state| {
            state
                .health
                .get("a")
                .map(|h| h.consecutive_failures == 3)
                .unwrap_or(false)
        })
        .await;

    assert!(harness.runner.health.backoff_seconds("a") >= 110);
    assert!(!harness.runner.health.is_available("a"));

    // New work does not spawn while the agent is backing off
    let parked = harness.create_task("parked");
    harness.pump(5).await;
    assert!(harness
        .store
        .with_state(|s| s.latest_run(&parked.short_id).is_none()));
    assert_eq!(
        harness.store.with_state(|s| s.tasks[&parked.short_id].status),
        TaskStatus::Open
    );
}

// ── Command dispatch over the wire ───────────────────────────────────────────

#[tokio::test]
async fn malformed_and_unknown_commands_get_error_events() {
    let config = test_config(vec![("a", sh_agent("true"))], None);
    let mut harness = Harness::new(config).await;

    let client = harness.connect().await;
    let (read_half, mut write_half) = client.into_split();
    let mut lines = BufReader::new(read_half).lines();

    write_half.write_all(b"{garbage\n").await.unwrap();
    write_half
        .write_all(b"{\"type\":\"warp_drive\"}\n")
        .await
        .unwrap();
    write_half.write_all(b"{\"no_type\":true}\n").await.unwrap();
    write_half.flush().await.unwrap();

    harness.pump(5).await;

    let events = drain_events(&mut lines).await;
    let errors: Vec<&ClientEvent> = events
        .iter()
        .filter(|e| matches!(e, ClientEvent::Error { .. }))
        .collect();
    assert_eq!(errors.len(), 3, "events: {events:?}");

    // The connection survived: a valid command still works
    write_half
        .write_all(b"{\"type\":\"request_snapshot\"}\n")
        .await
        .unwrap();
    write_half.flush().await.unwrap();
    harness.pump(2).await;
    let events = drain_events(&mut lines).await;
    assert!(events
        .iter()
        .any(|e| matches!(e, ClientEvent::Snapshot { .. })));
}

#[tokio::test]
async fn task_create_over_ipc_echoes_the_request_id() {
    let config = test_config(vec![("a", sh_agent("true"))], None);
    let mut harness = Harness::new(config).await;
    // Keep the scheduler out of the way for this one
    harness.runner.paused = true;

    let client = harness.connect().await;
    let (read_half, mut write_half) = client.into_split();
    let mut lines = BufReader::new(read_half).lines();

    write_half
        .write_all(
            b"{\"type\":\"task_create\",\"title\":\"via ipc\",\"priority\":1,\"request_id\":\"req-77\"}\n",
        )
        .await
        .unwrap();
    write_half.flush().await.unwrap();
    harness.pump(3).await;

    let events = drain_events(&mut lines).await;
    let response = events
        .iter()
        .find_map(|e| match e {
            ClientEvent::TaskCreateResponse {
                request_id,
                success,
                task_id,
                ..
            } if request_id == "req-77" => Some((*success, task_id.clone())),
            _ => None,
        })
        .expect("task_create_response");
    assert!(response.0);
    let task_id = response.1.unwrap();
    assert!(harness.store.with_state(|s| s.tasks.contains_key(&task_id)));
}

#[tokio::test]
async fn pause_gates_spawning() {
    let config = test_config(vec![("a", sh_agent("echo fast"))], None);
    let mut harness = Harness::new(config).await;

    let client = harness.connect().await;
    let (_read_half, mut write_half) = client.into_split();
    write_half.write_all(b"{\"type\":\"pause\"}\n").await.unwrap();
    write_half.flush().await.unwrap();
    harness.pump(2).await;
    assert!(harness.runner.paused);

    let task = harness.create_task("waiting out the pause");
    harness.pump(5).await;
    assert!(harness
        .store
        .with_state(|s| s.latest_run(&task.short_id).is_none()));

    write_half.write_all(b"{\"type\":\"resume\"}\n").await.unwrap();
    write_half.flush().await.unwrap();
    let task_id = task.short_id.clone();
    harness
        .pump_until("task ran after resume", |state| {
            state.tasks[&task_id].status == TaskStatus::Done
        })
        .await;
}

// ── Snapshot broadcast gating ────────────────────────────────────────────────

#[tokio::test]
async fn unchanged_board_broadcasts_at_most_once() {
    let config = test_config(vec![("a", sh_agent("true"))], None);
    let mut harness = Harness::new(config).await;
    harness.create_task("static board");
    harness.runner.paused = true;

    let client = harness.connect().await;
    let (read_half, _write_half) = client.into_split();
    let mut lines = BufReader::new(read_half).lines();

    // Swallow the join-time hello + snapshot
    harness.pump(2).await;
    drain_events(&mut lines).await;

    // Force two periodic broadcast windows with an unchanged board
    for _ in 0..2 {
        harness.runner.last_broadcast = Instant::now() - Duration::from_secs(5);
        harness.runner.tick().await;
        tokio::time::sleep(Duration::from_millis(20)).await;
    }

    let snapshots = drain_events(&mut lines)
        .await
        .into_iter()
        .filter(|e| matches!(e, ClientEvent::Snapshot { .. }))
        .count();
    assert!(snapshots <= 1, "expected at most one snapshot, got {snapshots}");
}
