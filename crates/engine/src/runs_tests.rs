// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use crate::error::EngineError;
use crate::test_helpers::TestEnv;
use chrono::Duration;
use fuel_core::{RunPatch, RunStatus};

fn new_run(agent: &str) -> NewRun {
    NewRun {
        agent: agent.to_string(),
        ..NewRun::default()
    }
}

#[test]
fn create_and_fetch_runs() {
    let env = TestEnv::new();
    let runs = env.runs();

    let first = runs.create_run("f-000001", new_run("builder")).unwrap();
    env.clock.advance(Duration::seconds(10));
    let second = runs.create_run("f-000001", new_run("builder")).unwrap();

    assert_eq!(runs.get_runs("f-000001").len(), 2);
    assert_eq!(
        runs.get_latest_run("f-000001").map(|r| r.short_id),
        Some(second.clone())
    );

    runs.update_run(
        &first,
        RunPatch {
            status: Some(RunStatus::Completed),
            ended_at: Some(env.clock.now()),
            exit_code: Some(0),
            ..RunPatch::default()
        },
    )
    .unwrap();
    assert_eq!(
        runs.get_runs("f-000001")[0].status,
        RunStatus::Completed
    );
}

#[test]
fn update_latest_run_targets_newest() {
    let env = TestEnv::new();
    let runs = env.runs();

    runs.create_run("f-000001", new_run("builder")).unwrap();
    env.clock.advance(Duration::seconds(1));
    let newest = runs.create_run("f-000001", new_run("builder")).unwrap();

    runs.update_latest_run(
        "f-000001",
        RunPatch {
            session_id: Some("sess-1".into()),
            ..RunPatch::default()
        },
    )
    .unwrap();

    let run = runs.get_latest_run("f-000001").unwrap();
    assert_eq!(run.short_id, newest);
    assert_eq!(run.session_id.as_deref(), Some("sess-1"));
}

#[test]
fn update_unknown_run_is_not_found() {
    let env = TestEnv::new();
    let runs = env.runs();
    assert!(matches!(
        runs.update_run("run-404404", RunPatch::default()),
        Err(EngineError::NotFound(_))
    ));
    assert!(matches!(
        runs.update_latest_run("f-404404", RunPatch::default()),
        Err(EngineError::NotFound(_))
    ));
}

// ── Orphan recovery ──────────────────────────────────────────────────────────

#[test]
fn orphans_without_pid_are_failed() {
    let env = TestEnv::new();
    let runs = env.runs();
    let id = runs.create_run("f-000001", new_run("builder")).unwrap();

    let cleaned = runs.cleanup_orphaned_runs(|_| false).unwrap();
    assert_eq!(cleaned, 1);

    let run = runs.get_latest_run("f-000001").unwrap();
    assert_eq!(run.short_id, id);
    assert_eq!(run.status, RunStatus::Failed);
    assert_eq!(run.exit_code, Some(-1));
    assert!(run.output.as_deref().unwrap_or("").contains("orphaned"));
    assert!(run.ended_at.is_some());
}

#[test]
fn orphans_with_dead_pid_are_failed_but_live_ones_survive() {
    let env = TestEnv::new();
    let runs = env.runs();

    runs.create_run(
        "f-000001",
        NewRun {
            agent: "builder".into(),
            pid: Some(111),
            ..NewRun::default()
        },
    )
    .unwrap();
    runs.create_run(
        "f-000002",
        NewRun {
            agent: "builder".into(),
            pid: Some(222),
            ..NewRun::default()
        },
    )
    .unwrap();

    // 111 is dead, 222 still runs
    let cleaned = runs.cleanup_orphaned_runs(|pid| pid == 222).unwrap();
    assert_eq!(cleaned, 1);

    assert_eq!(
        runs.get_latest_run("f-000001").map(|r| r.status),
        Some(RunStatus::Failed)
    );
    assert_eq!(
        runs.get_latest_run("f-000002").map(|r| r.status),
        Some(RunStatus::Running)
    );
}

#[test]
fn cleanup_is_idempotent() {
    let env = TestEnv::new();
    let runs = env.runs();
    runs.create_run("f-000001", new_run("builder")).unwrap();

    assert_eq!(runs.cleanup_orphaned_runs(|_| false).unwrap(), 1);
    let after_first = env.store.state_clone();

    assert_eq!(runs.cleanup_orphaned_runs(|_| false).unwrap(), 0);
    let after_second = env.store.state_clone();
    assert_eq!(
        serde_json::to_value(&after_first.runs).unwrap(),
        serde_json::to_value(&after_second.runs).unwrap()
    );
}

// ── Stats ────────────────────────────────────────────────────────────────────

#[test]
fn stats_aggregate_by_status_and_cost() {
    let env = TestEnv::new();
    let runs = env.runs();

    let a = runs.create_run("f-000001", new_run("builder")).unwrap();
    let b = runs.create_run("f-000002", new_run("builder")).unwrap();
    runs.create_run("f-000003", new_run("builder")).unwrap();

    runs.update_run(
        &a,
        RunPatch {
            status: Some(RunStatus::Completed),
            ended_at: Some(env.clock.now() + Duration::seconds(10)),
            cost_usd: Some(0.25),
            ..RunPatch::default()
        },
    )
    .unwrap();
    runs.update_run(
        &b,
        RunPatch {
            status: Some(RunStatus::Failed),
            ended_at: Some(env.clock.now() + Duration::seconds(30)),
            ..RunPatch::default()
        },
    )
    .unwrap();

    let stats = runs.get_stats();
    assert_eq!(stats.total, 3);
    assert_eq!(stats.running, 1);
    assert_eq!(stats.completed, 1);
    assert_eq!(stats.failed, 1);
    assert!((stats.total_cost_usd - 0.25).abs() < f64::EPSILON);

    let timing = runs.get_timing_stats();
    assert_eq!(timing.count, 2);
    assert_eq!(timing.min_seconds, 10);
    assert_eq!(timing.max_seconds, 30);
    assert_eq!(timing.avg_seconds, 20);
}
