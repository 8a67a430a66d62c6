// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use chrono::Duration;
use fuel_core::test_support::{epoch, task};
use fuel_core::{StoreEvent, TaskPatch, TaskType};
use fuel_engine::HealthStatus;
use fuel_storage::MaterializedState;
use std::collections::HashMap as StdHashMap;

fn state_with(tasks: &[fuel_core::Task]) -> MaterializedState {
    let mut state = MaterializedState::default();
    for t in tasks {
        state.apply_event(&StoreEvent::TaskCreated { task: t.clone() });
    }
    state
}

fn inputs<'a>(
    active: &'a StdHashMap<String, ActiveProcessView>,
    health: &'a std::collections::BTreeMap<String, HealthStatus>,
    paused: bool,
) -> SnapshotInputs<'a> {
    SnapshotInputs {
        active,
        health,
        paused,
        started_at: epoch(),
        instance_id: "uuid-1",
        interval_seconds: 2,
        agent_names: vec!["builder".to_string()],
    }
}

fn empty_inputs_snapshot(state: &MaterializedState, paused: bool) -> BoardSnapshot {
    let active = StdHashMap::new();
    let health = std::collections::BTreeMap::new();
    build_snapshot(state, &inputs(&active, &health, paused))
}

#[test]
fn columns_partition_the_board() {
    let mut open = task("f-00000a", "ready");
    open.priority = 1;
    let mut human = task("f-00000b", "needs a person");
    human.labels.insert(fuel_core::NEEDS_HUMAN_LABEL.to_string());
    let mut reality = task("f-00000c", "observed");
    reality.task_type = TaskType::Reality;
    let blocker = task("f-00000d", "blocker");
    let mut blocked = task("f-00000e", "waiting");
    blocked.blocked_by = vec!["f-00000d".to_string()];

    let mut state = state_with(&[open, human, reality, blocker, blocked]);
    state.apply_event(&StoreEvent::TaskUpdated {
        id: "f-00000a".into(),
        patch: TaskPatch::default(),
        updated_at: epoch(),
    });

    let snapshot = empty_inputs_snapshot(&state, false);
    let board = &snapshot.board_state;

    let ids = |views: &[TaskView]| -> Vec<String> {
        views.iter().map(|v| v.short_id.clone()).collect()
    };
    assert_eq!(ids(&board.ready), vec!["f-00000a", "f-00000d"]);
    assert_eq!(ids(&board.human), vec!["f-00000b"]);
    assert_eq!(ids(&board.blocked), vec!["f-00000e"]);
    assert!(board.in_progress.is_empty());
    assert_eq!(snapshot.blocked_count, 1);
    assert_eq!(snapshot.done_count, 0);
}

#[test]
fn done_column_is_capped_but_counted() {
    let mut tasks = Vec::new();
    for n in 0..60 {
        let mut t = task(&format!("f-{n:06x}"), "finished");
        t.status = fuel_core::TaskStatus::Done;
        t.updated_at = epoch() + Duration::seconds(n);
        tasks.push(t);
    }
    let state = state_with(&tasks);

    let snapshot = empty_inputs_snapshot(&state, false);
    assert_eq!(snapshot.board_state.done.len(), 50);
    assert_eq!(snapshot.done_count, 60);
    // Most recently updated first
    assert_eq!(snapshot.board_state.done[0].short_id, "f-00003b");
}

#[test]
fn hash_ignores_timestamp_churn() {
    let state = state_with(&[task("f-00000a", "stable")]);
    let first = empty_inputs_snapshot(&state, false);

    let mut touched = state.clone();
    touched.apply_event(&StoreEvent::TaskUpdated {
        id: "f-00000a".into(),
        patch: TaskPatch::default(),
        updated_at: epoch() + Duration::seconds(30),
    });
    let second = empty_inputs_snapshot(&touched, false);

    assert_eq!(
        snapshot_content_hash(&first),
        snapshot_content_hash(&second)
    );
}

#[test]
fn hash_moves_with_board_changes() {
    let state = state_with(&[task("f-00000a", "moving")]);
    let before = empty_inputs_snapshot(&state, false);

    let mut after_state = state.clone();
    after_state.apply_event(&StoreEvent::TaskUpdated {
        id: "f-00000a".into(),
        patch: TaskPatch::status(fuel_core::TaskStatus::Someday),
        updated_at: epoch(),
    });
    let after = empty_inputs_snapshot(&after_state, false);

    assert_ne!(snapshot_content_hash(&before), snapshot_content_hash(&after));
}

#[test]
fn hash_tracks_paused_and_active_sets() {
    let state = state_with(&[task("f-00000a", "stable")]);

    let running = empty_inputs_snapshot(&state, false);
    let paused = empty_inputs_snapshot(&state, true);
    assert_ne!(snapshot_content_hash(&running), snapshot_content_hash(&paused));

    let mut active = StdHashMap::new();
    active.insert(
        "f-00000a".to_string(),
        ActiveProcessView {
            process: fuel_engine::ActiveProcess {
                task_id: "f-00000a".into(),
                run_id: "run-0000aa".into(),
                agent: "builder".into(),
                pid: 1234,
                started_at: epoch(),
                process_type: fuel_engine::ProcessType::Task,
                session_id: None,
            },
            output_tail: String::new(),
        },
    );
    let health = std::collections::BTreeMap::new();
    let with_active = build_snapshot(&state, &inputs(&active, &health, false));
    assert_ne!(
        snapshot_content_hash(&running),
        snapshot_content_hash(&with_active)
    );
}
