// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use crate::test_support::task;
use proptest::prelude::*;
use yare::parameterized;

#[parameterized(
    open_to_in_progress = { TaskStatus::Open, TaskStatus::InProgress, true },
    open_to_someday = { TaskStatus::Open, TaskStatus::Someday, true },
    open_to_done = { TaskStatus::Open, TaskStatus::Done, true },
    open_to_review = { TaskStatus::Open, TaskStatus::Review, false },
    in_progress_to_review = { TaskStatus::InProgress, TaskStatus::Review, true },
    in_progress_to_done = { TaskStatus::InProgress, TaskStatus::Done, true },
    in_progress_to_open = { TaskStatus::InProgress, TaskStatus::Open, true },
    in_progress_to_someday = { TaskStatus::InProgress, TaskStatus::Someday, false },
    review_to_done = { TaskStatus::Review, TaskStatus::Done, true },
    review_to_open = { TaskStatus::Review, TaskStatus::Open, true },
    someday_to_open = { TaskStatus::Someday, TaskStatus::Open, true },
    someday_to_in_progress = { TaskStatus::Someday, TaskStatus::InProgress, false },
    done_to_open = { TaskStatus::Done, TaskStatus::Open, true },
    done_to_in_progress = { TaskStatus::Done, TaskStatus::InProgress, false },
    cancelled_to_open = { TaskStatus::Cancelled, TaskStatus::Open, false },
)]
fn transition_lattice(from: TaskStatus, to: TaskStatus, allowed: bool) {
    assert_eq!(from.can_transition(to), allowed);
}

#[test]
fn transitions_are_reflexive() {
    for status in [
        TaskStatus::Open,
        TaskStatus::InProgress,
        TaskStatus::Review,
        TaskStatus::Done,
        TaskStatus::Someday,
        TaskStatus::Cancelled,
    ] {
        assert!(status.can_transition(status));
    }
}

#[test]
fn cancelled_is_terminal() {
    for to in [
        TaskStatus::Open,
        TaskStatus::InProgress,
        TaskStatus::Review,
        TaskStatus::Done,
        TaskStatus::Someday,
    ] {
        assert!(!TaskStatus::Cancelled.can_transition(to));
    }
    assert!(TaskStatus::Cancelled.is_terminal());
}

#[test]
fn schedulable_excludes_needs_human_and_reality() {
    let mut t = task("f-000001", "a task");
    assert!(t.is_schedulable());

    t.labels.insert(NEEDS_HUMAN_LABEL.to_string());
    assert!(!t.is_schedulable());

    let mut t = task("f-000002", "observed");
    t.task_type = TaskType::Reality;
    assert!(!t.is_schedulable());

    let mut t = task("f-000003", "done");
    t.status = TaskStatus::Done;
    assert!(!t.is_schedulable());
}

#[test]
fn patch_labels_are_set_semantics() {
    let mut t = task("f-000001", "labelled");
    let patch = TaskPatch {
        add_labels: vec!["urgent".into(), "urgent".into(), "backend".into()],
        ..TaskPatch::default()
    };
    patch.apply_to(&mut t);
    assert_eq!(t.labels.len(), 2);

    let patch = TaskPatch {
        remove_labels: vec!["urgent".into()],
        ..TaskPatch::default()
    };
    patch.apply_to(&mut t);
    assert!(!t.labels.contains("urgent"));
    assert!(t.labels.contains("backend"));
}

#[test]
fn patch_clear_review_issues_wins_over_set() {
    let mut t = task("f-000001", "reviewed");
    t.last_review_issues = Some(vec!["old issue".into()]);

    let patch = TaskPatch {
        last_review_issues: Some(vec!["new issue".into()]),
        clear_review_issues: true,
        ..TaskPatch::default()
    };
    patch.apply_to(&mut t);
    assert_eq!(t.last_review_issues, None);
}

#[test]
fn patch_is_idempotent() {
    let mut once = task("f-000001", "patched");
    let patch = TaskPatch {
        status: Some(TaskStatus::InProgress),
        add_labels: vec!["x".into()],
        consumed: Some(true),
        ..TaskPatch::default()
    };
    patch.apply_to(&mut once);
    let mut twice = once.clone();
    patch.apply_to(&mut twice);
    assert_eq!(once, twice);
}

#[test]
fn enums_serialize_snake_case() {
    assert_eq!(
        serde_json::to_value(TaskStatus::InProgress).unwrap(),
        serde_json::json!("in_progress")
    );
    assert_eq!(
        serde_json::to_value(TaskType::Reality).unwrap(),
        serde_json::json!("reality")
    );
    assert_eq!(
        serde_json::to_value(Complexity::Moderate).unwrap(),
        serde_json::json!("moderate")
    );
}

#[test]
fn status_round_trips_through_from_str() {
    for status in [
        TaskStatus::Open,
        TaskStatus::InProgress,
        TaskStatus::Review,
        TaskStatus::Done,
        TaskStatus::Someday,
        TaskStatus::Cancelled,
    ] {
        assert_eq!(status.to_string().parse::<TaskStatus>(), Ok(status));
    }
    assert!("bogus".parse::<TaskStatus>().is_err());
}

proptest! {
    /// Any status reachable via an accepted transition can itself only
    /// move along lattice edges — no transition resurrects `cancelled`.
    #[test]
    fn no_edge_leaves_cancelled(to in prop::sample::select(vec![
        TaskStatus::Open,
        TaskStatus::InProgress,
        TaskStatus::Review,
        TaskStatus::Done,
        TaskStatus::Someday,
    ])) {
        prop_assert!(!TaskStatus::Cancelled.can_transition(to));
    }
}
