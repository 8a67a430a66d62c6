// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use crate::{Checkpointer, MaterializedState};
use fuel_core::test_support::task;
use fuel_core::StoreEvent;
use serde_json::json;
use std::path::{Path, PathBuf};

fn populated_state() -> MaterializedState {
    let mut state = MaterializedState::default();
    state.apply_event(&StoreEvent::TaskCreated {
        task: task("f-000001", "snapshot test"),
    });
    state
}

fn bak_slot(path: &Path, n: u32) -> PathBuf {
    PathBuf::from(format!("{}.bak.{n}", path.display()))
}

#[test]
fn load_missing_snapshot_returns_none() {
    let dir = tempfile::tempdir().unwrap();
    let loaded = load_snapshot(&dir.path().join("snapshot.zst")).unwrap();
    assert!(loaded.is_none());
}

#[test]
fn checkpoint_then_load_round_trips() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("snapshot.zst");
    let state = populated_state();

    let checkpointer = Checkpointer::new(path.clone());
    let result = checkpointer.write(42, &state).unwrap();
    assert_eq!(result.seq, 42);

    let snapshot = load_snapshot(&path).unwrap().expect("snapshot");
    assert_eq!(snapshot.v, CURRENT_SNAPSHOT_VERSION);
    assert_eq!(snapshot.seq, 42);
    assert!(snapshot.state.tasks.contains_key("f-000001"));
}

#[test]
fn corrupt_snapshot_is_quarantined() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("snapshot.zst");
    std::fs::write(&path, b"not a zstd stream").unwrap();

    let loaded = load_snapshot(&path).unwrap();
    assert!(loaded.is_none());
    assert!(!path.exists());
    assert!(bak_slot(&path, 1).exists());
}

#[test]
fn quarantine_chain_keeps_three_copies() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("snapshot.zst");

    for round in 0..4u8 {
        std::fs::write(&path, [round]).unwrap();
        let _ = load_snapshot(&path).unwrap();
    }

    // Newest corrupt copy sits in slot 1; the first round fell off the end
    assert_eq!(std::fs::read(bak_slot(&path, 1)).unwrap(), vec![3]);
    assert_eq!(std::fs::read(bak_slot(&path, 2)).unwrap(), vec![2]);
    assert_eq!(std::fs::read(bak_slot(&path, 3)).unwrap(), vec![1]);
    assert!(!bak_slot(&path, 4).exists());
}

// ── Schema upgrades ──────────────────────────────────────────────────────────

fn mark_upgraded(doc: &mut serde_json::Value) -> Result<(), SnapshotError> {
    if let Some(obj) = doc.as_object_mut() {
        obj.insert("upgraded".into(), json!(true));
    }
    Ok(())
}

#[test]
fn current_version_passes_through_untouched() {
    let doc = json!({"v": 1, "seq": 7});
    let out = upgrade_schema(doc.clone(), 1, &[]).unwrap();
    assert_eq!(out, doc);
}

#[test]
fn missing_version_field_means_v1() {
    let out = upgrade_schema(json!({"seq": 7}), 1, &[]).unwrap();
    assert_eq!(out, json!({"seq": 7}));
}

#[test]
fn steps_run_in_order_and_stamp_the_register() {
    let steps: &[UpgradeFn] = &[mark_upgraded];
    let out = upgrade_schema(json!({"v": 1, "seq": 7}), 2, steps).unwrap();
    assert_eq!(out["v"], 2);
    assert_eq!(out["upgraded"], true);
}

#[test]
fn newer_schema_is_refused() {
    let err = upgrade_schema(json!({"v": 9}), 1, &[]).unwrap_err();
    assert!(matches!(
        err,
        SnapshotError::SchemaAhead {
            found: 9,
            supported: 1
        }
    ));
}

#[test]
fn gap_in_the_upgrade_table_is_an_error() {
    let err = upgrade_schema(json!({"v": 1}), 2, &[]).unwrap_err();
    assert!(matches!(err, SnapshotError::MissingUpgrade(1)));
}
