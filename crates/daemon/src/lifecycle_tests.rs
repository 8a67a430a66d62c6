// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use chrono::Utc;

/// A pid that cannot exist on Linux (above the default pid_max).
const DEAD_PID: u32 = 3_999_999;

#[test]
fn acquire_writes_the_pid_record() {
    let dir = tempfile::tempdir().unwrap();
    let lock = RunnerLock::acquire(dir.path(), 47123).unwrap();

    assert_eq!(lock.record.pid, std::process::id());
    assert_eq!(lock.record.port, 47123);
    assert!(!lock.record.instance_id.is_empty());

    let on_disk = read_record(&dir.path().join(PID_FILE)).unwrap();
    assert_eq!(on_disk, lock.record);

    lock.release();
    assert!(!dir.path().join(PID_FILE).exists());
}

#[test]
fn pid_file_is_owner_only() {
    use std::os::unix::fs::PermissionsExt;

    let dir = tempfile::tempdir().unwrap();
    let lock = RunnerLock::acquire(dir.path(), 47123).unwrap();

    let mode = std::fs::metadata(dir.path().join(PID_FILE))
        .unwrap()
        .permissions()
        .mode();
    assert_eq!(mode & 0o777, 0o600);
    lock.release();
}

#[test]
fn live_record_blocks_startup() {
    let dir = tempfile::tempdir().unwrap();
    // Simulate a running daemon by writing our own (alive) pid
    let record = PidRecord {
        pid: std::process::id(),
        started_at: Utc::now(),
        instance_id: "previous".to_string(),
        port: 47123,
    };
    std::fs::write(
        dir.path().join(PID_FILE),
        serde_json::to_string(&record).unwrap(),
    )
    .unwrap();

    let err = RunnerLock::acquire(dir.path(), 47123).unwrap_err();
    assert!(matches!(err, LifecycleError::AlreadyRunning { pid } if pid == std::process::id()));
}

#[test]
fn stale_record_is_replaced() {
    let dir = tempfile::tempdir().unwrap();
    let stale = PidRecord {
        pid: DEAD_PID,
        started_at: Utc::now(),
        instance_id: "stale-instance".to_string(),
        port: 47123,
    };
    std::fs::write(
        dir.path().join(PID_FILE),
        serde_json::to_string(&stale).unwrap(),
    )
    .unwrap();

    let lock = RunnerLock::acquire(dir.path(), 47999).unwrap();
    assert_eq!(lock.record.pid, std::process::id());
    assert_ne!(lock.record.instance_id, stale.instance_id);
    assert_eq!(lock.record.port, 47999);

    let on_disk = read_record(&dir.path().join(PID_FILE)).unwrap();
    assert_eq!(on_disk.pid, std::process::id());
    lock.release();
}

#[test]
fn corrupt_record_is_treated_as_stale() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join(PID_FILE), "not json at all").unwrap();

    let lock = RunnerLock::acquire(dir.path(), 47123).unwrap();
    assert_eq!(lock.record.pid, std::process::id());
    lock.release();
}
