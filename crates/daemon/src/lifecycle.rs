// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Runner lifecycle: singletonization on a host-project pair via a
//! lock-guarded PID record.
//!
//! The PID file holds `{pid, started_at, instance_id, port}` as JSON at
//! mode 0600 inside the (0755) data directory. A record pointing at a
//! dead process is stale and deleted before takeover; a live one makes
//! startup fail. The task CLI reads the same record to find the port.

use chrono::{DateTime, Utc};
use fs2::FileExt;
use fuel_engine::is_process_alive;
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::Write;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{info, warn};

/// PID file name under the data directory.
pub const PID_FILE: &str = "consume.pid";

#[derive(Debug, Error)]
pub enum LifecycleError {
    #[error("runner already active (pid {pid})")]
    AlreadyRunning { pid: u32 },

    #[error("failed to acquire runner lock: {0}")]
    LockFailed(#[source] std::io::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Contents of the PID file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PidRecord {
    pub pid: u32,
    pub started_at: DateTime<Utc>,
    pub instance_id: String,
    pub port: u16,
}

/// Held for the runner's lifetime; releasing removes the PID file.
#[derive(Debug)]
pub struct RunnerLock {
    // NOTE(lifetime): held to maintain the exclusive file lock
    #[allow(dead_code)]
    lock_file: File,
    path: PathBuf,
    pub record: PidRecord,
}

impl RunnerLock {
    /// Acquire the runner singleton for a data directory.
    ///
    /// 1. A PID record with a live process fails with `AlreadyRunning`.
    /// 2. A stale record (dead process) is deleted and taken over.
    /// 3. The fresh record is written atomically under an exclusive lock
    ///    at mode 0600.
    pub fn acquire(data_dir: &Path, port: u16) -> Result<Self, LifecycleError> {
        use std::os::unix::fs::PermissionsExt;

        std::fs::create_dir_all(data_dir)?;
        std::fs::set_permissions(data_dir, std::fs::Permissions::from_mode(0o755))?;

        let path = data_dir.join(PID_FILE);
        if let Some(existing) = read_record(&path) {
            if is_process_alive(existing.pid) {
                return Err(LifecycleError::AlreadyRunning { pid: existing.pid });
            }
            warn!(
                stale_pid = existing.pid,
                stale_instance = %existing.instance_id,
                "removing stale runner record"
            );
            std::fs::remove_file(&path)?;
        }

        // Open without truncating so a losing racer cannot wipe the
        // winner's record; truncate only once the lock is held.
        let mut lock_file = std::fs::OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(false)
            .open(&path)?;
        lock_file
            .try_lock_exclusive()
            .map_err(LifecycleError::LockFailed)?;

        let record = PidRecord {
            pid: std::process::id(),
            started_at: Utc::now(),
            instance_id: uuid::Uuid::new_v4().to_string(),
            port,
        };

        lock_file.set_len(0)?;
        serde_json::to_writer(&mut lock_file, &record)?;
        writeln!(lock_file)?;
        lock_file.sync_all()?;
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o600))?;

        info!(pid = record.pid, instance = %record.instance_id, port, "runner lock acquired");
        Ok(Self {
            lock_file,
            path,
            record,
        })
    }

    /// Remove the PID file and release the lock.
    pub fn release(self) {
        if let Err(e) = std::fs::remove_file(&self.path) {
            warn!(error = %e, "failed to remove PID file");
        }
        // Lock released when lock_file drops
    }
}

/// Read and parse a PID record, if one exists and is well-formed.
pub fn read_record(path: &Path) -> Option<PidRecord> {
    let raw = std::fs::read_to_string(path).ok()?;
    match serde_json::from_str(&raw) {
        Ok(record) => Some(record),
        Err(e) => {
            warn!(path = %path.display(), error = %e, "unreadable PID record");
            None
        }
    }
}

#[cfg(test)]
#[path = "lifecycle_tests.rs"]
mod tests;
