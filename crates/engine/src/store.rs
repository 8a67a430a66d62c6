// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Transactional store facade over the WAL and materialized state.
//!
//! Every mutation is one [`StoreEvent`]: the event is appended to the WAL
//! and applied to the in-memory state under a single short lock, which is
//! the transaction boundary. Compound writes (start-task + create-run,
//! trigger-review) are single events, so they commit and replay
//! atomically.
//!
//! Reads take the same lock briefly via [`Store::with_state`]; writers
//! never hold it across I/O other than the buffered WAL append.

use crate::error::EngineError;
use fuel_core::StoreEvent;
use fuel_storage::{load_snapshot, MaterializedState, Wal};
use parking_lot::Mutex;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::info;

/// WAL file path under the data directory.
const WAL_FILE: &str = "wal/events.wal";

/// Snapshot file path under the data directory.
const SNAPSHOT_FILE: &str = "snapshot.zst";

pub struct Store {
    state: Arc<Mutex<MaterializedState>>,
    wal: Mutex<Wal>,
    /// Sequence number of the last committed event.
    committed_seq: Mutex<u64>,
    snapshot_path: PathBuf,
}

impl Store {
    /// Open the store: load the snapshot (if any) and replay the WAL tail.
    pub fn open(data_dir: &Path) -> Result<Self, EngineError> {
        let snapshot_path = data_dir.join(SNAPSHOT_FILE);
        let (mut state, snapshot_seq) = match load_snapshot(&snapshot_path)? {
            Some(snapshot) => {
                info!(
                    seq = snapshot.seq,
                    tasks = snapshot.state.tasks.len(),
                    runs = snapshot.state.runs.len(),
                    "loaded snapshot"
                );
                (snapshot.state, snapshot.seq)
            }
            None => {
                info!("no snapshot found, starting with empty state");
                (MaterializedState::default(), 0)
            }
        };

        let wal = Wal::open(&data_dir.join(WAL_FILE))?;
        let replayed = wal.entries_after(snapshot_seq)?;
        let replay_count = replayed.len();
        let mut committed_seq = snapshot_seq;
        for entry in replayed {
            state.apply_event(&entry.event);
            committed_seq = entry.seq;
        }
        if replay_count > 0 {
            info!(replay_count, after_seq = snapshot_seq, "replayed WAL events");
        }

        Ok(Self {
            state: Arc::new(Mutex::new(state)),
            wal: Mutex::new(wal),
            committed_seq: Mutex::new(committed_seq),
            snapshot_path,
        })
    }

    /// Commit one event: WAL append, then state application.
    ///
    /// The append is buffered (group commit); call [`Store::flush`]
    /// periodically and at shutdown for the durability point.
    pub fn commit(&self, event: StoreEvent) -> Result<u64, EngineError> {
        let seq = {
            let mut wal = self.wal.lock();
            wal.append(&event)?
        };
        {
            let mut state = self.state.lock();
            state.apply_event(&event);
        }
        *self.committed_seq.lock() = seq;
        Ok(seq)
    }

    /// Read the state under a short lock.
    pub fn with_state<R>(&self, f: impl FnOnce(&MaterializedState) -> R) -> R {
        let state = self.state.lock();
        f(&state)
    }

    /// Clone the full state (for snapshots and checkpoints).
    pub fn state_clone(&self) -> MaterializedState {
        self.state.lock().clone()
    }

    /// Sequence number of the last committed event.
    pub fn committed_seq(&self) -> u64 {
        *self.committed_seq.lock()
    }

    /// Flush buffered WAL entries if the group-commit window elapsed.
    pub fn maybe_flush(&self) -> Result<(), EngineError> {
        let mut wal = self.wal.lock();
        if wal.needs_flush() {
            wal.flush()?;
        }
        Ok(())
    }

    /// Flush buffered WAL entries unconditionally (shutdown path).
    pub fn flush(&self) -> Result<(), EngineError> {
        let mut wal = self.wal.lock();
        wal.flush()?;
        Ok(())
    }

    /// Drop WAL entries already covered by a durable snapshot.
    pub fn truncate_wal_through(&self, seq: u64) -> Result<(), EngineError> {
        let mut wal = self.wal.lock();
        wal.truncate_through(seq)?;
        Ok(())
    }

    /// Path the checkpointer should write snapshots to.
    pub fn snapshot_path(&self) -> &Path {
        &self.snapshot_path
    }
}

#[cfg(test)]
#[path = "store_tests.rs"]
mod tests;
