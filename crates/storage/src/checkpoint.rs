// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Durable snapshot checkpoints.
//!
//! A checkpoint serializes the board state straight into a zstd encoder
//! (no intermediate JSON buffer), stages the payload next to the live
//! snapshot, and then promotes it into place. The durability contract
//! sits behind [`CheckpointStore`]: once `promote` returns, the snapshot
//! survives power loss — only then may the caller truncate the WAL.
//!
//! [`Checkpointer::write`] blocks for the whole serialize + compress +
//! fsync sequence; callers on the hot path run it via `spawn_blocking`
//! (the daemon does) and call it inline only at shutdown.

use crate::snapshot::CURRENT_SNAPSHOT_VERSION;
use crate::MaterializedState;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::fs::{self, File};
use std::io::Write;
use std::path::PathBuf;
use thiserror::Error;

/// zstd level balancing speed against snapshot size.
const COMPRESSION_LEVEL: i32 = 3;

#[derive(Debug, Error)]
pub enum CheckpointError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("serialization error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Result of a completed checkpoint.
#[derive(Debug, Clone)]
pub struct CheckpointResult {
    /// Sequence number the snapshot covers
    pub seq: u64,
    /// Size of the promoted snapshot on disk
    pub bytes_on_disk: u64,
}

/// Where checkpoint payloads go.
///
/// `stage` parks the compressed payload somewhere non-live and makes the
/// bytes durable; `promote` makes the staged payload *the* snapshot, with
/// the promotion itself durable, and reports its size. Splitting the
/// protocol here keeps the fsync ordering testable: a store that fails to
/// stage must never see a promote.
pub trait CheckpointStore: Send + Sync {
    fn stage(&self, payload: &[u8]) -> Result<(), CheckpointError>;
    fn promote(&self) -> Result<u64, CheckpointError>;
}

/// Filesystem store: stage to `<snapshot>.staging`, promote by atomic
/// rename plus a directory fsync so the rename survives power loss.
pub struct FsSnapshotStore {
    live: PathBuf,
    staging: PathBuf,
}

impl FsSnapshotStore {
    pub fn new(snapshot_path: PathBuf) -> Self {
        let staging = PathBuf::from(format!("{}.staging", snapshot_path.display()));
        Self {
            live: snapshot_path,
            staging,
        }
    }
}

impl CheckpointStore for FsSnapshotStore {
    fn stage(&self, payload: &[u8]) -> Result<(), CheckpointError> {
        if let Some(parent) = self.staging.parent() {
            fs::create_dir_all(parent)?;
        }
        let mut file = File::create(&self.staging)?;
        file.write_all(payload)?;
        // The payload must be on disk before a rename can make it live
        file.sync_all()?;
        Ok(())
    }

    fn promote(&self) -> Result<u64, CheckpointError> {
        fs::rename(&self.staging, &self.live)?;
        // The directory entry must survive power loss before the WAL may
        // shrink past this snapshot
        if let Some(parent) = self.live.parent() {
            File::open(parent)?.sync_all()?;
        }
        Ok(fs::metadata(&self.live)?.len())
    }
}

/// Snapshot document serialized by reference — checkpointing never
/// clones the state.
#[derive(Serialize)]
struct SnapshotRef<'a> {
    v: u32,
    seq: u64,
    state: &'a MaterializedState,
    created_at: DateTime<Utc>,
}

pub struct Checkpointer<S: CheckpointStore = FsSnapshotStore> {
    store: S,
}

impl Checkpointer<FsSnapshotStore> {
    /// Checkpointer writing to the given live snapshot path.
    pub fn new(snapshot_path: PathBuf) -> Self {
        Self::with_store(FsSnapshotStore::new(snapshot_path))
    }
}

impl<S: CheckpointStore> Checkpointer<S> {
    /// Checkpointer over a custom store (tests inject failures here).
    pub fn with_store(store: S) -> Self {
        Self { store }
    }

    /// Write one durable checkpoint covering `seq`.
    pub fn write(
        &self,
        seq: u64,
        state: &MaterializedState,
    ) -> Result<CheckpointResult, CheckpointError> {
        let document = SnapshotRef {
            v: CURRENT_SNAPSHOT_VERSION,
            seq,
            state,
            created_at: Utc::now(),
        };

        let mut encoder = zstd::stream::write::Encoder::new(Vec::new(), COMPRESSION_LEVEL)
            .map_err(CheckpointError::Io)?;
        serde_json::to_writer(&mut encoder, &document)?;
        let payload = encoder.finish().map_err(CheckpointError::Io)?;

        self.store.stage(&payload)?;
        let bytes_on_disk = self.store.promote()?;
        Ok(CheckpointResult { seq, bytes_on_disk })
    }
}

#[cfg(test)]
#[path = "checkpoint_tests.rs"]
mod tests;
