// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Versioned snapshot loading, schema upgrades, and quarantine of
//! unreadable files.
//!
//! A snapshot document carries a monotonic schema version `v` and the
//! WAL sequence it covers. Loading decompresses the file, lifts older
//! schema versions forward through the upgrade table, and deserializes.
//! Files that cannot be read are parked in a numbered `.bak` chain so
//! the daemon recovers from WAL replay instead of refusing to start.

use crate::MaterializedState;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fs::{self, File};
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::warn;

/// Current snapshot schema version. Bump together with a new entry in
/// [`UPGRADES`].
pub const CURRENT_SNAPSHOT_VERSION: u32 = 1;

/// One schema upgrade step over the raw JSON document. The loader stamps
/// the new `v` after the step succeeds.
type UpgradeFn = fn(&mut Value) -> Result<(), SnapshotError>;

/// Forward-only upgrade table: `UPGRADES[n]` lifts schema v(n+1) to
/// v(n+2). The chain must reach [`CURRENT_SNAPSHOT_VERSION`].
const UPGRADES: &[UpgradeFn] = &[];

#[derive(Debug, Error)]
pub enum SnapshotError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Serialization error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("snapshot schema v{found} is ahead of this build (supports up to v{supported})")]
    SchemaAhead { found: u32, supported: u32 },
    #[error("no upgrade step for snapshot schema v{0}")]
    MissingUpgrade(u32),
}

/// A snapshot of the materialized state at a point in time.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Snapshot {
    /// Schema version of the serialized state
    pub v: u32,
    /// WAL sequence number at the time of snapshot
    pub seq: u64,
    /// The complete materialized state
    pub state: MaterializedState,
    /// When this snapshot was created
    pub created_at: DateTime<Utc>,
}

/// Load the snapshot if one exists.
///
/// Older schema versions are upgraded before deserializing. An
/// unreadable file is quarantined and reported as `Ok(None)` — the
/// caller replays the WAL from sequence zero instead.
pub fn load_snapshot(path: &Path) -> Result<Option<Snapshot>, SnapshotError> {
    if !path.exists() {
        return Ok(None);
    }

    let document = match read_compressed_json(path) {
        Ok(document) => document,
        Err(e) => {
            let parked = quarantine_corrupt(path)?;
            warn!(
                error = %e,
                path = %path.display(),
                parked = %parked.display(),
                "unreadable snapshot quarantined, recovering from WAL",
            );
            return Ok(None);
        }
    };

    let upgraded = upgrade_schema(document, CURRENT_SNAPSHOT_VERSION, UPGRADES)?;
    Ok(Some(serde_json::from_value(upgraded)?))
}

fn read_compressed_json(path: &Path) -> Result<Value, SnapshotError> {
    let decoder = zstd::stream::read::Decoder::new(File::open(path)?)?;
    Ok(serde_json::from_reader(decoder)?)
}

/// Lift a raw snapshot document to `target`, one version at a time.
///
/// The version register only moves forward; a document written by a
/// newer build is refused rather than guessed at. A document without a
/// `v` field is treated as v1.
fn upgrade_schema(mut doc: Value, target: u32, steps: &[UpgradeFn]) -> Result<Value, SnapshotError> {
    let mut version = doc.get("v").and_then(Value::as_u64).unwrap_or(1).max(1) as u32;
    if version > target {
        return Err(SnapshotError::SchemaAhead {
            found: version,
            supported: target,
        });
    }

    while version < target {
        let step = steps
            .get((version - 1) as usize)
            .ok_or(SnapshotError::MissingUpgrade(version))?;
        step(&mut doc)?;
        version += 1;
        if let Some(obj) = doc.as_object_mut() {
            obj.insert("v".into(), version.into());
        }
    }

    Ok(doc)
}

/// Quarantined copies kept per file.
const QUARANTINE_SLOTS: u32 = 3;

/// Park a corrupt file as `<name>.bak.1`, shifting earlier copies down
/// the numbered chain. Renaming over the last slot drops the oldest copy;
/// every shift is best-effort except moving the corrupt file itself.
pub(crate) fn quarantine_corrupt(path: &Path) -> std::io::Result<PathBuf> {
    let slot = |n: u32| PathBuf::from(format!("{}.bak.{n}", path.display()));

    for n in (1..QUARANTINE_SLOTS).rev() {
        let _ = fs::rename(slot(n), slot(n + 1));
    }

    let parked = slot(1);
    fs::rename(path, &parked)?;
    Ok(parked)
}

#[cfg(test)]
#[path = "snapshot_tests.rs"]
mod tests;
