// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Engine error taxonomy.
//!
//! Client-addressable failures (`InvalidInput`, `NotFound`, `Ambiguous`,
//! `CycleDetected`) are returned to the caller and never terminate the
//! daemon; storage failures roll the transaction back and surface to the
//! loop, which keeps running.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("ambiguous id '{id}': matches {matches:?}")]
    Ambiguous { id: String, matches: Vec<String> },

    #[error("dependency cycle: {0}")]
    CycleDetected(String),

    #[error("storage error: {0}")]
    Wal(#[from] fuel_storage::WalError),

    #[error("storage error: {0}")]
    Snapshot(#[from] fuel_storage::SnapshotError),

    #[error("spawn failure: {0}")]
    Spawn(String),
}
