// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Short-id generation.
//!
//! Every user-visible entity carries a kind-prefixed `<prefix>-<6 hex>` id
//! that is globally unique within its kind. Production ids are derived
//! from a SHA-256 of the prefix, a random nonce, and the wall clock;
//! uniqueness against the live store is enforced by [`next_unique`] with a
//! bounded collision retry.

use sha2::{Digest, Sha256};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Kind prefix for tasks (`f-<6 hex>`).
pub const TASK_PREFIX: &str = "f";
/// Kind prefix for epics (`e-<6 hex>`).
pub const EPIC_PREFIX: &str = "e";
/// Kind prefix for runs (`run-<6 hex>`).
pub const RUN_PREFIX: &str = "run";
/// Kind prefix for reviews (`r-<6 hex>`).
pub const REVIEW_PREFIX: &str = "r";

/// Maximum attempts before [`next_unique`] gives up on a free id.
const MAX_ID_ATTEMPTS: usize = 100;

/// Generates kind-prefixed short identifiers.
pub trait IdGen: Send + Sync {
    fn next(&self, prefix: &str) -> String;
}

/// Hash-based ID generator for production use.
#[derive(Clone, Default)]
pub struct HashIdGen;

impl IdGen for HashIdGen {
    fn next(&self, prefix: &str) -> String {
        let mut hasher = Sha256::new();
        hasher.update(prefix.as_bytes());
        hasher.update(uuid::Uuid::new_v4().as_bytes());
        hasher.update(
            chrono::Utc::now()
                .timestamp_nanos_opt()
                .unwrap_or_default()
                .to_le_bytes(),
        );
        let digest = hasher.finalize();
        let hex: String = digest
            .iter()
            .take(3)
            .map(|b| format!("{b:02x}"))
            .collect();
        format!("{prefix}-{hex}")
    }
}

/// Sequential ID generator for deterministic tests.
#[derive(Clone)]
pub struct SequentialIdGen {
    counter: Arc<AtomicU64>,
}

impl SequentialIdGen {
    pub fn new() -> Self {
        Self {
            counter: Arc::new(AtomicU64::new(1)),
        }
    }
}

impl Default for SequentialIdGen {
    fn default() -> Self {
        Self::new()
    }
}

impl IdGen for SequentialIdGen {
    fn next(&self, prefix: &str) -> String {
        let n = self.counter.fetch_add(1, Ordering::SeqCst);
        format!("{prefix}-{n:06x}")
    }
}

/// Generate an id that `is_taken` rejects, retrying up to 100 times.
///
/// Returns `None` when the id space for this prefix is effectively
/// exhausted (or the generator keeps colliding).
pub fn next_unique(
    gen: &dyn IdGen,
    prefix: &str,
    mut is_taken: impl FnMut(&str) -> bool,
) -> Option<String> {
    for _ in 0..MAX_ID_ATTEMPTS {
        let id = gen.next(prefix);
        if !is_taken(&id) {
            return Some(id);
        }
    }
    None
}

#[cfg(test)]
#[path = "id_tests.rs"]
mod tests;
