// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use std::collections::HashSet;

#[test]
fn hash_ids_carry_the_kind_prefix() {
    let gen = HashIdGen;
    let id = gen.next(TASK_PREFIX);
    assert!(id.starts_with("f-"));
    assert_eq!(id.len(), "f-".len() + 6);
    assert!(id["f-".len()..].chars().all(|c| c.is_ascii_hexdigit()));

    let run_id = gen.next(RUN_PREFIX);
    assert!(run_id.starts_with("run-"));
}

#[test]
fn hash_ids_vary() {
    let gen = HashIdGen;
    let ids: HashSet<String> = (0..64).map(|_| gen.next(TASK_PREFIX)).collect();
    // Collisions in 64 draws from a 24-bit space are vanishingly unlikely.
    assert!(ids.len() > 60);
}

#[test]
fn sequential_ids_are_deterministic() {
    let gen = SequentialIdGen::new();
    assert_eq!(gen.next(TASK_PREFIX), "f-000001");
    assert_eq!(gen.next(RUN_PREFIX), "run-000002");
}

#[test]
fn next_unique_skips_taken_ids() {
    let gen = SequentialIdGen::new();
    let taken = "f-000001".to_string();
    let id = next_unique(&gen, TASK_PREFIX, |candidate| candidate == taken);
    assert_eq!(id.as_deref(), Some("f-000002"));
}

#[test]
fn next_unique_gives_up_after_bounded_retries() {
    let gen = SequentialIdGen::new();
    let id = next_unique(&gen, TASK_PREFIX, |_| true);
    assert_eq!(id, None);
}
