// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

// Allow panic!/unwrap/expect in test code
#![cfg_attr(test, allow(clippy::panic))]
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

//! Engine for fuel: the transactional store facade, the task/run/review
//! services, the health tracker, and the process supervisor.

mod classify;
mod error;
mod exec;
mod health;
mod json_scan;
mod reviews;
mod runs;
mod store;
mod supervisor;
mod tasks;

pub use classify::{classify_completion, parse_result_metadata, CompletionType, ResultMetadata};
pub use error::EngineError;
pub use exec::run_with_timeout;
pub use health::{HealthStatus, HealthTracker};
pub use json_scan::extract_json_objects;
pub use reviews::{review_task_key, ReviewContext, ReviewOutcome, ReviewService};
pub use runs::{NewRun, RunService, RunStats, TimingStats};
pub use store::Store;
pub use supervisor::{
    is_process_alive, ActiveProcess, ChildExit, OutputChunk, OutputStream, ProcessSupervisor,
    ProcessType, SpawnRequest, OUTPUT_RING_CAPACITY,
};
pub use tasks::{NewTask, TaskService};

#[cfg(test)]
mod test_helpers;
