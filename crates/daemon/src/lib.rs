// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

// Allow panic!/unwrap/expect in test code
#![cfg_attr(test, allow(clippy::panic))]
#![cfg_attr(test, allow(clippy::expect_used))]
#![cfg_attr(test, allow(clippy::unwrap_used))]

//! The consume daemon: IPC protocol and server, runner lifecycle, and the
//! core tick that dispatches agent work.

pub mod lifecycle;
pub mod protocol;
pub mod runner;
pub mod server;
pub mod snapshot;

pub use lifecycle::{LifecycleError, PidRecord, RunnerLock, PID_FILE};
pub use protocol::{
    decode_command, decode_event, encode_command, encode_event, Command, ClientEvent, DecodeError,
    StopMode, PROTOCOL_VERSION,
};
pub use runner::Runner;
pub use server::IpcServer;
pub use snapshot::{snapshot_content_hash, BoardSnapshot, BoardState, TaskView};
