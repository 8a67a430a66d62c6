// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! IPC protocol: tagged command/event unions over newline-delimited JSON.
//!
//! Wire format: one JSON object per line, UTF-8, `\n`-terminated, no
//! framing header, in both directions. Outbound events are stamped with
//! `timestamp` and `instance_id` envelope fields; inbound commands may
//! carry a client-generated `request_id` that is echoed back.
//!
//! Decoding policy: malformed JSON, a missing `type`, or an unknown
//! `type` never panics and never closes the connection — the server
//! synthesizes an `error` event describing the rejection. `browser_*`
//! commands are recognized by prefix and passed through opaquely.

use crate::snapshot::{BoardSnapshot, TaskView};
use chrono::{DateTime, Utc};
use fuel_core::{Complexity, TaskType};
use fuel_engine::{CompletionType, HealthStatus, OutputStream};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

/// Protocol version reported in `hello`.
pub const PROTOCOL_VERSION: &str = env!("CARGO_PKG_VERSION");

/// How the daemon should stop.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StopMode {
    #[default]
    Graceful,
    Force,
}

/// Commands a client can send. Closed set; adding a variant is a
/// compile-time exhaustiveness failure in the dispatcher.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Command {
    Attach,
    Detach,
    Pause,
    Resume,
    Stop {
        #[serde(default)]
        mode: StopMode,
    },
    ReloadConfig,
    RequestSnapshot,
    SetTaskReviewEnabled {
        enabled: bool,
    },
    TaskStart {
        task_id: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        agent_override: Option<String>,
    },
    TaskReopen {
        task_id: String,
    },
    TaskDone {
        task_id: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        reason: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        commit_hash: Option<String>,
    },
    TaskCreate {
        title: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        description: Option<String>,
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        labels: Vec<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        priority: Option<u8>,
        #[serde(default, rename = "task_type", skip_serializing_if = "Option::is_none")]
        task_type: Option<TaskType>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        complexity: Option<Complexity>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        epic_id: Option<String>,
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        blocked_by: Vec<String>,
        /// Echoed back in `task_create_response`.
        request_id: String,
    },
    DependencyAdd {
        task_id: String,
        blocker_task_id: String,
    },
    RequestDoneTasks,
    RequestBlockedTasks,
    RequestCompletedTasks,
    /// Opaque pass-through for the sibling browser helper. Never decoded
    /// by the tagged union — recognized by its `browser_` type prefix.
    #[serde(skip)]
    Browser {
        kind: String,
        payload: Value,
    },
}

/// Events the daemon broadcasts or sends to a client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientEvent {
    Hello {
        version: String,
        instance_id: String,
    },
    Snapshot {
        snapshot: BoardSnapshot,
    },
    TaskSpawned {
        task_id: String,
        run_id: String,
        agent: String,
    },
    TaskCompleted {
        task_id: String,
        run_id: String,
        exit_code: Option<i32>,
        completion_type: CompletionType,
    },
    OutputChunk {
        task_id: String,
        run_id: String,
        stream: OutputStream,
        chunk: String,
    },
    StatusLine {
        level: String,
        text: String,
    },
    HealthChange {
        agent: String,
        status: HealthStatus,
    },
    ReviewCompleted {
        task_id: String,
        passed: bool,
        issues: Vec<String>,
        was_already_done: bool,
    },
    TaskCreateResponse {
        request_id: String,
        success: bool,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        task_id: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        error: Option<String>,
    },
    DoneTasks {
        tasks: Vec<TaskView>,
        total: usize,
    },
    BlockedTasks {
        tasks: Vec<TaskView>,
        total: usize,
    },
    CompletedTasks {
        tasks: Vec<TaskView>,
        total: usize,
    },
    ConfigReloaded,
    Error {
        message: String,
    },
}

/// Command decode failures, all surfaced as `error` events.
#[derive(Debug, Error, PartialEq)]
pub enum DecodeError {
    #[error("malformed JSON: {0}")]
    Malformed(String),
    #[error("message has no 'type' field")]
    MissingType,
    #[error("unknown command: {0}")]
    Unknown(String),
}

/// Decode one line into a command.
///
/// Zero-length lines must be filtered by the caller; a chunk boundary is
/// never assumed to be a message boundary.
pub fn decode_command(line: &str) -> Result<Command, DecodeError> {
    let value: Value =
        serde_json::from_str(line).map_err(|e| DecodeError::Malformed(e.to_string()))?;

    let Some(kind) = value.get("type").and_then(Value::as_str) else {
        return Err(DecodeError::MissingType);
    };

    if kind.starts_with("browser_") {
        return Ok(Command::Browser {
            kind: kind.to_string(),
            payload: value,
        });
    }

    let kind = kind.to_string();
    serde_json::from_value(value).map_err(|e| {
        let message = e.to_string();
        if message.contains("unknown variant") {
            DecodeError::Unknown(kind)
        } else {
            DecodeError::Malformed(message)
        }
    })
}

/// Encode a command as one wire line (no trailing newline).
pub fn encode_command(command: &Command) -> Result<String, serde_json::Error> {
    match command {
        Command::Browser { kind, payload } => {
            let mut value = payload.clone();
            if let Some(obj) = value.as_object_mut() {
                obj.insert("type".to_string(), Value::String(kind.clone()));
            }
            serde_json::to_string(&value)
        }
        other => serde_json::to_string(other),
    }
}

/// Encode an event as one wire line, stamping the envelope fields.
pub fn encode_event(
    event: &ClientEvent,
    instance_id: &str,
    timestamp: DateTime<Utc>,
) -> Result<String, serde_json::Error> {
    let mut value = serde_json::to_value(event)?;
    if let Some(obj) = value.as_object_mut() {
        obj.insert(
            "timestamp".to_string(),
            Value::String(timestamp.to_rfc3339()),
        );
        obj.insert(
            "instance_id".to_string(),
            Value::String(instance_id.to_string()),
        );
    }
    serde_json::to_string(&value)
}

/// Decode one event line (client side). Envelope fields are ignored.
pub fn decode_event(line: &str) -> Result<ClientEvent, DecodeError> {
    serde_json::from_str(line).map_err(|e| DecodeError::Malformed(e.to_string()))
}

#[cfg(test)]
#[path = "protocol_tests.rs"]
mod tests;
