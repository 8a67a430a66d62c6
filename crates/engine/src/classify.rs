// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Completion classification and result-metadata extraction.
//!
//! Classification signatures are per-agent config data: which substrings
//! mean "blocked on permissions" or "transient network failure" depends
//! on the agent executable, not on fuel.

use crate::json_scan::extract_json_objects;
use fuel_config::AgentConfig;
use serde::{Deserialize, Serialize};
use std::fmt;

/// How a completed child is handled by the runner.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CompletionType {
    Success,
    Failed,
    NetworkError,
    PermissionBlocked,
}

impl fmt::Display for CompletionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            CompletionType::Success => "success",
            CompletionType::Failed => "failed",
            CompletionType::NetworkError => "network_error",
            CompletionType::PermissionBlocked => "permission_blocked",
        };
        write!(f, "{s}")
    }
}

/// Classify a child exit by code and output signatures.
pub fn classify_completion(
    exit_code: Option<i32>,
    output: &str,
    agent: &AgentConfig,
) -> CompletionType {
    if exit_code == Some(0) {
        return CompletionType::Success;
    }

    let lowered = output.to_lowercase();
    let matches_any = |patterns: &[String]| {
        patterns
            .iter()
            .any(|p| !p.is_empty() && lowered.contains(&p.to_lowercase()))
    };

    if matches_any(&agent.permission_patterns) {
        CompletionType::PermissionBlocked
    } else if matches_any(&agent.network_patterns) {
        CompletionType::NetworkError
    } else {
        CompletionType::Failed
    }
}

/// Metadata some agents report in a trailing JSON result object.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct ResultMetadata {
    #[serde(default)]
    pub session_id: Option<String>,
    #[serde(default, alias = "total_cost_usd")]
    pub cost_usd: Option<f64>,
    #[serde(default)]
    pub model: Option<String>,
}

impl ResultMetadata {
    fn is_empty(&self) -> bool {
        self.session_id.is_none() && self.cost_usd.is_none() && self.model.is_none()
    }
}

/// Scan combined output for the last JSON object carrying run metadata.
pub fn parse_result_metadata(output: &str) -> ResultMetadata {
    extract_json_objects(output)
        .into_iter()
        .rev()
        .filter_map(|value| serde_json::from_value::<ResultMetadata>(value).ok())
        .find(|meta| !meta.is_empty())
        .unwrap_or_default()
}

#[cfg(test)]
#[path = "classify_tests.rs"]
mod tests;
