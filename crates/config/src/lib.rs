// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

// Allow panic!/unwrap/expect in test code
#![cfg_attr(test, allow(clippy::panic))]
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

//! Configuration for fuel: `config.yaml` loading and prompt templates.
//!
//! The config file lives at `<data_dir>/config.yaml`. A missing file is
//! not an error — every key has a default, and a daemon with no agents
//! configured simply idles.

mod template;

pub use template::{interpolate, render_prompt, DEFAULT_REVIEW_PROMPT, DEFAULT_TASK_PROMPT};

use fuel_core::Complexity;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use thiserror::Error;

/// Name of the config file under the data directory.
pub const CONFIG_FILE: &str = "config.yaml";

/// Default snapshot broadcast interval in seconds.
const DEFAULT_INTERVAL_SECS: u64 = 2;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("IO error reading {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid config: {0}")]
    Yaml(#[from] serde_yaml::Error),
    #[error("unknown agent in {field}: {agent}")]
    UnknownAgent { field: String, agent: String },
}

/// Keys under the `consume:` section (daemon runtime settings).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ConsumeConfig {
    /// IPC port. `None` derives a per-project default.
    pub port: Option<u16>,
    /// Snapshot broadcast interval in seconds.
    pub interval_seconds: u64,
}

impl Default for ConsumeConfig {
    fn default() -> Self {
        Self {
            port: None,
            interval_seconds: DEFAULT_INTERVAL_SECS,
        }
    }
}

/// Configuration for one external agent executable.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentConfig {
    /// Executable to run.
    pub command: String,
    /// Fixed arguments, always passed.
    pub args: Vec<String>,
    /// Arguments that precede the rendered prompt (e.g. `["-p"]`).
    pub prompt_args: Vec<String>,
    pub model: Option<String>,
    /// Extra environment variables for the child.
    pub env: HashMap<String, String>,
    /// Maximum simultaneous children for this agent.
    pub concurrency_limit: u32,
    /// Consecutive failures before the agent is considered dead.
    pub max_retries: u32,
    /// Attempts per task before it is left stuck.
    pub max_attempts: u32,
    /// Output signatures classified as permission-blocked (no backoff).
    pub permission_patterns: Vec<String>,
    /// Output signatures classified as transient network failures.
    pub network_patterns: Vec<String>,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            command: String::new(),
            args: Vec::new(),
            prompt_args: Vec::new(),
            model: None,
            env: HashMap::new(),
            concurrency_limit: 1,
            max_retries: 3,
            max_attempts: 3,
            permission_patterns: default_permission_patterns(),
            network_patterns: default_network_patterns(),
        }
    }
}

fn default_permission_patterns() -> Vec<String> {
    [
        "needs permission",
        "requested permissions",
        "permission to use",
        "tool use was blocked",
    ]
    .map(String::from)
    .to_vec()
}

fn default_network_patterns() -> Vec<String> {
    [
        "network error",
        "connection refused",
        "connection reset",
        "fetch failed",
        "ETIMEDOUT",
        "ECONNRESET",
        "ENOTFOUND",
    ]
    .map(String::from)
    .to_vec()
}

/// Top-level configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub consume: ConsumeConfig,
    pub agents: HashMap<String, AgentConfig>,
    pub complexity_to_agent: HashMap<Complexity, String>,
    /// Reviewer agent name. Review is disabled at the source when absent.
    pub review_agent: Option<String>,
}

impl Config {
    /// Load configuration from `<data_dir>/config.yaml`.
    ///
    /// A missing file yields defaults. Unknown keys are ignored; agent
    /// names referenced by `complexity_to_agent` or `review_agent` must
    /// exist in `agents`.
    pub fn load(data_dir: &Path) -> Result<Self, ConfigError> {
        let path = data_dir.join(CONFIG_FILE);
        if !path.exists() {
            return Ok(Self::default());
        }

        let raw = std::fs::read_to_string(&path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        let config: Config = serde_yaml::from_str(&raw)?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        for (complexity, agent) in &self.complexity_to_agent {
            if !self.agents.contains_key(agent) {
                return Err(ConfigError::UnknownAgent {
                    field: format!("complexity_to_agent.{complexity}"),
                    agent: agent.clone(),
                });
            }
        }
        if let Some(agent) = &self.review_agent {
            if !self.agents.contains_key(agent) {
                return Err(ConfigError::UnknownAgent {
                    field: "review_agent".to_string(),
                    agent: agent.clone(),
                });
            }
        }
        Ok(())
    }

    /// Resolve the IPC port, deriving a per-project default when unset.
    pub fn port(&self, project_root: &Path) -> u16 {
        self.consume.port.unwrap_or_else(|| default_port(project_root))
    }

    /// Agent configured for the given complexity, if any.
    pub fn agent_for_complexity(&self, complexity: Complexity) -> Option<(&str, &AgentConfig)> {
        let name = self.complexity_to_agent.get(&complexity)?;
        let agent = self.agents.get(name)?;
        Some((name.as_str(), agent))
    }

    /// Reviewer agent, when review is configured.
    pub fn reviewer(&self) -> Option<(&str, &AgentConfig)> {
        let name = self.review_agent.as_deref()?;
        let agent = self.agents.get(name)?;
        Some((name, agent))
    }

    /// Build the argv for spawning `agent` with a rendered prompt.
    pub fn build_argv(agent: &AgentConfig, prompt: &str) -> Vec<String> {
        let mut argv = Vec::with_capacity(1 + agent.args.len() + agent.prompt_args.len() + 1);
        argv.push(agent.command.clone());
        argv.extend(agent.args.iter().cloned());
        argv.extend(agent.prompt_args.iter().cloned());
        argv.push(prompt.to_string());
        argv
    }
}

/// Derive a deterministic per-project default port in the dynamic range.
pub fn default_port(project_root: &Path) -> u16 {
    // FNV-1a over the canonical-ish path string
    let mut hash: u64 = 0xcbf2_9ce4_8422_2325;
    for byte in project_root.to_string_lossy().as_bytes() {
        hash ^= u64::from(*byte);
        hash = hash.wrapping_mul(0x0000_0100_0000_01b3);
    }
    49152 + (hash % 16000) as u16
}

#[cfg(test)]
#[path = "lib_tests.rs"]
mod tests;
