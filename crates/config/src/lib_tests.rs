// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use std::path::PathBuf;

const SAMPLE: &str = r#"
consume:
  port: 47123
  interval_seconds: 5
agents:
  builder:
    command: fake-agent
    args: ["--yes"]
    prompt_args: ["-p"]
    concurrency_limit: 2
    max_retries: 4
  reviewer:
    command: fake-reviewer
complexity_to_agent:
  simple: builder
  moderate: builder
review_agent: reviewer
"#;

fn write_config(contents: &str) -> tempfile::TempDir {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join(CONFIG_FILE), contents).unwrap();
    dir
}

#[test]
fn missing_file_yields_defaults() {
    let dir = tempfile::tempdir().unwrap();
    let config = Config::load(dir.path()).unwrap();
    assert!(config.agents.is_empty());
    assert_eq!(config.consume.interval_seconds, 2);
    assert_eq!(config.review_agent, None);
}

#[test]
fn sample_config_parses() {
    let dir = write_config(SAMPLE);
    let config = Config::load(dir.path()).unwrap();

    assert_eq!(config.consume.port, Some(47123));
    assert_eq!(config.consume.interval_seconds, 5);

    let builder = &config.agents["builder"];
    assert_eq!(builder.command, "fake-agent");
    assert_eq!(builder.concurrency_limit, 2);
    assert_eq!(builder.max_retries, 4);
    // Defaults fill in everything unspecified
    assert_eq!(builder.max_attempts, 3);
    assert!(!builder.permission_patterns.is_empty());

    let (name, _) = config.agent_for_complexity(Complexity::Simple).unwrap();
    assert_eq!(name, "builder");
    assert!(config.agent_for_complexity(Complexity::Complex).is_none());

    let (reviewer, _) = config.reviewer().unwrap();
    assert_eq!(reviewer, "reviewer");
}

#[test]
fn unknown_agent_reference_is_rejected() {
    let dir = write_config(
        "agents: {}\ncomplexity_to_agent:\n  simple: ghost\n",
    );
    let err = Config::load(dir.path()).unwrap_err();
    assert!(matches!(err, ConfigError::UnknownAgent { .. }));
}

#[test]
fn unknown_review_agent_is_rejected() {
    let dir = write_config("agents: {}\nreview_agent: ghost\n");
    assert!(Config::load(dir.path()).is_err());
}

#[test]
fn default_port_is_stable_and_in_dynamic_range() {
    let root = PathBuf::from("/home/user/project");
    let port = default_port(&root);
    assert_eq!(port, default_port(&root));
    assert!(port >= 49152);

    let other = default_port(&PathBuf::from("/home/user/other"));
    // Different projects usually land on different ports
    assert_ne!(port, other);
}

#[test]
fn build_argv_appends_prompt_last() {
    let agent = AgentConfig {
        command: "fake-agent".to_string(),
        args: vec!["--yes".to_string()],
        prompt_args: vec!["-p".to_string()],
        ..AgentConfig::default()
    };
    let argv = Config::build_argv(&agent, "do the thing");
    assert_eq!(argv, vec!["fake-agent", "--yes", "-p", "do the thing"]);
}
