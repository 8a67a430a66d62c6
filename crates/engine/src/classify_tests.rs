// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use fuel_config::AgentConfig;
use yare::parameterized;

fn agent() -> AgentConfig {
    AgentConfig::default()
}

#[parameterized(
    clean_exit = { Some(0), "all done", CompletionType::Success },
    zero_beats_patterns = { Some(0), "network error midway, recovered", CompletionType::Success },
    plain_crash = { Some(1), "panicked at src/main.rs", CompletionType::Failed },
    signal_death = { None, "", CompletionType::Failed },
    permission = { Some(1), "Claude needs permission for Bash", CompletionType::PermissionBlocked },
    permission_case_insensitive = { Some(2), "REQUESTED PERMISSIONS were denied", CompletionType::PermissionBlocked },
    network = { Some(1), "fetch failed: connection refused", CompletionType::NetworkError },
    permission_beats_network = { Some(1), "needs permission after network error", CompletionType::PermissionBlocked },
)]
fn classification(exit_code: Option<i32>, output: &str, expected: CompletionType) {
    assert_eq!(classify_completion(exit_code, output, &agent()), expected);
}

#[test]
fn custom_patterns_override_defaults() {
    let agent = AgentConfig {
        permission_patterns: vec!["magic words".into()],
        network_patterns: vec![],
        ..AgentConfig::default()
    };
    assert_eq!(
        classify_completion(Some(1), "the magic words appeared", &agent),
        CompletionType::PermissionBlocked
    );
    assert_eq!(
        classify_completion(Some(1), "connection refused", &agent),
        CompletionType::Failed
    );
}

#[test]
fn metadata_from_trailing_result_object() {
    let output = r#"
working...
{"result":"ok","session_id":"sess-42","total_cost_usd":0.07,"model":"big-model"}
"#;
    let meta = parse_result_metadata(output);
    assert_eq!(meta.session_id.as_deref(), Some("sess-42"));
    assert_eq!(meta.cost_usd, Some(0.07));
    assert_eq!(meta.model.as_deref(), Some("big-model"));
}

#[test]
fn metadata_prefers_the_last_carrying_object() {
    let output = r#"{"session_id":"old"} noise {"session_id":"new"}"#;
    let meta = parse_result_metadata(output);
    assert_eq!(meta.session_id.as_deref(), Some("new"));
}

#[test]
fn metadata_defaults_when_absent() {
    let meta = parse_result_metadata("no json here");
    assert_eq!(meta, ResultMetadata::default());
}
