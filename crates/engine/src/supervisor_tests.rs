// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use std::time::Duration;

fn sh(task_key: &str, run_id: &str, script: &str) -> SpawnRequest {
    SpawnRequest {
        task_key: task_key.to_string(),
        agent: "fake".to_string(),
        argv: vec!["/bin/sh".to_string(), "-c".to_string(), script.to_string()],
        env: Vec::new(),
        cwd: std::env::temp_dir(),
        process_type: ProcessType::Task,
        run_id: run_id.to_string(),
    }
}

async fn wait_for_exit(supervisor: &ProcessSupervisor) -> ChildExit {
    for _ in 0..200 {
        let mut exits = supervisor.poll();
        if let Some(exit) = exits.pop() {
            return exit;
        }
        tokio::time::sleep(Duration::from_millis(25)).await;
    }
    panic!("child never completed");
}

#[tokio::test]
async fn spawn_captures_exit_and_output() {
    let dir = tempfile::tempdir().unwrap();
    let supervisor = ProcessSupervisor::new();

    let process = supervisor
        .spawn(dir.path(), sh("f-000001", "run-000001", "echo out; echo err >&2; exit 3"))
        .await
        .unwrap();
    assert!(process.pid > 0);
    assert!(supervisor.is_running("f-000001"));

    let exit = wait_for_exit(&supervisor).await;
    assert_eq!(exit.task_key, "f-000001");
    assert_eq!(exit.run_id, "run-000001");
    assert_eq!(exit.exit_code, Some(3));
    assert!(exit.output.contains("out"));
    assert!(exit.output.contains("err"));

    // Tracking entry is gone once the exit was returned
    assert!(!supervisor.is_running("f-000001"));
    assert!(supervisor.active_processes().is_empty());
}

#[tokio::test]
async fn output_lands_in_per_run_log_files() {
    let dir = tempfile::tempdir().unwrap();
    let supervisor = ProcessSupervisor::new();

    supervisor
        .spawn(dir.path(), sh("f-000001", "run-0000aa", "printf hello; printf oops >&2"))
        .await
        .unwrap();
    wait_for_exit(&supervisor).await;

    let log_dir = dir.path().join("processes/run-0000aa");
    let stdout = std::fs::read_to_string(log_dir.join("stdout.log")).unwrap();
    let stderr = std::fs::read_to_string(log_dir.join("stderr.log")).unwrap();
    assert_eq!(stdout, "hello");
    assert_eq!(stderr, "oops");
}

#[tokio::test]
async fn poll_output_merges_chunks() {
    let dir = tempfile::tempdir().unwrap();
    let supervisor = ProcessSupervisor::new();

    supervisor
        .spawn(dir.path(), sh("f-000001", "run-000001", "printf chunked; sleep 1"))
        .await
        .unwrap();

    let mut seen = Vec::new();
    for _ in 0..100 {
        seen.extend(supervisor.poll_output());
        if !seen.is_empty() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }

    assert!(seen
        .iter()
        .any(|c| c.stream == OutputStream::Stdout && c.chunk.contains("chunked")));
    wait_for_exit(&supervisor).await;
}

#[tokio::test]
async fn concurrency_limit_gates_can_spawn() {
    let dir = tempfile::tempdir().unwrap();
    let supervisor = ProcessSupervisor::new();

    assert!(supervisor.can_spawn("fake", 1));
    supervisor
        .spawn(dir.path(), sh("f-000001", "run-000001", "sleep 5"))
        .await
        .unwrap();

    assert!(!supervisor.can_spawn("fake", 1));
    assert!(supervisor.can_spawn("fake", 2));
    assert!(supervisor.can_spawn("other-agent", 1));
    assert_eq!(supervisor.running_count_for_agent("fake"), 1);

    supervisor.kill("f-000001").await;
    let exit = wait_for_exit(&supervisor).await;
    // Terminated by signal: no exit code
    assert_eq!(exit.exit_code, None);
    assert!(supervisor.can_spawn("fake", 1));
}

#[tokio::test]
async fn duplicate_task_key_is_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let supervisor = ProcessSupervisor::new();

    supervisor
        .spawn(dir.path(), sh("f-000001", "run-000001", "sleep 5"))
        .await
        .unwrap();
    let err = supervisor
        .spawn(dir.path(), sh("f-000001", "run-000002", "sleep 5"))
        .await
        .unwrap_err();
    assert!(matches!(err, crate::EngineError::Spawn(_)));

    supervisor.kill("f-000001").await;
    wait_for_exit(&supervisor).await;
}

#[tokio::test]
async fn missing_binary_is_a_spawn_error() {
    let dir = tempfile::tempdir().unwrap();
    let supervisor = ProcessSupervisor::new();

    let mut req = sh("f-000001", "run-000001", "true");
    req.argv = vec!["/nonexistent/agent-binary".to_string()];
    assert!(supervisor.spawn(dir.path(), req).await.is_err());
    assert!(!supervisor.is_running("f-000001"));
}

#[tokio::test]
async fn shutdown_terminates_everything_and_clears_tracking() {
    let dir = tempfile::tempdir().unwrap();
    let supervisor = ProcessSupervisor::new();

    supervisor
        .spawn(dir.path(), sh("f-000001", "run-000001", "sleep 30"))
        .await
        .unwrap();
    supervisor
        .spawn(dir.path(), sh("f-000002", "run-000002", "sleep 30"))
        .await
        .unwrap();
    let pids: Vec<u32> = supervisor.active_pids().into_iter().collect();

    supervisor.shutdown().await;

    assert!(supervisor.is_shutting_down());
    assert!(supervisor.active_processes().is_empty());
    for pid in pids {
        assert!(!is_process_alive(pid));
    }
}

#[test]
fn ring_drops_oldest_bytes() {
    let mut ring = OutputRing::new();
    ring.push(&vec![b'a'; OUTPUT_RING_CAPACITY]);
    ring.push(b"zzz");

    let contents = ring.contents();
    assert_eq!(contents.len(), OUTPUT_RING_CAPACITY);
    assert!(contents.ends_with("zzz"));
    assert!(contents.starts_with('a'));
}
