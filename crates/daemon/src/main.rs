// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! consume — the fuel runner daemon.
//!
//! Background process that owns the board: it spawns agents against
//! ready tasks, supervises the children, arbitrates reviews, and serves
//! attached clients over loopback TCP.

// Allow panic!/unwrap/expect in test code
#![cfg_attr(test, allow(clippy::panic))]
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

use fuel_config::Config;
use fuel_daemon::lifecycle::RunnerLock;
use fuel_daemon::runner::{Runner, RunnerParams};
use fuel_daemon::server::IpcServer;
use fuel_engine::{ProcessSupervisor, Store};
use fuel_storage::Checkpointer;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};

/// Data directory name alongside the project root.
const DATA_DIR: &str = ".fuel";

/// Daemon log file name under the data directory.
const LOG_FILE: &str = "consume.log";

/// Checkpoint interval (60 seconds)
const CHECKPOINT_INTERVAL: Duration = Duration::from_secs(60);

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Handle info flags before any config/lock acquisition
    if let Some(arg) = std::env::args().nth(1) {
        match arg.as_str() {
            "--version" | "-V" | "-v" => {
                println!("consume {}", env!("CARGO_PKG_VERSION"));
                return Ok(());
            }
            "--help" | "-h" | "help" => {
                println!("consume {}", env!("CARGO_PKG_VERSION"));
                println!("fuel runner daemon - dispatches tasks to coding agents");
                println!();
                println!("USAGE:");
                println!("    consume");
                println!();
                println!("The daemon is typically started by the `fuel` CLI from a project");
                println!("root and should not be invoked directly. It reads <project>/.fuel/");
                println!("for configuration and listens on a loopback TCP port for clients.");
                println!();
                println!("OPTIONS:");
                println!("    -h, --help       Print help information");
                println!("    -v, --version    Print version information");
                return Ok(());
            }
            _ => {
                eprintln!("error: unexpected argument '{arg}'");
                eprintln!("Usage: consume [--help | --version]");
                std::process::exit(1);
            }
        }
    }

    let project_root = std::env::current_dir()?;
    let data_dir = data_dir_for(&project_root);
    std::fs::create_dir_all(&data_dir)?;
    let log_path = data_dir.join(LOG_FILE);

    rotate_oversized_log(&log_path);

    // Banner goes to disk before tracing exists, so even an immediate
    // startup failure leaves a trace
    append_log_line(
        &log_path,
        &format!("==== consume starting (pid {}) ====", std::process::id()),
    );

    let _log_guard = init_tracing(&log_path)?;

    info!(project = %project_root.display(), "starting consume");

    let config = match Config::load(&data_dir) {
        Ok(config) => config,
        Err(e) => {
            append_log_line(&log_path, &format!("FATAL: failed to load config: {e}"));
            error!("failed to load config: {e}");
            return Err(e.into());
        }
    };
    let port = config.port(&project_root);

    // Singletonize on this project before touching the store
    let lock = match RunnerLock::acquire(&data_dir, port) {
        Ok(lock) => lock,
        Err(e) => {
            append_log_line(&log_path, &format!("FATAL: failed to start consume: {e}"));
            eprintln!("consume failed to start: {e}");
            std::process::exit(1);
        }
    };
    let instance_id = lock.record.instance_id.clone();

    let store = match Store::open(&data_dir) {
        Ok(store) => Arc::new(store),
        Err(e) => {
            append_log_line(&log_path, &format!("FATAL: failed to open store: {e}"));
            error!("failed to open store: {e}");
            lock.release();
            return Err(e.into());
        }
    };

    let supervisor = ProcessSupervisor::new();
    supervisor.register_signal_handlers()?;

    let server = match IpcServer::start(port).await {
        Ok(server) => server,
        Err(e) => {
            append_log_line(&log_path, &format!("FATAL: failed to bind port {port}: {e}"));
            error!("failed to bind port {port}: {e}");
            lock.release();
            return Err(e.into());
        }
    };
    info!(addr = %server.local_addr(), "listening for clients");

    spawn_checkpoint_task(Arc::clone(&store));

    let mut runner = Runner::new(RunnerParams {
        data_dir,
        project_root,
        config,
        store: Arc::clone(&store),
        clock: Arc::new(fuel_core::SystemClock),
        supervisor,
        server,
        instance_id,
    });

    // Recover orphaned runs and stuck reviews from a previous runner
    runner.recover().await;

    let mode = runner.run().await;
    info!(?mode, "runner loop exited");

    // Final snapshot so the next startup rarely replays the WAL
    let seq = store.committed_seq();
    if seq > 0 {
        let checkpointer = Checkpointer::new(store.snapshot_path().to_path_buf());
        match checkpointer.write(seq, &store.state_clone()) {
            Ok(result) => {
                info!(
                    seq = result.seq,
                    bytes_on_disk = result.bytes_on_disk,
                    "final snapshot saved"
                );
                if let Err(e) = store.truncate_wal_through(seq) {
                    warn!(error = %e, "failed to truncate WAL after final snapshot");
                }
            }
            Err(e) => warn!(error = %e, "failed to save final snapshot"),
        }
    }

    lock.release();
    info!("consume stopped");
    Ok(())
}

/// Data directory for a project (`FUEL_DATA_DIR` overrides for tests).
fn data_dir_for(project_root: &Path) -> PathBuf {
    match std::env::var_os("FUEL_DATA_DIR") {
        Some(dir) => PathBuf::from(dir),
        None => project_root.join(DATA_DIR),
    }
}

/// Spawn the periodic checkpoint task: snapshot, then truncate the WAL.
///
/// The checkpoint writer promotes the snapshot durably before returning,
/// so truncating afterwards never loses events. The blocking write runs
/// on a `spawn_blocking` thread, off the runner loop.
fn spawn_checkpoint_task(store: Arc<Store>) {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(CHECKPOINT_INTERVAL);
        let mut last_seq = 0u64;

        loop {
            interval.tick().await;

            let seq = store.committed_seq();
            if seq == 0 || seq == last_seq {
                continue;
            }
            if let Err(e) = store.flush() {
                warn!(error = %e, "pre-checkpoint flush failed");
                continue;
            }

            let state = store.state_clone();
            let snapshot_path = store.snapshot_path().to_path_buf();
            let outcome = tokio::task::spawn_blocking(move || {
                Checkpointer::new(snapshot_path).write(seq, &state)
            })
            .await;

            match outcome {
                Ok(Ok(checkpoint)) => {
                    tracing::debug!(
                        seq = checkpoint.seq,
                        bytes_on_disk = checkpoint.bytes_on_disk,
                        "checkpoint complete"
                    );
                    last_seq = seq;
                    if let Err(e) = store.truncate_wal_through(seq) {
                        warn!(error = %e, "failed to truncate WAL after checkpoint");
                    }
                }
                Ok(Err(e)) => warn!(error = %e, "checkpoint failed, WAL not truncated"),
                Err(e) => warn!(error = %e, "checkpoint task panicked"),
            }
        }
    });
}

/// Rotation threshold for the daemon log (10 MB).
const MAX_LOG_BYTES: u64 = 10 * 1024 * 1024;

/// Rotated generations kept (`consume.log.1` through `.3`).
const LOG_GENERATIONS: usize = 3;

/// Shift the log generation chain one step when the live log is oversized.
///
/// Walks `consume.log → .1 → .2 → .3` as rename pairs, oldest pair
/// first; renaming over the last generation drops it. Best-effort: a
/// failed shift costs history, never startup.
fn rotate_oversized_log(log_path: &Path) {
    let oversized = std::fs::metadata(log_path)
        .map(|m| m.len() >= MAX_LOG_BYTES)
        .unwrap_or(false);
    if !oversized {
        return;
    }

    let mut chain: Vec<PathBuf> = vec![log_path.to_path_buf()];
    chain.extend((1..=LOG_GENERATIONS).map(|n| PathBuf::from(format!("{}.{n}", log_path.display()))));

    for pair in chain.windows(2).rev() {
        let _ = std::fs::rename(&pair[0], &pair[1]);
    }
}

/// Append one line to the daemon log outside the tracing pipeline.
///
/// Used for the startup banner and fatal startup errors, which must hit
/// disk even when the non-blocking tracing writer never gets to flush.
fn append_log_line(log_path: &Path, line: &str) {
    use std::io::Write;

    let file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(log_path);
    if let Ok(mut file) = file {
        let _ = writeln!(file, "{line}");
    }
}

fn init_tracing(
    log_path: &Path,
) -> Result<tracing_appender::non_blocking::WorkerGuard, std::io::Error> {
    use tracing_subscriber::EnvFilter;

    let dir = log_path
        .parent()
        .ok_or_else(|| std::io::Error::other("log path has no parent"))?;
    let name = log_path
        .file_name()
        .ok_or_else(|| std::io::Error::other("log path has no file name"))?;

    let (writer, guard) = tracing_appender::non_blocking(tracing_appender::rolling::never(dir, name));
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(writer)
        .init();

    Ok(guard)
}
