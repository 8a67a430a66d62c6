// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! fuel — task CLI for the consume runner.
//!
//! A thin IPC driver: every command is one connection to the local
//! runner, one command line, and one awaited reply. Exit code 0 on
//! success, non-zero on protocol or transport failure.

// Allow panic!/unwrap/expect in test code
#![cfg_attr(test, allow(clippy::panic))]
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

mod client;

#[cfg(test)]
#[path = "main_tests.rs"]
mod tests;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use client::Client;
use fuel_core::{Complexity, TaskType};
use fuel_daemon::protocol::{ClientEvent, Command, StopMode};

#[derive(Parser)]
#[command(name = "fuel", version, about = "Task board for coding agents")]
struct Cli {
    #[command(subcommand)]
    command: CliCommand,
}

#[derive(Subcommand)]
enum CliCommand {
    /// Add a task to the board
    Add {
        title: String,
        #[arg(long)]
        description: Option<String>,
        /// 0 (highest) through 4
        #[arg(long)]
        priority: Option<u8>,
        /// bug|fix|feature|task|epic|chore|docs|test|refactor|reality
        #[arg(long = "type")]
        task_type: Option<String>,
        /// trivial|simple|moderate|complex
        #[arg(long)]
        complexity: Option<String>,
        /// Comma-separated labels
        #[arg(long, value_delimiter = ',')]
        labels: Vec<String>,
        #[arg(long)]
        epic: Option<String>,
        /// Comma-separated blocker task ids
        #[arg(long = "blocked-by", value_delimiter = ',')]
        blocked_by: Vec<String>,
    },
    /// Mark a task done
    Done {
        id: String,
        #[arg(long)]
        reason: Option<String>,
        #[arg(long)]
        commit: Option<String>,
    },
    /// Reopen a task for another attempt
    Reopen { id: String },
    /// Manage task dependencies
    #[command(subcommand)]
    Dep(DepCommand),
    /// Pause scheduling (running agents continue)
    Pause,
    /// Resume scheduling
    Resume,
    /// Stop the runner
    Stop {
        /// Kill running agents immediately instead of draining
        #[arg(long)]
        force: bool,
    },
    /// Show the board
    Status,
    /// Request a raw snapshot (JSON to stdout)
    Snapshot,
    /// Toggle the review pass
    ReviewEnable {
        /// on|off (defaults to on)
        state: Option<String>,
    },
}

#[derive(Subcommand)]
enum DepCommand {
    /// Make ID depend on BLOCKER
    Add { id: String, blocker: String },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    run(cli.command).await
}

async fn run(command: CliCommand) -> Result<()> {
    match command {
        CliCommand::Add {
            title,
            description,
            priority,
            task_type,
            complexity,
            labels,
            epic,
            blocked_by,
        } => {
            let task_type = task_type
                .map(|t| t.parse::<TaskType>().map_err(anyhow::Error::msg))
                .transpose()?;
            let complexity = complexity
                .map(|c| c.parse::<Complexity>().map_err(anyhow::Error::msg))
                .transpose()?;

            let request_id = uuid::Uuid::new_v4().to_string();
            let mut client = Client::connect().await?;
            client
                .send(&Command::TaskCreate {
                    title,
                    description,
                    labels,
                    priority,
                    task_type,
                    complexity,
                    epic_id: epic,
                    blocked_by,
                    request_id: request_id.clone(),
                })
                .await?;

            let reply = client
                .wait_for(|event| {
                    matches!(event, ClientEvent::TaskCreateResponse { request_id: r, .. } if *r == request_id)
                })
                .await?;
            match reply {
                ClientEvent::TaskCreateResponse {
                    success: true,
                    task_id: Some(task_id),
                    ..
                } => println!("{task_id}"),
                ClientEvent::TaskCreateResponse { error, .. } => {
                    bail!("task not created: {}", error.unwrap_or_default())
                }
                _ => bail!("unexpected reply"),
            }
        }

        CliCommand::Done { id, reason, commit } => {
            let mut client = Client::connect().await?;
            client
                .send_acked(&Command::TaskDone {
                    task_id: id.clone(),
                    reason,
                    commit_hash: commit,
                })
                .await?;
            println!("{id} done");
        }

        CliCommand::Reopen { id } => {
            let mut client = Client::connect().await?;
            client
                .send_acked(&Command::TaskReopen {
                    task_id: id.clone(),
                })
                .await?;
            println!("{id} reopened");
        }

        CliCommand::Dep(DepCommand::Add { id, blocker }) => {
            let mut client = Client::connect().await?;
            client
                .send_acked(&Command::DependencyAdd {
                    task_id: id.clone(),
                    blocker_task_id: blocker.clone(),
                })
                .await?;
            println!("{id} blocked by {blocker}");
        }

        CliCommand::Pause => {
            let mut client = Client::connect().await?;
            client.send(&Command::Pause).await?;
            client
                .wait_for(|event| matches!(event, ClientEvent::StatusLine { .. }))
                .await?;
            println!("paused");
        }

        CliCommand::Resume => {
            let mut client = Client::connect().await?;
            client.send(&Command::Resume).await?;
            client
                .wait_for(|event| matches!(event, ClientEvent::StatusLine { .. }))
                .await?;
            println!("resumed");
        }

        CliCommand::Stop { force } => {
            let mut client = Client::connect().await?;
            let mode = if force {
                StopMode::Force
            } else {
                StopMode::Graceful
            };
            client.send(&Command::Stop { mode }).await?;
            println!("stop requested ({mode:?})");
        }

        CliCommand::Status => {
            let mut client = Client::connect().await?;
            client.send(&Command::RequestSnapshot).await?;
            let event = client
                .wait_for(|event| matches!(event, ClientEvent::Snapshot { .. }))
                .await?;
            if let ClientEvent::Snapshot { snapshot } = event {
                print_status(&snapshot);
            }
        }

        CliCommand::Snapshot => {
            let mut client = Client::connect().await?;
            client.send(&Command::RequestSnapshot).await?;
            let event = client
                .wait_for(|event| matches!(event, ClientEvent::Snapshot { .. }))
                .await?;
            if let ClientEvent::Snapshot { snapshot } = event {
                println!(
                    "{}",
                    serde_json::to_string_pretty(&snapshot).context("serialize snapshot")?
                );
            }
        }

        CliCommand::ReviewEnable { state } => {
            let enabled = match state.as_deref() {
                None | Some("on") => true,
                Some("off") => false,
                Some(other) => bail!("expected on|off, got {other}"),
            };
            let mut client = Client::connect().await?;
            client
                .send(&Command::SetTaskReviewEnabled { enabled })
                .await?;
            client
                .wait_for(|event| matches!(event, ClientEvent::StatusLine { .. }))
                .await?;
            println!("review {}", if enabled { "enabled" } else { "disabled" });
        }
    }

    Ok(())
}

fn print_status(snapshot: &fuel_daemon::snapshot::BoardSnapshot) {
    let board = &snapshot.board_state;
    println!(
        "runner {} ({})",
        if snapshot.runner_state.paused {
            "paused"
        } else {
            "running"
        },
        snapshot.runner_state.instance_id
    );
    println!(
        "ready {}  in progress {}  review {}  blocked {}  human {}  done {}",
        board.ready.len(),
        board.in_progress.len(),
        board.review.len(),
        board.blocked.len(),
        board.human.len(),
        snapshot.done_count,
    );

    for (column, tasks) in [
        ("ready", &board.ready),
        ("in_progress", &board.in_progress),
        ("review", &board.review),
        ("blocked", &board.blocked),
        ("human", &board.human),
    ] {
        for task in tasks {
            println!("  [{column}] {} p{} {}", task.short_id, task.priority, task.title);
        }
    }

    if !snapshot.active_processes.is_empty() {
        println!("active:");
        for (task_id, process) in &snapshot.active_processes {
            println!(
                "  {task_id} agent={} pid={} run={}",
                process.process.agent, process.process.pid, process.process.run_id
            );
        }
    }

    for (agent, entry) in &snapshot.health_summary {
        println!("  agent {agent}: {}", entry.status);
    }
}
