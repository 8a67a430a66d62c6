// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! IPC client for the consume daemon.
//!
//! Discovery goes through the PID file: read `<data_dir>/consume.pid`,
//! validate the recorded process is alive (removing stale records), and
//! connect to the recorded loopback port.

use fuel_daemon::lifecycle::{read_record, PID_FILE};
use fuel_daemon::protocol::{decode_event, encode_command, ClientEvent, Command};
use fuel_engine::is_process_alive;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;

/// How long to wait for a single daemon reply.
pub const REPLY_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("no runner active in this project (start one with `consume`)")]
    NoRunner,

    #[error("could not connect to runner on port {port}: {source}")]
    ConnectFailed {
        port: u16,
        #[source]
        source: std::io::Error,
    },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("protocol error: {0}")]
    Protocol(String),

    #[error("timed out waiting for the runner")]
    Timeout,

    #[error("runner rejected the command: {0}")]
    Rejected(String),
}

/// The project data directory (`FUEL_DATA_DIR` overrides for tests).
pub fn data_dir() -> Result<PathBuf, ClientError> {
    if let Some(dir) = std::env::var_os("FUEL_DATA_DIR") {
        return Ok(PathBuf::from(dir));
    }
    Ok(std::env::current_dir()?.join(".fuel"))
}

/// A connected client, greeted by the daemon's hello + snapshot.
pub struct Client {
    reader: tokio::io::Lines<BufReader<OwnedReadHalf>>,
    writer: OwnedWriteHalf,
    pub instance_id: String,
}

impl Client {
    /// Discover the runner via the PID file and connect.
    pub async fn connect() -> Result<Self, ClientError> {
        let dir = data_dir()?;
        Self::connect_in(&dir).await
    }

    /// Connect against an explicit data directory.
    pub async fn connect_in(data_dir: &Path) -> Result<Self, ClientError> {
        let pid_path = data_dir.join(PID_FILE);
        let Some(record) = read_record(&pid_path) else {
            return Err(ClientError::NoRunner);
        };

        if !is_process_alive(record.pid) {
            // Stale record: clean it up so the next runner can start
            let _ = std::fs::remove_file(&pid_path);
            return Err(ClientError::NoRunner);
        }

        let stream = TcpStream::connect(("127.0.0.1", record.port))
            .await
            .map_err(|source| ClientError::ConnectFailed {
                port: record.port,
                source,
            })?;
        let (read_half, writer) = stream.into_split();

        let mut client = Self {
            reader: BufReader::new(read_half).lines(),
            writer,
            instance_id: String::new(),
        };

        // The daemon greets with hello; remember its instance id so a
        // restart is detectable.
        let hello = client
            .wait_for(|event| matches!(event, ClientEvent::Hello { .. }))
            .await?;
        if let ClientEvent::Hello { instance_id, .. } = hello {
            client.instance_id = instance_id;
        }

        Ok(client)
    }

    /// Send one command.
    pub async fn send(&mut self, command: &Command) -> Result<(), ClientError> {
        let line = encode_command(command).map_err(|e| ClientError::Protocol(e.to_string()))?;
        self.writer.write_all(line.as_bytes()).await?;
        self.writer.write_all(b"\n").await?;
        self.writer.flush().await?;
        Ok(())
    }

    /// Next decodable event, skipping blank lines.
    pub async fn next_event(&mut self) -> Result<ClientEvent, ClientError> {
        loop {
            let line = tokio::time::timeout(REPLY_TIMEOUT, self.reader.next_line())
                .await
                .map_err(|_| ClientError::Timeout)??
                .ok_or(ClientError::NoRunner)?;
            if line.trim().is_empty() {
                continue;
            }
            match decode_event(&line) {
                Ok(event) => return Ok(event),
                Err(e) => return Err(ClientError::Protocol(e.to_string())),
            }
        }
    }

    /// Read events until one matches, surfacing daemon-side rejections.
    pub async fn wait_for(
        &mut self,
        matches: impl Fn(&ClientEvent) -> bool,
    ) -> Result<ClientEvent, ClientError> {
        loop {
            let event = self.next_event().await?;
            if matches(&event) {
                return Ok(event);
            }
            if let ClientEvent::Error { message } = event {
                return Err(ClientError::Rejected(message));
            }
        }
    }

    /// Send a mutation and wait for the runner's targeted ack.
    pub async fn send_acked(&mut self, command: &Command) -> Result<(), ClientError> {
        self.send(command).await?;
        self.wait_for(|event| {
            matches!(event, ClientEvent::StatusLine { level, .. } if level == "ok")
        })
        .await?;
        Ok(())
    }
}
