// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! IPC server: loopback TCP, many persistent clients, line-buffered
//! reads, bounded per-client send queues.
//!
//! Socket I/O runs in spawned tasks; the runner tick only ever drains
//! channels and pushes onto queues, so nothing here can stall it. A slow
//! client loses its oldest queued events (drop-oldest on overflow) and
//! resynchronizes from a later snapshot.

use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, Notify};
use tracing::{debug, error, warn};

/// Events buffered per client before the oldest unsent one is dropped.
const SEND_QUEUE_CAPACITY: usize = 256;

/// Bounded drop-oldest line queue drained by one writer task.
struct SendQueue {
    lines: Mutex<VecDeque<String>>,
    notify: Notify,
    closed: AtomicBool,
}

impl SendQueue {
    fn new() -> Self {
        Self {
            lines: Mutex::new(VecDeque::new()),
            notify: Notify::new(),
            closed: AtomicBool::new(false),
        }
    }

    fn push(&self, line: String) {
        {
            let mut lines = self.lines.lock();
            if lines.len() == SEND_QUEUE_CAPACITY {
                lines.pop_front();
            }
            lines.push_back(line);
        }
        self.notify.notify_one();
    }

    fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
        self.notify.notify_one();
    }
}

struct ClientHandle {
    queue: Arc<SendQueue>,
}

/// Multi-client IPC server.
///
/// `poll`, `broadcast`, `send_to`, `take_joined`, and `client_count` are
/// all non-blocking and safe to call every tick.
pub struct IpcServer {
    clients: Arc<Mutex<HashMap<u64, ClientHandle>>>,
    client_count: Arc<AtomicUsize>,
    incoming_rx: Mutex<mpsc::UnboundedReceiver<(u64, String)>>,
    joined_rx: Mutex<mpsc::UnboundedReceiver<u64>>,
    local_addr: SocketAddr,
}

impl IpcServer {
    /// Bind `127.0.0.1:<port>` and start accepting clients.
    pub async fn start(port: u16) -> std::io::Result<Self> {
        let listener = TcpListener::bind(("127.0.0.1", port)).await?;
        let local_addr = listener.local_addr()?;

        let clients: Arc<Mutex<HashMap<u64, ClientHandle>>> = Arc::new(Mutex::new(HashMap::new()));
        let client_count = Arc::new(AtomicUsize::new(0));
        let (incoming_tx, incoming_rx) = mpsc::unbounded_channel();
        let (joined_tx, joined_rx) = mpsc::unbounded_channel();

        let accept_clients = Arc::clone(&clients);
        let accept_count = Arc::clone(&client_count);
        tokio::spawn(async move {
            let next_id = AtomicU64::new(1);
            loop {
                match listener.accept().await {
                    Ok((stream, peer)) => {
                        let id = next_id.fetch_add(1, Ordering::SeqCst);
                        debug!(client = id, %peer, "client connected");
                        install_client(
                            id,
                            stream,
                            &accept_clients,
                            &accept_count,
                            incoming_tx.clone(),
                        );
                        if joined_tx.send(id).is_err() {
                            return;
                        }
                    }
                    Err(e) => {
                        error!(error = %e, "accept failed");
                    }
                }
            }
        });

        Ok(Self {
            clients,
            client_count,
            incoming_rx: Mutex::new(incoming_rx),
            joined_rx: Mutex::new(joined_rx),
            local_addr,
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Drain clients that connected since the last call.
    pub fn take_joined(&self) -> Vec<u64> {
        let mut joined = Vec::new();
        let mut rx = self.joined_rx.lock();
        while let Ok(id) = rx.try_recv() {
            joined.push(id);
        }
        joined
    }

    /// Drain all raw lines received since the last call.
    ///
    /// Zero-length lines are tolerated and dropped here.
    pub fn poll(&self) -> Vec<(u64, String)> {
        let mut lines = Vec::new();
        let mut rx = self.incoming_rx.lock();
        while let Ok((id, line)) = rx.try_recv() {
            if !line.trim().is_empty() {
                lines.push((id, line));
            }
        }
        lines
    }

    /// Queue one pre-encoded line for every connected client, best-effort.
    pub fn broadcast(&self, line: &str) {
        let clients = self.clients.lock();
        for handle in clients.values() {
            handle.queue.push(line.to_string());
        }
    }

    /// Queue one pre-encoded line for a single client.
    pub fn send_to(&self, client_id: u64, line: &str) {
        let clients = self.clients.lock();
        if let Some(handle) = clients.get(&client_id) {
            handle.queue.push(line.to_string());
        }
    }

    /// Drop a client (detach).
    pub fn disconnect(&self, client_id: u64) {
        let removed = self.clients.lock().remove(&client_id);
        if let Some(handle) = removed {
            handle.queue.close();
            self.client_count.fetch_sub(1, Ordering::SeqCst);
        }
    }

    pub fn client_count(&self) -> usize {
        self.client_count.load(Ordering::SeqCst)
    }
}

/// Wire a connected stream into reader and writer tasks.
fn install_client(
    id: u64,
    stream: TcpStream,
    clients: &Arc<Mutex<HashMap<u64, ClientHandle>>>,
    client_count: &Arc<AtomicUsize>,
    incoming_tx: mpsc::UnboundedSender<(u64, String)>,
) {
    let (read_half, mut write_half) = stream.into_split();
    let queue = Arc::new(SendQueue::new());

    clients.lock().insert(
        id,
        ClientHandle {
            queue: Arc::clone(&queue),
        },
    );
    client_count.fetch_add(1, Ordering::SeqCst);

    // Reader: line-buffered; EOF or error detaches the client.
    {
        let clients = Arc::clone(clients);
        let client_count = Arc::clone(client_count);
        let queue = Arc::clone(&queue);
        tokio::spawn(async move {
            let mut lines = BufReader::new(read_half).lines();
            loop {
                match lines.next_line().await {
                    Ok(Some(line)) => {
                        if incoming_tx.send((id, line)).is_err() {
                            break;
                        }
                    }
                    Ok(None) => break,
                    Err(e) => {
                        debug!(client = id, error = %e, "client read failed");
                        break;
                    }
                }
            }
            if clients.lock().remove(&id).is_some() {
                client_count.fetch_sub(1, Ordering::SeqCst);
            }
            queue.close();
            debug!(client = id, "client disconnected");
        });
    }

    // Writer: drains the send queue until the client goes away.
    tokio::spawn(async move {
        loop {
            let batch: Vec<String> = {
                let mut lines = queue.lines.lock();
                lines.drain(..).collect()
            };

            if batch.is_empty() {
                if queue.closed.load(Ordering::SeqCst) {
                    break;
                }
                queue.notify.notified().await;
                continue;
            }

            for line in batch {
                if write_half.write_all(line.as_bytes()).await.is_err()
                    || write_half.write_all(b"\n").await.is_err()
                {
                    warn!(client = id, "client write failed, dropping");
                    queue.close();
                    return;
                }
            }
            let _ = write_half.flush().await;
        }
    });
}

#[cfg(test)]
#[path = "server_tests.rs"]
mod tests;
