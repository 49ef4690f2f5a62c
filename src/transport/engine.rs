// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

//! The transport engine (spec §4): owns the listening socket, the
//! connection table, and the worker tasks that move frames on and off the
//! wire.
//!
//! The spec describes five worker loops run on dedicated OS threads. The
//! accept, send, message-dispatch and rendezvous-ping duties map onto one
//! tokio task each, same as the spec. The receive duty is instead one
//! lightweight reader task per live connection rather than a single loop
//! polling every socket — tokio's per-connection task is the natural
//! analogue of a completion-based receive loop, and it's the same shape the
//! original codebase itself uses for its client read loop. All readers
//! still feed the single shared inbound queue the message-dispatch loop
//! drains, so the spec's "one dispatch loop, one callback invocation at a
//! time" contract holds regardless of how many sockets are being read.

use std::{
    net::SocketAddr,
    sync::{
        Arc, Mutex,
        atomic::{AtomicBool, Ordering},
    },
    time::Duration,
};

use anyhow::{Result, anyhow};
use once_cell::sync::OnceCell;
use tokio::{
    net::{
        TcpListener, TcpStream,
        tcp::{OwnedReadHalf, OwnedWriteHalf},
    },
    sync::{Notify, mpsc},
    task::JoinSet,
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::{
    codec,
    envelope::{self, RpcMessage, TransportMessage},
    error::TransportError,
};

use super::{
    connection::{ConnectionRecord, ConnectionTable},
    rendezvous,
};

/// Invoked once per fully decoded RPC message, with the connection it
/// arrived on.
pub type OnMessage = Arc<dyn Fn(RpcMessage, u32) + Send + Sync>;
/// Invoked when the rendezvous-ping loop either confirms reachability
/// (`is_dead = false`) or gives up after exhausting its retries
/// (`is_dead = true`, with the rendezvous address that stopped answering).
pub type OnDeadRendezvous = Arc<dyn Fn(bool, String, u16) + Send + Sync>;
/// Invoked after a queued payload has been fully written to the wire.
pub type OnSendComplete = Arc<dyn Fn(u32) + Send + Sync>;

const PING_RETRY_INTERVAL: Duration = Duration::from_secs(2);
const PING_RETRY_ATTEMPTS: usize = 3;
const ACCEPT_ERROR_BACKOFF: Duration = Duration::from_millis(10);

struct SendJob {
    conn_id: u32,
    payload: Vec<u8>,
    /// Fired once the payload has been fully written, so a caller that asked
    /// not to keep the connection (`connect_and_send`) knows when it is safe
    /// to close it without racing the send loop.
    flushed: Option<tokio::sync::oneshot::Sender<()>>,
}

/// Owns the listening socket, connection table and worker tasks (spec §4).
pub struct TransportEngine {
    pub(crate) table: Arc<ConnectionTable>,
    cancel: CancellationToken,
    tasks: Mutex<JoinSet<()>>,
    listening_port: OnceCell<u16>,
    send_tx: OnceCell<mpsc::UnboundedSender<SendJob>>,
    inbound_tx: OnceCell<mpsc::UnboundedSender<(RpcMessage, u32)>>,
    on_message: OnceCell<OnMessage>,
    on_dead_rendezvous: OnceCell<OnDeadRendezvous>,
    on_send_complete: OnceCell<OnSendComplete>,
    max_frame_bytes: u64,
    io_timeout: Duration,
    nat_ping_timeout: Duration,
    start_ping: Notify,
    ping_target: Mutex<Option<(String, u16)>>,
    directly_connected: AtomicBool,
}

impl TransportEngine {
    pub fn new(max_frame_bytes: u64, io_timeout: Duration, nat_ping_timeout: Duration) -> Arc<Self> {
        Arc::new(Self {
            table: Arc::new(ConnectionTable::new()),
            cancel: CancellationToken::new(),
            tasks: Mutex::new(JoinSet::new()),
            listening_port: OnceCell::new(),
            send_tx: OnceCell::new(),
            inbound_tx: OnceCell::new(),
            on_message: OnceCell::new(),
            on_dead_rendezvous: OnceCell::new(),
            on_send_complete: OnceCell::new(),
            max_frame_bytes,
            io_timeout,
            nat_ping_timeout,
            start_ping: Notify::new(),
            ping_target: Mutex::new(None),
            directly_connected: AtomicBool::new(true),
        })
    }

    /// Binds the listening socket and spawns the five workers. Returns the
    /// bound port (useful when `port == 0`).
    pub async fn start(
        self: &Arc<Self>,
        port: u16,
        on_message: OnMessage,
        on_dead_rendezvous: OnDeadRendezvous,
        on_send_complete: OnSendComplete,
    ) -> Result<u16> {
        let listener = TcpListener::bind(("0.0.0.0", port))
            .await
            .map_err(|e| TransportError::BindError(port, e))?;
        let bound_port = listener.local_addr()?.port();

        self.listening_port.set(bound_port).ok();
        self.on_message.set(on_message).ok();
        self.on_dead_rendezvous.set(on_dead_rendezvous).ok();
        self.on_send_complete.set(on_send_complete).ok();

        let (send_tx, send_rx) = mpsc::unbounded_channel();
        let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();
        self.send_tx.set(send_tx).ok();
        self.inbound_tx.set(inbound_tx).ok();

        let mut tasks = self.tasks.lock().expect("tasks mutex poisoned");
        tasks.spawn(accept_loop(self.clone(), listener));
        tasks.spawn(send_loop(self.clone(), send_rx));
        tasks.spawn(message_dispatch_loop(self.clone(), inbound_rx));
        tasks.spawn(ping_loop(self.clone()));
        drop(tasks);

        Ok(bound_port)
    }

    pub fn listening_port(&self) -> Option<u16> {
        self.listening_port.get().copied()
    }

    /// Connects to `remote_ip:remote_port`, going through a rendezvous peer
    /// at `rv_ip:rv_port` first when `rv_ip` is non-empty.
    pub async fn connect_to_send(
        self: &Arc<Self>,
        remote_ip: &str,
        remote_port: u16,
        rv_ip: &str,
        rv_port: u16,
        keep_connection: bool,
    ) -> Result<u32> {
        if rv_ip.is_empty() {
            self.direct_connect(remote_ip, remote_port, keep_connection).await
        } else {
            rendezvous::connect_via_rendezvous(
                self,
                remote_ip,
                remote_port,
                rv_ip,
                rv_port,
                keep_connection,
            )
            .await
        }
    }

    /// Opens a direct TCP connection. When `keep_connection` is false the
    /// sockets are dropped immediately after connecting (used for one-shot
    /// NAT punches); otherwise the connection is registered and a reader
    /// task is spawned for it.
    pub(crate) async fn direct_connect(
        self: &Arc<Self>,
        ip: &str,
        port: u16,
        keep_connection: bool,
    ) -> Result<u32> {
        let stream = TcpStream::connect((ip, port))
            .await
            .map_err(|e| TransportError::ConnectFailed(ip.to_string(), port, e))?;
        stream.set_nodelay(true).ok();
        let peer_addr = stream.peer_addr()?;
        let (read_half, write_half) = stream.into_split();
        let conn_id = self.table.assign_id();

        if keep_connection {
            self.register(conn_id, read_half, write_half, peer_addr);
        }
        Ok(conn_id)
    }

    fn register(
        self: &Arc<Self>,
        conn_id: u32,
        read_half: OwnedReadHalf,
        write_half: OwnedWriteHalf,
        peer_addr: SocketAddr,
    ) {
        self.table
            .insert(conn_id, Arc::new(ConnectionRecord::new(write_half, peer_addr)));
        if let Some(tx) = self.inbound_tx.get().cloned() {
            tokio::spawn(reader_loop(self.clone(), conn_id, read_half, tx));
        }
    }

    /// Queues `payload` for delivery on `conn_id`. Delivery order within a
    /// connection is preserved by the single send worker.
    pub fn send(&self, conn_id: u32, payload: Vec<u8>) -> Result<()> {
        self.enqueue(conn_id, payload, None)
    }

    fn enqueue(
        &self,
        conn_id: u32,
        payload: Vec<u8>,
        flushed: Option<tokio::sync::oneshot::Sender<()>>,
    ) -> Result<()> {
        if self.table.get(conn_id).is_none() {
            return Err(TransportError::UnknownConnection(conn_id).into());
        }
        self.send_tx
            .get()
            .ok_or(TransportError::Stopped)?
            .send(SendJob { conn_id, payload, flushed })
            .map_err(|_| TransportError::Stopped)?;
        Ok(())
    }

    /// Convenience combining `connect_to_send` + `send` (spec §4.D): connects
    /// to `remote_ip:remote_port` (via `rv_ip:rv_port` if set) and enqueues
    /// `payload` on the new connection, returning its id. When
    /// `keep_connection` is false the connection is closed once the payload
    /// has actually been flushed, rather than immediately — closing before
    /// the send loop drains the queue would drop the payload entirely.
    pub async fn connect_and_send(
        self: &Arc<Self>,
        remote_ip: &str,
        remote_port: u16,
        rv_ip: &str,
        rv_port: u16,
        payload: Vec<u8>,
        keep_connection: bool,
    ) -> Result<u32> {
        let conn_id = self.connect_to_send(remote_ip, remote_port, rv_ip, rv_port, true).await?;
        let (tx, rx) = tokio::sync::oneshot::channel();
        self.enqueue(conn_id, payload, Some(tx))?;
        if !keep_connection {
            let engine = self.clone();
            tokio::spawn(async move {
                let _ = rx.await;
                engine.close_connection(conn_id).await;
            });
        }
        Ok(conn_id)
    }

    /// Closes a connection and removes it from the table. Idempotent.
    pub async fn close_connection(&self, conn_id: u32) {
        if let Some(rec) = self.table.remove(conn_id) {
            use tokio::io::AsyncWriteExt;
            let mut w = rec.write_half.lock().await;
            let _ = w.shutdown().await;
        }
    }

    pub fn get_peer_addr(&self, conn_id: u32) -> Option<SocketAddr> {
        self.table.get(conn_id).map(|rec| rec.peer_addr)
    }

    /// Starts (or restarts) the rendezvous liveness loop. `directly_connected`
    /// should be true once this peer has a direct route to its counterpart,
    /// at which point the ping loop stops probing.
    pub fn start_ping_rendezvous(&self, directly_connected: bool, rv_ip: String, rv_port: u16) {
        self.directly_connected.store(directly_connected, Ordering::SeqCst);
        *self.ping_target.lock().expect("ping target mutex poisoned") = Some((rv_ip, rv_port));
        self.start_ping.notify_one();
    }

    pub fn mark_directly_connected(&self, directly_connected: bool) {
        self.directly_connected.store(directly_connected, Ordering::SeqCst);
    }

    /// Cancels all workers, waits up to 5 seconds for them to finish, then
    /// force-aborts stragglers. Closes every remaining connection.
    pub async fn stop(&self) {
        self.cancel.cancel();

        let mut tasks = {
            let mut guard = self.tasks.lock().expect("tasks mutex poisoned");
            std::mem::take(&mut *guard)
        };

        let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
        loop {
            let remaining = deadline.saturating_duration_since(tokio::time::Instant::now());
            if remaining.is_zero() {
                break;
            }
            match tokio::time::timeout(remaining, tasks.join_next()).await {
                Ok(Some(_)) => continue,
                Ok(None) => break,
                Err(_) => break,
            }
        }
        tasks.abort_all();
        while tasks.join_next().await.is_some() {}

        for id in self.table.snapshot_ids() {
            self.close_connection(id).await;
        }
    }
}

async fn accept_loop(engine: Arc<TransportEngine>, listener: TcpListener) {
    loop {
        tokio::select! {
            _ = engine.cancel.cancelled() => return,
            res = listener.accept() => match res {
                Ok((stream, peer_addr)) => {
                    stream.set_nodelay(true).ok();
                    let (read_half, write_half) = stream.into_split();
                    let conn_id = engine.table.assign_id();
                    engine.register(conn_id, read_half, write_half, peer_addr);
                    debug!(conn_id, %peer_addr, "accepted connection");
                },
                Err(e) => {
                    warn!("accept failed: {e}");
                    tokio::time::sleep(ACCEPT_ERROR_BACKOFF).await;
                },
            },
        }
    }
}

async fn reader_loop(
    engine: Arc<TransportEngine>,
    conn_id: u32,
    mut read_half: OwnedReadHalf,
    inbound_tx: mpsc::UnboundedSender<(RpcMessage, u32)>,
) {
    loop {
        if engine.cancel.is_cancelled() {
            break;
        }
        let Some(rec) = engine.table.get(conn_id) else { break };
        rec.set_progress(0, 0);

        let header = codec::read_frame_header(&mut read_half, engine.io_timeout, &engine.cancel).await;
        let size = match header {
            Ok(Some(size)) => size,
            Ok(None) => break,
            Err(e) => {
                debug!(conn_id, "receive error: {e}");
                break;
            },
        };
        let len = match codec::validate_frame_size(size, engine.max_frame_bytes) {
            Ok(len) => len,
            Err(e) => {
                warn!(conn_id, "malformed frame: {e}");
                break;
            },
        };
        rec.set_progress(len as i64, 0);

        let body = match read_body_tracked(&engine, &mut read_half, len, &rec).await {
            Ok(body) => body,
            Err(e) => {
                debug!(conn_id, "receive error: {e}");
                break;
            },
        };

        let msg = match envelope::decode(&body) {
            Ok(msg) => msg,
            Err(e) => {
                warn!(conn_id, "malformed frame payload: {e}");
                break;
            },
        };
        rec.set_progress(0, 0);

        match msg {
            TransportMessage::Rpc(rpc) => {
                if inbound_tx.send((rpc, conn_id)).is_err() {
                    break;
                }
            },
            TransportMessage::HolePunch(hp) => rendezvous::handle_incoming(&engine, hp, conn_id).await,
            TransportMessage::Keepalive => {},
        }
    }
    engine.close_connection(conn_id).await;
}

async fn read_body_tracked(
    engine: &Arc<TransportEngine>,
    r: &mut OwnedReadHalf,
    len: usize,
    rec: &ConnectionRecord,
) -> Result<Vec<u8>> {
    use tokio::io::AsyncReadExt;
    let mut buf = vec![0u8; len];
    let mut read_total = 0usize;
    while read_total < len {
        let n = codec::io_with_timeout(
            "read frame body",
            r.read(&mut buf[read_total..]),
            engine.io_timeout,
            &engine.cancel,
        )
        .await?;
        if n == 0 {
            return Err(anyhow!("connection closed mid-body"));
        }
        read_total += n;
        rec.set_progress(len as i64, read_total as i64);
    }
    Ok(buf)
}

async fn send_loop(engine: Arc<TransportEngine>, mut rx: mpsc::UnboundedReceiver<SendJob>) {
    loop {
        let job = tokio::select! {
            _ = engine.cancel.cancelled() => return,
            job = rx.recv() => match job {
                Some(job) => job,
                None => return,
            },
        };

        let Some(rec) = engine.table.get(job.conn_id) else {
            debug!(conn_id = job.conn_id, "send on unknown connection");
            continue;
        };
        let result = {
            let mut w = rec.write_half.lock().await;
            codec::write_frame(&mut *w, &job.payload, engine.io_timeout, &engine.cancel).await
        };
        match result {
            Ok(()) => {
                if let Some(cb) = engine.on_send_complete.get() {
                    cb(job.conn_id);
                }
                if let Some(tx) = job.flushed {
                    let _ = tx.send(());
                }
            },
            Err(e) => {
                warn!(conn_id = job.conn_id, "send failed: {e}");
                engine.close_connection(job.conn_id).await;
            },
        }
    }
}

async fn message_dispatch_loop(
    engine: Arc<TransportEngine>,
    mut rx: mpsc::UnboundedReceiver<(RpcMessage, u32)>,
) {
    loop {
        let item = tokio::select! {
            _ = engine.cancel.cancelled() => return,
            item = rx.recv() => match item {
                Some(item) => item,
                None => return,
            },
        };
        if let Some(cb) = engine.on_message.get() {
            cb(item.0, item.1);
        }
    }
}

async fn ping_loop(engine: Arc<TransportEngine>) {
    loop {
        tokio::select! {
            _ = engine.cancel.cancelled() => return,
            _ = engine.start_ping.notified() => {},
        }

        loop {
            if engine.cancel.is_cancelled() {
                return;
            }
            if engine.directly_connected.load(Ordering::SeqCst) {
                break;
            }
            let target = engine.ping_target.lock().expect("ping target mutex poisoned").clone();
            let Some((ip, port)) = target else { break };

            let mut reached = false;
            for attempt in 0..PING_RETRY_ATTEMPTS {
                match engine.direct_connect(&ip, port, false).await {
                    Ok(_) => {
                        reached = true;
                        break;
                    },
                    Err(_) => {
                        if attempt + 1 < PING_RETRY_ATTEMPTS {
                            tokio::time::sleep(PING_RETRY_INTERVAL).await;
                        }
                    },
                }
            }

            if reached {
                if let Some(cb) = engine.on_dead_rendezvous.get() {
                    cb(false, String::new(), 0);
                }
                tokio::time::sleep(engine.nat_ping_timeout).await;
            } else {
                if let Some(cb) = engine.on_dead_rendezvous.get() {
                    cb(true, ip, port);
                }
                break;
            }
        }
    }
}
