// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

//! The channel manager (spec §4.F, component G): owns the pending-request
//! table, the request-id generator, the registered services, and binds to
//! a transport engine.

use std::sync::{
    Arc, Mutex,
    atomic::{AtomicU32, Ordering},
};
use std::time::{Duration, Instant};

use dashmap::DashMap;
use once_cell::sync::OnceCell;
use rand::RngExt;
use tokio::sync::oneshot;
use tracing::warn;

use crate::cfg::config::DEFAULT_RPC_TIMEOUT_MS;
use crate::envelope::{self, RpcMessage, RpcType, TransportMessage};
use crate::error::ChannelError;
use crate::service::Service;
use crate::timer::DeferredTimer;
use crate::transport::{OnDeadRendezvous, OnMessage, OnSendComplete, TransportEngine};

use super::controller::Controller;
use super::pending::{PendingEntry, PendingOutcome, PendingTable};

pub struct ChannelManager {
    pub(crate) transport: Arc<TransportEngine>,
    timer: DeferredTimer,
    pending: PendingTable,
    services: DashMap<String, Arc<dyn Service>>,
    current_request_id: AtomicU32,
    external_port: OnceCell<u16>,
    external_ip: Mutex<String>,
    default_timeout_ms: u64,
}

impl ChannelManager {
    pub fn new(
        max_frame_bytes: u64,
        io_timeout: Duration,
        nat_ping_timeout: Duration,
        default_timeout_ms: u64,
    ) -> Arc<Self> {
        // Seeded randomly on construction (spec §4.F); never allowed to
        // start at the reserved-zero sentinel `new_id` skips.
        let seed: u32 = rand::rng().random();
        Arc::new(Self {
            transport: TransportEngine::new(max_frame_bytes, io_timeout, nat_ping_timeout),
            timer: DeferredTimer::new(),
            pending: PendingTable::new(),
            services: DashMap::new(),
            current_request_id: AtomicU32::new(if seed == 0 { 1 } else { seed }),
            external_port: OnceCell::new(),
            external_ip: Mutex::new(String::new()),
            default_timeout_ms: if default_timeout_ms == 0 { DEFAULT_RPC_TIMEOUT_MS } else { default_timeout_ms },
        })
    }

    pub fn from_config(cfg: &crate::cfg::config::RuntimeConfig) -> Arc<Self> {
        Self::new(cfg.max_frame_bytes, cfg.io_timeout(), cfg.nat_ping_timeout(), cfg.rpc_timeout_ms)
    }

    pub fn default_timeout_ms(&self) -> u64 {
        self.default_timeout_ms
    }

    pub fn external_port(&self) -> Option<u16> {
        self.external_port.get().copied()
    }

    pub fn set_external_ip(&self, ip: impl Into<String>) {
        *self.external_ip.lock().expect("external ip lock poisoned") = ip.into();
    }

    /// Starts the transport with `on_message = handle_inbound` and a no-op
    /// `on_send_complete`, and records the bound port as `external_port`.
    pub async fn start_transport(
        self: &Arc<Self>,
        port: u16,
        on_dead_rendezvous: OnDeadRendezvous,
    ) -> anyhow::Result<u16> {
        let mgr = self.clone();
        let on_message: OnMessage = Arc::new(move |rpc, conn_id| {
            let mgr = mgr.clone();
            tokio::spawn(async move { mgr.handle_inbound(rpc, conn_id).await });
        });
        let on_send_complete: OnSendComplete = Arc::new(|_conn_id| {});

        let bound_port = self.transport.start(port, on_message, on_dead_rendezvous, on_send_complete).await?;
        self.external_port.set(bound_port).ok();
        Ok(bound_port)
    }

    /// Stops the transport and unblocks every still-pending request with a
    /// `TIMEOUT` failure (spec §4.F `stop_transport`).
    pub async fn stop_transport(&self) {
        self.transport.stop().await;
        for entry in self.pending.drain_all() {
            self.timer.cancel(entry.timer_id);
            entry.controller.set_failure("TIMEOUT");
            let _ = entry.completion.send(PendingOutcome::Failed("TIMEOUT"));
        }
    }

    pub fn register_channel(&self, service_name: impl Into<String>, service: Arc<dyn Service>) {
        self.services.insert(service_name.into(), service);
    }

    pub fn unregister_channel(&self, service_name: &str) {
        self.services.remove(service_name);
    }

    pub fn clear_channels(&self) {
        self.services.clear();
    }

    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    /// Returns the current value then advances with wrap-around that skips
    /// zero (spec §4.F `new_id`).
    pub fn new_id(&self) -> u32 {
        loop {
            let id = self.current_request_id.fetch_add(1, Ordering::Relaxed);
            if id != 0 {
                return id;
            }
        }
    }

    /// Removes a still-pending request and fires its completion with
    /// `CANCELED`. Returns whether an entry was actually removed.
    pub fn delete_pending(&self, id: u32) -> bool {
        match self.pending.take(id) {
            Some(entry) => {
                self.timer.cancel(entry.timer_id);
                entry.controller.set_failure("CANCELED");
                let _ = entry.completion.send(PendingOutcome::Failed("CANCELED"));
                true
            },
            None => false,
        }
    }

    fn arm_timeout(self: &Arc<Self>, id: u32, timeout_ms: u64) -> u64 {
        let mgr = self.clone();
        self.timer.schedule(Duration::from_millis(timeout_ms), move || {
            if let Some(entry) = mgr.pending.take(id) {
                entry.controller.set_failure("TIMEOUT");
                let _ = entry.completion.send(PendingOutcome::Failed("TIMEOUT"));
                // The connection this request was riding on is of no further
                // use once its only request has timed out; free it rather
                // than leaving it open until the peer notices.
                if entry.conn_id != 0 {
                    let transport = mgr.transport.clone();
                    tokio::spawn(async move { transport.close_connection(entry.conn_id).await });
                }
            }
        })
    }

    /// Issues a request over the transport and awaits its outcome — the
    /// async-await replacement for the spec's callback-style `done`
    /// continuation (spec §9). Folds in `Channel::call_method` (§4.G):
    /// callers reach this through [`super::channel::Channel`].
    #[allow(clippy::too_many_arguments)]
    pub async fn call(
        self: &Arc<Self>,
        remote_ip: &str,
        remote_port: u16,
        rv_ip: &str,
        rv_port: u16,
        service: &str,
        method: &str,
        controller: Arc<Controller>,
        args: Vec<u8>,
    ) -> Result<Vec<u8>, ChannelError> {
        let id = self.new_id();
        controller.set_request_id(id);
        let timeout_ms = if controller.timeout_ms() > 0 {
            controller.timeout_ms()
        } else {
            self.default_timeout_ms
        };
        let (tx, rx) = oneshot::channel();

        match self.transport.connect_to_send(remote_ip, remote_port, rv_ip, rv_port, true).await {
            Ok(conn_id) => {
                let timer_id = self.arm_timeout(id, timeout_ms);
                self.pending.insert(id, PendingEntry {
                    completion: tx,
                    conn_id,
                    controller: controller.clone(),
                    timer_id,
                    sent_at: Instant::now(),
                });

                let msg = TransportMessage::Rpc(RpcMessage {
                    message_id: id,
                    rpc_type: RpcType::Request,
                    service: service.to_string(),
                    method: method.to_string(),
                    args,
                });
                match envelope::encode(&msg) {
                    Ok(bytes) => {
                        // A send failure here is not treated specially: the
                        // connection's teardown closes the socket, and the
                        // armed timeout unblocks the caller with TIMEOUT,
                        // matching the spec's dead-connection-cleanup note.
                        if let Err(e) = self.transport.send(conn_id, bytes) {
                            warn!(id, "failed to send request: {e}");
                        }
                    },
                    Err(e) => warn!(id, "failed to encode request: {e}"),
                }
            },
            Err(e) => {
                // Connect failed outright: register with a 1ms timeout so
                // the completion fires promptly with TIMEOUT, without
                // attempting to send (spec §4.G).
                warn!(id, "connect failed, arming immediate timeout: {e}");
                let timer_id = self.arm_timeout(id, 1);
                self.pending.insert(id, PendingEntry {
                    completion: tx,
                    conn_id: 0,
                    controller: controller.clone(),
                    timer_id,
                    sent_at: Instant::now(),
                });
            },
        }

        match rx.await {
            Ok(PendingOutcome::Response(bytes)) => Ok(bytes),
            Ok(PendingOutcome::Failed("TIMEOUT")) => Err(ChannelError::Timeout),
            Ok(PendingOutcome::Failed(_)) => Err(ChannelError::Canceled),
            Err(_) => Err(ChannelError::ConnectionClosed),
        }
    }

    async fn handle_inbound(self: Arc<Self>, rpc: RpcMessage, conn_id: u32) {
        match rpc.rpc_type {
            RpcType::Request => self.handle_request(rpc, conn_id).await,
            RpcType::Response => self.handle_response(rpc),
        }
    }

    async fn handle_request(&self, rpc: RpcMessage, conn_id: u32) {
        let Some(service) = self.services.get(&rpc.service).map(|s| s.clone()) else {
            warn!(service = %rpc.service, conn_id, "unknown service, closing connection");
            self.transport.close_connection(conn_id).await;
            return;
        };

        let result = service.call(&rpc.method, &rpc.args).await;
        let args = match result {
            Ok(bytes) => bytes,
            Err(e) => {
                warn!(service = %rpc.service, method = %rpc.method, "service handler failed: {e}");
                self.transport.close_connection(conn_id).await;
                return;
            },
        };

        let response = TransportMessage::Rpc(RpcMessage {
            message_id: rpc.message_id,
            rpc_type: RpcType::Response,
            service: rpc.service,
            method: rpc.method,
            args,
        });
        match envelope::encode(&response) {
            Ok(bytes) => {
                if let Err(e) = self.transport.send(conn_id, bytes) {
                    warn!(conn_id, "failed to send response: {e}");
                }
            },
            Err(e) => warn!("failed to encode response: {e}"),
        }
    }

    fn handle_response(&self, rpc: RpcMessage) {
        let Some(entry) = self.pending.take(rpc.message_id) else {
            return;
        };
        self.timer.cancel(entry.timer_id);
        entry.controller.set_rtt_ms(entry.sent_at.elapsed().as_millis() as u64);
        let _ = entry.completion.send(PendingOutcome::Response(rpc.args));
    }
}
