// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

//! Rendezvous hole-punching protocol (spec component E): a two-message
//! exchange (`FORWARD_REQ` / `FORWARD_MSG`) relayed through a publicly
//! reachable rendezvous peer so two NATed peers can punch through to each
//! other.
//!
//! The substrate here is TCP (see `SPEC_FULL.md` §1), so this is a
//! best-effort analogue of the original UDT/UDP scheme rather than a
//! literal NAT traversal implementation: the wire exchange and the
//! initiator's retry policy are faithful to the spec, but TCP's per-socket
//! ephemeral source port means the "public address" relayed to the target
//! is only as useful as it would be for a real NAT with port-preserving
//! TCP hairpinning.

use std::{sync::Arc, time::Duration};

use anyhow::{Result, anyhow};
use tracing::warn;

use crate::envelope::{self, HolePunchKind, HolePunchingMsg, TransportMessage};

use super::engine::TransportEngine;

const DIRECT_CONNECT_ATTEMPTS: usize = 4;
const DIRECT_CONNECT_INTERVAL: Duration = Duration::from_millis(200);

/// Initiator sequence (spec §4.E): connect to rendezvous, send
/// `FORWARD_REQ`, then attempt up to 4 direct connects to the target.
pub(crate) async fn connect_via_rendezvous(
    engine: &Arc<TransportEngine>,
    remote_ip: &str,
    remote_port: u16,
    rv_ip: &str,
    rv_port: u16,
    keep_connection: bool,
) -> Result<u32> {
    let rv_conn = engine.direct_connect(rv_ip, rv_port, true).await?;
    let req = TransportMessage::HolePunch(HolePunchingMsg {
        ip: remote_ip.to_string(),
        port: remote_port,
        kind: HolePunchKind::ForwardReq,
    });
    engine.send(rv_conn, envelope::encode(&req)?)?;
    engine.close_connection(rv_conn).await;

    let mut last_err = None;
    for attempt in 0..DIRECT_CONNECT_ATTEMPTS {
        match engine.direct_connect(remote_ip, remote_port, keep_connection).await {
            Ok(conn_id) => return Ok(conn_id),
            Err(e) => {
                last_err = Some(e);
                if attempt + 1 < DIRECT_CONNECT_ATTEMPTS {
                    tokio::time::sleep(DIRECT_CONNECT_INTERVAL).await;
                }
            },
        }
    }
    Err(last_err.unwrap_or_else(|| anyhow!("hole punch failed: no attempts made")))
}

/// Reacts to an inbound hole-punching message arriving on `conn_id`.
pub(crate) async fn handle_incoming(
    engine: &Arc<TransportEngine>,
    msg: HolePunchingMsg,
    conn_id: u32,
) {
    match msg.kind {
        HolePunchKind::ForwardReq => relay_forward_req(engine, msg, conn_id).await,
        HolePunchKind::ForwardMsg => {
            // We are the target: punch our own NAT mapping toward the
            // initiator's public address. The resulting socket has served
            // its purpose once connected; it is not kept.
            let _ = engine.direct_connect(&msg.ip, msg.port, false).await;
        },
    }
}

async fn relay_forward_req(engine: &Arc<TransportEngine>, msg: HolePunchingMsg, conn_id: u32) {
    let Some(rec) = engine.table.get(conn_id) else {
        warn!(conn_id, "FORWARD_REQ on unknown connection");
        return;
    };
    let fwd = TransportMessage::HolePunch(HolePunchingMsg {
        ip: rec.peer_addr.ip().to_string(),
        port: rec.peer_addr.port(),
        kind: HolePunchKind::ForwardMsg,
    });
    let bytes = match envelope::encode(&fwd) {
        Ok(b) => b,
        Err(e) => {
            warn!("failed to encode FORWARD_MSG: {e}");
            return;
        },
    };
    match engine.direct_connect(&msg.ip, msg.port, true).await {
        Ok(target_conn) => {
            if let Err(e) = engine.send(target_conn, bytes) {
                warn!("failed to relay FORWARD_MSG: {e}");
            }
        },
        Err(e) => warn!("failed to reach target for FORWARD_MSG relay: {e}"),
    }
}
