// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

//! S4 — timeout with no server (spec §8): a client calls `Ping` on an
//! unbound port. The completion fires once the timeout elapses with
//! `controller.failed() == true` and `failure_text() == "TIMEOUT"`.

use std::sync::Arc;
use std::time::Instant;

use p2p_rpc_runtime::rpc::{Controller, RemoteChannel};

use super::common::start_manager;

#[tokio::test]
async fn call_to_unbound_port_times_out() {
    let (client, _port) = start_manager(3_000).await.expect("start client");

    // Bind and immediately drop a listener to get a port nothing is
    // listening on anymore.
    let probe = tokio::net::TcpListener::bind("127.0.0.1:0").await.expect("bind probe");
    let dead_port = probe.local_addr().expect("probe addr").port();
    drop(probe);

    let channel = RemoteChannel::new(client.clone(), "127.0.0.1", dead_port, "", 0);
    let controller = Arc::new(Controller::new(3_000));

    let started = Instant::now();
    let result = channel.call_method("PingTest", "Ping", controller.clone(), b"ping".to_vec()).await;
    let elapsed = started.elapsed();

    assert!(result.is_err());
    assert!(controller.failed());
    assert_eq!(controller.failure_text(), "TIMEOUT");
    assert!(elapsed < std::time::Duration::from_secs(4), "timeout should fire near the deadline, not hang");

    client.stop_transport().await;
}
