// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

//! S1 — register + ping (spec §8): a server registers `PingTest`, a client
//! calls `Ping` with a 5s timeout and expects a `"pong"` echo.

use std::sync::Arc;

use anyhow::bail;
use p2p_rpc_runtime::{
    rpc::{Channel, Controller, RemoteChannel},
    service::FnService,
};

use super::common::start_manager;

#[tokio::test]
async fn ping_succeeds_within_timeout() {
    let (server, port) = start_manager(7_000).await.expect("start server");
    Channel::new(server.clone()).set_service(
        "PingTest",
        Arc::new(FnService::new(|method: String, args: Vec<u8>| async move {
            match method.as_str() {
                "Ping" if args == b"ping" => Ok(b"pong".to_vec()),
                "Ping" => bail!("unexpected ping payload"),
                other => bail!("PingTest has no method {other}"),
            }
        })),
    );

    let (client, _client_port) = start_manager(7_000).await.expect("start client");
    let channel = RemoteChannel::new(client.clone(), "127.0.0.1", port, "", 0);
    let controller = Arc::new(Controller::new(5_000));

    let response = channel
        .call_method("PingTest", "Ping", controller.clone(), b"ping".to_vec())
        .await
        .expect("ping call");

    assert!(!controller.failed());
    assert_eq!(response, b"pong");

    client.stop_transport().await;
    server.stop_transport().await;
}
