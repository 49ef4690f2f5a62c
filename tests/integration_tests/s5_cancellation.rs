// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

//! S5 — cancellation (spec §8): a client sends a request, then immediately
//! cancels it via `delete_pending`. The completion fires with `CANCELED`;
//! a second `delete_pending` on the same id returns `false`.

use std::sync::Arc;
use std::time::Duration;

use p2p_rpc_runtime::{
    rpc::{Channel, Controller, RemoteChannel},
    service::FnService,
};

use super::common::{random_ascii_payload, start_manager};

#[tokio::test]
async fn delete_pending_cancels_in_flight_request() {
    let (server, port) = start_manager(10_000).await.expect("start server");
    Channel::new(server.clone()).set_service(
        "MirrorTest",
        Arc::new(FnService::new(|_method: String, args: Vec<u8>| async move {
            // Slow enough that the client's cancel always wins the race.
            tokio::time::sleep(Duration::from_secs(2)).await;
            Ok(args)
        })),
    );

    let (client, _client_port) = start_manager(10_000).await.expect("start client");
    let channel = RemoteChannel::new(client.clone(), "127.0.0.1", port, "", 0);
    let controller = Arc::new(Controller::new(10_000));

    let payload = random_ascii_payload(512 * 1024, "");
    let call = {
        let channel_args = payload.clone().into_bytes();
        let controller = controller.clone();
        tokio::spawn(async move { channel.call_method("MirrorTest", "Mirror", controller, channel_args).await })
    };

    // Give the call a moment to register in the pending table, then cancel
    // it by request id.
    tokio::time::sleep(Duration::from_millis(50)).await;
    let id = controller.request_id();
    assert!(client.delete_pending(id), "first cancel should remove the pending entry");

    let result = call.await.expect("join call task");
    assert!(result.is_err());
    assert!(controller.failed());
    assert_eq!(controller.failure_text(), "CANCELED");

    assert!(!client.delete_pending(id), "second cancel on the same id must return false");

    client.stop_transport().await;
    server.stop_transport().await;
}
