// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

//! S3 — bidirectional (spec §8): two peers each register `TestOp`. A calls
//! B's `Add(3,2)` and B calls A's `Multiply(4,4)`, both completing without
//! failure. Exercises a manager acting as client and server at once.

use std::sync::Arc;

use anyhow::bail;
use p2p_rpc_runtime::{
    rpc::{Channel, Controller, RemoteChannel},
    service::FnService,
};

use super::common::start_manager;

fn test_op_handler(method: String, args: Vec<u8>) -> impl std::future::Future<Output = anyhow::Result<Vec<u8>>> {
    async move {
        let (a, b): (i32, i32) = bincode::deserialize(&args)?;
        match method.as_str() {
            "Add" => Ok(bincode::serialize(&(a + b))?),
            "Multiply" => Ok(bincode::serialize(&(a * b))?),
            other => bail!("TestOp has no method {other}"),
        }
    }
}

#[tokio::test]
async fn both_peers_can_call_and_serve() {
    let (peer_a, port_a) = start_manager(5_000).await.expect("start peer a");
    let (peer_b, port_b) = start_manager(5_000).await.expect("start peer b");

    Channel::new(peer_a.clone()).set_service("TestOp", Arc::new(FnService::new(test_op_handler)));
    Channel::new(peer_b.clone()).set_service("TestOp", Arc::new(FnService::new(test_op_handler)));

    let a_to_b = RemoteChannel::new(peer_a.clone(), "127.0.0.1", port_b, "", 0);
    let add_controller = Arc::new(Controller::new(5_000));
    let sum = a_to_b
        .call_method(
            "TestOp",
            "Add",
            add_controller.clone(),
            bincode::serialize(&(3i32, 2i32)).expect("encode add args"),
        )
        .await
        .expect("a calls b's Add");
    assert!(!add_controller.failed());
    assert_eq!(bincode::deserialize::<i32>(&sum).expect("decode sum"), 5);

    let b_to_a = RemoteChannel::new(peer_b.clone(), "127.0.0.1", port_a, "", 0);
    let mul_controller = Arc::new(Controller::new(5_000));
    let product = b_to_a
        .call_method(
            "TestOp",
            "Multiply",
            mul_controller.clone(),
            bincode::serialize(&(4i32, 4i32)).expect("encode multiply args"),
        )
        .await
        .expect("b calls a's Multiply");
    assert!(!mul_controller.failed());
    assert_eq!(bincode::deserialize::<i32>(&product).expect("decode product"), 16);

    peer_a.stop_transport().await;
    peer_b.stop_transport().await;
}
