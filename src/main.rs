// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

use std::sync::Arc;

use anyhow::{Context, Result, bail};
use p2p_rpc_runtime::{
    cfg::{cli::resolve_config_path, config::RuntimeConfig, logger::init_logger},
    rpc::{Channel, ChannelManager, Controller, RemoteChannel},
    service::FnService,
};
use tracing::info;

/// Demonstrates the register-then-call flow: a server channel manager
/// registers a `PingTest` service, a client channel manager dials it over
/// loopback and invokes `Ping`.
#[tokio::main]
async fn main() -> Result<()> {
    let _logger_guard = init_logger("demos/config_logger.yaml")?;

    let cfg = resolve_config_path("demos/config.yaml")
        .and_then(RuntimeConfig::load_from_file)
        .context("failed to resolve or load config")?;

    let server = ChannelManager::from_config(&cfg);
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
    let port = server
        .start_transport(0, Arc::new(|_, _, _| {}))
        .await
        .context("failed to start server transport")?;
    info!(port, "server listening");

    let client = ChannelManager::from_config(&cfg);
    client
        .start_transport(0, Arc::new(|_, _, _| {}))
        .await
        .context("failed to start client transport")?;

    let channel = RemoteChannel::new(client.clone(), "127.0.0.1", port, "", 0);
    let controller = Arc::new(Controller::new(5_000));
    match channel.call_method("PingTest", "Ping", controller.clone(), b"ping".to_vec()).await {
        Ok(bytes) => info!(response = %String::from_utf8_lossy(&bytes), "ping succeeded"),
        Err(e) => info!(%e, "ping failed"),
    }

    client.stop_transport().await;
    server.stop_transport().await;
    Ok(())
}
