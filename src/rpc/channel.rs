// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

//! Channel (spec §4.G, component H): a per-peer handle for invoking a
//! remote method, or a manager-side handle for serving inbound calls for
//! one service.
//!
//! The spec allows either construction shape on one type; this splits them
//! into two so a server-side channel can't accidentally be asked to place
//! an outbound call it has no remote address for.

use std::sync::Arc;

use crate::error::ChannelError;
use crate::service::Service;

use super::channel_manager::ChannelManager;
use super::controller::Controller;

/// Server-side binding: registers a [`Service`] under a name so the
/// manager's inbound dispatch can reach it.
pub struct Channel {
    manager: Arc<ChannelManager>,
}

impl Channel {
    pub fn new(manager: Arc<ChannelManager>) -> Self {
        Self { manager }
    }

    pub fn set_service(&self, service_name: impl Into<String>, service: Arc<dyn Service>) {
        self.manager.register_channel(service_name, service);
    }
}

/// Client-side handle bound to a `{remote_ip, remote_port, rv_ip, rv_port}`
/// tuple (spec §4.G).
pub struct RemoteChannel {
    manager: Arc<ChannelManager>,
    remote_ip: String,
    remote_port: u16,
    rv_ip: String,
    rv_port: u16,
}

impl RemoteChannel {
    pub fn new(
        manager: Arc<ChannelManager>,
        remote_ip: impl Into<String>,
        remote_port: u16,
        rv_ip: impl Into<String>,
        rv_port: u16,
    ) -> Self {
        Self {
            manager,
            remote_ip: remote_ip.into(),
            remote_port,
            rv_ip: rv_ip.into(),
            rv_port,
        }
    }

    /// Builds the request envelope, attempts `connect_to_send`, registers
    /// the pending entry and arms its timeout, then awaits the outcome
    /// (spec §4.G `call_method`).
    pub async fn call_method(
        &self,
        service: &str,
        method: &str,
        controller: Arc<Controller>,
        args: Vec<u8>,
    ) -> Result<Vec<u8>, ChannelError> {
        self.manager
            .call(
                &self.remote_ip,
                self.remote_port,
                &self.rv_ip,
                self.rv_port,
                service,
                method,
                controller,
                args,
            )
            .await
    }
}
