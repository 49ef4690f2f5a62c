// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use p2p_rpc_runtime::rpc::ChannelManager;

pub const TEST_MAX_FRAME_BYTES: u64 = 16 * 1024 * 1024;

/// Starts a manager on an OS-assigned loopback port with no rendezvous
/// configured, returning the manager and its bound port.
pub async fn start_manager(default_timeout_ms: u64) -> Result<(Arc<ChannelManager>, u16)> {
    let mgr = ChannelManager::new(
        TEST_MAX_FRAME_BYTES,
        Duration::from_secs(10),
        Duration::from_secs(8),
        default_timeout_ms,
    );
    let port = mgr.start_transport(0, Arc::new(|_, _, _| {})).await?;
    Ok((mgr, port))
}

pub fn random_ascii_payload(len: usize, suffix: &str) -> String {
    let mut s: String = (0..len.saturating_sub(suffix.len()))
        .map(|i| (b'a' + (i % 26) as u8) as char)
        .collect();
    s.push_str(suffix);
    s
}
