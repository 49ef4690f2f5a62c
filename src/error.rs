// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

use thiserror::Error;

/// Frame-codec failures (spec §4.B / §7 `MalformedFrame`).
#[derive(Debug, Error)]
pub enum FrameError {
    #[error("frame size {0} is not positive")]
    NonPositiveSize(i64),
    #[error("frame size {size} exceeds the {max}-byte budget")]
    TooLarge { size: i64, max: u64 },
}

/// Transport-level failures (spec §7).
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("failed to bind listening socket on port {0}")]
    BindError(u16, #[source] std::io::Error),
    #[error("connection id {0} is not registered")]
    UnknownConnection(u32),
    #[error("failed to connect to {0}:{1}")]
    ConnectFailed(String, u16, #[source] std::io::Error),
    #[error("transport is stopped")]
    Stopped,
}

/// RPC-layer failures surfaced through a `Controller` (spec §7).
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ChannelError {
    #[error("TIMEOUT")]
    Timeout,
    #[error("CANCELED")]
    Canceled,
    #[error("service {0} is not registered")]
    UnknownService(String),
    #[error("connection closed before a response arrived")]
    ConnectionClosed,
}
