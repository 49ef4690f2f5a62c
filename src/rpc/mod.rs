// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

//! The RPC channel layer (spec §§2, 4.F-4.H): turns typed requests into
//! framed transport payloads, correlates responses by `message_id`, and
//! dispatches inbound requests onto registered service handlers.

mod channel;
mod channel_manager;
mod controller;
mod pending;

pub use channel::{Channel, RemoteChannel};
pub use channel_manager::ChannelManager;
pub use controller::Controller;
