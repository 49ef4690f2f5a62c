// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

//! Connection-oriented datagram transport (spec §§1-4, 9): a reliable,
//! ordered byte stream per peer pair, length-prefixed framing, and a
//! rendezvous-assisted connect path for NATed peers.

mod connection;
mod engine;
mod rendezvous;

pub use connection::{ConnectionRecord, ConnectionTable};
pub use engine::{OnDeadRendezvous, OnMessage, OnSendComplete, TransportEngine};
