// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

//! Transport and RPC envelopes (spec component F / §3 / §6).
//!
//! `TransportMessage` is the tagged union carried on the wire inside every
//! frame (spec §4.B): exactly one of an RPC message or a hole-punching
//! message. Structured serialisation is delegated to `bincode`; the core
//! otherwise treats `args` as opaque bytes.

use anyhow::Result;
use serde::{Deserialize, Serialize};

pub type MessageId = u32;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RpcType {
    Request = 1,
    Response = 2,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RpcMessage {
    pub message_id: MessageId,
    pub rpc_type: RpcType,
    /// Last dotted segment of the fully qualified method name.
    pub service: String,
    pub method: String,
    /// Opaque payload bytes from the structured serialisation layer.
    pub args: Vec<u8>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum HolePunchKind {
    ForwardReq = 1,
    ForwardMsg = 2,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HolePunchingMsg {
    pub ip: String,
    pub port: u16,
    pub kind: HolePunchKind,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum TransportMessage {
    Rpc(RpcMessage),
    HolePunch(HolePunchingMsg),
    /// Empty liveness probe (spec §9: substitute for the UDT zero-byte
    /// `send` when the underlying stream has no cheaper keepalive).
    Keepalive,
}

pub fn encode(msg: &TransportMessage) -> Result<Vec<u8>> {
    Ok(bincode::serialize(msg)?)
}

pub fn decode(bytes: &[u8]) -> Result<TransportMessage> {
    Ok(bincode::deserialize(bytes)?)
}

/// Given `fully.qualified.Service.Method`, returns the penultimate dotted
/// component (`Service`) — `ChannelImpl::GetServiceName` in the original.
pub fn service_name_from_full_method(full_name: &str) -> String {
    let parts: Vec<&str> = full_name.split('.').collect();
    if parts.len() < 2 {
        return full_name.to_string();
    }
    parts[parts.len() - 2].to_string()
}
