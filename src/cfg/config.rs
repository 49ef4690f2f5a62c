// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

use std::{fs, path::Path, time::Duration};

use anyhow::{Context, Result, ensure};
use serde::{Deserialize, Serialize};

/// Default RPC timeout (`kRpcTimeout`): 7 seconds.
pub const DEFAULT_RPC_TIMEOUT_MS: u64 = 7_000;
/// Default maximum frame size (`kDefaultMaxFrameBytes`): 64 MiB.
pub const DEFAULT_MAX_FRAME_BYTES: u64 = 64 * 1024 * 1024;
/// Default NAT liveness ping timeout (`kNatPingTimeout`).
pub const DEFAULT_NAT_PING_TIMEOUT_MS: u64 = 8_000;
/// Default per read/write I/O timeout.
pub const DEFAULT_IO_TIMEOUT_MS: u64 = 10_000;

/// Runtime configuration for the transport engine and RPC channel manager.
///
/// Loaded from YAML the same way the rest of this crate's ambient stack
/// expects configuration to arrive: a file on disk, parsed once at startup.
#[derive(Deserialize, Serialize, Debug, Clone)]
pub struct RuntimeConfig {
    /// Port to listen on. `0` lets the OS assign one.
    #[serde(default)]
    pub listen_port: u16,

    /// Default RPC call timeout in milliseconds.
    #[serde(default = "default_rpc_timeout_ms")]
    pub rpc_timeout_ms: u64,

    /// Maximum accepted frame payload size in bytes.
    #[serde(default = "default_max_frame_bytes")]
    pub max_frame_bytes: u64,

    /// How long the rendezvous-ping loop waits between liveness attempts.
    #[serde(default = "default_nat_ping_timeout_ms")]
    pub nat_ping_timeout_ms: u64,

    /// Timeout applied to every individual socket read/write.
    #[serde(default = "default_io_timeout_ms")]
    pub io_timeout_ms: u64,

    /// Rendezvous peer to punch through via, if this node is behind a NAT.
    #[serde(default)]
    pub rendezvous: Option<RendezvousConfig>,
}

#[derive(Deserialize, Serialize, Debug, Clone)]
pub struct RendezvousConfig {
    pub ip: String,
    pub port: u16,
}

fn default_rpc_timeout_ms() -> u64 {
    DEFAULT_RPC_TIMEOUT_MS
}

fn default_max_frame_bytes() -> u64 {
    DEFAULT_MAX_FRAME_BYTES
}

fn default_nat_ping_timeout_ms() -> u64 {
    DEFAULT_NAT_PING_TIMEOUT_MS
}

fn default_io_timeout_ms() -> u64 {
    DEFAULT_IO_TIMEOUT_MS
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            listen_port: 0,
            rpc_timeout_ms: DEFAULT_RPC_TIMEOUT_MS,
            max_frame_bytes: DEFAULT_MAX_FRAME_BYTES,
            nat_ping_timeout_ms: DEFAULT_NAT_PING_TIMEOUT_MS,
            io_timeout_ms: DEFAULT_IO_TIMEOUT_MS,
            rendezvous: None,
        }
    }
}

impl RuntimeConfig {
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let s = fs::read_to_string(path)?;
        let mut cfg: RuntimeConfig =
            serde_yaml::from_str(&s).context("failed to parse config YAML")?;
        cfg.validate_and_normalize()?;
        Ok(cfg)
    }

    /// Validates invariants and normalizes derived fields.
    pub fn validate_and_normalize(&mut self) -> Result<()> {
        ensure!(self.max_frame_bytes > 0, "max_frame_bytes must be > 0");
        if self.rpc_timeout_ms == 0 {
            self.rpc_timeout_ms = DEFAULT_RPC_TIMEOUT_MS;
        }
        if self.io_timeout_ms == 0 {
            self.io_timeout_ms = DEFAULT_IO_TIMEOUT_MS;
        }
        Ok(())
    }

    pub fn rpc_timeout(&self) -> Duration {
        Duration::from_millis(self.rpc_timeout_ms)
    }

    pub fn io_timeout(&self) -> Duration {
        Duration::from_millis(self.io_timeout_ms)
    }

    pub fn nat_ping_timeout(&self) -> Duration {
        Duration::from_millis(self.nat_ping_timeout_ms)
    }
}
