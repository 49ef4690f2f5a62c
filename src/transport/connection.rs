// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

//! Connection table (spec component C): maps a numeric connection id to an
//! open socket and its partial-read bookkeeping.

use std::{
    net::SocketAddr,
    sync::atomic::{AtomicI64, AtomicU32, Ordering},
};

use dashmap::DashMap;
use tokio::net::tcp::OwnedWriteHalf;
use tokio::sync::Mutex as AsyncMutex;

/// Per-connection record. `expected_size`/`received_size` mirror the
/// receive loop's partial-read state for this connection so the invariant
/// `received_size <= expected_size` (spec §3) is independently observable.
pub struct ConnectionRecord {
    pub write_half: AsyncMutex<OwnedWriteHalf>,
    pub peer_addr: SocketAddr,
    pub expected_size: AtomicI64,
    pub received_size: AtomicI64,
}

impl ConnectionRecord {
    pub fn new(write_half: OwnedWriteHalf, peer_addr: SocketAddr) -> Self {
        Self {
            write_half: AsyncMutex::new(write_half),
            peer_addr,
            expected_size: AtomicI64::new(0),
            received_size: AtomicI64::new(0),
        }
    }

    pub fn set_progress(&self, expected: i64, received: i64) {
        self.expected_size.store(expected, Ordering::SeqCst);
        self.received_size.store(received, Ordering::SeqCst);
    }

    pub fn expected(&self) -> i64 {
        self.expected_size.load(Ordering::SeqCst)
    }

    pub fn received(&self) -> i64 {
        self.received_size.load(Ordering::SeqCst)
    }
}

/// Concurrent `connection_id -> ConnectionRecord` map guarded internally by
/// `DashMap`'s sharded locking (the teacher uses the same map type for its
/// ITT and session tables in `client::client::ClientConnection` /
/// `client::pool_sessions::Pool`).
pub struct ConnectionTable {
    records: DashMap<u32, std::sync::Arc<ConnectionRecord>>,
    next_id: AtomicU32,
}

impl ConnectionTable {
    pub fn new() -> Self {
        Self {
            records: DashMap::new(),
            next_id: AtomicU32::new(1),
        }
    }

    /// Returns the next identifier from a monotonic counter that never
    /// hands out zero.
    pub fn assign_id(&self) -> u32 {
        loop {
            let id = self.next_id.fetch_add(1, Ordering::Relaxed);
            if id != 0 {
                return id;
            }
        }
    }

    pub fn insert(&self, id: u32, record: std::sync::Arc<ConnectionRecord>) {
        self.records.insert(id, record);
    }

    pub fn get(&self, id: u32) -> Option<std::sync::Arc<ConnectionRecord>> {
        self.records.get(&id).map(|r| r.clone())
    }

    pub fn remove(&self, id: u32) -> Option<std::sync::Arc<ConnectionRecord>> {
        self.records.remove(&id).map(|(_, r)| r)
    }

    pub fn snapshot_ids(&self) -> Vec<u32> {
        self.records.iter().map(|e| *e.key()).collect()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

impl Default for ConnectionTable {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn assign_id_never_yields_zero_and_is_monotonic() {
        let table = ConnectionTable::new();
        let a = table.assign_id();
        let b = table.assign_id();
        assert_ne!(a, 0);
        assert_ne!(b, 0);
        assert!(b > a);
    }
}
