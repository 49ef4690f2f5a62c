// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

//! Pending-request table (spec §3 "Pending request", invariants in §3 and
//! §4.F). Keyed by `message_id`; a response, a timeout and an explicit
//! cancel all race to `take()` the same entry, and only the winner fires
//! the completion (spec §9 "fire at most once").

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Instant;

use tokio::sync::oneshot;

use super::controller::Controller;

pub(crate) enum PendingOutcome {
    Response(Vec<u8>),
    Failed(&'static str),
}

pub(crate) struct PendingEntry {
    pub completion: oneshot::Sender<PendingOutcome>,
    pub conn_id: u32,
    pub controller: Arc<Controller>,
    pub timer_id: u64,
    pub sent_at: Instant,
}

#[derive(Default)]
pub(crate) struct PendingTable {
    entries: Mutex<HashMap<u32, PendingEntry>>,
}

impl PendingTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, id: u32, entry: PendingEntry) {
        self.entries.lock().expect("pending table lock poisoned").insert(id, entry);
    }

    /// Removes and returns the entry for `id`, if it is still pending.
    /// Whoever calls this first — the response handler, the timer, or an
    /// explicit cancel — wins; later callers see `None`.
    pub fn take(&self, id: u32) -> Option<PendingEntry> {
        self.entries.lock().expect("pending table lock poisoned").remove(&id)
    }

    pub fn len(&self) -> usize {
        self.entries.lock().expect("pending table lock poisoned").len()
    }

    /// Drains every still-pending entry, for `stop_transport`.
    pub fn drain_all(&self) -> Vec<PendingEntry> {
        self.entries
            .lock()
            .expect("pending table lock poisoned")
            .drain()
            .map(|(_, entry)| entry)
            .collect()
    }
}
