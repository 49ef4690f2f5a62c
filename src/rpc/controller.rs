// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

//! Per-call state (spec §3 "Controller" / §4.H, component I).

use std::sync::{
    Mutex,
    atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering},
};

/// `failure_text` empty iff `failed() == false` (spec §3 invariant).
pub struct Controller {
    timeout_ms: AtomicU64,
    rtt_ms: AtomicU64,
    failure_text: Mutex<String>,
    request_id: AtomicU32,
    cancelled: AtomicBool,
}

impl Controller {
    pub fn new(default_timeout_ms: u64) -> Self {
        Self {
            timeout_ms: AtomicU64::new(default_timeout_ms),
            rtt_ms: AtomicU64::new(0),
            failure_text: Mutex::new(String::new()),
            request_id: AtomicU32::new(0),
            cancelled: AtomicBool::new(false),
        }
    }

    /// `set_timeout(seconds)` in the spec; stores milliseconds.
    pub fn set_timeout_secs(&self, seconds: u64) {
        self.timeout_ms.store(seconds * 1000, Ordering::SeqCst);
    }

    pub fn set_timeout_ms(&self, ms: u64) {
        self.timeout_ms.store(ms, Ordering::SeqCst);
    }

    pub fn timeout_ms(&self) -> u64 {
        self.timeout_ms.load(Ordering::SeqCst)
    }

    pub fn start_cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    pub fn rtt_ms(&self) -> u64 {
        self.rtt_ms.load(Ordering::SeqCst)
    }

    pub(crate) fn set_rtt_ms(&self, rtt: u64) {
        self.rtt_ms.store(rtt, Ordering::SeqCst);
    }

    pub fn request_id(&self) -> u32 {
        self.request_id.load(Ordering::SeqCst)
    }

    pub(crate) fn set_request_id(&self, id: u32) {
        self.request_id.store(id, Ordering::SeqCst);
    }

    pub fn failed(&self) -> bool {
        !self.failure_text.lock().expect("controller lock poisoned").is_empty()
    }

    pub fn failure_text(&self) -> String {
        self.failure_text.lock().expect("controller lock poisoned").clone()
    }

    pub(crate) fn set_failure(&self, text: impl Into<String>) {
        *self.failure_text.lock().expect("controller lock poisoned") = text.into();
    }

    /// Clears failure text, rtt and request id, restores the default
    /// timeout. Does not clear the cancelled flag (spec §4.H).
    pub fn reset(&self, default_timeout_ms: u64) {
        self.failure_text.lock().expect("controller lock poisoned").clear();
        self.rtt_ms.store(0, Ordering::SeqCst);
        self.timeout_ms.store(default_timeout_ms, Ordering::SeqCst);
        self.request_id.store(0, Ordering::SeqCst);
    }
}

impl Default for Controller {
    fn default() -> Self {
        Self::new(crate::cfg::config::DEFAULT_RPC_TIMEOUT_MS)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn failed_tracks_failure_text_invariant() {
        let c = Controller::new(7_000);
        assert!(!c.failed());
        c.set_failure("TIMEOUT");
        assert!(c.failed());
        assert_eq!(c.failure_text(), "TIMEOUT");
    }

    #[test]
    fn reset_preserves_cancelled_flag() {
        let c = Controller::new(7_000);
        c.set_failure("CANCELED");
        c.start_cancel();
        c.reset(7_000);
        assert!(!c.failed());
        assert!(c.is_cancelled());
    }

    #[test]
    fn set_timeout_secs_stores_milliseconds() {
        let c = Controller::new(0);
        c.set_timeout_secs(3);
        assert_eq!(c.timeout_ms(), 3_000);
    }
}
