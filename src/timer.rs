// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

//! Deferred-call timer (spec component A): schedules a callback after a
//! delay, cancellable individually or in bulk. This is the single mechanism
//! the RPC channel manager uses to drive request timeouts and the transport
//! uses to drive rendezvous liveness retries.

use std::{
    collections::HashMap,
    sync::{
        Arc, Mutex,
        atomic::{AtomicU64, Ordering},
    },
    time::Duration,
};

use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

/// Granularity the background worker wakes at. The spec requires `<= 10ms`.
const TICK: Duration = Duration::from_millis(10);

type CallLaterFn = Box<dyn FnOnce() + Send + 'static>;

struct Entry {
    fire_at: Instant,
    cb: CallLaterFn,
}

struct Inner {
    entries: Mutex<HashMap<u64, Entry>>,
    next_id: AtomicU64,
    stop: CancellationToken,
}

/// Handle to a running deferred-call timer. Clone freely; clones share the
/// same background worker and entry table.
#[derive(Clone)]
pub struct DeferredTimer {
    inner: Arc<Inner>,
}

impl DeferredTimer {
    pub fn new() -> Self {
        let inner = Arc::new(Inner {
            entries: Mutex::new(HashMap::new()),
            next_id: AtomicU64::new(1),
            stop: CancellationToken::new(),
        });

        let worker = inner.clone();
        tokio::spawn(async move { run_worker(worker).await });

        Self { inner }
    }

    /// Schedules `cb` to run after `delay`, returning an id that can be used
    /// to cancel it before it fires.
    pub fn schedule<F>(&self, delay: Duration, cb: F) -> u64
    where F: FnOnce() + Send + 'static {
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        let entry = Entry {
            fire_at: Instant::now() + delay,
            cb: Box::new(cb),
        };
        self.inner
            .entries
            .lock()
            .expect("timer mutex poisoned")
            .insert(id, entry);
        id
    }

    /// Cancels a still-pending entry. Returns `true` if it was removed,
    /// `false` if it had already fired or been cancelled.
    pub fn cancel(&self, id: u64) -> bool {
        self.inner
            .entries
            .lock()
            .expect("timer mutex poisoned")
            .remove(&id)
            .is_some()
    }

    /// Drops every pending entry and returns how many were dropped.
    pub fn cancel_all(&self) -> usize {
        let mut entries = self.inner.entries.lock().expect("timer mutex poisoned");
        let n = entries.len();
        entries.clear();
        n
    }

    /// Stops the background worker. No further callbacks fire after this
    /// returns, including ones already due.
    pub fn stop(&self) {
        self.inner.stop.cancel();
    }
}

impl Default for DeferredTimer {
    fn default() -> Self {
        Self::new()
    }
}

async fn run_worker(inner: Arc<Inner>) {
    let mut interval = tokio::time::interval(TICK);
    loop {
        tokio::select! {
            _ = inner.stop.cancelled() => return,
            _ = interval.tick() => {},
        }

        let due: Vec<Entry> = {
            let now = Instant::now();
            let mut entries = inner.entries.lock().expect("timer mutex poisoned");
            let due_ids: Vec<u64> = entries
                .iter()
                .filter(|(_, e)| e.fire_at <= now)
                .map(|(id, _)| *id)
                .collect();
            due_ids
                .into_iter()
                .filter_map(|id| entries.remove(&id))
                .collect()
        };

        // Invoked outside the lock, so a callback that re-enters the timer
        // (e.g. re-scheduling itself) never deadlocks.
        for entry in due {
            if inner.stop.is_cancelled() {
                return;
            }
            (entry.cb)();
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicUsize;

    use super::*;

    #[tokio::test]
    async fn fires_after_delay() {
        let timer = DeferredTimer::new();
        let fired = Arc::new(AtomicUsize::new(0));
        let fired2 = fired.clone();
        timer.schedule(Duration::from_millis(20), move || {
            fired2.fetch_add(1, Ordering::SeqCst);
        });
        tokio::time::sleep(Duration::from_millis(200)).await;
        assert_eq!(fired.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn cancel_is_idempotent_and_suppresses_firing() {
        let timer = DeferredTimer::new();
        let fired = Arc::new(AtomicUsize::new(0));
        let fired2 = fired.clone();
        let id = timer.schedule(Duration::from_millis(50), move || {
            fired2.fetch_add(1, Ordering::SeqCst);
        });
        assert!(timer.cancel(id));
        assert!(!timer.cancel(id));
        tokio::time::sleep(Duration::from_millis(200)).await;
        assert_eq!(fired.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn cancel_all_stress() {
        let timer = DeferredTimer::new();
        let fired = Arc::new(AtomicUsize::new(0));
        for ms in 10..110u64 {
            let fired = fired.clone();
            timer.schedule(Duration::from_millis(ms), move || {
                fired.fetch_add(1, Ordering::SeqCst);
            });
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
        let cancelled = timer.cancel_all();
        tokio::time::sleep(Duration::from_millis(250)).await;
        assert_eq!(fired.load(Ordering::SeqCst), 100 - cancelled);
        assert_eq!(timer.cancel_all(), 0);
    }
}
