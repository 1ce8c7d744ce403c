// Copyright (c) 2024-2025 Jesse Morgan / Morgan Forge
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Periodic progress snapshots for push clients.
//!
//! Each subscriber gets its own interval: one snapshot immediately, then one per tick,
//! each holding only in-flight tasks. An empty snapshot is still emitted so the client
//! keeps hearing from us. The stream ends only when the subscriber drops it (the client
//! disconnected), which also stops its timer.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures_util::{Stream, StreamExt};
use tokio::time::MissedTickBehavior;
use tokio_stream::wrappers::IntervalStream;

use super::state::ProgressStore;
use super::types::{ProgressRecord, TaskId};

/// In-flight tasks keyed by identifier.
pub type ProgressSnapshot = BTreeMap<TaskId, ProgressRecord>;

/// Default spacing between snapshots.
pub const DEFAULT_PROGRESS_INTERVAL: Duration = Duration::from_secs(3);

/// Hands out progress streams over a shared registry.
#[derive(Debug, Clone)]
pub struct ProgressBroadcaster {
    store: Arc<ProgressStore>,
    interval: Duration,
    subscribers: Arc<AtomicUsize>,
}

impl ProgressBroadcaster {
    /// A zero interval is bumped to 1ms; tokio intervals cannot tick at zero.
    pub fn new(store: Arc<ProgressStore>, interval: Duration) -> Self {
        Self {
            store,
            interval: interval.max(Duration::from_millis(1)),
            subscribers: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Number of streams currently open.
    pub fn subscribers(&self) -> usize {
        self.subscribers.load(Ordering::SeqCst)
    }

    /// Current in-flight snapshot.
    pub fn snapshot(&self) -> ProgressSnapshot {
        self.store.in_flight()
    }

    /// Open a new subscriber stream.
    pub fn subscribe(&self) -> impl Stream<Item = ProgressSnapshot> + Send + 'static {
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        let guard = Subscription::open(Arc::clone(&self.subscribers));
        let store = Arc::clone(&self.store);

        // The first tick of a tokio interval completes immediately.
        IntervalStream::new(ticker).map(move |_| {
            let _open = &guard;
            store.in_flight()
        })
    }
}

/// Keeps the subscriber count honest; dropped together with the stream.
#[derive(Debug)]
struct Subscription {
    subscribers: Arc<AtomicUsize>,
}

impl Subscription {
    fn open(subscribers: Arc<AtomicUsize>) -> Self {
        let now = subscribers.fetch_add(1, Ordering::SeqCst) + 1;
        tracing::debug!(subscribers = now, "Progress stream opened");
        Self { subscribers }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        let now = self.subscribers.fetch_sub(1, Ordering::SeqCst) - 1;
        tracing::debug!(subscribers = now, "Progress stream closed");
    }
}
