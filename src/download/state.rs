// Copyright (c) 2024-2025 Jesse Morgan / Morgan Forge
// SPDX-License-Identifier: AGPL-3.0-or-later

//! In-memory progress registry.
//!
//! Maps task identifiers to their latest [`ProgressRecord`]. Records are stored behind
//! `Arc` and replaced whole under a short write lock, so a reader holding an `Arc` always
//! sees one complete record. State lives for the process only; terminal records are aged
//! out by the [`RetentionPolicy`].

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};
use std::time::{Duration, Instant};

use super::error::StoreError;
use super::types::{ProgressRecord, TaskId};
use crate::locks::{resilient_read, resilient_write};

/// How long finished records are kept around.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetentionPolicy {
    /// Evict terminal records not updated for this long. `None` keeps them forever.
    pub terminal_ttl: Option<Duration>,
    /// Keep at most this many terminal records, evicting least recently updated first.
    pub max_terminal: Option<usize>,
}

impl Default for RetentionPolicy {
    fn default() -> Self {
        Self {
            terminal_ttl: Some(Duration::from_secs(3600)),
            max_terminal: Some(1000),
        }
    }
}

impl RetentionPolicy {
    /// Never evict anything.
    pub fn unbounded() -> Self {
        Self {
            terminal_ttl: None,
            max_terminal: None,
        }
    }
}

#[derive(Debug, Clone)]
struct Entry {
    record: Arc<ProgressRecord>,
    /// Monotonic write sequence, used for least-recently-updated ordering.
    seq: u64,
    touched: Instant,
}

/// Process-wide progress registry.
#[derive(Debug)]
pub struct ProgressStore {
    entries: RwLock<HashMap<TaskId, Entry>>,
    next_seq: AtomicU64,
    retention: RetentionPolicy,
}

impl Default for ProgressStore {
    fn default() -> Self {
        Self::new(RetentionPolicy::default())
    }
}

impl ProgressStore {
    pub fn new(retention: RetentionPolicy) -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            next_seq: AtomicU64::new(0),
            retention,
        }
    }

    pub fn retention(&self) -> RetentionPolicy {
        self.retention
    }

    /// Replace the record for `id`.
    ///
    /// Fails once the stored record is terminal: the first `success`/`error` written for
    /// a task is the last thing ever written for it.
    pub fn set(&self, id: &TaskId, record: ProgressRecord) -> Result<(), StoreError> {
        let mut entries = resilient_write(&self.entries);
        let seq = self.next_seq.fetch_add(1, Ordering::Relaxed);

        if let Some(existing) = entries.get(id) {
            if existing.record.status.is_terminal() {
                return Err(StoreError::Terminal(id.to_string()));
            }
        }

        entries.insert(
            id.clone(),
            Entry {
                record: Arc::new(record),
                seq,
                touched: Instant::now(),
            },
        );
        Ok(())
    }

    /// Latest record for `id`, if still retained.
    pub fn get(&self, id: &TaskId) -> Option<Arc<ProgressRecord>> {
        resilient_read(&self.entries).get(id).map(|e| Arc::clone(&e.record))
    }

    /// Visit a consistent snapshot of every record.
    ///
    /// The lock is released before `visitor` runs, so writers never wait on readers.
    pub fn for_each<F>(&self, mut visitor: F)
    where
        F: FnMut(&TaskId, &ProgressRecord),
    {
        let snapshot: Vec<(TaskId, Arc<ProgressRecord>)> = resilient_read(&self.entries)
            .iter()
            .map(|(id, e)| (id.clone(), Arc::clone(&e.record)))
            .collect();

        for (id, record) in &snapshot {
            visitor(id, record);
        }
    }

    /// Tasks still downloading whose file name is already known, keyed by id.
    pub fn in_flight(&self) -> BTreeMap<TaskId, ProgressRecord> {
        let mut out = BTreeMap::new();
        self.for_each(|id, record| {
            if record.is_in_flight() {
                out.insert(id.clone(), record.clone());
            }
        });
        out
    }

    /// File names currently being written.
    pub fn in_flight_names(&self) -> HashSet<String> {
        let mut names = HashSet::new();
        self.for_each(|_, record| {
            if record.is_in_flight() {
                if let Some(name) = &record.file_name {
                    names.insert(name.clone());
                }
            }
        });
        names
    }

    pub fn len(&self) -> usize {
        resilient_read(&self.entries).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Apply the retention policy. Returns how many records were evicted.
    ///
    /// Only terminal records are ever evicted.
    pub fn prune(&self) -> usize {
        let mut entries = resilient_write(&self.entries);
        let before = entries.len();

        if let Some(ttl) = self.retention.terminal_ttl {
            entries.retain(|_, e| !e.record.status.is_terminal() || e.touched.elapsed() < ttl);
        }

        if let Some(max) = self.retention.max_terminal {
            let mut terminal: Vec<(u64, TaskId)> = entries
                .iter()
                .filter(|(_, e)| e.record.status.is_terminal())
                .map(|(id, e)| (e.seq, id.clone()))
                .collect();

            if terminal.len() > max {
                terminal.sort_unstable();
                let excess = terminal.len() - max;
                for (_, id) in terminal.into_iter().take(excess) {
                    entries.remove(&id);
                }
            }
        }

        let evicted = before - entries.len();
        if evicted > 0 {
            tracing::debug!(evicted, remaining = entries.len(), "Pruned finished download records");
        }
        evicted
    }
}
