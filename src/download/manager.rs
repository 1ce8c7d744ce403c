// Copyright (c) 2024-2025 Jesse Morgan / Morgan Forge
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Download manager: accepts requests and runs each transfer as its own tokio task.

use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, RwLock};
use std::time::Duration;

use anyhow::Result;
use futures_util::FutureExt;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

use super::error::StartError;
use super::state::ProgressStore;
use super::transfer::{TransferEngine, TransferSettings};
use super::types::{DownloadSource, ProgressRecord, TaskId};
use crate::locks::{resilient_read, resilient_write};
use crate::storage::Storage;

/// Starts, tracks and cancels background downloads.
///
/// There is deliberately no queue or concurrency cap: every accepted request gets its own
/// task immediately.
#[derive(Debug)]
pub struct DownloadManager {
    engine: Arc<TransferEngine>,
    store: Arc<ProgressStore>,
    /// Cancellation handles of tasks that have not finished yet.
    running: Arc<RwLock<HashMap<TaskId, CancellationToken>>>,
    /// Parent of every task token; cancelled on shutdown.
    shutdown: CancellationToken,
    tracker: TaskTracker,
}

impl DownloadManager {
    /// Create a manager writing into `storage` and reporting into `store`.
    ///
    /// Nothing is spawned here; call [`DownloadManager::spawn_retention_sweeper`] from
    /// inside the runtime to age out finished records.
    pub fn new(storage: Storage, store: Arc<ProgressStore>, settings: &TransferSettings) -> Result<Self> {
        let engine = TransferEngine::new(storage, Arc::clone(&store), settings)?;
        Ok(Self {
            engine: Arc::new(engine),
            store,
            running: Arc::new(RwLock::new(HashMap::new())),
            shutdown: CancellationToken::new(),
            tracker: TaskTracker::new(),
        })
    }

    pub fn store(&self) -> &Arc<ProgressStore> {
        &self.store
    }

    pub fn storage(&self) -> &Storage {
        self.engine.storage()
    }

    /// Accept a download and return its identifier without waiting for any bytes.
    ///
    /// Only validation and scheduling problems are reported here. What happens during the
    /// transfer is visible through the progress store alone.
    pub fn start(&self, source: &str) -> Result<TaskId, StartError> {
        let source = DownloadSource::parse(source).ok_or(StartError::MissingSource)?;
        if self.shutdown.is_cancelled() {
            return Err(StartError::ShuttingDown);
        }
        let runtime = tokio::runtime::Handle::try_current().map_err(|_| StartError::RuntimeUnavailable)?;

        let id = TaskId::generate();
        // Seed the record so the id is resolvable the moment the caller sees it.
        if let Err(e) = self.store.set(&id, ProgressRecord::started()) {
            tracing::error!(task = %id, error = %e, "Fresh task id collided with a finished task");
        }

        let cancel = self.shutdown.child_token();
        resilient_write(&self.running).insert(id.clone(), cancel.clone());

        let engine = Arc::clone(&self.engine);
        let store = Arc::clone(&self.store);
        let running = Arc::clone(&self.running);
        let task_id = id.clone();

        self.tracker.spawn_on(
            async move {
                let run = AssertUnwindSafe(engine.run(task_id.clone(), source, cancel));
                if run.catch_unwind().await.is_err() {
                    tracing::error!(task = %task_id, "Transfer task panicked");
                    record_panic(&store, &task_id);
                }
                resilient_write(&running).remove(&task_id);
            },
            &runtime,
        );

        tracing::debug!(task = %id, "Download scheduled");
        Ok(id)
    }

    /// Ask a running task to stop at its next chunk. Returns false if it is not running.
    ///
    /// A task whose terminal record is already published counts as finished even while its
    /// handle is still being released.
    pub fn cancel(&self, id: &TaskId) -> bool {
        if self.is_finished(id) {
            return false;
        }
        match resilient_read(&self.running).get(id) {
            Some(token) => {
                tracing::info!(task = %id, "Cancelling download");
                token.cancel();
                true
            }
            None => false,
        }
    }

    /// Token cancelled when shutdown begins. Long-lived streams end on it.
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    /// Number of transfers that have not reached a terminal state.
    pub fn active_count(&self) -> usize {
        resilient_read(&self.running)
            .keys()
            .filter(|id| !self.is_finished(id))
            .count()
    }

    fn is_finished(&self, id: &TaskId) -> bool {
        self.store.get(id).is_some_and(|record| record.status.is_terminal())
    }

    /// Periodically apply the store's retention policy until shutdown.
    pub fn spawn_retention_sweeper(&self, every: Duration) -> JoinHandle<()> {
        let store = Arc::clone(&self.store);
        let shutdown = self.shutdown.clone();
        let every = every.max(Duration::from_millis(1));

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(every);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    _ = ticker.tick() => {
                        store.prune();
                    }
                }
            }
        })
    }

    /// Stop accepting work, cancel running transfers and wait up to `grace` for them to
    /// record their final state. Returns true if all of them did.
    pub async fn shutdown(&self, grace: Duration) -> bool {
        let active = self.active_count();
        if active > 0 {
            tracing::info!(active, "Cancelling in-flight downloads");
        }
        self.shutdown.cancel();
        self.tracker.close();

        match tokio::time::timeout(grace, self.tracker.wait()).await {
            Ok(()) => true,
            Err(_) => {
                tracing::warn!(remaining = self.active_count(), "Downloads still running after shutdown grace period");
                false
            }
        }
    }
}

/// Close out the record of a task whose transfer panicked, unless it already finished.
fn record_panic(store: &ProgressStore, id: &TaskId) {
    let Some(current) = store.get(id) else { return };
    if current.status.is_terminal() {
        return;
    }
    if let Err(e) = store.set(id, current.failed("Internal error during transfer")) {
        tracing::error!(task = %id, error = %e, "Failed to record panicked transfer");
    }
}
