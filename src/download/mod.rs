// Copyright (c) 2024-2025 Jesse Morgan / Morgan Forge
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Background Download System for bucketd
//!
//! Downloads run as independent tokio tasks. A request returns a task id straight away;
//! progress is published into a shared registry which HTTP handlers and progress
//! streams read from.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────┐     ┌─────────────────┐
//! │ DownloadManager │────▶│ TransferEngine  │
//! │  (start/cancel) │     │ (one tokio task │
//! └────────┬────────┘     │   per download) │
//!          │              └────────┬────────┘
//!          ▼                       ▼
//! ┌─────────────────┐     ┌─────────────────┐
//! │ ProgressStore   │◀────│ Storage         │
//! │ (in memory)     │     │ (exclusive      │
//! └────────┬────────┘     │  file creation) │
//!          ▼              └─────────────────┘
//! ┌─────────────────────┐
//! │ ProgressBroadcaster │
//! └─────────────────────┘
//! ```
//!
//! # Usage
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use bucketd::download::{DownloadManager, ProgressStore, TransferSettings};
//! use bucketd::storage::Storage;
//!
//! # async fn example() -> anyhow::Result<()> {
//! let store = Arc::new(ProgressStore::default());
//! let manager = DownloadManager::new(Storage::new("./bucket"), store, &TransferSettings::default())?;
//!
//! let id = manager.start("https://example.com/a.png")?;
//! if let Some(record) = manager.store().get(&id) {
//!     println!("{}: {:?}", id, record.status);
//! }
//! # Ok(())
//! # }
//! ```

pub mod broadcast;
pub mod error;
pub mod inline;
pub mod manager;
pub mod state;
pub mod transfer;
pub mod types;

// Re-export commonly used items
pub use broadcast::{ProgressBroadcaster, ProgressSnapshot, DEFAULT_PROGRESS_INTERVAL};
pub use error::{StartError, StoreError, TransferError};
pub use manager::DownloadManager;
pub use state::{ProgressStore, RetentionPolicy};
pub use transfer::{TransferEngine, TransferSettings};
pub use types::{DownloadSource, DownloadStatus, ProgressRecord, TaskId};
