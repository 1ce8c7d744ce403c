// Copyright (c) 2024-2025 Jesse Morgan / Morgan Forge
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Error types of the download subsystem.

use thiserror::Error;

/// Synchronous failures of [`DownloadManager::start`](super::DownloadManager::start).
#[derive(Debug, Error)]
pub enum StartError {
    /// Empty or whitespace-only source.
    #[error("Missing source")]
    MissingSource,

    /// Called outside a tokio runtime, so the transfer cannot be spawned.
    #[error("Failed to schedule download: no async runtime available")]
    RuntimeUnavailable,

    /// The manager is shutting down and accepts no new work.
    #[error("Failed to schedule download: server is shutting down")]
    ShuttingDown,
}

impl StartError {
    /// Validation errors are the caller's fault; the rest are ours.
    pub fn is_validation(&self) -> bool {
        matches!(self, StartError::MissingSource)
    }
}

/// Anything that can end a transfer in the `error` state.
///
/// Never leaves the transfer task: the `Display` text becomes the record's `message`.
#[derive(Debug, Error)]
pub enum TransferError {
    #[error("Invalid URL: {0}")]
    InvalidUrl(String),

    #[error("Unsupported URL scheme '{0}' (only http and https are supported)")]
    UnsupportedScheme(String),

    /// Non-2xx response from the origin.
    #[error("Failed to download: HTTP {status} {reason}")]
    Http { status: u16, reason: String },

    #[error("Request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid inline payload: {0}")]
    InvalidPayload(String),

    #[error("Downloaded file is empty")]
    Empty,

    #[error("Download cancelled")]
    Cancelled,

    /// Every naming candidate was claimed by someone else first.
    #[error("Could not find a free file name for '{0}'")]
    NamesExhausted(String),
}

/// Rejected registry writes.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum StoreError {
    /// The task already reached `success` or `error`.
    #[error("task {0} already finished; its record is final")]
    Terminal(String),
}
