// Copyright (c) 2024-2025 Jesse Morgan / Morgan Forge
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Download types: task identifiers, progress records and sources.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::storage::{download_url, preview_url};
use crate::utils::random_id;

/// Opaque identifier of one download attempt. Never reused.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TaskId(String);

impl TaskId {
    /// Allocate a fresh identifier.
    pub fn generate() -> Self {
        Self(random_id())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for TaskId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

/// Status of a download task.
///
/// There is no queued state: a task is `Downloading` from the moment it is created.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DownloadStatus {
    Downloading,
    Success,
    Error,
}

impl DownloadStatus {
    /// Returns true once the task can no longer change.
    pub fn is_terminal(&self) -> bool {
        matches!(self, DownloadStatus::Success | DownloadStatus::Error)
    }
}

/// Point-in-time snapshot of one task.
///
/// Records are never edited in place; every update builds a new record from the previous
/// one and replaces it in the registry wholesale.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProgressRecord {
    pub status: DownloadStatus,
    /// Expected size, 0 when the origin did not announce one.
    pub total_bytes: u64,
    pub downloaded_bytes: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub file_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub size: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub download_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub preview_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    pub updated_at: DateTime<Utc>,
}

impl ProgressRecord {
    /// The record every task starts from.
    pub fn started() -> Self {
        Self {
            status: DownloadStatus::Downloading,
            total_bytes: 0,
            downloaded_bytes: 0,
            file_name: None,
            size: None,
            download_url: None,
            preview_url: None,
            message: None,
            updated_at: Utc::now(),
        }
    }

    /// Still downloading and already bound to a file name.
    pub fn is_in_flight(&self) -> bool {
        self.status == DownloadStatus::Downloading && self.file_name.is_some()
    }

    /// Same record with the on-disk name and expected size resolved.
    pub fn with_file(&self, file_name: impl Into<String>, total_bytes: u64) -> Self {
        Self {
            file_name: Some(file_name.into()),
            total_bytes,
            updated_at: Utc::now(),
            ..self.clone()
        }
    }

    /// Same record with `chunk` more bytes written.
    ///
    /// An origin that sends more than it announced grows `total_bytes` along with it, so
    /// `downloaded_bytes <= total_bytes` holds whenever a total is known.
    pub fn advanced(&self, chunk: u64) -> Self {
        let downloaded_bytes = self.downloaded_bytes.saturating_add(chunk);
        let total_bytes = if self.total_bytes > 0 {
            self.total_bytes.max(downloaded_bytes)
        } else {
            0
        };
        Self {
            downloaded_bytes,
            total_bytes,
            updated_at: Utc::now(),
            ..self.clone()
        }
    }

    /// Terminal success record for a stored artifact of `size` bytes.
    pub fn succeeded(&self, file_name: &str, size: u64) -> Self {
        Self {
            status: DownloadStatus::Success,
            total_bytes: self.total_bytes.max(size),
            downloaded_bytes: size,
            file_name: Some(file_name.to_string()),
            size: Some(size),
            download_url: Some(download_url(file_name)),
            preview_url: Some(preview_url(file_name)),
            message: Some("File downloaded successfully".to_string()),
            updated_at: Utc::now(),
        }
    }

    /// Terminal error record carrying a human-readable message.
    pub fn failed(&self, message: impl Into<String>) -> Self {
        Self {
            status: DownloadStatus::Error,
            message: Some(message.into()),
            updated_at: Utc::now(),
            ..self.clone()
        }
    }
}

/// What a client asked to fetch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DownloadSource {
    /// `data:` URI carried in the request itself.
    Inline(String),
    /// Anything else is treated as a remote locator and validated when fetched.
    Remote(String),
}

impl DownloadSource {
    /// Classify a raw source string. Returns `None` for empty input.
    pub fn parse(raw: &str) -> Option<Self> {
        let raw = raw.trim();
        if raw.is_empty() {
            return None;
        }
        let is_data_uri = raw
            .get(..5)
            .map(|scheme| scheme.eq_ignore_ascii_case("data:"))
            .unwrap_or(false);

        Some(if is_data_uri {
            DownloadSource::Inline(raw.to_string())
        } else {
            DownloadSource::Remote(raw.to_string())
        })
    }

    /// Short description for logs; inline payloads are not echoed.
    pub fn describe(&self) -> String {
        match self {
            DownloadSource::Inline(raw) => format!("inline payload ({} bytes)", raw.len()),
            DownloadSource::Remote(url) => url.clone(),
        }
    }
}
