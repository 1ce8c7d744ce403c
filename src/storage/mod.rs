// Copyright (c) 2024-2025 Jesse Morgan / Morgan Forge
// SPDX-License-Identifier: AGPL-3.0-or-later

//! The storage directory ("bucket") where finished artifacts live.
//!
//! Listings hide names that an in-flight task is still writing; the caller passes that set
//! in, so this module never consults the progress registry itself.

pub mod naming;

use std::collections::HashSet;
use std::fs::Metadata;
use std::io;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::fs::File;

use crate::utils::format_file_size;

pub use naming::{create_unique, is_plain_file_name, resolve_unique_name, sanitize_file_name};

/// Route prefix under which artifacts are served.
pub const ARTIFACT_ROUTE: &str = "/downloads";

/// Relative URL that downloads `name` as an attachment.
pub fn download_url(name: &str) -> String {
    format!("{}/{}", ARTIFACT_ROUTE, urlencoding::encode(name))
}

/// Relative URL that serves `name` inline for previewing.
pub fn preview_url(name: &str) -> String {
    format!("{}?type=preview", download_url(name))
}

/// One entry of a directory listing.
#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct FileInfo {
    pub name: String,
    pub size: u64,
    pub size_formatted: String,
    pub modified: DateTime<Utc>,
    pub download_url: String,
    pub preview_url: String,
}

impl FileInfo {
    fn from_metadata(name: String, metadata: &Metadata) -> Self {
        let size = metadata.len();
        let modified = metadata
            .modified()
            .map(DateTime::<Utc>::from)
            .unwrap_or_else(|_| Utc::now());

        Self {
            download_url: download_url(&name),
            preview_url: preview_url(&name),
            size_formatted: format_file_size(size),
            name,
            size,
            modified,
        }
    }
}

/// Drop every entry whose name is currently being written.
pub fn exclude_in_flight(files: Vec<FileInfo>, in_flight: &HashSet<String>) -> Vec<FileInfo> {
    files
        .into_iter()
        .filter(|file| !in_flight.contains(&file.name))
        .collect()
}

/// Handle to the storage directory.
#[derive(Debug, Clone)]
pub struct Storage {
    root: PathBuf,
}

impl Storage {
    /// Wrap a directory path. Nothing is touched until [`Storage::ensure_exists`].
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Absolute-or-relative path of an artifact inside the directory.
    pub fn path_of(&self, name: &str) -> PathBuf {
        self.root.join(name)
    }

    /// Create the directory (and parents) if missing.
    pub async fn ensure_exists(&self) -> io::Result<()> {
        tokio::fs::create_dir_all(&self.root).await
    }

    /// Regular files in the directory, newest first, minus the in-flight names.
    ///
    /// A missing directory lists as empty.
    pub async fn list(&self, in_flight: &HashSet<String>) -> io::Result<Vec<FileInfo>> {
        let mut entries = match tokio::fs::read_dir(&self.root).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e),
        };

        let mut files = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            let Ok(name) = entry.file_name().into_string() else {
                tracing::debug!(path = ?entry.path(), "Skipping non UTF-8 file name");
                continue;
            };
            // Deleted between read_dir and stat: just skip it.
            let Ok(metadata) = entry.metadata().await else {
                continue;
            };
            if metadata.is_file() {
                files.push(FileInfo::from_metadata(name, &metadata));
            }
        }

        let mut files = exclude_in_flight(files, in_flight);
        files.sort_by(|a, b| b.modified.cmp(&a.modified).then_with(|| a.name.cmp(&b.name)));
        Ok(files)
    }

    /// Open an artifact for reading. `Ok(None)` when it does not exist or is not a file.
    pub async fn open(&self, name: &str) -> io::Result<Option<(File, Metadata)>> {
        let path = self.path_of(name);
        let file = match File::open(&path).await {
            Ok(file) => file,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e),
        };
        let metadata = file.metadata().await?;
        if !metadata.is_file() {
            return Ok(None);
        }
        Ok(Some((file, metadata)))
    }

    /// Remove an artifact. `Ok(false)` when it did not exist.
    pub async fn delete(&self, name: &str) -> io::Result<bool> {
        match tokio::fs::remove_file(self.path_of(name)).await {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e),
        }
    }

    /// Size on disk of an artifact.
    pub async fn size_of(&self, name: &str) -> io::Result<u64> {
        Ok(tokio::fs::metadata(self.path_of(name)).await?.len())
    }

    /// Claim a collision-free name and create it exclusively, announcing each candidate first.
    pub async fn create_unique<F>(&self, desired: &str, max_attempts: usize, announce: F) -> io::Result<(String, File)>
    where
        F: FnMut(&str),
    {
        naming::create_unique(&self.root, desired, max_attempts, announce).await
    }
}
