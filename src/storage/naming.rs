// Copyright (c) 2024-2025 Jesse Morgan / Morgan Forge
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Collision-free naming inside the storage directory.
//!
//! [`resolve_unique_name`] is the best-effort check: it tries `name`, `name (1)`,
//! `name (2)`, ... and returns the first that does not exist. Two tasks can still pick the
//! same candidate between the check and the write, so [`create_unique`] opens the file
//! with create-new semantics and re-resolves on `AlreadyExists`. Each candidate is
//! announced to the caller before its file exists, so it can be hidden from listings
//! while still empty.

use std::io;
use std::path::Path;

use tokio::fs::{File, OpenOptions};

/// Split a file name into base and extension, the extension keeping its dot.
///
/// A leading dot does not start an extension (`.env` has none).
pub fn split_extension(name: &str) -> (&str, &str) {
    match name.rfind('.') {
        Some(idx) if idx > 0 => name.split_at(idx),
        _ => (name, ""),
    }
}

async fn exists(dir: &Path, name: &str) -> bool {
    // symlink_metadata so that a dangling link still counts as taken
    tokio::fs::symlink_metadata(dir.join(name)).await.is_ok()
}

/// Return `desired` if nothing named so exists in `dir`, else the first free
/// `"<base> (n)<ext>"` for n = 1, 2, ...
pub async fn resolve_unique_name(dir: &Path, desired: &str) -> String {
    if !exists(dir, desired).await {
        return desired.to_string();
    }

    let (base, ext) = split_extension(desired);
    let mut counter: u64 = 1;
    loop {
        let candidate = format!("{} ({}){}", base, counter, ext);
        if !exists(dir, &candidate).await {
            return candidate;
        }
        counter += 1;
    }
}

/// Resolve a unique name and create it exclusively, retrying on lost races.
///
/// `announce` sees every candidate just before its create attempt. Returns the claimed
/// name and the open (empty) file. Gives up with an `AlreadyExists` error after
/// `max_attempts` collisions.
pub async fn create_unique<F>(dir: &Path, desired: &str, max_attempts: usize, mut announce: F) -> io::Result<(String, File)>
where
    F: FnMut(&str),
{
    for attempt in 1..=max_attempts {
        let name = resolve_unique_name(dir, desired).await;
        announce(&name);
        match OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(dir.join(&name))
            .await
        {
            Ok(file) => return Ok((name, file)),
            Err(e) if e.kind() == io::ErrorKind::AlreadyExists => {
                tracing::debug!(name = %name, attempt, "Name claimed concurrently, re-resolving");
            }
            Err(e) => return Err(e),
        }
    }

    Err(io::Error::new(
        io::ErrorKind::AlreadyExists,
        format!("no free name for '{}' after {} attempts", desired, max_attempts),
    ))
}

/// Reduce an untrusted name hint to a bare file name.
///
/// Keeps only the final path component (either separator), strips control characters and
/// surrounding whitespace. Returns `None` when nothing usable remains.
pub fn sanitize_file_name(raw: &str) -> Option<String> {
    let last = raw.rsplit(['/', '\\']).next().unwrap_or(raw);
    let cleaned: String = last.chars().filter(|c| !c.is_control()).collect();
    let cleaned = cleaned.trim();

    if cleaned.is_empty() || cleaned == "." || cleaned == ".." {
        return None;
    }
    Some(cleaned.to_string())
}

/// True when `name` can be joined onto the storage directory without escaping it.
pub fn is_plain_file_name(name: &str) -> bool {
    !name.is_empty()
        && name != "."
        && name != ".."
        && !name.contains(['/', '\\', '\0'])
}
