// Copyright (c) 2024-2025 Jesse Morgan / Morgan Forge
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Transfer engine: moves the bytes and keeps the task's progress record current.
//!
//! [`TransferEngine::run`] never returns an error. Every failure (bad URL, non-2xx
//! origin, broken payload, I/O, empty result, cancellation) ends up as the task's terminal
//! `error` record, and any file the task created is removed again.

use std::sync::{Arc, LazyLock};

use anyhow::{Context, Result};
use futures_util::StreamExt;
use regex::Regex;
use reqwest::header::{HeaderMap, CONTENT_DISPOSITION};
use reqwest::redirect::Policy;
use reqwest::Url;
use tokio::fs::File;
use tokio::io::AsyncWriteExt;
use tokio_util::sync::CancellationToken;

use super::error::TransferError;
use super::inline::decode_data_uri;
use super::state::ProgressStore;
use super::types::{DownloadSource, ProgressRecord, TaskId};
use crate::storage::{sanitize_file_name, Storage};
use crate::utils::unix_millis;

/// Browser-like default; some origins refuse obvious bots.
pub const DEFAULT_USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) \
    AppleWebKit/537.36 (KHTML, like Gecko) Chrome/126.0.0.0 Safari/537.36";

/// Redirect hops followed before giving up.
const MAX_REDIRECTS: usize = 10;

/// `filename*=UTF-8''name%20here.txt` (RFC 5987)
static EXTENDED_FILENAME: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?i)filename\*\s*=\s*[^']*'[^']*'([^;]+)"#).expect("extended filename regex")
});

/// `filename="name.txt"` or `filename=name.txt`
static PLAIN_FILENAME: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?i)filename\s*=\s*(?:"([^"]*)"|([^;]+))"#).expect("filename regex")
});

/// Knobs for the transfer engine.
#[derive(Debug, Clone)]
pub struct TransferSettings {
    pub user_agent: String,
    /// Honour `HTTP(S)_PROXY` / `NO_PROXY` from the environment.
    pub use_system_proxy: bool,
    /// Naming retries when a concurrent task claims the same candidate first.
    pub max_name_attempts: usize,
}

impl Default for TransferSettings {
    fn default() -> Self {
        Self {
            user_agent: DEFAULT_USER_AGENT.to_string(),
            use_system_proxy: true,
            max_name_attempts: 32,
        }
    }
}

/// Extract a file name hint from a `Content-Disposition` value.
pub fn filename_from_content_disposition(value: &str) -> Option<String> {
    if let Some(caps) = EXTENDED_FILENAME.captures(value) {
        let encoded = caps[1].trim().trim_matches('"');
        let decoded = urlencoding::decode(encoded)
            .map(|s| s.into_owned())
            .unwrap_or_else(|_| encoded.to_string());
        if let Some(name) = sanitize_file_name(&decoded) {
            return Some(name);
        }
    }

    let caps = PLAIN_FILENAME.captures(value)?;
    let raw = caps.get(1).or_else(|| caps.get(2))?.as_str().trim();
    sanitize_file_name(raw)
}

/// Last non-empty path segment of a URL, percent-decoded.
pub fn filename_from_url(url: &Url) -> Option<String> {
    let segment = url.path_segments()?.filter(|s| !s.is_empty()).last()?;
    let decoded = urlencoding::decode(segment)
        .map(|s| s.into_owned())
        .unwrap_or_else(|_| segment.to_string());
    sanitize_file_name(&decoded)
}

/// Pick the desired storage name for a remote response.
///
/// Precedence: `Content-Disposition` hint, the requested URL, the URL after redirects,
/// then `file-<unix millis>`.
pub fn choose_file_name(requested: &Url, final_url: &Url, headers: &HeaderMap) -> String {
    headers
        .get(CONTENT_DISPOSITION)
        .and_then(|v| v.to_str().ok())
        .and_then(filename_from_content_disposition)
        .or_else(|| filename_from_url(requested))
        .or_else(|| filename_from_url(final_url))
        .unwrap_or_else(|| format!("file-{}", unix_millis()))
}

/// Performs transfers and publishes their progress.
#[derive(Debug)]
pub struct TransferEngine {
    client: reqwest::Client,
    storage: Storage,
    store: Arc<ProgressStore>,
    max_name_attempts: usize,
}

impl TransferEngine {
    pub fn new(storage: Storage, store: Arc<ProgressStore>, settings: &TransferSettings) -> Result<Self> {
        let mut builder = reqwest::Client::builder()
            .user_agent(settings.user_agent.clone())
            .redirect(Policy::limited(MAX_REDIRECTS));
        if !settings.use_system_proxy {
            builder = builder.no_proxy();
        }
        let client = builder.build().context("Failed to build HTTP client")?;

        Ok(Self {
            client,
            storage,
            store,
            max_name_attempts: settings.max_name_attempts,
        })
    }

    pub fn storage(&self) -> &Storage {
        &self.storage
    }

    /// Run one task to its terminal state and return the final record.
    pub async fn run(&self, id: TaskId, source: DownloadSource, cancel: CancellationToken) -> ProgressRecord {
        let mut job = Job {
            engine: self,
            id,
            current: ProgressRecord::started(),
            created: None,
        };
        job.publish(ProgressRecord::started());
        tracing::info!(task = %job.id, source = %source.describe(), "Download started");

        let fetched = match &source {
            DownloadSource::Inline(raw) => job.fetch_inline(raw).await,
            DownloadSource::Remote(url) => job.fetch_remote(url, &cancel).await,
        };
        let outcome = match fetched {
            Ok(name) => job.verify(&name).await.map(|size| (name, size)),
            Err(e) => Err(e),
        };

        match outcome {
            Ok((name, size)) => {
                tracing::info!(task = %job.id, file = %name, size, "Download finished");
                let done = job.current.succeeded(&name, size);
                job.publish(done);
            }
            Err(e) => {
                job.discard_partial().await;
                tracing::warn!(task = %job.id, error = %e, "Download failed");
                let failed = job.current.failed(e.to_string());
                job.publish(failed);
            }
        }

        job.current
    }
}

/// State of one running transfer. Only this struct writes the task's record.
struct Job<'a> {
    engine: &'a TransferEngine,
    id: TaskId,
    /// Last published record; every update is derived from it.
    current: ProgressRecord,
    /// Name of the file this task created, until it is verified or removed.
    created: Option<String>,
}

impl Job<'_> {
    fn publish(&mut self, next: ProgressRecord) {
        match self.engine.store.set(&self.id, next.clone()) {
            Ok(()) => self.current = next,
            Err(e) => tracing::error!(task = %self.id, error = %e, "Progress update rejected"),
        }
    }

    /// Create the artifact file, publishing each candidate name before it exists on disk so
    /// listings hide it from the start. The record reverts if no name could be claimed.
    async fn claim(&mut self, desired: &str, total: u64) -> Result<(String, File), TransferError> {
        let engine = self.engine;
        let before = self.current.clone();
        let claimed = engine
            .storage
            .create_unique(desired, engine.max_name_attempts, |candidate| {
                let named = self.current.with_file(candidate, total);
                self.publish(named);
            })
            .await;

        match claimed {
            Ok((name, file)) => {
                self.created = Some(name.clone());
                Ok((name, file))
            }
            Err(e) => {
                if self.current.file_name != before.file_name {
                    self.publish(before);
                }
                Err(match e.kind() {
                    std::io::ErrorKind::AlreadyExists => TransferError::NamesExhausted(desired.to_string()),
                    _ => TransferError::Io(e),
                })
            }
        }
    }

    async fn fetch_inline(&mut self, raw: &str) -> Result<String, TransferError> {
        let payload = decode_data_uri(raw)?;
        let len = payload.bytes.len() as u64;

        let (name, mut file) = self.claim(&payload.file_name(), len).await?;

        file.write_all(&payload.bytes).await?;
        file.flush().await?;
        drop(file);

        let advanced = self.current.advanced(len);
        self.publish(advanced);
        Ok(name)
    }

    async fn fetch_remote(&mut self, raw_url: &str, cancel: &CancellationToken) -> Result<String, TransferError> {
        let url = Url::parse(raw_url).map_err(|e| TransferError::InvalidUrl(format!("{} ({})", raw_url, e)))?;
        if !matches!(url.scheme(), "http" | "https") {
            return Err(TransferError::UnsupportedScheme(url.scheme().to_string()));
        }

        let response = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(TransferError::Cancelled),
            response = self.engine.client.get(url.clone()).send() => response?,
        };

        let status = response.status();
        if !status.is_success() {
            return Err(TransferError::Http {
                status: status.as_u16(),
                reason: status.canonical_reason().unwrap_or("Unknown").to_string(),
            });
        }

        let desired = choose_file_name(&url, response.url(), response.headers());
        let total = response.content_length().unwrap_or(0);

        let (name, mut file) = self.claim(&desired, total).await?;

        let mut body = response.bytes_stream();
        loop {
            let next = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(TransferError::Cancelled),
                next = body.next() => next,
            };
            let Some(chunk) = next else { break };
            let chunk = chunk?;

            file.write_all(&chunk).await?;
            let advanced = self.current.advanced(chunk.len() as u64);
            self.publish(advanced);
        }

        file.flush().await?;
        file.sync_all().await?;
        Ok(name)
    }

    /// Stat the written artifact; an empty one is deleted and reported as a failure.
    async fn verify(&mut self, name: &str) -> Result<u64, TransferError> {
        let size = self.engine.storage.size_of(name).await?;
        if size == 0 {
            self.engine.storage.delete(name).await?;
            self.created = None;
            return Err(TransferError::Empty);
        }
        self.created = None;
        Ok(size)
    }

    async fn discard_partial(&mut self) {
        let Some(name) = self.created.take() else { return };
        if let Err(e) = self.engine.storage.delete(&name).await {
            tracing::warn!(task = %self.id, file = %name, error = %e, "Failed to remove partial file");
        }
    }
}
