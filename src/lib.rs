// Copyright (c) 2024-2025 Jesse Morgan / Morgan Forge
// SPDX-License-Identifier: AGPL-3.0-or-later

//! bucketd - background download service library
//!
//! Hand it an HTTP(S) URL or a `data:` URI and it fetches the bytes into a storage
//! directory in the background, while exposing live progress and a listing/retrieval API
//! for the finished artifacts.
//!
//! # Core Modules
//!
//! - [`download`] - Task lifecycle, transfer engine, progress registry and broadcaster
//! - [`storage`] - Storage directory, collision-free naming and listing
//! - [`media`] - Media type and file extension mapping
//! - [`server`] - HTTP server
//! - [`config`] - Configuration file and defaults
//! - [`errors`] - HTTP error responses

pub mod config;
pub mod download;
pub mod errors;
pub mod locks;
pub mod logging;
pub mod media;
pub mod server;
pub mod storage;
pub mod utils;

pub use config::Config;
pub use download::{
    DownloadManager, DownloadSource, DownloadStatus, ProgressBroadcaster, ProgressRecord, ProgressStore, TaskId,
};
pub use errors::{ApiError, ApiResult};
pub use server::{build_router, AppState, Server};
pub use storage::{FileInfo, Storage};
