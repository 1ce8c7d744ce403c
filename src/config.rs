// Copyright (c) 2024-2025 Jesse Morgan / Morgan Forge
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Configuration file handling.
//!
//! The file is JSON, read from `~/.bucketd/config.json` unless a path is given. Every
//! field is optional. Command-line flags are applied on top by the binary.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};

use crate::download::transfer::DEFAULT_USER_AGENT;
use crate::download::{RetentionPolicy, TransferSettings};

const CONFIG_DIR: &str = ".bucketd";
const CONFIG_FILE: &str = "config.json";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub port: u16,
    pub bind_address: String,
    /// Where artifacts are stored. Created on start if missing.
    pub storage_dir: PathBuf,
    /// CORS origins allowed to call the API.
    pub allowed_origins: Vec<String>,
    /// Seconds between progress stream snapshots.
    pub progress_interval_secs: u64,
    pub user_agent: String,
    /// Honour proxy environment variables for outbound fetches.
    pub use_system_proxy: bool,
    pub max_name_attempts: usize,
    /// Largest accepted request body. Inline payloads travel in the body.
    pub max_body_bytes: usize,
    pub retention: RetentionConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            port: 8000,
            bind_address: "127.0.0.1".to_string(),
            storage_dir: PathBuf::from("./bucket"),
            allowed_origins: vec![
                "http://localhost:3000".to_string(),
                "http://127.0.0.1:3000".to_string(),
            ],
            progress_interval_secs: 3,
            user_agent: DEFAULT_USER_AGENT.to_string(),
            use_system_proxy: true,
            max_name_attempts: 32,
            max_body_bytes: 32 * 1024 * 1024,
            retention: RetentionConfig::default(),
        }
    }
}

/// How finished task records are aged out. `null` disables a limit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetentionConfig {
    pub terminal_ttl_secs: Option<u64>,
    pub max_terminal_records: Option<usize>,
    pub sweep_interval_secs: u64,
}

impl Default for RetentionConfig {
    fn default() -> Self {
        Self {
            terminal_ttl_secs: Some(3600),
            max_terminal_records: Some(1000),
            sweep_interval_secs: 60,
        }
    }
}

/// `~/.bucketd/config.json`
pub fn default_config_path() -> Result<PathBuf> {
    let home = dirs::home_dir().context("Could not find home directory")?;
    Ok(home.join(CONFIG_DIR).join(CONFIG_FILE))
}

impl Config {
    /// Load from `path`, or from the default location when `None`.
    ///
    /// A missing default file yields the defaults; a missing explicit file is an error.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let (config_path, explicit) = match path {
            Some(p) => (p.to_path_buf(), true),
            None => (default_config_path()?, false),
        };

        if !config_path.exists() {
            if explicit {
                bail!("Config file not found: {}", config_path.display());
            }
            tracing::debug!(path = %config_path.display(), "No config file, using defaults");
            return Ok(Self::default());
        }

        let content = fs::read_to_string(&config_path)
            .with_context(|| format!("Failed to read {}", config_path.display()))?;
        let config: Config = serde_json::from_str(&content)
            .with_context(|| format!("Invalid config file {}", config_path.display()))?;
        tracing::debug!(path = %config_path.display(), "Loaded config");
        Ok(config)
    }

    /// Reject settings the server cannot run with.
    pub fn validate(&self) -> Result<()> {
        if self.progress_interval_secs == 0 {
            bail!("progress_interval_secs must be at least 1");
        }
        if self.max_name_attempts == 0 {
            bail!("max_name_attempts must be at least 1");
        }
        if self.max_body_bytes == 0 {
            bail!("max_body_bytes must be greater than 0");
        }
        if self.retention.sweep_interval_secs == 0 {
            bail!("retention.sweep_interval_secs must be at least 1");
        }
        if self.retention.terminal_ttl_secs == Some(0) {
            bail!("retention.terminal_ttl_secs must be at least 1 (use null to disable)");
        }
        if self.bind_address.trim().is_empty() {
            bail!("bind_address must not be empty");
        }
        if self.user_agent.trim().is_empty() {
            bail!("user_agent must not be empty");
        }
        Ok(())
    }

    pub fn progress_interval(&self) -> Duration {
        Duration::from_secs(self.progress_interval_secs)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.retention.sweep_interval_secs)
    }

    pub fn retention_policy(&self) -> RetentionPolicy {
        RetentionPolicy {
            terminal_ttl: self.retention.terminal_ttl_secs.map(Duration::from_secs),
            max_terminal: self.retention.max_terminal_records,
        }
    }

    pub fn transfer_settings(&self) -> TransferSettings {
        TransferSettings {
            user_agent: self.user_agent.clone(),
            use_system_proxy: self.use_system_proxy,
            max_name_attempts: self.max_name_attempts,
        }
    }
}
