// Copyright (c) 2024-2025 Jesse Morgan / Morgan Forge
// SPDX-License-Identifier: AGPL-3.0-or-later

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;

use bucketd::config::Config;
use bucketd::logging::init_logging;
use bucketd::server::Server;

const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Exit codes following sysexits.h conventions
mod exit_codes {
    /// General error - unspecified error
    pub const ERROR: i32 = 1;
    /// Configuration error - invalid or missing config
    pub const CONFIG: i32 = 78;
}

use exit_codes::*;

/// bucketd - background download service.
#[derive(Parser, Debug)]
#[command(name = "bucketd")]
#[command(version = VERSION)]
#[command(about = "Fetch URLs and data URIs into a local bucket in the background.")]
#[command(long_about = "bucketd - background download service\n\n\
    Start the server:    bucketd\n\
    Custom port:         bucketd --port 9000\n\
    Custom storage:      bucketd --storage-dir /srv/bucket\n\
    Debug logging:       bucketd -v (or -vv for trace)\n\n\
    Settings are read from ~/.bucketd/config.json unless --config is given.")]
struct Cli {
    /// Path to a JSON config file
    #[arg(long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Port to listen on
    #[arg(short, long)]
    port: Option<u16>,

    /// Address to bind to (0.0.0.0 exposes the API to the network)
    #[arg(long, value_name = "ADDR")]
    bind: Option<String>,

    /// Directory artifacts are stored in
    #[arg(long, value_name = "DIR")]
    storage_dir: Option<PathBuf>,

    /// Verbose logging (-v debug, -vv trace)
    #[arg(short = 'v', long, action = clap::ArgAction::Count, conflicts_with = "quiet")]
    verbose: u8,

    /// Quiet mode: errors only
    #[arg(short = 'q', long)]
    quiet: bool,
}

impl Cli {
    /// Command-line flags win over the file.
    fn apply(&self, config: &mut Config) {
        if let Some(port) = self.port {
            config.port = port;
        }
        if let Some(bind) = &self.bind {
            config.bind_address = bind.clone();
        }
        if let Some(dir) = &self.storage_dir {
            config.storage_dir = dir.clone();
        }
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    if let Err(e) = init_logging(cli.verbose, cli.quiet) {
        eprintln!("[!] {}", e);
    }

    let mut config = match Config::load(cli.config.as_deref()) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("[!] Failed to load config: {:#}", e);
            std::process::exit(CONFIG);
        }
    };
    cli.apply(&mut config);
    if let Err(e) = config.validate() {
        eprintln!("[!] Invalid configuration: {:#}", e);
        std::process::exit(CONFIG);
    }

    let runtime = tokio::runtime::Runtime::new().context("Failed to create async runtime")?;
    if let Err(e) = runtime.block_on(Server::new(config).start()) {
        tracing::error!("Server error: {:#}", e);
        eprintln!("[!] {:#}", e);
        std::process::exit(ERROR);
    }
    Ok(())
}
