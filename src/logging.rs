// Copyright (c) 2024-2025 Jesse Morgan / Morgan Forge
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Tracing subscriber setup for the binary.

use anyhow::{anyhow, Result};
use tracing::Subscriber;
use tracing_subscriber::{fmt, fmt::MakeWriter, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Level name for the command-line flags: `-q` wins, then each `-v` steps up from info.
pub fn level_for(verbose: u8, quiet: bool) -> &'static str {
    if quiet {
        return "error";
    }
    match verbose {
        0 => "info",
        1 => "debug",
        _ => "trace",
    }
}

fn build_subscriber<W>(verbose: u8, quiet: bool, writer: W) -> impl Subscriber + Send + Sync + 'static
where
    W: for<'a> MakeWriter<'a> + Send + Sync + 'static,
{
    let level = level_for(verbose, quiet);

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new(format!("bucketd={},tower_http={}", level, level))
    });

    tracing_subscriber::registry().with(filter).with(
        fmt::layer()
            .with_writer(writer)
            .with_target(true)
            .with_file(verbose >= 2)
            .with_line_number(verbose >= 2),
    )
}

/// Install the global subscriber, writing to stderr. `RUST_LOG` overrides the flags.
pub fn init_logging(verbose: u8, quiet: bool) -> Result<()> {
    build_subscriber(verbose, quiet, std::io::stderr)
        .try_init()
        .map_err(|e| anyhow!("Failed to initialise logging: {}", e))
}
