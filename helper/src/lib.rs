use std::io::IsTerminal;

use anyhow::Result;
use tracing::metadata::LevelFilter;
use tracing_subscriber::{prelude::*, EnvFilter};

pub mod cli;
pub mod commands;
mod creds;
mod gitdb;
pub mod helper;
mod progress;
mod secret;

/// Initializes tracing on stderr; stdout belongs to the helper protocol.
/// `XCRYPT_TRACE=1` raises the default level to debug, `RUST_LOG` overrides
/// everything as usual.
pub fn setup_logger() -> Result<()> {
    let default_level = if trace_enabled() {
        LevelFilter::DEBUG
    } else {
        LevelFilter::INFO
    };
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(std::io::stderr)
                .with_ansi(std::io::stderr().is_terminal()),
        )
        .with(
            EnvFilter::builder()
                .with_default_directive(default_level.into())
                .from_env()?,
        )
        .init();
    Ok(())
}

fn trace_enabled() -> bool {
    std::env::var("XCRYPT_TRACE")
        .ok()
        .and_then(|value| value.trim().parse::<i64>().ok())
        .is_some_and(|value| value != 0)
}
