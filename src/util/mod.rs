//! Utility module
//!
//! This module provides common utilities and helper functions used
//! throughout the library.

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::core::{Error, Result};

/// Formats bytes as space-separated upper-case hex pairs for frame logging
pub fn format_hex(bytes: &[u8]) -> String {
    bytes
        .iter()
        .map(|b| format!("{:02X}", b))
        .collect::<Vec<_>>()
        .join(" ")
}

/// Installs a formatting subscriber filtered by `RUST_LOG`, falling back to `level`
pub fn init_tracing(level: &str) -> Result<()> {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer())
        .try_init()
        .map_err(|e| Error::config(format!("Failed to install tracing subscriber: {}", e)))
}
