// src/observability/mod.rs
//! Tracing and logging setup
//!
//! One-shot initialization of the `tracing` subscriber: a formatted
//! stdout layer filtered by `RUST_LOG` (default `info`), plus an optional
//! plain-text file layer when the optimization config names a log file.

use crate::utils::errors::{EngineError, Result};
use std::fs::{self, File};
use std::path::Path;
use std::sync::Arc;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter};

/// Initialize the global tracing subscriber.
///
/// Safe to call once per process; a second call reports a configuration
/// error instead of panicking so tests can ignore it.
pub fn init_tracing(log_filename: Option<&Path>) -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    let registry = tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_target(false));

    let init_result = match log_filename {
        Some(path) => {
            if let Some(parent) = path.parent() {
                if !parent.as_os_str().is_empty() {
                    fs::create_dir_all(parent)?;
                }
            }
            let file = File::options().create(true).append(true).open(path)?;
            registry
                .with(fmt::layer().with_ansi(false).with_writer(Arc::new(file)))
                .try_init()
        }
        None => registry.try_init(),
    };

    init_result
        .map_err(|e| EngineError::Configuration(format!("failed to initialize tracing: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_init_with_file() {
        let dir = tempfile::tempdir().unwrap();
        let log_path = dir.path().join("pool.log");
        // The global subscriber may already be set by another test; the
        // log file is opened either way.
        let _ = init_tracing(Some(&log_path));
        assert!(log_path.exists());
    }
}
