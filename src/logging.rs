//! # Logging Setup
//!
//! Installs a `tracing-subscriber` registry with an optional file layer and an
//! optional console layer. The filter comes from `RUST_LOG` and falls back to
//! `info`.
//!
//! Library code only emits `tracing` events; nothing here is required for the
//! monitor to run, and tests simply skip it.

use std::{fs::File, path::Path, sync::Arc};

use tracing_subscriber::{EnvFilter, Layer, fmt, layer::SubscriberExt, util::SubscriberInitExt};

use crate::error::{MonitorError, MonitorResult};

/// Install the global subscriber.
///
/// Returns an error if the log file cannot be created or a global subscriber
/// was already installed.
pub fn init_logging(path: Option<&Path>, disable_console: bool) -> MonitorResult<()> {
    let file_layer = match path {
        Some(path) => {
            let file = File::create(path)
                .map_err(|e| MonitorError::io(format!("create log file {}", path.display()), e))?;
            Some(
                fmt::layer()
                    .with_writer(Arc::new(file))
                    .with_ansi(false)
                    .with_file(true)
                    .with_line_number(true)
                    .boxed(),
            )
        }
        None => None,
    };

    let console_layer = if disable_console {
        None
    } else {
        Some(fmt::layer().with_target(true).boxed())
    };

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::registry()
        .with(filter)
        .with(file_layer)
        .with(console_layer)
        .try_init()
        .map_err(|e| MonitorError::state("logging initialized", format!("install subscriber: {e}")))
}
