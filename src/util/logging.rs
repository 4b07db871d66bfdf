//! Logging initialization
//!
//! Sets up the global `tracing` subscriber:
//! - Console output (human-readable, to stderr so result tables stay clean)
//! - Optional file output with daily rotation via `tracing-appender`
//! - Level from `RUST_LOG` when set, otherwise the configured level

use std::path::Path;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Log file prefix under `log_dir`
const LOG_FILE_PREFIX: &str = "kvpulse";

/// Initialize the global tracing subscriber
///
/// Call once at program start. A second call is a no-op (the subscriber is
/// already installed), which keeps tests that share a process harmless.
///
/// # Arguments
///
/// * `log_level` - Default filter when `RUST_LOG` is not set (e.g. `"info"`)
/// * `log_dir` - Optional directory for daily-rotating log files
pub fn init_logging(log_level: &str, log_dir: Option<&Path>) {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(log_level));

    let console_layer = fmt::layer()
        .with_writer(std::io::stderr)
        .with_target(true)
        .with_thread_ids(true);

    let result = if let Some(dir) = log_dir {
        let file_appender = tracing_appender::rolling::daily(dir, LOG_FILE_PREFIX);
        let file_layer = fmt::layer()
            .with_writer(file_appender)
            .with_ansi(false)
            .with_target(true)
            .with_thread_ids(true);

        tracing_subscriber::registry()
            .with(env_filter)
            .with(console_layer)
            .with(file_layer)
            .try_init()
    } else {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(console_layer)
            .try_init()
    };

    if result.is_err() {
        tracing::debug!("Tracing subscriber already installed");
    }
}
