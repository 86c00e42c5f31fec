//! Logging and tracing configuration
//!
//! stdout belongs to the interactive console, so logs go to a file under
//! the platform data directory. Log level is controlled by `RUST_LOG`.

use std::path::PathBuf;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use super::paths;

const LOG_FILE: &str = "dapshell.log";

/// Initialize tracing for an interactive session
///
/// Returns the log file path (if file logging could be set up) and the
/// appender guard, which must be held until the process exits so buffered
/// lines are flushed.
pub fn init() -> (Option<PathBuf>, Option<WorkerGuard>) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("dapshell=debug,warn"));

    if let Some(log_dir) = paths::log_dir() {
        if std::fs::create_dir_all(&log_dir).is_ok() {
            let appender = tracing_appender::rolling::never(&log_dir, LOG_FILE);
            let (writer, guard) = tracing_appender::non_blocking(appender);

            let file_layer = fmt::layer()
                .with_writer(writer)
                .with_ansi(false)
                .with_target(true)
                .with_thread_ids(true)
                .with_file(true)
                .with_line_number(true);

            tracing_subscriber::registry()
                .with(filter)
                .with(file_layer)
                .init();

            return (Some(log_dir.join(LOG_FILE)), Some(guard));
        }
    }

    // Fallback: warnings only, so the console stays readable
    tracing_subscriber::registry()
        .with(EnvFilter::new("warn"))
        .with(
            fmt::layer()
                .with_writer(std::io::stderr)
                .with_target(true)
                .compact(),
        )
        .init();

    (None, None)
}
