//! Logging and tracing configuration
//!
//! Diagnostics (construction errors, per-server query errors, mismatches)
//! are emitted as tracing events, so they go wherever the subscriber sends
//! them: stderr always, plus an optional log file.

use std::path::Path;
use tracing_appender::non_blocking::{NonBlocking, WorkerGuard};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Initialize tracing for the test runner
///
/// Logs are controlled by the `RUST_LOG` environment variable.
/// Default level is INFO for this crate (DEBUG when `verbose`), WARN for
/// dependencies. When `log_file` is set, events are also appended there;
/// the returned guard must be held until exit to flush it.
pub fn init(verbose: bool, log_file: Option<&Path>) -> Option<WorkerGuard> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        if verbose {
            EnvFilter::new("difftest=debug,warn")
        } else {
            EnvFilter::new("difftest=info,warn")
        }
    });

    let stderr_layer = fmt::layer()
        .with_writer(std::io::stderr)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .compact();

    let (writer, guard) = match log_file.map(open_log_file) {
        Some(Some((writer, guard))) => (Some(writer), Some(guard)),
        Some(None) => {
            if let Some(path) = log_file {
                eprintln!("Warning: Could not open log file: {}", path.display());
            }
            (None, None)
        }
        None => (None, None),
    };

    let file_layer = writer.map(|writer| {
        fmt::layer()
            .with_writer(writer)
            .with_ansi(false)
            .with_target(true)
            .with_file(true)
            .with_line_number(true)
    });

    tracing_subscriber::registry()
        .with(filter)
        .with(stderr_layer)
        .with(file_layer)
        .init();

    guard
}

/// Open `path` for appending through a non-blocking writer
fn open_log_file(path: &Path) -> Option<(NonBlocking, WorkerGuard)> {
    let dir = path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or(Path::new("."));
    let name = path.file_name()?;
    std::fs::create_dir_all(dir).ok()?;
    let appender = tracing_appender::rolling::never(dir, name);
    Some(tracing_appender::non_blocking(appender))
}

/// Initialize tracing for the mock server (stderr only)
pub fn init_server() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("difftest=info,warn"));

    tracing_subscriber::registry()
        .with(filter)
        .with(
            fmt::layer()
                .with_writer(std::io::stderr)
                .with_target(true)
                .compact(),
        )
        .init();
}
