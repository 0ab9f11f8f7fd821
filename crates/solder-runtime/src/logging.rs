//! Logging setup on tracing-subscriber.

use std::path::Path;

use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::EnvFilter;

use crate::config::LoggingConfig;

/// Initializes the global subscriber from a logging config.
///
/// Returns the appender guard when logging to a file; dropping it flushes
/// and stops the writer, so hold it for the process lifetime.
///
/// # Panics
///
/// Panics when a global subscriber is already set.
pub fn init(config: &LoggingConfig) -> Option<WorkerGuard> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.level))
        .unwrap_or_else(|_| EnvFilter::new("info"));

    match &config.file {
        Some(path) => {
            let (dir, file) = split_log_path(path);
            let appender = tracing_appender::rolling::never(dir, file);
            let (writer, guard) = tracing_appender::non_blocking(appender);
            tracing_subscriber::fmt()
                .with_env_filter(filter)
                .with_writer(writer)
                .with_ansi(false)
                .init();
            Some(guard)
        }
        None => {
            tracing_subscriber::fmt()
                .with_env_filter(filter)
                .with_writer(std::io::stderr)
                .init();
            None
        }
    }
}

fn split_log_path(path: &Path) -> (&Path, &str) {
    let dir = path.parent().filter(|p| !p.as_os_str().is_empty());
    let file = path
        .file_name()
        .and_then(|name| name.to_str())
        .unwrap_or("solder.log");
    (dir.unwrap_or_else(|| Path::new(".")), file)
}
