//! Logging setup.
//!
//! One entry point, two modes: the long-lived `bantz start` process gets a
//! daily-rotated JSON-lines file plus a human-readable stderr stream; the
//! one-shot ops subcommands get stderr only. The default filter keeps bantz
//! at `info` but quiets the sqlite stores, whose statement logs would drown
//! the turn lifecycle lines.

use std::path::PathBuf;

use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

/// Filter applied when `RUST_LOG` is unset.
const DEFAULT_FILTER: &str = "info,sqlx=warn";

/// How the process wants its logs.
pub enum LogMode {
    /// Long-lived runtime: rotated JSON-lines file + stderr.
    Runtime {
        /// Directory for `bantz.jsonl.YYYY-MM-DD` files.
        logs_dir: PathBuf,
    },
    /// One-shot subcommand: stderr only.
    Cli,
}

/// Keeps the non-blocking file writer alive; dropping it flushes pending
/// entries. Empty in [`LogMode::Cli`].
pub struct LoggingGuard(Option<WorkerGuard>);

/// Install the global subscriber for the given mode.
///
/// # Errors
///
/// Returns an error if the logs directory cannot be created in
/// [`LogMode::Runtime`].
pub fn init(mode: LogMode) -> anyhow::Result<LoggingGuard> {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER));

    match mode {
        LogMode::Cli => {
            let stderr_layer = tracing_subscriber::fmt::layer().with_writer(std::io::stderr);
            tracing_subscriber::registry()
                .with(filter)
                .with(stderr_layer)
                .init();
            Ok(LoggingGuard(None))
        }
        LogMode::Runtime { logs_dir } => {
            std::fs::create_dir_all(&logs_dir).map_err(|e| {
                anyhow::anyhow!("failed to create logs directory {}: {e}", logs_dir.display())
            })?;
            let (file_writer, guard) =
                tracing_appender::non_blocking(tracing_appender::rolling::daily(
                    &logs_dir,
                    "bantz.jsonl",
                ));
            let stderr_layer = tracing_subscriber::fmt::layer().with_writer(std::io::stderr);
            tracing_subscriber::registry()
                .with(filter)
                .with(tracing_subscriber::fmt::layer().json().with_writer(file_writer))
                .with(stderr_layer)
                .init();
            Ok(LoggingGuard(Some(guard)))
        }
    }
}
