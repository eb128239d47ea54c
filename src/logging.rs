//! Logging configuration with journald support on Linux.
//!
//! The daemon logs to systemd's journal when it is reachable and otherwise to
//! a daily rolling file. Interactive commands log to stderr so output stays
//! readable in a terminal.

use anyhow::Result;
use std::path::PathBuf;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Where log records should go.
#[derive(Debug, Clone)]
pub enum LogTarget {
    /// Compact stderr output for the CLI.
    Stderr,
    /// Journald if available, else daily files in the given directory.
    Service(PathBuf),
}

/// Initialize the logging system.
///
/// Log level can be controlled via the `FACEFOLD_LOG` environment variable,
/// e.g. `FACEFOLD_LOG=debug` or `FACEFOLD_LOG=facefold::pipeline=trace`.
pub fn init(target: LogTarget) -> Result<()> {
    let env_filter = EnvFilter::try_from_env("FACEFOLD_LOG")
        .unwrap_or_else(|_| EnvFilter::new("info"));

    let log_dir = match target {
        LogTarget::Stderr => {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(fmt::layer().compact().with_writer(std::io::stderr))
                .try_init()?;
            return Ok(());
        }
        LogTarget::Service(dir) => dir,
    };

    #[cfg(target_os = "linux")]
    {
        if let Ok(journald_layer) = tracing_journald::layer() {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(journald_layer)
                .try_init()?;

            tracing::info!("Logging initialized with journald backend");
            return Ok(());
        }
    }

    std::fs::create_dir_all(&log_dir)?;

    let file_appender = tracing_appender::rolling::daily(&log_dir, "facefold.log");
    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

    // Dropping the guard stops the background writer
    static GUARD: std::sync::OnceLock<tracing_appender::non_blocking::WorkerGuard> =
        std::sync::OnceLock::new();
    let _ = GUARD.set(guard);

    tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt::layer().with_writer(non_blocking).with_ansi(false))
        .try_init()?;

    tracing::info!(dir = ?log_dir, "Logging initialized with file backend");
    Ok(())
}
