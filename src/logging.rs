//! Logging setup.
//!
//! Log level is read from the `FACEGROUP_LOG` environment variable using
//! `tracing_subscriber::EnvFilter` syntax (for example `FACEGROUP_LOG=debug`
//! or `FACEGROUP_LOG=facegroup::scanner=trace`). Defaults to `info`.
//!
//! Backends:
//! - `stderr`: human-readable output on standard error
//! - `file`: daily rolling file in the configured log directory
//! - `journald`: systemd journal on Linux, stderr elsewhere

use anyhow::Result;
use std::sync::OnceLock;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::config::{LogBackend, LoggingConfig};

static FILE_GUARD: OnceLock<tracing_appender::non_blocking::WorkerGuard> = OnceLock::new();

fn env_filter() -> EnvFilter {
    EnvFilter::try_from_env("FACEGROUP_LOG").unwrap_or_else(|_| EnvFilter::new("info"))
}

/// Initialize the global subscriber. Call once at startup.
pub fn init(config: &LoggingConfig) -> Result<()> {
    match config.backend {
        LogBackend::Journald => {
            #[cfg(target_os = "linux")]
            {
                if let Ok(journald_layer) = tracing_journald::layer() {
                    tracing_subscriber::registry()
                        .with(env_filter())
                        .with(journald_layer)
                        .try_init()?;
                    return Ok(());
                }
            }
            init_stderr()?;
            tracing::warn!("journald unavailable, logging to stderr");
        }
        LogBackend::File => {
            std::fs::create_dir_all(&config.dir)?;

            let file_appender = tracing_appender::rolling::daily(&config.dir, "facegroup.log");
            let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);
            // The guard flushes buffered lines on drop; keep it for the process lifetime
            let _ = FILE_GUARD.set(guard);

            tracing_subscriber::registry()
                .with(env_filter())
                .with(fmt::layer().with_writer(non_blocking).with_ansi(false))
                .try_init()?;
        }
        LogBackend::Stderr => init_stderr()?,
    }
    Ok(())
}

fn init_stderr() -> Result<()> {
    tracing_subscriber::registry()
        .with(env_filter())
        .with(fmt::layer().with_writer(std::io::stderr).with_target(false))
        .try_init()?;
    Ok(())
}
