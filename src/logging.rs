//! Tracing subscriber setup.
//!
//! Console output always goes through a `fmt` layer. When
//! `LoggingConfig::file_dir` is set, a second layer writes to a daily-rolling
//! file through a non-blocking appender; the returned `WorkerGuard` must be
//! kept alive for buffered lines to be flushed.

use crate::config::LoggingConfig;
use crate::error::{CvInferError, Result};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer};

/// Build the filter: `RUST_LOG` wins over the configured directive.
pub fn env_filter(config: &LoggingConfig) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::try_new(&config.filter).unwrap_or_else(|e| {
            eprintln!(
                "Invalid log filter '{}' ({}), falling back to 'info'",
                config.filter, e
            );
            EnvFilter::new("info")
        })
    })
}

/// Install the global subscriber. Fails if one is already installed.
pub fn init(config: &LoggingConfig) -> Result<Option<WorkerGuard>> {
    let console = tracing_subscriber::fmt::layer()
        .with_target(false)
        .with_thread_names(true);

    let (file_layer, guard) = match &config.file_dir {
        Some(dir) => {
            std::fs::create_dir_all(dir)?;
            let appender = tracing_appender::rolling::daily(dir, format!("{}.log", config.file_prefix));
            let (writer, guard) = tracing_appender::non_blocking(appender);
            let layer = tracing_subscriber::fmt::layer()
                .with_writer(writer)
                .with_ansi(false)
                .with_thread_names(true)
                .with_line_number(true)
                .boxed();
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(env_filter(config))
        .with(console)
        .with(file_layer)
        .try_init()
        .map_err(|e| CvInferError::Logging(e.to_string()))?;

    Ok(guard)
}
