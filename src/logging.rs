use crate::models::LoggingConfig;
use anyhow::{Context, Result};
use camino::Utf8PathBuf;
use std::fs;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling;
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

/// Install the global tracing subscriber.
///
/// Logs go to a daily-rotated file under `config.dir` (plain text or JSON),
/// and optionally to the console. `RUST_LOG` takes precedence over
/// `config.debug`.
///
/// The returned guard flushes the file writer on drop; hold it for the
/// lifetime of the application.
pub fn setup_logging(config: &LoggingConfig) -> Result<WorkerGuard> {
    let log_path = Utf8PathBuf::from(&config.dir);
    if !log_path.exists() {
        fs::create_dir_all(&log_path)
            .with_context(|| format!("Failed to create log directory: {}", log_path))?;
    }

    let file_appender = rolling::daily(&log_path, &config.prefix);
    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

    let text_layer = (!config.json).then(|| {
        tracing_subscriber::fmt::layer()
            .with_writer(non_blocking.clone())
            .with_ansi(false)
            .with_target(true)
            .with_thread_ids(true)
            .with_file(true)
            .with_line_number(true)
    });
    let json_layer = config.json.then(|| {
        tracing_subscriber::fmt::layer()
            .json()
            .with_writer(non_blocking.clone())
            .with_current_span(true)
            .with_span_list(false)
    });
    let console_layer = config.console.then(|| {
        tracing_subscriber::fmt::layer()
            .with_ansi(true)
            .with_target(false)
    });

    tracing_subscriber::registry()
        .with(env_filter(config.debug))
        .with(text_layer)
        .with(json_layer)
        .with(console_layer)
        .try_init()
        .context("Failed to install tracing subscriber")?;

    tracing::info!(
        dir = %config.dir,
        prefix = %config.prefix,
        debug = config.debug,
        json = config.json,
        console = config.console,
        "Logging initialized"
    );

    Ok(guard)
}

fn env_filter(debug: bool) -> EnvFilter {
    EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(if debug { "debug" } else { "info" }))
}
