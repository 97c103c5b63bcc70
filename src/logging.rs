//! Structured logging setup.
//!
//! stdout carries IPC events, so human-readable output goes to stderr and a
//! daily rolling file under `{data_dir}/logs`.

use std::fs;
use std::path::Path;

use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Install the global subscriber. Falls back to stderr-only output if the
/// log directory cannot be used.
pub fn init(log_dir: &Path) -> anyhow::Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,reqwest=warn,hyper=warn,rodio=warn"));

    let console_layer = fmt::layer()
        .with_writer(std::io::stderr)
        .with_target(true)
        .compact();

    let file_appender = fs::create_dir_all(log_dir)
        .map_err(anyhow::Error::from)
        .and_then(|_| {
            RollingFileAppender::builder()
                .rotation(Rotation::DAILY)
                .filename_prefix("hq-console")
                .filename_suffix("log")
                .max_log_files(5)
                .build(log_dir)
                .map_err(anyhow::Error::from)
        });

    // `None` layers are no-ops.
    let (file_layer, file_error) = match file_appender {
        Ok(appender) => {
            let layer = fmt::layer()
                .with_writer(appender)
                .with_ansi(false)
                .with_target(true)
                .with_line_number(true);
            (Some(layer), None)
        }
        Err(e) => (None, Some(e)),
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(file_layer)
        .with(console_layer)
        .try_init()?;

    match file_error {
        None => tracing::info!(log_dir = %log_dir.display(), "Logger initialized"),
        Some(e) => tracing::warn!(log_dir = %log_dir.display(), "File logging disabled: {}", e),
    }

    Ok(())
}
