//!
//! src/logging.rs  Track Rater Authors  Oct 18th, 2026
//!
//! Initializes the tracing subscriber so every resolution and rating
//! write leaves a structured trail on stderr, stdout carries command output
//!
//!

use tracing_subscriber::{EnvFilter, fmt, prelude::*};
use tracing_error::ErrorLayer;
use tracing_appender::non_blocking;

use crate::config::{LogFormat, LoggingConfig};
use crate::errors::RaterError;

/// Keeps the non-blocking writer flushing until dropped at exit
pub struct LoggingGuard(#[allow(dead_code)] tracing_appender::non_blocking::WorkerGuard);

pub fn init_logging(cfg: &LoggingConfig) -> Result<LoggingGuard, RaterError> {
    let (writer, guard) = non_blocking(std::io::stderr());
    let filter = std::env::var("RUST_LOG")
        .ok()
        .map(EnvFilter::new)
        .unwrap_or_else(|| EnvFilter::new(cfg.filter_directives.clone()));

    let time = fmt::time::UtcTime::rfc_3339();
    let base = fmt::layer()
        .with_writer(writer)
        .with_timer(time)
        .with_ansi(cfg.with_ansi)
        .with_target(cfg.include_target)
        .with_file(cfg.include_file_line)
        .with_line_number(cfg.include_file_line);

    let registry = tracing_subscriber::registry()
        .with(filter)
        .with(ErrorLayer::default());

    let installed = match cfg.format {
        LogFormat::Json => registry
            .with(base.json().flatten_event(true).with_current_span(true).with_span_list(true))
            .try_init(),
        LogFormat::Pretty => registry.with(base.pretty()).try_init()
    };
    installed.map_err(|e| RaterError::Config(format!("logging already initialized: {e}")))?;

    Ok( LoggingGuard(guard) )
}
