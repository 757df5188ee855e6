/*!
 * Logging and tracing initialization.
 */

use std::fs::File;
use std::path::{Path, PathBuf};
use serde::{Deserialize, Serialize};
use tracing::Level;
use tracing_subscriber::{
    fmt::{self, format::FmtSpan},
    layer::SubscriberExt,
    util::SubscriberInitExt,
    EnvFilter,
};

use crate::error::{Result, TransferError};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

impl Default for LogLevel {
    fn default() -> Self {
        Self::Info
    }
}

impl LogLevel {
    pub fn to_tracing_level(self) -> Level {
        match self {
            LogLevel::Error => Level::ERROR,
            LogLevel::Warn => Level::WARN,
            LogLevel::Info => Level::INFO,
            LogLevel::Debug => Level::DEBUG,
            LogLevel::Trace => Level::TRACE,
        }
    }
}

/// Logging is a process-wide concern, kept separate from `TransferConfig`
/// since it has no bearing on transfer-protocol behavior.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LoggingOptions {
    pub log_level: LogLevel,
    pub log_file: Option<PathBuf>,
    pub verbose: bool,
}

pub fn init_logging(options: &LoggingOptions) -> Result<()> {
    let log_level = if options.verbose {
        Level::DEBUG
    } else {
        options.log_level.to_tracing_level()
    };

    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(format!("transfer_accelerator={}", log_level)))
        .map_err(|e| TransferError::Config(format!("failed to create log filter: {}", e)))?;

    if let Some(ref log_path) = options.log_file {
        init_file_logging(log_path, env_filter)
    } else {
        init_stdout_logging(env_filter);
        Ok(())
    }
}

fn init_stdout_logging(env_filter: EnvFilter) {
    let fmt_layer = fmt::layer()
        .with_target(true)
        .with_thread_ids(false)
        .with_thread_names(false)
        .with_file(false)
        .with_line_number(false)
        .with_span_events(FmtSpan::NONE)
        .compact();

    tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt_layer)
        .init();
}

fn init_file_logging(log_path: &Path, env_filter: EnvFilter) -> Result<()> {
    let file = File::create(log_path)
        .map_err(|e| TransferError::Config(format!("failed to create log file: {}", e)))?;

    let fmt_layer = fmt::layer()
        .with_writer(file)
        .with_target(true)
        .with_thread_ids(true)
        .with_thread_names(true)
        .with_file(true)
        .with_line_number(true)
        .with_span_events(FmtSpan::CLOSE)
        .with_ansi(false)
        .json();

    tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt_layer)
        .init();

    Ok(())
}

#[cfg(test)]
pub fn init_test_logging() {
    use std::sync::Once;
    static INIT: Once = Once::new();

    INIT.call_once(|| {
        let env_filter = EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new("transfer_accelerator=debug"));

        let fmt_layer = fmt::layer().with_test_writer().with_target(false).compact();

        tracing_subscriber::registry()
            .with(env_filter)
            .with(fmt_layer)
            .try_init()
            .ok();
    });
}
