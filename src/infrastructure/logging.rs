//! Logging setup
//!
//! Console output always; a plain-text run log per process when an output
//! folder is configured.

use std::fs::{self, File};
use std::path::PathBuf;
use std::sync::Mutex;

use tracing::level_filters::LevelFilter;
use tracing_subscriber::prelude::*;
use tracing_subscriber::{fmt, EnvFilter};

use crate::application::errors::BotError;
use crate::infrastructure::config::LoggingConfig;

/// Parse a configured level name; `critical` and `warning` are accepted aliases
pub fn parse_level(name: &str) -> Option<LevelFilter> {
    match name.trim().to_ascii_lowercase().as_str() {
        "critical" | "error" => Some(LevelFilter::ERROR),
        "warning" | "warn" => Some(LevelFilter::WARN),
        "info" => Some(LevelFilter::INFO),
        "debug" => Some(LevelFilter::DEBUG),
        "trace" => Some(LevelFilter::TRACE),
        _ => None,
    }
}

/// Console and file levels; an invalid level borrows the other one, else info
pub fn resolve_levels(config: &LoggingConfig) -> (LevelFilter, LevelFilter) {
    let console = parse_level(&config.console_level);
    let output = parse_level(&config.output_level);
    (
        console.or(output).unwrap_or(LevelFilter::INFO),
        output.or(console).unwrap_or(LevelFilter::INFO),
    )
}

/// Install the global subscriber; returns the run log path if one was opened
pub fn init(config: &LoggingConfig) -> Result<Option<PathBuf>, BotError> {
    let (console_level, output_level) = resolve_levels(config);

    let console = fmt::layer()
        .with_target(false)
        .with_filter(EnvFilter::from_default_env().add_directive(console_level.into()));

    let (file_layer, path) = match &config.output_folder {
        Some(folder) => {
            fs::create_dir_all(folder).map_err(|e| {
                BotError::Internal(format!("cannot create log folder {}: {}", folder.display(), e))
            })?;
            let path = folder.join(format!("run_{}.log", chrono::Local::now().format("%Y-%m-%d_%H-%M-%S")));
            let file = File::create(&path)
                .map_err(|e| BotError::Internal(format!("cannot open {}: {}", path.display(), e)))?;
            let layer = fmt::layer()
                .with_ansi(false)
                .with_writer(Mutex::new(file))
                .with_filter(output_level);
            (Some(layer), Some(path))
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(console)
        .with(file_layer)
        .try_init()
        .map_err(|e| BotError::Internal(format!("logging already initialised: {}", e)))?;

    if parse_level(&config.console_level).is_none() {
        tracing::warn!(level = %config.console_level, "Invalid console_level, using {}", console_level);
    }
    if parse_level(&config.output_level).is_none() {
        tracing::warn!(level = %config.output_level, "Invalid output_level, using {}", output_level);
    }
    Ok(path)
}
