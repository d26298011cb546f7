//! Tracing subscriber setup
//!
//! `RUST_LOG` takes precedence over the configured level. With logging
//! disabled no subscriber is installed and every event is discarded.

use crate::config::{LogFormat, LoggerConfig};
use thiserror::Error;
use tracing_subscriber::{fmt, prelude::*, EnvFilter, Layer, Registry};

/// Errors that can occur while installing the subscriber
#[derive(Error, Debug)]
pub enum LoggerError {
    #[error("Invalid log filter '{0}': {1}")]
    Filter(String, tracing_subscriber::filter::ParseError),

    #[error("Failed to install subscriber: {0}")]
    Init(#[from] tracing_subscriber::util::TryInitError),
}

/// Install the global subscriber described by `config`
pub fn init(config: &LoggerConfig) -> Result<(), LoggerError> {
    if !config.enabled {
        return Ok(());
    }

    let filter = match EnvFilter::try_from_default_env() {
        Ok(filter) => filter,
        Err(_) => EnvFilter::try_new(&config.level)
            .map_err(|e| LoggerError::Filter(config.level.clone(), e))?,
    };

    tracing_subscriber::registry()
        .with(console_layer(config).with_filter(filter))
        .try_init()?;

    Ok(())
}

fn console_layer(config: &LoggerConfig) -> Box<dyn Layer<Registry> + Send + Sync> {
    let layer = fmt::layer().with_ansi(config.ansi).with_target(false);

    match config.format {
        LogFormat::Compact => layer.compact().boxed(),
        LogFormat::Pretty => layer.pretty().boxed(),
        LogFormat::Json => layer.json().boxed(),
    }
}
