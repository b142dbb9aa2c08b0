//! Logging setup
//!
//! Logs go to stderr; stdout carries tool output only. `RUST_LOG` directives
//! are honoured on top of the configured level, and `--verbose` forces DEBUG.
//! When `log_file` is set, a plain-text copy is appended to that file.

use crate::config::LoggingConfig;
use anyhow::{Context, Result};
use std::fs::OpenOptions;
use std::path::Path;
use std::sync::Mutex;
use tracing::Level;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter, Layer, Registry};

type BoxedLayer = Box<dyn Layer<Registry> + Send + Sync>;

/// Install the global subscriber
pub fn init(config: &LoggingConfig, verbose: bool) -> Result<()> {
    let level = if verbose {
        Level::DEBUG
    } else {
        config
            .level
            .to_lowercase()
            .parse()
            .map_err(|e| anyhow::anyhow!("Failed to parse log level: {}", e))?
    };

    let mut layers = vec![stderr_layer(&config.format)?];
    if let Some(path) = &config.log_file {
        layers.push(file_layer(path)?);
    }

    tracing_subscriber::registry()
        .with(layers)
        .with(build_filter(level))
        .try_init()
        .context("Failed to install tracing subscriber")?;
    Ok(())
}

/// Subscriber for the stretch before the configuration is loaded
///
/// Warnings raised while reading the config file and environment go to
/// stderr through this one, scoped with `tracing::subscriber::with_default`.
pub fn bootstrap() -> impl tracing::Subscriber + Send + Sync {
    fmt()
        .with_writer(std::io::stderr)
        .with_target(false)
        .with_env_filter(build_filter(Level::WARN))
        .finish()
}

/// `RUST_LOG` if set, otherwise `level`
pub fn build_filter(level: Level) -> EnvFilter {
    EnvFilter::builder()
        .with_default_directive(level.into())
        .from_env_lossy()
}

fn stderr_layer(format: &str) -> Result<BoxedLayer> {
    let layer = fmt::layer().with_writer(std::io::stderr).with_target(false);
    let layer = match format.to_lowercase().as_str() {
        "json" => layer.json().boxed(),
        "pretty" => layer.pretty().boxed(),
        "compact" => layer.compact().boxed(),
        other => anyhow::bail!(
            "Invalid log format: {}. Must be one of: json, pretty, compact",
            other
        ),
    };
    Ok(layer)
}

fn file_layer(path: &Path) -> Result<BoxedLayer> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create log directory {:?}", parent))?;
    }
    let file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .with_context(|| format!("Failed to open log file {:?}", path))?;

    Ok(fmt::layer()
        .with_writer(Mutex::new(file))
        .with_ansi(false)
        .boxed())
}
