//! Structured logging setup.
//!
//! Components log through `tracing` under these targets:
//!
//! | Target | Description |
//! |--------|-------------|
//! | `barrier_guard::risk` | Barrier breaches, breaker trips, tunneling |
//! | `barrier_guard::monitoring` | Tick loop lifecycle, recovery, commands |
//! | `barrier_guard::validation` | Validation harness runs |
//!
//! ```bash
//! # Everything at warn, risk decisions at debug
//! RUST_LOG=warn,barrier_guard::risk=debug barrier_guard run
//! ```

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::filter::EnvFilter;
use tracing_subscriber::fmt;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{Layer, Registry};

/// Log output format for stdout.
#[derive(Debug, Clone, Copy, Default, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
    Compact,
}

impl std::str::FromStr for LogFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "pretty" => Ok(LogFormat::Pretty),
            "json" => Ok(LogFormat::Json),
            "compact" => Ok(LogFormat::Compact),
            other => Err(format!("unknown log format: {other}")),
        }
    }
}

/// Logging configuration.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct LogConfig {
    /// Default filter when RUST_LOG is unset
    #[serde(default = "default_level")]
    pub level: String,

    #[serde(default)]
    pub stdout_format: LogFormat,

    /// When set, risk decisions and errors are also written as daily-rotated
    /// JSON files in this directory (`risk-events.log`, `risk-errors.log`).
    #[serde(default)]
    pub log_dir: Option<PathBuf>,
}

fn default_level() -> String {
    "info".to_string()
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: default_level(),
            stdout_format: LogFormat::default(),
            log_dir: None,
        }
    }
}

impl LogConfig {
    /// JSON on stdout plus rotated files.
    pub fn production(log_dir: PathBuf) -> Self {
        Self {
            stdout_format: LogFormat::Json,
            log_dir: Some(log_dir),
            ..Default::default()
        }
    }
}

fn stdout_layer<S>(format: LogFormat, filter: EnvFilter) -> Box<dyn Layer<S> + Send + Sync>
where
    S: tracing::Subscriber + for<'a> tracing_subscriber::registry::LookupSpan<'a>,
{
    match format {
        LogFormat::Json => fmt::layer().json().with_filter(filter).boxed(),
        LogFormat::Compact => fmt::layer().compact().with_filter(filter).boxed(),
        LogFormat::Pretty => fmt::layer().with_target(false).with_filter(filter).boxed(),
    }
}

/// Install the global subscriber.
///
/// The returned guards flush the file writers on drop and must be kept alive
/// for the lifetime of the program.
pub fn init_logging(
    config: &LogConfig,
    env_filter_override: Option<&str>,
) -> Result<Vec<WorkerGuard>, Box<dyn std::error::Error>> {
    let mut guards = Vec::new();

    let base_filter = match env_filter_override {
        Some(filter) => EnvFilter::try_new(filter)?,
        None => match EnvFilter::try_from_default_env() {
            Ok(filter) => filter,
            Err(_) => EnvFilter::try_new(&config.level)?,
        },
    };

    let mut layers: Vec<Box<dyn Layer<Registry> + Send + Sync>> =
        vec![stdout_layer(config.stdout_format, base_filter)];

    if let Some(dir) = &config.log_dir {
        std::fs::create_dir_all(dir)?;

        let events_appender = RollingFileAppender::new(Rotation::DAILY, dir, "risk-events.log");
        let (events_writer, guard) = tracing_appender::non_blocking(events_appender);
        guards.push(guard);
        layers.push(
            fmt::layer()
                .with_writer(events_writer)
                .with_ansi(false)
                .json()
                .with_filter(EnvFilter::try_new(format!(
                    "{}=info,{}=info,{}=info",
                    targets::RISK,
                    targets::MONITORING,
                    targets::VALIDATION
                ))?)
                .boxed(),
        );

        let errors_appender = RollingFileAppender::new(Rotation::DAILY, dir, "risk-errors.log");
        let (errors_writer, guard) = tracing_appender::non_blocking(errors_appender);
        guards.push(guard);
        layers.push(
            fmt::layer()
                .with_writer(errors_writer)
                .with_ansi(false)
                .json()
                .with_filter(EnvFilter::try_new("warn")?)
                .boxed(),
        );
    }

    tracing_subscriber::registry().with(layers).try_init()?;
    Ok(guards)
}

/// Log target constants.
pub mod targets {
    pub const RISK: &str = "barrier_guard::risk";
    pub const MONITORING: &str = "barrier_guard::monitoring";
    pub const VALIDATION: &str = "barrier_guard::validation";
}
