//! Tracing subscriber setup for applications embedding the bridge
//!
//! The library itself only emits `tracing` events; installing a subscriber
//! is up to the host. [`setup_logging`] is a convenience for binaries and
//! demos. By default it shows the bridge's own events at the configured level
//! and keeps every other crate at `warn`, so an embedding app is not flooded
//! by its dependencies. A `RUST_LOG` directive set in the environment replaces
//! that default entirely.

use std::str::FromStr;

use tracing::Level;
use tracing_subscriber::fmt::format::FmtSpan;
use tracing_subscriber::{fmt, EnvFilter};

use crate::error::{BridgeError, BridgeResult};

/// Target of every event emitted by this crate
const BRIDGE_TARGET: &str = env!("CARGO_CRATE_NAME");

/// Output format of the installed subscriber
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    #[default]
    Pretty,
    /// One JSON object per line, for log shippers
    Json,
}

#[derive(Debug, Clone)]
pub struct LoggingConfig {
    /// Level for the bridge's call lifecycle events
    pub bridge_level: Level,
    /// Level for everything else the host links in
    pub host_level: Level,
    pub format: LogFormat,
    /// Log span close events with their busy time
    pub span_timings: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            bridge_level: Level::INFO,
            host_level: Level::WARN,
            format: LogFormat::Pretty,
            span_timings: false,
        }
    }
}

impl LoggingConfig {
    pub fn new(bridge_level: Level) -> Self {
        Self {
            bridge_level,
            ..Default::default()
        }
    }

    pub fn with_host_level(mut self, level: Level) -> Self {
        self.host_level = level;
        self
    }

    pub fn with_format(mut self, format: LogFormat) -> Self {
        self.format = format;
        self
    }

    pub fn with_span_timings(mut self) -> Self {
        self.span_timings = true;
        self
    }

    /// Filter directives used when `RUST_LOG` is not set
    pub fn directives(&self) -> String {
        format!(
            "{},{}={}",
            level_name(self.host_level),
            BRIDGE_TARGET,
            level_name(self.bridge_level)
        )
    }

    fn filter(&self) -> BridgeResult<EnvFilter> {
        if let Ok(filter) = EnvFilter::try_from_default_env() {
            return Ok(filter);
        }
        EnvFilter::try_new(self.directives())
            .map_err(|e| BridgeError::invalid_configuration("log_filter", e.to_string()))
    }
}

/// Install a global fmt subscriber
///
/// Fails with [`BridgeError::Logging`] when a global subscriber is already
/// installed.
pub fn setup_logging(config: LoggingConfig) -> BridgeResult<()> {
    let span_events = if config.span_timings {
        FmtSpan::CLOSE
    } else {
        FmtSpan::NONE
    };

    let builder = fmt::Subscriber::builder()
        .with_env_filter(config.filter()?)
        .with_span_events(span_events)
        .with_target(true);

    let installed = match config.format {
        LogFormat::Pretty => builder.try_init(),
        LogFormat::Json => builder.json().flatten_event(true).try_init(),
    };
    installed.map_err(|e| BridgeError::Logging(e.to_string()))?;

    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        bridge_level = %config.bridge_level,
        format = ?config.format,
        "Push bridge logging ready"
    );
    Ok(())
}

/// Parse a log level such as `"debug"` or `"WARN"`
pub fn parse_log_level(level: &str) -> BridgeResult<Level> {
    Level::from_str(level.trim())
        .map_err(|_| BridgeError::invalid_configuration("log_level", format!("invalid log level: {}", level)))
}

fn level_name(level: Level) -> &'static str {
    match level {
        Level::TRACE => "trace",
        Level::DEBUG => "debug",
        Level::INFO => "info",
        Level::WARN => "warn",
        Level::ERROR => "error",
    }
}
