use std::{
    fs::OpenOptions,
    path::{Path, PathBuf},
    str::FromStr,
    sync::Mutex,
};

use serde::Deserialize;
use thiserror::Error;
use tracing::metadata::LevelFilter;
use tracing_subscriber::{
    Layer, filter::FilterFn, prelude::__tracing_subscriber_SubscriberExt, util::SubscriberInitExt,
};

#[macro_export]
macro_rules! log {
    ($level:expr, $span:expr, $($msg:expr),*) => {{
        let span = $crate::tracing::span!($level, $span);
        let _enter = span.enter();

        $crate::tracing::event!($level, $($msg),*)
    }};
}

/// Traffic sent to the relay
#[macro_export]
macro_rules! outgoing {
    (level = $level:ident, $($msg:expr),*) => {
        $crate::log!($crate::tracing::Level::$level, "outgoing", $($msg),*)
    };

    ($($msg:expr),*) => {
        $crate::outgoing!(level = TRACE, $($msg),*)
    };
}

/// Traffic received from the relay
#[macro_export]
macro_rules! incoming {
    (level = $level:ident, $($msg:expr),*) => {
        $crate::log!($crate::tracing::Level::$level, "incoming", $($msg),*)
    };

    ($($msg:expr),*) => {
        $crate::incoming!(level = TRACE, $($msg),*)
    };
}

#[macro_export]
macro_rules! internal {
    (level = $level:ident, $($msg:expr),*) => {
        $crate::log!($crate::tracing::Level::$level, "internal", $($msg),*)
    };

    ($($msg:expr),*) => {
        $crate::internal!(level = TRACE, $($msg),*)
    };
}

#[derive(Debug, Error)]
pub enum LoggingError {
    #[error("Invalid log level: {0}")]
    InvalidLevel(String),

    #[error("Unable to open log file {}: {source}", path.display())]
    File {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("A global logger is already installed")]
    AlreadyInitialised,
}

/// Where log lines are written.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum LogTarget {
    #[default]
    Stdout,
    Stderr,
    File(PathBuf),
}

impl FromStr for LogTarget {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s {
            "stdout" => Self::Stdout,
            "stderr" => Self::Stderr,
            path => Self::File(PathBuf::from(path)),
        })
    }
}

impl<'de> Deserialize<'de> for LogTarget {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let target = String::deserialize(deserializer)?;
        Ok(target.parse().unwrap_or_default())
    }
}

/// Logging configuration, usually from the config file with CLI overrides.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct LogConfig {
    #[serde(default)]
    pub target: LogTarget,

    /// One of `trace`, `debug`, `info`, `warn`, `error` (`fatal` is an alias
    /// for `error`). Falls back to `LOG_LEVEL`, then a build dependent default.
    #[serde(default)]
    pub level: Option<String>,
}

/// Parses a level name as accepted on the command line.
///
/// # Errors
///
/// Returns [`LoggingError::InvalidLevel`] for unknown names.
pub fn parse_level(level: &str) -> Result<LevelFilter, LoggingError> {
    match level.to_ascii_lowercase().as_str() {
        "fatal" => Ok(LevelFilter::ERROR),
        other => {
            LevelFilter::from_str(other).map_err(|_| LoggingError::InvalidLevel(level.to_string()))
        }
    }
}

fn resolve_level(config: &LogConfig) -> Result<LevelFilter, LoggingError> {
    let default = if cfg!(debug_assertions) {
        LevelFilter::DEBUG
    } else {
        LevelFilter::INFO
    };

    if let Some(level) = &config.level {
        return parse_level(level);
    }

    Ok(std::env::var("LOG_LEVEL").map_or(default, |level| {
        parse_level(&level).unwrap_or_else(|_| {
            eprintln!("Invalid log level specified {level}, defaulting to {default}");
            default
        })
    }))
}

fn open_log_file(path: &Path) -> Result<std::fs::File, LoggingError> {
    OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .map_err(|source| LoggingError::File {
            path: path.to_path_buf(),
            source,
        })
}

/// Installs the global subscriber.
///
/// Only events from postbox crates are emitted.
///
/// # Errors
///
/// Fails on an invalid level, an unwritable log file, or when a subscriber
/// has already been installed.
pub fn init(config: &LogConfig) -> Result<(), LoggingError> {
    let level = resolve_level(config)?;
    let only_postbox = FilterFn::new(|metadata| metadata.target().starts_with("postbox"));

    let layer = tracing_subscriber::fmt::layer()
        .with_file(false)
        .with_line_number(false)
        .compact()
        .with_timer(tracing_subscriber::fmt::time::ChronoUtc::rfc_3339());

    let registry = tracing_subscriber::Registry::default();
    let installed = match &config.target {
        LogTarget::Stdout => registry
            .with(
                layer
                    .with_ansi(true)
                    .with_filter(level)
                    .with_filter(only_postbox),
            )
            .try_init(),
        LogTarget::Stderr => registry
            .with(
                layer
                    .with_ansi(true)
                    .with_writer(std::io::stderr)
                    .with_filter(level)
                    .with_filter(only_postbox),
            )
            .try_init(),
        LogTarget::File(path) => {
            let file = open_log_file(path)?;
            registry
                .with(
                    layer
                        .with_ansi(false)
                        .with_writer(Mutex::new(file))
                        .with_filter(level)
                        .with_filter(only_postbox),
                )
                .try_init()
        }
    };

    installed.map_err(|_| LoggingError::AlreadyInitialised)
}
