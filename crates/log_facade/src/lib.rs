//! `log_facade` provides process-wide leveled logging on top of the [`tracing`] ecosystem.
//!
//! It offers:
//! - Three sinks behind one shared [`Logger`]: a low-severity file (below warn), a
//!   high-severity file (warn and above) and the console.
//! - Size-based file rotation through [`RollingFile`].
//! - A console threshold that can be changed at runtime, in-process or through an optional
//!   HTTP endpoint ([`LevelEndpoint`]).
//! - Leveled functions ([`debug()`], [`info()`], [`warn()`], [`error()`], [`panic()`]) and the
//!   matching macros, all routed through the process-wide instance.
//!
//! The process-wide instance is created from the environment on first use (see
//! [`LoggerConfig::from_env`]) and can be replaced at any time with [`init_log`] or
//! [`install`].
//!
//! # Example
//!
//! ```no_run
//! log_facade::init_log("logs/app_.log", "logs/app_err.log", "debug", false);
//!
//! let attempts = 3;
//! log_facade::info!("connected after {attempts} attempts");
//! log_facade::warn!("cache is {}% full", 93);
//!
//! // Lower the console threshold without touching the files.
//! log_facade::current().set_console_level(log_facade::Severity::Debug);
//! ```

mod config;
mod encoder;
mod endpoint;
mod logger;
mod macros;
mod rolling;
mod severity;
mod sink;

use std::{
    fmt,
    net::SocketAddr,
    path::PathBuf,
    sync::{Arc, LazyLock},
};

use arc_swap::ArcSwap;

pub use self::{
    config::{
        default_log_paths, level_from_env, ConsoleTarget, LoggerConfig, SharedWriter,
        SharedWriterGuard, WriteMode, DEFAULT_LEVEL_ENDPOINT_ADDR, LEVEL_ENV_VAR,
    },
    encoder::{
        Caller, CallerEncoding, DurationEncoding, EncoderConfig, LevelEncoding, LineEncoder,
        TimeEncoding,
    },
    endpoint::{LevelEndpoint, LevelEndpointHandle, LEVEL_ENDPOINT_PATH},
    logger::{Logger, Timed},
    rolling::{RollingFile, RotationPolicy},
    severity::Severity,
    sink::{
        high_severity_enabler, low_severity_enabler, AtomicThreshold, EnablerFn, SeverityEnabler,
        Sink, TeeLayer,
    },
};

mod keys {
    use std::sync::LazyLock;

    use rustc_hash::FxHashSet;

    pub(crate) const MESSAGE: &str = "msg";
    pub(crate) const LEVEL: &str = "level";
    pub(crate) const TIME: &str = "ts";
    pub(crate) const CALLER: &str = "file";
    pub(crate) const ELAPSED: &str = "elapsed";

    /// Field `tracing` stores the formatted message under.
    pub(crate) const MESSAGE_FIELD: &str = "message";

    pub(crate) const SEVERITY_FIELD: &str = "log_facade.severity";
    pub(crate) const FILE_FIELD: &str = "log_facade.file";
    pub(crate) const LINE_FIELD: &str = "log_facade.line";
    pub(crate) const STACKTRACE_FIELD: &str = "log_facade.stacktrace";
    pub(crate) const ELAPSED_FIELD: &str = "log_facade.elapsed_nanos";

    pub(crate) static RESERVED_FIELDS: LazyLock<FxHashSet<&'static str>> = LazyLock::new(|| {
        [
            MESSAGE_FIELD,
            SEVERITY_FIELD,
            FILE_FIELD,
            LINE_FIELD,
            STACKTRACE_FIELD,
            ELAPSED_FIELD,
        ]
        .iter()
        .copied()
        .collect()
    });
}

/// Errors that can occur while setting up or writing logs.
///
/// None of these reach callers of the leveled functions; they surface only from the fallible
/// building blocks.
#[derive(Debug, thiserror::Error)]
pub enum LoggerError {
    /// A level name that is not one of the known severities.
    #[error("Unrecognized level: {0:?}")]
    UnknownSeverity(String),

    /// Opening, writing or rotating a log file failed.
    #[error("Log file I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Structured fields could not be serialized.
    #[error("JSON serialization error: {0}")]
    JsonSerialization(#[from] serde_json::Error),

    /// The level control endpoint could not be started.
    #[error("Failed to start log level endpoint on {addr}: {source}")]
    ControlEndpoint {
        /// Address the endpoint was asked to listen on.
        addr: SocketAddr,

        /// Underlying cause.
        #[source]
        source: std::io::Error,
    },
}

static LOGGER: LazyLock<ArcSwap<Logger>> =
    LazyLock::new(|| ArcSwap::from_pointee(Logger::build(LoggerConfig::from_env())));

/// Replaces the process-wide logger.
///
/// `level` is one of `debug`, `info`, `warn`, `error`, `panic`, `fatal`; anything else selects
/// `info`. When `enable_level_endpoint` is set, the console threshold is also exposed at
/// [`LEVEL_ENDPOINT_PATH`] on [`DEFAULT_LEVEL_ENDPOINT_ADDR`].
///
/// A level endpoint started by an earlier call is stopped first, so re-initializing with the
/// endpoint enabled takes over its address. Failing to start the endpoint is fatal: the
/// failure is recorded at [`Severity::Fatal`] and the process exits with status 1.
#[track_caller]
pub fn init_log(
    low_severity_path: impl Into<PathBuf>,
    high_severity_path: impl Into<PathBuf>,
    level: &str,
    enable_level_endpoint: bool,
) {
    let mut config = LoggerConfig::new(
        low_severity_path,
        high_severity_path,
        Severity::from_name_or_default(level),
    );
    if enable_level_endpoint {
        config.level_endpoint = Some(DEFAULT_LEVEL_ENDPOINT_ADDR);
        LOGGER.load().stop_level_endpoint();
    }

    match start_or_report(config) {
        Ok(logger) => {
            install(logger);
        }
        Err(reported) => {
            // Dropping the logger flushes any writer threads.
            drop(reported);
            std::process::exit(1);
        }
    }
}

/// Builds the logger for `config`, or, when its endpoint cannot be started, an endpoint-less
/// logger that has already recorded the failure at [`Severity::Fatal`].
#[track_caller]
fn start_or_report(mut config: LoggerConfig) -> Result<Logger, Logger> {
    match Logger::new(config.clone()) {
        Ok(logger) => Ok(logger),
        Err(error) => {
            config.level_endpoint = None;
            let logger = Logger::build(config);
            logger.log(Severity::Fatal, format_args!("{error}"));
            Err(logger)
        }
    }
}

/// Makes `logger` the process-wide instance, returning the one it replaces.
///
/// The replaced logger keeps serving calls that already hold it and is flushed and shut down
/// once the last of them completes.
pub fn install(logger: Logger) -> Arc<Logger> {
    LOGGER.swap(Arc::new(logger))
}

/// The process-wide logger.
pub fn current() -> Arc<Logger> {
    LOGGER.load_full()
}

/// Records a message at [`Severity::Debug`].
#[track_caller]
pub fn debug(args: fmt::Arguments<'_>) {
    LOGGER.load().log(Severity::Debug, args);
}

/// Records a message at [`Severity::Info`].
#[track_caller]
pub fn info(args: fmt::Arguments<'_>) {
    LOGGER.load().log(Severity::Info, args);
}

/// Records a message at [`Severity::Warn`].
#[track_caller]
pub fn warn(args: fmt::Arguments<'_>) {
    LOGGER.load().log(Severity::Warn, args);
}

/// Records a message at [`Severity::Error`].
#[track_caller]
pub fn error(args: fmt::Arguments<'_>) {
    LOGGER.load().log(Severity::Error, args);
}

/// Records a message at [`Severity::Panic`], then panics with the same message.
///
/// To record at this severity without panicking, use [`Logger::log`].
///
/// # Panics
///
/// Always.
#[track_caller]
#[allow(clippy::panic, reason = "log-and-abort is the purpose of this function")]
pub fn panic(args: fmt::Arguments<'_>) -> ! {
    let message = args.to_string();
    LOGGER
        .load()
        .log(Severity::Panic, format_args!("{message}"));
    std::panic!("{message}")
}

/// Starts a [`Timed`] scope on the process-wide logger.
#[track_caller]
pub fn timed(severity: Severity, label: impl Into<String>) -> Timed {
    Logger::timed(&current(), severity, label)
}
