//! The fan-out logger: three sinks behind one [`tracing::Dispatch`].

use std::{
    backtrace::Backtrace,
    fmt,
    net::SocketAddr,
    panic::Location,
    sync::{Arc, Mutex, MutexGuard, PoisonError},
    time::{Duration, Instant},
};

use tracing::Dispatch;
use tracing_appender::non_blocking::{NonBlockingBuilder, WorkerGuard};
use tracing_subscriber::{fmt::writer::BoxMakeWriter, layer::SubscriberExt};

use crate::{
    config::{ConsoleTarget, LoggerConfig, WriteMode},
    high_severity_enabler, low_severity_enabler, AtomicThreshold, LevelEndpoint,
    LevelEndpointHandle, LineEncoder, LoggerError, RollingFile, Severity, Sink, TeeLayer,
};

/// Emits one event carrying the record's exact severity and caller location.
///
/// `tracing` levels must be known at the callsite, hence one expansion per level.
macro_rules! emit_event {
    ($level:expr, $severity:expr, $location:expr, $stacktrace:expr, $elapsed:expr, $args:expr) => {
        tracing::event!(
            target: "log_facade",
            $level,
            log_facade.severity = u64::from($severity.to_u8()),
            log_facade.file = $location.file(),
            log_facade.line = $location.line(),
            log_facade.stacktrace = $stacktrace,
            log_facade.elapsed_nanos = $elapsed,
            "{}",
            $args
        )
    };
}

/// A configured set of sinks: low-severity file, high-severity file and console.
///
/// Records are routed as follows:
/// - the low-severity file receives severities in `[level, Warn)`,
/// - the high-severity file receives severities at or above both `Warn` and `level`,
/// - the console receives severities at or above its threshold, which starts at `level` and
///   can be changed at any time without affecting the files.
///
/// Dropping the logger stops its level endpoint and flushes queued lines.
pub struct Logger {
    endpoint: Mutex<Option<LevelEndpointHandle>>,
    dispatch: Dispatch,
    level: Severity,
    console_threshold: Arc<AtomicThreshold>,
    stacktrace_level: Option<Severity>,
    _guards: Vec<WorkerGuard>,
}

impl Logger {
    /// Builds a logger and, if configured, starts its level endpoint.
    ///
    /// # Errors
    ///
    /// Returns [`LoggerError::ControlEndpoint`] if the level endpoint cannot be started.
    pub fn new(config: LoggerConfig) -> Result<Self, LoggerError> {
        let endpoint_addr = config.level_endpoint;
        let logger = Self::build(config);

        if let Some(addr) = endpoint_addr {
            let handle = LevelEndpoint::new(Arc::clone(&logger.console_threshold))
                .with_dispatch(logger.dispatch.clone())
                .spawn(addr)?;
            *logger.endpoint_slot() = Some(handle);
        }

        Ok(logger)
    }

    /// Builds a logger without starting a level endpoint, whatever the configuration says.
    ///
    /// Files are opened on first write, so building cannot fail.
    pub fn build(config: LoggerConfig) -> Self {
        let level = config.level;
        let encoder = Arc::new(LineEncoder::new(config.encoder));
        let console_threshold = Arc::new(AtomicThreshold::new(level));
        let mut guards = Vec::new();

        let low_writer = file_writer(
            RollingFile::new(config.low_severity_path, config.rotation),
            config.write_mode,
            &mut guards,
        );
        let high_writer = file_writer(
            RollingFile::new(config.high_severity_path, config.rotation),
            config.write_mode,
            &mut guards,
        );
        let console_writer = console_writer(config.console, config.write_mode, &mut guards);

        let tee = TeeLayer::new([
            Sink::new(Arc::clone(&encoder), low_writer, low_severity_enabler(level)),
            Sink::new(Arc::clone(&encoder), high_writer, high_severity_enabler(level)),
            Sink::new(
                Arc::clone(&encoder),
                console_writer,
                Arc::clone(&console_threshold),
            ),
        ]);

        let stacktrace_level = config
            .stacktrace_level
            .filter(|_| encoder.config().stacktrace_key.is_some());

        Self {
            endpoint: Mutex::new(None),
            dispatch: Dispatch::new(tracing_subscriber::registry().with(tee)),
            level,
            console_threshold,
            stacktrace_level,
            _guards: guards,
        }
    }

    /// Minimum severity written to the files.
    pub fn level(&self) -> Severity {
        self.level
    }

    /// Current console threshold.
    pub fn console_level(&self) -> Severity {
        self.console_threshold.get()
    }

    /// Changes the console threshold. File routing is unaffected.
    pub fn set_console_level(&self, severity: Severity) {
        self.console_threshold.set(severity);
    }

    /// The shared console threshold, as read by the console sink and the level endpoint.
    pub fn console_threshold(&self) -> &Arc<AtomicThreshold> {
        &self.console_threshold
    }

    /// Address of the level endpoint, if one is running.
    pub fn level_endpoint_addr(&self) -> Option<SocketAddr> {
        self.endpoint_slot()
            .as_ref()
            .map(LevelEndpointHandle::local_addr)
    }

    /// Stops the level endpoint, if one is running, and waits until its address is released.
    ///
    /// The logger itself keeps working; only runtime control over HTTP goes away.
    pub fn stop_level_endpoint(&self) {
        let handle = self.endpoint_slot().take();
        if let Some(handle) = handle {
            handle.shutdown();
        }
    }

    fn endpoint_slot(&self) -> MutexGuard<'_, Option<LevelEndpointHandle>> {
        self.endpoint.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// The dispatcher holding this logger's sinks.
    ///
    /// Events from plain `tracing` macros reach the same sinks when emitted under
    /// [`tracing::dispatcher::with_default`]; their fields are appended to the line as JSON.
    pub fn dispatch(&self) -> &Dispatch {
        &self.dispatch
    }

    /// Whether any sink would accept a record at `severity`.
    pub fn enabled(&self, severity: Severity) -> bool {
        severity >= self.level.min(self.console_threshold.get())
    }

    /// Records a message at `severity`. Never panics, whatever the severity.
    #[track_caller]
    pub fn log(&self, severity: Severity, args: fmt::Arguments<'_>) {
        self.emit(severity, args, None, Location::caller());
    }

    /// Starts a scope that records `"<label> finished"` with its elapsed time when dropped.
    #[track_caller]
    pub fn timed(self: &Arc<Self>, severity: Severity, label: impl Into<String>) -> Timed {
        Timed {
            logger: Arc::clone(self),
            severity,
            label: label.into(),
            started: Instant::now(),
            location: Location::caller(),
        }
    }

    fn emit(
        &self,
        severity: Severity,
        args: fmt::Arguments<'_>,
        elapsed: Option<Duration>,
        location: &'static Location<'static>,
    ) {
        if !self.enabled(severity) {
            return;
        }

        let stacktrace = self
            .stacktrace_level
            .filter(|stacktrace_level| severity >= *stacktrace_level)
            .map(|_| Backtrace::force_capture().to_string());
        let stacktrace = stacktrace.as_deref();
        let elapsed = elapsed.map(|elapsed| u64::try_from(elapsed.as_nanos()).unwrap_or(u64::MAX));

        tracing::dispatcher::with_default(&self.dispatch, || match severity {
            Severity::Debug => {
                emit_event!(tracing::Level::DEBUG, severity, location, stacktrace, elapsed, args)
            }
            Severity::Info => {
                emit_event!(tracing::Level::INFO, severity, location, stacktrace, elapsed, args)
            }
            Severity::Warn => {
                emit_event!(tracing::Level::WARN, severity, location, stacktrace, elapsed, args)
            }
            Severity::Error | Severity::Panic | Severity::Fatal => {
                emit_event!(tracing::Level::ERROR, severity, location, stacktrace, elapsed, args)
            }
        });
    }
}

impl fmt::Debug for Logger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Logger")
            .field("level", &self.level)
            .field("console_level", &self.console_level())
            .field("stacktrace_level", &self.stacktrace_level)
            .field("level_endpoint", &self.level_endpoint_addr())
            .finish_non_exhaustive()
    }
}

/// Records the time between its creation and its drop.
///
/// Created by [`Logger::timed`] or [`crate::timed`].
#[derive(Debug)]
#[must_use = "the elapsed time is recorded when the scope is dropped"]
pub struct Timed {
    logger: Arc<Logger>,
    severity: Severity,
    label: String,
    started: Instant,
    location: &'static Location<'static>,
}

impl Drop for Timed {
    fn drop(&mut self) {
        self.logger.emit(
            self.severity,
            format_args!("{} finished", self.label),
            Some(self.started.elapsed()),
            self.location,
        );
    }
}

fn file_writer(
    file: RollingFile,
    write_mode: WriteMode,
    guards: &mut Vec<WorkerGuard>,
) -> BoxMakeWriter {
    match write_mode {
        WriteMode::Blocking => BoxMakeWriter::new(Mutex::new(file)),
        WriteMode::NonBlocking => {
            let (writer, guard) = NonBlockingBuilder::default()
                .lossy(false)
                .thread_name("log-facade-file")
                .finish(file);
            guards.push(guard);
            BoxMakeWriter::new(writer)
        }
    }
}

fn console_writer(
    console: ConsoleTarget,
    write_mode: WriteMode,
    guards: &mut Vec<WorkerGuard>,
) -> BoxMakeWriter {
    match (console, write_mode) {
        (ConsoleTarget::Stdout, WriteMode::Blocking) => BoxMakeWriter::new(std::io::stdout),
        (ConsoleTarget::Writer(writer), WriteMode::Blocking) => BoxMakeWriter::new(writer),
        (ConsoleTarget::Stdout, WriteMode::NonBlocking) => {
            let (writer, guard) = NonBlockingBuilder::default()
                .lossy(false)
                .thread_name("log-facade-console")
                .finish(std::io::stdout());
            guards.push(guard);
            BoxMakeWriter::new(writer)
        }
        (ConsoleTarget::Writer(writer), WriteMode::NonBlocking) => {
            let (writer, guard) = NonBlockingBuilder::default()
                .lossy(false)
                .thread_name("log-facade-console")
                .finish(writer);
            guards.push(guard);
            BoxMakeWriter::new(writer)
        }
    }
}
