//! Logger configuration and its environment-derived defaults.

use std::{
    fmt,
    io::{self, Write},
    net::{Ipv4Addr, SocketAddr, SocketAddrV4},
    path::PathBuf,
    sync::{Arc, Mutex, MutexGuard, PoisonError},
};

use tracing_subscriber::fmt::MakeWriter;

use crate::{EncoderConfig, RotationPolicy, Severity};

/// Environment variable holding the default minimum severity.
pub const LEVEL_ENV_VAR: &str = "LOG_LVL";

/// Address the level endpoint listens on when enabled through [`crate::init_log`].
pub const DEFAULT_LEVEL_ENDPOINT_ADDR: SocketAddr =
    SocketAddr::V4(SocketAddrV4::new(Ipv4Addr::UNSPECIFIED, 9090));

/// Comprehensive configuration for a [`crate::Logger`].
#[derive(Clone, Debug)]
pub struct LoggerConfig {
    /// File receiving records below [`Severity::Warn`].
    pub low_severity_path: PathBuf,

    /// File receiving records at [`Severity::Warn`] and above.
    pub high_severity_path: PathBuf,

    /// Minimum severity written to either file, and the initial console threshold.
    pub level: Severity,

    /// Rotation applied to both files.
    pub rotation: RotationPolicy,

    /// Line format shared by all sinks.
    pub encoder: EncoderConfig,

    /// Records at or above this severity carry a stack trace. Stack traces are only rendered
    /// when [`EncoderConfig::stacktrace_key`] is set.
    pub stacktrace_level: Option<Severity>,

    /// Whether sinks write on the calling thread or through a writer thread.
    pub write_mode: WriteMode,

    /// Console destination.
    pub console: ConsoleTarget,

    /// Where to serve the level control endpoint. If `None`, the endpoint is disabled.
    pub level_endpoint: Option<SocketAddr>,
}

impl LoggerConfig {
    /// Configuration with the given files and level, and defaults for everything else.
    pub fn new(
        low_severity_path: impl Into<PathBuf>,
        high_severity_path: impl Into<PathBuf>,
        level: Severity,
    ) -> Self {
        Self {
            low_severity_path: low_severity_path.into(),
            high_severity_path: high_severity_path.into(),
            level,
            rotation: RotationPolicy::default(),
            encoder: EncoderConfig::default(),
            stacktrace_level: Some(Severity::Warn),
            write_mode: WriteMode::Blocking,
            console: ConsoleTarget::Stdout,
            level_endpoint: None,
        }
    }

    /// Configuration used for the process-wide logger until it is replaced: level from
    /// [`LEVEL_ENV_VAR`], files from [`default_log_paths`], endpoint disabled.
    pub fn from_env() -> Self {
        let (low_severity_path, high_severity_path) = default_log_paths();
        Self::new(low_severity_path, high_severity_path, level_from_env())
    }
}

/// Reads the minimum severity from [`LEVEL_ENV_VAR`].
///
/// Unset, empty or unrecognized values select [`Severity::Info`].
pub fn level_from_env() -> Severity {
    std::env::var(LEVEL_ENV_VAR)
        .map(|level| Severity::from_name_or_default(&level))
        .unwrap_or_default()
}

/// `<cwd>/<executable>_.log` and `<cwd>/<executable>_err.log`.
pub fn default_log_paths() -> (PathBuf, PathBuf) {
    let directory = std::env::current_dir().unwrap_or_else(|_| PathBuf::from("."));
    let app_name = std::env::args_os()
        .next()
        .map(PathBuf::from)
        .and_then(|path| path.file_name().map(|name| name.to_string_lossy().into_owned()))
        .unwrap_or_else(|| env!("CARGO_PKG_NAME").to_owned());

    (
        directory.join(format!("{app_name}_.log")),
        directory.join(format!("{app_name}_err.log")),
    )
}

/// How sinks hand lines to their destinations.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum WriteMode {
    /// Write and flush on the emitting thread.
    Blocking,

    /// Queue lines to a dedicated writer thread per destination. Nothing is dropped when the
    /// queue is full; emitters wait instead. Queued lines are flushed when the logger drops.
    NonBlocking,
}

/// Console destination.
#[derive(Clone, Debug, Default)]
pub enum ConsoleTarget {
    /// Standard output.
    #[default]
    Stdout,

    /// Any writer, shared with the caller.
    Writer(SharedWriter),
}

/// A cloneable handle to a writer guarded by a mutex.
#[derive(Clone)]
pub struct SharedWriter(Arc<Mutex<dyn Write + Send>>);

impl SharedWriter {
    /// Wraps `writer`.
    pub fn new(writer: impl Write + Send + 'static) -> Self {
        Self(Arc::new(Mutex::new(writer)))
    }

    fn lock(&self) -> MutexGuard<'_, dyn Write + Send + 'static> {
        self.0.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl fmt::Debug for SharedWriter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SharedWriter").finish_non_exhaustive()
    }
}

impl Write for SharedWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.lock().write(buf)
    }

    fn write_all(&mut self, buf: &[u8]) -> io::Result<()> {
        self.lock().write_all(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.lock().flush()
    }
}

/// Holds the lock for the lifetime of one record.
pub struct SharedWriterGuard<'a>(MutexGuard<'a, dyn Write + Send + 'static>);

impl fmt::Debug for SharedWriterGuard<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SharedWriterGuard").finish_non_exhaustive()
    }
}

impl Write for SharedWriterGuard<'_> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.0.flush()
    }
}

impl<'a> MakeWriter<'a> for SharedWriter {
    type Writer = SharedWriterGuard<'a>;

    fn make_writer(&'a self) -> Self::Writer {
        SharedWriterGuard(self.lock())
    }
}
