//! Sinks and the [`tracing_subscriber::Layer`] ([`TeeLayer`]) that fans records out to them.
//!
//! A [`Sink`] pairs an encoder, a destination writer and a [`SeverityEnabler`]. The tee layer
//! captures each event once and hands it to every sink whose enabler accepts the record's
//! severity.

use std::{
    fmt,
    io::Write,
    sync::{
        atomic::{AtomicU8, Ordering},
        Arc,
    },
    time::Duration,
};

use serde_json::Value;
use time::OffsetDateTime;
use tracing::{
    field::{Field, Visit},
    Event, Subscriber,
};
use tracing_subscriber::{
    fmt::{writer::BoxMakeWriter, MakeWriter},
    layer::Context,
    Layer,
};

use crate::{
    encoder::{Caller, LineEncoder, Record},
    keys, Severity,
};

/// Decides whether a record of a given severity is delivered to a sink.
pub trait SeverityEnabler: Send + Sync + 'static {
    /// Returns `true` if records at `severity` should be written.
    fn enabled(&self, severity: Severity) -> bool;
}

/// A static threshold: accepts everything at or above it.
impl SeverityEnabler for Severity {
    fn enabled(&self, severity: Severity) -> bool {
        severity >= *self
    }
}

impl<T: SeverityEnabler + ?Sized> SeverityEnabler for Arc<T> {
    fn enabled(&self, severity: Severity) -> bool {
        (**self).enabled(severity)
    }
}

/// Adapts a closure into a [`SeverityEnabler`].
#[derive(Clone, Copy)]
pub struct EnablerFn<F>(pub F);

impl<F> fmt::Debug for EnablerFn<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EnablerFn").finish_non_exhaustive()
    }
}

impl<F> SeverityEnabler for EnablerFn<F>
where
    F: Fn(Severity) -> bool + Send + Sync + 'static,
{
    fn enabled(&self, severity: Severity) -> bool {
        (self.0)(severity)
    }
}

/// Accepts severities below [`Severity::Warn`] that reach `threshold`.
pub fn low_severity_enabler(threshold: Severity) -> impl SeverityEnabler + fmt::Debug {
    EnablerFn(move |severity: Severity| severity < Severity::Warn && severity >= threshold)
}

/// Accepts severities from [`Severity::Warn`] upwards that reach `threshold`.
pub fn high_severity_enabler(threshold: Severity) -> impl SeverityEnabler + fmt::Debug {
    EnablerFn(move |severity: Severity| severity >= Severity::Warn && severity >= threshold)
}

/// A severity threshold that can be changed while records are being emitted.
#[derive(Debug)]
pub struct AtomicThreshold(AtomicU8);

impl AtomicThreshold {
    /// Creates a threshold starting at `severity`.
    pub fn new(severity: Severity) -> Self {
        Self(AtomicU8::new(severity.to_u8()))
    }

    /// The current threshold.
    pub fn get(&self) -> Severity {
        Severity::from_u8(self.0.load(Ordering::Relaxed))
    }

    /// Replaces the threshold.
    pub fn set(&self, severity: Severity) {
        self.0.store(severity.to_u8(), Ordering::Relaxed);
    }

    /// Replaces the threshold, returning the previous one.
    pub fn swap(&self, severity: Severity) -> Severity {
        Severity::from_u8(self.0.swap(severity.to_u8(), Ordering::Relaxed))
    }
}

/// Starts at [`Severity::Info`].
impl Default for AtomicThreshold {
    fn default() -> Self {
        Self::new(Severity::default())
    }
}

impl SeverityEnabler for AtomicThreshold {
    fn enabled(&self, severity: Severity) -> bool {
        severity >= self.get()
    }
}

/// One output destination: encoder, writer and enabler.
pub struct Sink {
    encoder: Arc<LineEncoder>,
    writer: BoxMakeWriter,
    enabler: Box<dyn SeverityEnabler>,
}

impl Sink {
    /// Creates a sink writing records accepted by `enabler` to `writer`.
    pub fn new<W, E>(encoder: Arc<LineEncoder>, writer: W, enabler: E) -> Self
    where
        W: for<'a> MakeWriter<'a> + Send + Sync + 'static,
        E: SeverityEnabler,
    {
        Self {
            encoder,
            writer: BoxMakeWriter::new(writer),
            enabler: Box::new(enabler),
        }
    }

    /// Encodes and writes `record`.
    ///
    /// The whole line goes out in a single `write_all` so concurrent records never interleave.
    fn write(&self, record: &Record<'_>) -> Result<(), crate::LoggerError> {
        let buffer = self.encoder.encode(record)?;
        let mut writer = self.writer.make_writer();
        writer.write_all(&buffer)?;
        writer.flush()?;
        Ok(())
    }
}

impl fmt::Debug for Sink {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Sink")
            .field("encoder", &self.encoder)
            .finish_non_exhaustive()
    }
}

/// A [`tracing_subscriber::Layer`] delivering each event to every [`Sink`] that accepts it.
#[derive(Debug, Default)]
pub struct TeeLayer {
    sinks: Vec<Sink>,
}

impl TeeLayer {
    /// Creates a layer from its sinks.
    pub fn new(sinks: impl IntoIterator<Item = Sink>) -> Self {
        Self {
            sinks: sinks.into_iter().collect(),
        }
    }
}

impl<S: Subscriber> Layer<S> for TeeLayer {
    fn on_event(&self, event: &Event<'_>, _ctx: Context<'_, S>) {
        let mut captured = EventFields::default();
        event.record(&mut captured);

        let metadata = event.metadata();
        let severity = captured
            .severity
            .unwrap_or_else(|| Severity::from(*metadata.level()));

        if !self.sinks.iter().any(|sink| sink.enabler.enabled(severity)) {
            return;
        }

        let caller = match (captured.file.as_deref(), captured.line) {
            (Some(file), Some(line)) => Some(Caller { file, line }),
            _ => metadata
                .file()
                .zip(metadata.line())
                .map(|(file, line)| Caller { file, line }),
        };

        let record = Record {
            severity,
            time: OffsetDateTime::now_utc(),
            caller,
            message: captured
                .message
                .as_deref()
                .unwrap_or_else(|| metadata.target()),
            fields: &captured.values,
            elapsed: captured.elapsed,
            stacktrace: captured.stacktrace.as_deref(),
        };

        for sink in self.sinks.iter().filter(|sink| sink.enabler.enabled(severity)) {
            // Logging must never fail the caller.
            let _ = sink.write(&record);
        }
    }
}

/// Key-value data captured from one event.
///
/// Fields under the crate's reserved keys carry the record's exact severity, caller location,
/// stack trace and elapsed time; every other field is kept for the structured part of the line.
#[derive(Debug, Default)]
pub(crate) struct EventFields {
    message: Option<String>,
    severity: Option<Severity>,
    file: Option<String>,
    line: Option<u32>,
    stacktrace: Option<String>,
    elapsed: Option<Duration>,
    values: Vec<(&'static str, Value)>,
}

impl EventFields {
    fn record_value(&mut self, key: &'static str, value: Value) {
        if !keys::RESERVED_FIELDS.contains(key) {
            self.values.push((key, value));
        }
    }

    fn record_unsigned(&mut self, key: &'static str, value: u64) {
        match key {
            keys::SEVERITY_FIELD => {
                self.severity = u8::try_from(value).ok().map(Severity::from_u8);
            }
            keys::LINE_FIELD => self.line = u32::try_from(value).ok(),
            keys::ELAPSED_FIELD => self.elapsed = Some(Duration::from_nanos(value)),
            _ => self.record_value(key, Value::from(value)),
        }
    }
}

impl Visit for EventFields {
    fn record_f64(&mut self, field: &Field, value: f64) {
        self.record_value(field.name(), Value::from(value));
    }

    fn record_i64(&mut self, field: &Field, value: i64) {
        match u64::try_from(value) {
            Ok(unsigned) => self.record_unsigned(field.name(), unsigned),
            Err(_) => self.record_value(field.name(), Value::from(value)),
        }
    }

    fn record_u64(&mut self, field: &Field, value: u64) {
        self.record_unsigned(field.name(), value);
    }

    fn record_bool(&mut self, field: &Field, value: bool) {
        self.record_value(field.name(), Value::from(value));
    }

    fn record_str(&mut self, field: &Field, value: &str) {
        match field.name() {
            keys::MESSAGE_FIELD => self.message = Some(value.to_owned()),
            keys::FILE_FIELD => self.file = Some(value.to_owned()),
            keys::STACKTRACE_FIELD => self.stacktrace = Some(value.to_owned()),
            name => self.record_value(name, Value::from(value)),
        }
    }

    fn record_debug(&mut self, field: &Field, value: &dyn fmt::Debug) {
        match field.name() {
            keys::MESSAGE_FIELD => {
                if self.message.is_none() {
                    self.message = Some(format!("{value:?}"));
                }
            }
            keys::STACKTRACE_FIELD => self.stacktrace = Some(format!("{value:?}")),
            // Fields bridged from the `log` crate.
            name if name.starts_with("log.") => (),
            name => {
                let name = name.strip_prefix("r#").unwrap_or(name);
                self.record_value(name, Value::from(format!("{value:?}")));
            }
        }
    }
}
