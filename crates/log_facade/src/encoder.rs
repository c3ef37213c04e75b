//! Line encoding shared by every sink.
//!
//! Records are rendered as tab-separated elements, in this order: timestamp, level, caller,
//! message. Structured fields, if any, follow as a compact JSON object, and a stack trace,
//! if one is attached and the encoder names a key for it, follows on the next lines.

use std::time::Duration;

use serde::ser::{Serialize, SerializeMap, Serializer};
use serde_json::Value;
use time::{
    format_description::BorrowedFormatItem, macros::format_description, OffsetDateTime, UtcOffset,
};

use crate::{LoggerError, Severity};

const DATE_TIME_SECONDS: &[BorrowedFormatItem<'static>] =
    format_description!("[year]-[month]-[day] [hour]:[minute]:[second]");

/// How timestamps are rendered.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TimeEncoding {
    /// `YYYY-MM-DD HH:MM:SS`.
    DateTimeSeconds,

    /// RFC 3339 with sub-second precision.
    Rfc3339,

    /// Milliseconds since the Unix epoch.
    EpochMillis,
}

impl TimeEncoding {
    /// Renders `time`.
    pub fn encode(self, time: OffsetDateTime) -> String {
        match self {
            Self::DateTimeSeconds => time.format(DATE_TIME_SECONDS).unwrap_or_default(),
            Self::Rfc3339 => time
                .format(&time::format_description::well_known::Rfc3339)
                .unwrap_or_default(),
            Self::EpochMillis => (time.unix_timestamp_nanos() / 1_000_000).to_string(),
        }
    }
}

/// How the severity is rendered.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LevelEncoding {
    /// `INFO`, `WARN`, ...
    Capital,

    /// `info`, `warn`, ...
    Lowercase,
}

impl LevelEncoding {
    /// Renders `severity`.
    pub const fn encode(self, severity: Severity) -> &'static str {
        match self {
            Self::Capital => severity.capital_str(),
            Self::Lowercase => severity.as_str(),
        }
    }
}

/// How the caller location is rendered.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CallerEncoding {
    /// Parent directory, file name and line: `logger/src/lib.rs:42` becomes `src/lib.rs:42`.
    Short,

    /// The path exactly as the compiler recorded it.
    Full,
}

impl CallerEncoding {
    /// Renders a `file:line` pair.
    pub fn encode(self, caller: &Caller<'_>) -> String {
        let file = match self {
            Self::Short => trim_to_parent_dir(caller.file),
            Self::Full => caller.file,
        };
        format!("{file}:{}", caller.line)
    }
}

/// How durations in structured fields are rendered.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DurationEncoding {
    /// Whole milliseconds as an integer.
    Millis,

    /// Fractional seconds.
    Seconds,

    /// Whole nanoseconds as an integer.
    Nanos,
}

impl DurationEncoding {
    /// Renders `duration` as a JSON value.
    pub fn encode(self, duration: Duration) -> Value {
        match self {
            Self::Millis => Value::from(u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)),
            Self::Seconds => Value::from(duration.as_secs_f64()),
            Self::Nanos => Value::from(u64::try_from(duration.as_nanos()).unwrap_or(u64::MAX)),
        }
    }
}

/// Field names and formatting functions shared by all sinks.
///
/// An empty key omits the corresponding element from the line.
#[derive(Clone, Copy, Debug)]
pub struct EncoderConfig {
    /// Key of the message element.
    pub message_key: &'static str,

    /// Key of the level element.
    pub level_key: &'static str,

    /// Key of the timestamp element.
    pub time_key: &'static str,

    /// Key of the caller element.
    pub caller_key: &'static str,

    /// Key of the stack trace. Stack traces are only rendered when this is set.
    pub stacktrace_key: Option<&'static str>,

    /// Timestamp rendering.
    pub time: TimeEncoding,

    /// Offset timestamps are converted to before rendering. `None` renders in the system's
    /// local time zone, looked up for each record so daylight saving changes are followed.
    pub utc_offset: Option<UtcOffset>,

    /// Level rendering.
    pub level: LevelEncoding,

    /// Caller rendering.
    pub caller: CallerEncoding,

    /// Duration rendering.
    pub duration: DurationEncoding,

    /// Appended after every record.
    pub line_ending: &'static str,
}

impl Default for EncoderConfig {
    fn default() -> Self {
        Self {
            message_key: crate::keys::MESSAGE,
            level_key: crate::keys::LEVEL,
            time_key: crate::keys::TIME,
            caller_key: crate::keys::CALLER,
            stacktrace_key: None,
            time: TimeEncoding::DateTimeSeconds,
            utc_offset: None,
            level: LevelEncoding::Capital,
            caller: CallerEncoding::Short,
            duration: DurationEncoding::Millis,
            line_ending: "\n",
        }
    }
}

/// Source location of the code that emitted a record.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Caller<'a> {
    /// Source file path.
    pub file: &'a str,

    /// Line number.
    pub line: u32,
}

/// A log record, borrowed for the duration of encoding.
#[derive(Debug)]
pub(crate) struct Record<'a> {
    pub(crate) severity: Severity,
    pub(crate) time: OffsetDateTime,
    pub(crate) caller: Option<Caller<'a>>,
    pub(crate) message: &'a str,
    pub(crate) fields: &'a [(&'a str, Value)],
    pub(crate) elapsed: Option<Duration>,
    pub(crate) stacktrace: Option<&'a str>,
}

/// Encodes records into complete lines.
#[derive(Clone, Copy, Debug)]
pub struct LineEncoder {
    config: EncoderConfig,
}

impl LineEncoder {
    /// Creates an encoder from its configuration.
    pub fn new(config: EncoderConfig) -> Self {
        Self { config }
    }

    /// The configuration this encoder was built from.
    pub fn config(&self) -> &EncoderConfig {
        &self.config
    }

    /// Renders `record` into a single buffer so it can be written with one `write_all`.
    pub(crate) fn encode(&self, record: &Record<'_>) -> Result<Vec<u8>, LoggerError> {
        let config = &self.config;
        let mut elements: Vec<String> = Vec::with_capacity(5);

        if !config.time_key.is_empty() {
            let offset = config
                .utc_offset
                .unwrap_or_else(|| local_offset_at(record.time));
            elements.push(config.time.encode(record.time.to_offset(offset)));
        }
        if !config.level_key.is_empty() {
            elements.push(config.level.encode(record.severity).to_owned());
        }
        if !config.caller_key.is_empty() {
            if let Some(caller) = &record.caller {
                elements.push(config.caller.encode(caller));
            }
        }
        if !config.message_key.is_empty() {
            elements.push(record.message.to_owned());
        }
        if !record.fields.is_empty() || record.elapsed.is_some() {
            let fields = Fields {
                values: record.fields,
                elapsed: record
                    .elapsed
                    .map(|elapsed| (crate::keys::ELAPSED, config.duration.encode(elapsed))),
            };
            elements.push(serde_json::to_string(&fields)?);
        }

        let mut line = elements.join("\t");
        if let (Some(_), Some(stacktrace)) = (config.stacktrace_key, record.stacktrace) {
            line.push('\n');
            line.push_str(stacktrace.trim_end());
        }
        line.push_str(config.line_ending);

        Ok(line.into_bytes())
    }
}

struct Fields<'a> {
    values: &'a [(&'a str, Value)],
    elapsed: Option<(&'static str, Value)>,
}

impl Serialize for Fields<'_> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map_serializer = serializer.serialize_map(None)?;
        for (key, value) in self.values {
            map_serializer.serialize_entry(key, value)?;
        }
        if let Some((key, value)) = &self.elapsed {
            map_serializer.serialize_entry(key, value)?;
        }
        map_serializer.end()
    }
}

/// `chrono` reads the zone database itself, so this works with any number of threads running,
/// unlike `UtcOffset::current_local_offset`.
fn local_offset_at(time: OffsetDateTime) -> UtcOffset {
    chrono::DateTime::from_timestamp(time.unix_timestamp(), 0)
        .map(|utc| utc.with_timezone(&chrono::Local).offset().local_minus_utc())
        .and_then(|seconds| UtcOffset::from_whole_seconds(seconds).ok())
        .unwrap_or(UtcOffset::UTC)
}

fn trim_to_parent_dir(path: &str) -> &str {
    let mut separators = path.rmatch_indices(['/', '\\']);
    match (separators.next(), separators.next()) {
        (Some(_), Some((index, _))) => path.get(index + 1..).unwrap_or(path),
        _ => path,
    }
}
