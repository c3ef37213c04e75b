//! Severity levels and level-name parsing.

use std::{fmt, str::FromStr};

use serde::{Deserialize, Serialize};
use tracing::Level;

use crate::LoggerError;

/// Ordered log severity.
///
/// `Debug < Info < Warn < Error < Panic < Fatal`. The same ordering drives both the static
/// routing between the two log files and the live console threshold.
#[derive(
    Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    /// Verbose diagnostics.
    Debug,

    /// Routine operational messages.
    #[default]
    Info,

    /// Something unexpected that the program recovered from.
    Warn,

    /// An operation failed.
    Error,

    /// An unrecoverable condition; [`crate::panic()`] aborts the calling thread after recording.
    Panic,

    /// The most severe level. Recorded only, never acted upon.
    Fatal,
}

impl Severity {
    /// All severities in ascending order.
    pub const ALL: [Self; 6] = [
        Self::Debug,
        Self::Info,
        Self::Warn,
        Self::Error,
        Self::Panic,
        Self::Fatal,
    ];

    /// Lowercase level name, as accepted by [`Severity::from_name`].
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Debug => "debug",
            Self::Info => "info",
            Self::Warn => "warn",
            Self::Error => "error",
            Self::Panic => "panic",
            Self::Fatal => "fatal",
        }
    }

    /// Uppercase label used by the capital level encoding.
    pub const fn capital_str(self) -> &'static str {
        match self {
            Self::Debug => "DEBUG",
            Self::Info => "INFO",
            Self::Warn => "WARN",
            Self::Error => "ERROR",
            Self::Panic => "PANIC",
            Self::Fatal => "FATAL",
        }
    }

    /// Looks up one of the lowercase level names.
    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|severity| severity.as_str() == name)
    }

    /// Like [`Severity::from_name`], but coerces anything unrecognized (including an empty
    /// string) to [`Severity::Info`].
    pub fn from_name_or_default(name: &str) -> Self {
        Self::from_name(name).unwrap_or_default()
    }

    /// The `tracing` level events of this severity are emitted at.
    ///
    /// `tracing` has no levels above `ERROR`, so `Panic` and `Fatal` share it; the exact
    /// severity travels with the event as a separate field.
    pub const fn tracing_level(self) -> Level {
        match self {
            Self::Debug => Level::DEBUG,
            Self::Info => Level::INFO,
            Self::Warn => Level::WARN,
            Self::Error | Self::Panic | Self::Fatal => Level::ERROR,
        }
    }

    pub(crate) const fn to_u8(self) -> u8 {
        match self {
            Self::Debug => 0,
            Self::Info => 1,
            Self::Warn => 2,
            Self::Error => 3,
            Self::Panic => 4,
            Self::Fatal => 5,
        }
    }

    pub(crate) const fn from_u8(value: u8) -> Self {
        match value {
            0 => Self::Debug,
            1 => Self::Info,
            2 => Self::Warn,
            3 => Self::Error,
            4 => Self::Panic,
            _ => Self::Fatal,
        }
    }
}

impl From<Level> for Severity {
    fn from(level: Level) -> Self {
        if level == Level::ERROR {
            Self::Error
        } else if level == Level::WARN {
            Self::Warn
        } else if level == Level::INFO {
            Self::Info
        } else {
            Self::Debug
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Strict parsing: accepts the lowercase names and their uppercase forms.
impl FromStr for Severity {
    type Err = LoggerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|severity| severity.as_str() == s || severity.capital_str() == s)
            .ok_or_else(|| LoggerError::UnknownSeverity(s.to_owned()))
    }
}
