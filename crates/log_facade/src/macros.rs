//! Format-string front ends for the leveled functions.

/// Records a formatted message at [`Severity::Debug`](crate::Severity::Debug).
///
/// ```no_run
/// let key = "user:42";
/// log_facade::debug!("cache miss for {key}");
/// ```
#[macro_export]
macro_rules! debug {
    ($($arg:tt)+) => {
        $crate::debug(::std::format_args!($($arg)+))
    };
}

/// Records a formatted message at [`Severity::Info`](crate::Severity::Info).
#[macro_export]
macro_rules! info {
    ($($arg:tt)+) => {
        $crate::info(::std::format_args!($($arg)+))
    };
}

/// Records a formatted message at [`Severity::Warn`](crate::Severity::Warn).
#[macro_export]
macro_rules! warn {
    ($($arg:tt)+) => {
        $crate::warn(::std::format_args!($($arg)+))
    };
}

/// Records a formatted message at [`Severity::Error`](crate::Severity::Error).
#[macro_export]
macro_rules! error {
    ($($arg:tt)+) => {
        $crate::error(::std::format_args!($($arg)+))
    };
}

/// Records a formatted message at [`Severity::Panic`](crate::Severity::Panic), then panics
/// with it.
///
/// ```no_run
/// log_facade::panic!("invariant violated: {} pending", 3);
/// ```
#[macro_export]
macro_rules! panic {
    ($($arg:tt)+) => {
        $crate::panic(::std::format_args!($($arg)+))
    };
}
