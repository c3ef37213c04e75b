//! Routing of records to the file and console sinks, and the line format they share.

#![allow(clippy::unwrap_used, clippy::indexing_slicing)]

use std::{
    fs,
    io::{self, Write},
    path::{Path, PathBuf},
    sync::{Arc, Mutex},
    thread,
};

use log_facade::{
    ConsoleTarget, EncoderConfig, Logger, LoggerConfig, Severity, SharedWriter, WriteMode,
};

#[derive(Clone, Default)]
struct Capture(Arc<Mutex<Vec<u8>>>);

impl Write for Capture {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.lock().unwrap().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl Capture {
    fn lines(&self) -> Vec<String> {
        String::from_utf8(self.0.lock().unwrap().clone())
            .unwrap()
            .lines()
            .map(str::to_owned)
            .collect()
    }
}

struct Fixture {
    _dir: tempfile::TempDir,
    low: PathBuf,
    high: PathBuf,
    console: Capture,
}

impl Fixture {
    fn new() -> Self {
        let dir = tempfile::tempdir().unwrap();
        Self {
            low: dir.path().join("app_.log"),
            high: dir.path().join("app_err.log"),
            _dir: dir,
            console: Capture::default(),
        }
    }

    fn config(&self, level: Severity) -> LoggerConfig {
        let mut config = LoggerConfig::new(&self.low, &self.high, level);
        config.console = ConsoleTarget::Writer(SharedWriter::new(self.console.clone()));
        config
    }

    fn logger(&self, level: Severity) -> Logger {
        Logger::build(self.config(level))
    }
}

fn read_lines(path: &Path) -> Vec<String> {
    match fs::read_to_string(path) {
        Ok(contents) => contents.lines().map(str::to_owned).collect(),
        Err(error) if error.kind() == io::ErrorKind::NotFound => Vec::new(),
        Err(error) => std::panic::panic_any(error),
    }
}

fn messages(lines: &[String]) -> Vec<String> {
    lines
        .iter()
        .filter_map(|line| line.split('\t').nth(3).map(str::to_owned))
        .collect()
}

fn emit_every_severity(logger: &Logger) {
    for severity in Severity::ALL {
        logger.log(severity, format_args!("at {severity}"));
    }
}

#[test]
fn files_split_by_severity_above_threshold() {
    for threshold in [Severity::Debug, Severity::Info, Severity::Warn] {
        let fixture = Fixture::new();
        let logger = fixture.logger(threshold);
        emit_every_severity(&logger);
        drop(logger);

        let expected_low: Vec<String> = Severity::ALL
            .into_iter()
            .filter(|s| *s >= threshold && *s < Severity::Warn)
            .map(|s| format!("at {s}"))
            .collect();
        let expected_high: Vec<String> = Severity::ALL
            .into_iter()
            .filter(|s| *s >= Severity::Warn)
            .map(|s| format!("at {s}"))
            .collect();

        assert_eq!(messages(&read_lines(&fixture.low)), expected_low, "{threshold}");
        assert_eq!(messages(&read_lines(&fixture.high)), expected_high, "{threshold}");
    }
}

#[test]
fn records_below_threshold_reach_no_file() {
    let fixture = Fixture::new();
    let logger = fixture.logger(Severity::Error);
    emit_every_severity(&logger);
    drop(logger);

    assert!(read_lines(&fixture.low).is_empty());
    assert_eq!(
        messages(&read_lines(&fixture.high)),
        ["at error", "at panic", "at fatal"]
    );
}

#[test]
fn warn_threshold_scenario() {
    let fixture = Fixture::new();
    let logger = fixture.logger(Severity::Warn);

    logger.log(Severity::Info, format_args!("routine"));
    assert!(fixture.console.lines().is_empty());

    logger.log(Severity::Warn, format_args!("disk at {}%", 91));
    drop(logger);

    assert!(read_lines(&fixture.low).is_empty());
    assert_eq!(messages(&read_lines(&fixture.high)), ["disk at 91%"]);
    assert_eq!(messages(&fixture.console.lines()), ["disk at 91%"]);
}

#[test]
fn debug_threshold_scenario() {
    let fixture = Fixture::new();
    let logger = fixture.logger(Severity::Debug);
    logger.log(Severity::Debug, format_args!("cache miss"));
    drop(logger);

    assert_eq!(messages(&read_lines(&fixture.low)), ["cache miss"]);
    assert!(read_lines(&fixture.high).is_empty());
    assert_eq!(messages(&fixture.console.lines()), ["cache miss"]);
}

#[test]
fn console_threshold_changes_leave_files_alone() {
    let fixture = Fixture::new();
    let logger = fixture.logger(Severity::Warn);

    logger.log(Severity::Debug, format_args!("hidden"));
    logger.set_console_level(Severity::Debug);
    assert_eq!(logger.console_level(), Severity::Debug);
    assert_eq!(logger.level(), Severity::Warn);
    logger.log(Severity::Debug, format_args!("visible on console"));

    logger.console_threshold().set(Severity::Fatal);
    logger.log(Severity::Error, format_args!("file only"));
    drop(logger);

    assert_eq!(messages(&fixture.console.lines()), ["visible on console"]);
    assert!(read_lines(&fixture.low).is_empty());
    assert_eq!(messages(&read_lines(&fixture.high)), ["file only"]);
}

#[test]
fn lines_carry_timestamp_level_and_caller() {
    let fixture = Fixture::new();
    let logger = fixture.logger(Severity::Info);
    let line = line!() + 1;
    logger.log(Severity::Error, format_args!("request failed"));
    drop(logger);

    let file_lines = read_lines(&fixture.high);
    assert_eq!(file_lines, fixture.console.lines());

    let elements: Vec<&str> = file_lines[0].split('\t').collect();
    assert_eq!(elements.len(), 4);

    let timestamp = elements[0];
    assert_eq!(timestamp.len(), "2024-03-05 07:08:09".len());
    assert_eq!(&timestamp[4..5], "-");
    assert_eq!(&timestamp[10..11], " ");
    assert_eq!(&timestamp[13..14], ":");

    assert_eq!(elements[1], "ERROR");
    assert_eq!(elements[2], format!("tests/routing.rs:{line}"));
    assert_eq!(elements[3], "request failed");
}

#[test]
fn panic_and_fatal_are_recorded_without_aborting() {
    let fixture = Fixture::new();
    let logger = fixture.logger(Severity::Info);
    logger.log(Severity::Panic, format_args!("pool exhausted"));
    logger.log(Severity::Fatal, format_args!("giving up"));
    drop(logger);

    let levels: Vec<String> = read_lines(&fixture.high)
        .iter()
        .map(|line| line.split('\t').nth(1).unwrap().to_owned())
        .collect();
    assert_eq!(levels, ["PANIC", "FATAL"]);
}

#[test]
fn concurrent_records_stay_on_their_own_lines() {
    const THREADS: usize = 8;
    const RECORDS: usize = 250;

    let fixture = Fixture::new();
    let logger = Arc::new(fixture.logger(Severity::Debug));

    let handles: Vec<_> = (0..THREADS)
        .map(|worker| {
            let logger = Arc::clone(&logger);
            thread::spawn(move || {
                for record in 0..RECORDS {
                    logger.log(
                        Severity::Info,
                        format_args!("worker {worker} record {record} {}", "x".repeat(64)),
                    );
                }
            })
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }
    drop(logger);

    for lines in [read_lines(&fixture.low), fixture.console.lines()] {
        assert_eq!(lines.len(), THREADS * RECORDS);
        for line in &lines {
            let elements: Vec<&str> = line.split('\t').collect();
            assert_eq!(elements.len(), 4, "{line}");
            assert_eq!(elements[1], "INFO");
            assert!(elements[3].starts_with("worker "), "{line}");
            assert!(elements[3].ends_with(&"x".repeat(64)), "{line}");
        }
    }
}

#[test]
fn non_blocking_writers_flush_on_drop() {
    let fixture = Fixture::new();
    let mut config = fixture.config(Severity::Debug);
    config.write_mode = WriteMode::NonBlocking;
    let logger = Logger::build(config);

    for record in 0..100 {
        logger.log(Severity::Debug, format_args!("queued {record}"));
    }
    logger.log(Severity::Error, format_args!("queued failure"));
    drop(logger);

    assert_eq!(read_lines(&fixture.low).len(), 100);
    assert_eq!(messages(&read_lines(&fixture.high)), ["queued failure"]);
    assert_eq!(fixture.console.lines().len(), 101);
}

#[test]
fn stacktraces_follow_the_record_when_a_key_is_set() {
    let fixture = Fixture::new();
    let mut config = fixture.config(Severity::Info);
    config.encoder = EncoderConfig {
        stacktrace_key: Some("stacktrace"),
        ..EncoderConfig::default()
    };
    let logger = Logger::build(config);
    logger.log(Severity::Info, format_args!("no trace"));
    logger.log(Severity::Warn, format_args!("with trace"));
    drop(logger);

    assert_eq!(read_lines(&fixture.low).len(), 1);
    let high = read_lines(&fixture.high);
    assert!(high[0].ends_with("\twith trace"));
    assert!(high.len() > 1);
}

#[test]
fn tracing_events_share_the_sinks() {
    let fixture = Fixture::new();
    let logger = fixture.logger(Severity::Info);

    tracing::dispatcher::with_default(logger.dispatch(), || {
        tracing::debug!("filtered out");
        tracing::warn!(queue = "ingest", depth = 42_u64, "queue is backing up");
    });
    drop(logger);

    let high = read_lines(&fixture.high);
    assert_eq!(high.len(), 1);
    let elements: Vec<&str> = high[0].split('\t').collect();
    assert_eq!(elements[1], "WARN");
    assert!(elements[2].starts_with("tests/routing.rs:"));
    assert_eq!(elements[3], "queue is backing up");
    assert_eq!(elements[4], r#"{"queue":"ingest","depth":42}"#);
    assert!(read_lines(&fixture.low).is_empty());
}

#[test]
fn timed_scopes_record_elapsed_milliseconds() {
    let fixture = Fixture::new();
    let logger = Arc::new(fixture.logger(Severity::Info));
    {
        let _timed = logger.timed(Severity::Info, "reindex");
        thread::sleep(std::time::Duration::from_millis(5));
    }
    drop(logger);

    let low = read_lines(&fixture.low);
    assert_eq!(low.len(), 1);
    let elements: Vec<&str> = low[0].split('\t').collect();
    assert_eq!(elements[3], "reindex finished");

    let fields: serde_json::Value = serde_json::from_str(elements[4]).unwrap();
    assert!(fields["elapsed"].as_u64().unwrap() >= 5);
}
