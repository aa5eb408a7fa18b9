//! Leveled logging for the headerd crates.

use std::collections::VecDeque;
use std::fmt;
use std::io::{self, Write};
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::{Mutex, OnceLock};
use std::time::{SystemTime, UNIX_EPOCH};

use serde_json::json;

#[derive(Clone, Copy, Debug, Eq, PartialEq, Ord, PartialOrd)]
pub enum Level {
    Error = 1,
    Warn = 2,
    Info = 3,
    Debug = 4,
    Trace = 5,
}

impl Level {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Error => "ERROR",
            Self::Warn => "WARN",
            Self::Info => "INFO",
            Self::Debug => "DEBUG",
            Self::Trace => "TRACE",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "error" => Some(Self::Error),
            "warn" | "warning" => Some(Self::Warn),
            "info" => Some(Self::Info),
            "debug" => Some(Self::Debug),
            "trace" => Some(Self::Trace),
            _ => None,
        }
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Format {
    Text = 0,
    Json = 1,
}

impl Format {
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "text" => Some(Self::Text),
            "json" => Some(Self::Json),
            _ => None,
        }
    }
}

#[derive(Clone, Copy, Debug)]
pub struct LogConfig {
    pub level: Level,
    pub format: Format,
    pub timestamps: bool,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: Level::Info,
            format: Format::Text,
            timestamps: true,
        }
    }
}

pub const LOG_ENV_VAR: &str = "HEADERD_LOG";

impl LogConfig {
    /// Parses a comma separated spec such as `debug,json,notime`. Unknown
    /// tokens are ignored.
    pub fn parse(spec: &str) -> Self {
        let mut config = Self::default();
        for token in spec.split(',').map(str::trim).filter(|t| !t.is_empty()) {
            if let Some(level) = Level::parse(token) {
                config.level = level;
            } else if let Some(format) = Format::parse(token) {
                config.format = format;
            } else if token.eq_ignore_ascii_case("notime") {
                config.timestamps = false;
            }
        }
        config
    }

    pub fn from_env() -> Self {
        std::env::var(LOG_ENV_VAR)
            .map(|spec| Self::parse(&spec))
            .unwrap_or_default()
    }
}

static LOG_LEVEL: AtomicU8 = AtomicU8::new(Level::Info as u8);
static LOG_FORMAT: AtomicU8 = AtomicU8::new(Format::Text as u8);
static LOG_TIMESTAMPS: AtomicBool = AtomicBool::new(true);
static LOG_STDERR_ENABLED: AtomicBool = AtomicBool::new(true);

#[derive(Clone, Debug)]
pub struct LogRecord {
    pub ts_ms: u64,
    pub level: Level,
    pub target: &'static str,
    pub file: &'static str,
    pub line: u32,
    pub msg: String,
}

impl LogRecord {
    pub fn to_json(&self) -> serde_json::Value {
        json!({
            "ts_ms": self.ts_ms,
            "level": self.level.as_str(),
            "target": self.target,
            "file": self.file,
            "line": self.line,
            "msg": self.msg,
        })
    }
}

struct Capture {
    capacity: usize,
    records: VecDeque<LogRecord>,
}

static CAPTURE_ENABLED: AtomicBool = AtomicBool::new(false);
static CAPTURE: OnceLock<Mutex<Capture>> = OnceLock::new();

fn capture_buffer() -> &'static Mutex<Capture> {
    CAPTURE.get_or_init(|| {
        Mutex::new(Capture {
            capacity: 0,
            records: VecDeque::new(),
        })
    })
}

pub fn init(config: LogConfig) {
    LOG_LEVEL.store(config.level as u8, Ordering::Relaxed);
    LOG_FORMAT.store(config.format as u8, Ordering::Relaxed);
    LOG_TIMESTAMPS.store(config.timestamps, Ordering::Relaxed);
}

/// Keeps the latest `capacity` records in memory; zero turns capture off.
pub fn enable_capture(capacity: usize) {
    if capacity == 0 {
        disable_capture();
        return;
    }
    if let Ok(mut capture) = capture_buffer().lock() {
        capture.capacity = capacity;
        while capture.records.len() > capacity {
            capture.records.pop_front();
        }
    }
    CAPTURE_ENABLED.store(true, Ordering::Relaxed);
}

pub fn disable_capture() {
    CAPTURE_ENABLED.store(false, Ordering::Relaxed);
}

pub fn clear_captured_logs() {
    if let Ok(mut capture) = capture_buffer().lock() {
        capture.records.clear();
    }
}

pub fn set_stderr_enabled(enabled: bool) {
    LOG_STDERR_ENABLED.store(enabled, Ordering::Relaxed);
}

/// The most recent `limit` captured records, oldest first.
pub fn capture_snapshot(limit: usize) -> Vec<LogRecord> {
    let Ok(capture) = capture_buffer().lock() else {
        return Vec::new();
    };
    let start = capture.records.len().saturating_sub(limit);
    capture.records.iter().skip(start).cloned().collect()
}

pub fn enabled(level: Level) -> bool {
    level as u8 <= LOG_LEVEL.load(Ordering::Relaxed)
}

fn current_format() -> Format {
    match LOG_FORMAT.load(Ordering::Relaxed) {
        1 => Format::Json,
        _ => Format::Text,
    }
}

pub fn log(
    level: Level,
    target: &'static str,
    file: &'static str,
    line: u32,
    args: fmt::Arguments<'_>,
) {
    if !enabled(level) {
        return;
    }

    let now = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default();
    let record = LogRecord {
        ts_ms: now.as_millis().try_into().unwrap_or(u64::MAX),
        level,
        target,
        file,
        line,
        msg: args.to_string(),
    };

    if LOG_STDERR_ENABLED.load(Ordering::Relaxed) {
        let mut out = io::stderr().lock();
        let _ = match current_format() {
            Format::Json => writeln!(out, "{}", record.to_json()),
            Format::Text if LOG_TIMESTAMPS.load(Ordering::Relaxed) => {
                let ts = Timestamp {
                    unix_seconds: now.as_secs(),
                    millis: now.subsec_millis(),
                };
                writeln!(out, "{ts} {} {}: {}", level.as_str(), target, record.msg)
            }
            Format::Text => writeln!(out, "{} {}: {}", level.as_str(), target, record.msg),
        };
    }

    if CAPTURE_ENABLED.load(Ordering::Relaxed) {
        let Ok(mut capture) = capture_buffer().lock() else {
            return;
        };
        if capture.capacity == 0 {
            return;
        }
        capture.records.push_back(record);
        while capture.records.len() > capture.capacity {
            capture.records.pop_front();
        }
    }
}

#[macro_export]
macro_rules! log_at {
    ($level:expr, $($arg:tt)*) => {{
        if $crate::enabled($level) {
            $crate::log($level, module_path!(), file!(), line!(), format_args!($($arg)*));
        }
    }};
}

#[macro_export]
macro_rules! log_error {
    ($($arg:tt)*) => {{
        $crate::log_at!($crate::Level::Error, $($arg)*);
    }};
}

#[macro_export]
macro_rules! log_warn {
    ($($arg:tt)*) => {{
        $crate::log_at!($crate::Level::Warn, $($arg)*);
    }};
}

#[macro_export]
macro_rules! log_info {
    ($($arg:tt)*) => {{
        $crate::log_at!($crate::Level::Info, $($arg)*);
    }};
}

#[macro_export]
macro_rules! log_debug {
    ($($arg:tt)*) => {{
        $crate::log_at!($crate::Level::Debug, $($arg)*);
    }};
}

#[macro_export]
macro_rules! log_trace {
    ($($arg:tt)*) => {{
        $crate::log_at!($crate::Level::Trace, $($arg)*);
    }};
}

struct Timestamp {
    unix_seconds: u64,
    millis: u32,
}

impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        const SECS_PER_DAY: u64 = 86_400;
        let days = (self.unix_seconds / SECS_PER_DAY) as i64;
        let secs_of_day = self.unix_seconds % SECS_PER_DAY;
        let hour = secs_of_day / 3600;
        let minute = (secs_of_day % 3600) / 60;
        let second = secs_of_day % 60;
        let (year, month, day) = civil_from_days(days);
        write!(
            f,
            "{year:04}-{month:02}-{day:02}T{hour:02}:{minute:02}:{second:02}.{millis:03}Z",
            millis = self.millis
        )
    }
}

fn civil_from_days(days_since_unix_epoch: i64) -> (i32, u32, u32) {
    // From Howard Hinnant's "civil_from_days" algorithm (public domain).
    let z = days_since_unix_epoch + 719_468;
    let era = if z >= 0 { z } else { z - 146_096 } / 146_097;
    let doe = (z - era * 146_097) as u32;
    let yoe = (doe - doe / 1460 + doe / 36_524 - doe / 146_096) / 365;
    let y = (yoe as i32) + (era as i32) * 400;
    let doy = doe - (365 * yoe + yoe / 4 - yoe / 100);
    let mp = (5 * doy + 2) / 153;
    let d = doy - (153 * mp + 2) / 5 + 1;
    let m = if mp < 10 { mp + 3 } else { mp - 9 };
    let year = y + if m <= 2 { 1 } else { 0 };
    (year, m, d)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_level() {
        assert_eq!(Level::parse("info"), Some(Level::Info));
        assert_eq!(Level::parse("WARN"), Some(Level::Warn));
        assert_eq!(Level::parse("warning"), Some(Level::Warn));
        assert_eq!(Level::parse("debug"), Some(Level::Debug));
        assert_eq!(Level::parse("nope"), None);
    }

    #[test]
    fn parse_config_spec() {
        let config = LogConfig::parse("debug, json ,notime,bogus");
        assert_eq!(config.level, Level::Debug);
        assert_eq!(config.format, Format::Json);
        assert!(!config.timestamps);

        let config = LogConfig::parse("");
        assert_eq!(config.level, Level::Info);
        assert_eq!(config.format, Format::Text);
        assert!(config.timestamps);
    }

    #[test]
    fn capture_keeps_latest_records() {
        set_stderr_enabled(false);
        enable_capture(2);
        clear_captured_logs();
        log_warn!("first {}", 1);
        log_warn!("second");
        log_warn!("third");
        let records = capture_snapshot(10);
        let messages: Vec<&str> = records.iter().map(|r| r.msg.as_str()).collect();
        assert!(messages.ends_with(&["second", "third"]));
        assert!(records.iter().all(|r| r.level == Level::Warn));
    }

    #[test]
    fn parse_format() {
        assert_eq!(Format::parse("text"), Some(Format::Text));
        assert_eq!(Format::parse("JSON"), Some(Format::Json));
        assert_eq!(Format::parse("nope"), None);
    }
}
