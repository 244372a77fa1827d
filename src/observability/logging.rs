//! Leveled JSON logger.
//!
//! # Responsibilities
//! - Serialize log entries as one JSON object per line
//! - Filter entries below a fixed minimum severity
//! - Serialize writes to the shared sink
//!
//! # Design Decisions
//! - Formatting happens outside the lock; only the write is exclusive
//! - Stack traces are captured for ERROR and above only
//! - `fatal` never exits by itself: it hands back a [`Fatal`] token and the
//!   binary decides when to terminate

use std::backtrace::Backtrace;
use std::collections::BTreeMap;
use std::fmt;
use std::io::Write;
use std::str::FromStr;
use std::sync::{Mutex, PoisonError};

use chrono::{SecondsFormat, Utc};
use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// Ordered string properties attached to a log entry.
pub type Properties = BTreeMap<String, String>;

/// Build a [`Properties`] map from `key => value` pairs.
///
/// Values are rendered with their `Display` implementation.
#[macro_export]
macro_rules! props {
    () => {
        $crate::observability::logging::Properties::new()
    };
    ($($key:expr => $value:expr),+ $(,)?) => {{
        let mut properties = $crate::observability::logging::Properties::new();
        $(properties.insert(($key).to_string(), ($value).to_string());)+
        properties
    }};
}

/// Severity of a log entry.
///
/// `Off` is only meaningful as a minimum threshold; nothing is ever logged at it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub enum Level {
    #[default]
    Info,
    Error,
    Fatal,
    Off,
}

impl Level {
    pub fn as_str(&self) -> &'static str {
        match self {
            Level::Info => "INFO",
            Level::Error => "ERROR",
            Level::Fatal => "FATAL",
            Level::Off => "",
        }
    }
}

impl fmt::Display for Level {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error returned when parsing an unknown level name.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown log level '{0}' (expected info, error, fatal or off)")]
pub struct ParseLevelError(String);

impl FromStr for Level {
    type Err = ParseLevelError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "info" => Ok(Level::Info),
            "error" => Ok(Level::Error),
            "fatal" => Ok(Level::Fatal),
            "off" => Ok(Level::Off),
            _ => Err(ParseLevelError(s.to_string())),
        }
    }
}

impl Serialize for Level {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for Level {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}

/// Failure to write an entry to the sink.
#[derive(Debug, thiserror::Error)]
#[error("failed to write log entry: {0}")]
pub struct LogError(#[from] std::io::Error);

/// One serialized log line. Field order is the wire order.
#[derive(Serialize)]
struct Entry<'a> {
    level: Level,
    time: String,
    message: &'a str,
    #[serde(skip_serializing_if = "no_properties")]
    properties: &'a Properties,
    #[serde(skip_serializing_if = "Option::is_none")]
    trace: Option<String>,
}

fn no_properties(properties: &&Properties) -> bool {
    properties.is_empty()
}

/// Marker returned by [`Logger::fatal`].
///
/// Holding one means a FATAL entry was emitted and the process must stop.
#[must_use = "a fatal entry was logged; call `exit` to terminate the process"]
#[derive(Debug)]
pub struct Fatal {
    written: Result<usize, LogError>,
}

impl Fatal {
    /// Result of the attempted write.
    pub fn written(&self) -> Result<usize, &LogError> {
        self.written.as_ref().copied()
    }

    /// Terminate the process with status 1.
    pub fn exit(self) -> ! {
        std::process::exit(1)
    }
}

/// Thread-safe leveled logger writing JSON lines to a sink.
pub struct Logger {
    out: Mutex<Box<dyn Write + Send>>,
    min_level: Level,
}

impl Logger {
    /// Create a logger that writes entries at or above `min_level` to `out`.
    pub fn new<W>(out: W, min_level: Level) -> Self
    where
        W: Write + Send + 'static,
    {
        Self {
            out: Mutex::new(Box::new(out)),
            min_level,
        }
    }

    /// Logger writing to the process's standard output.
    pub fn stdout(min_level: Level) -> Self {
        Self::new(std::io::stdout(), min_level)
    }

    /// Whether an entry at `level` would be written.
    pub fn enabled(&self, level: Level) -> bool {
        level != Level::Off && level >= self.min_level
    }

    pub fn info(&self, message: &str, properties: &Properties) -> Result<usize, LogError> {
        self.log(Level::Info, message, properties)
    }

    pub fn error(&self, cause: impl fmt::Display, properties: &Properties) -> Result<usize, LogError> {
        self.log(Level::Error, &cause.to_string(), properties)
    }

    /// Write a FATAL entry. The write result does not matter: the caller is
    /// expected to call [`Fatal::exit`] immediately afterwards.
    pub fn fatal(&self, cause: impl fmt::Display, properties: &Properties) -> Fatal {
        Fatal {
            written: self.log(Level::Fatal, &cause.to_string(), properties),
        }
    }

    /// Shared write path. Entries below the threshold produce no I/O.
    pub fn log(&self, level: Level, message: &str, properties: &Properties) -> Result<usize, LogError> {
        if !self.enabled(level) {
            return Ok(0);
        }

        let mut line = render(level, message, properties);
        line.push(b'\n');

        let mut out = self.out.lock().unwrap_or_else(PoisonError::into_inner);
        out.write_all(&line)?;
        out.flush()?;
        Ok(line.len())
    }
}

impl fmt::Debug for Logger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Logger")
            .field("min_level", &self.min_level)
            .finish_non_exhaustive()
    }
}

fn render(level: Level, message: &str, properties: &Properties) -> Vec<u8> {
    let entry = Entry {
        level,
        time: Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true),
        message,
        properties,
        trace: (level >= Level::Error).then(|| Backtrace::force_capture().to_string()),
    };

    serde_json::to_vec(&entry).unwrap_or_else(|err| fallback_line(&err))
}

fn fallback_line(cause: &dyn fmt::Display) -> Vec<u8> {
    format!("{}: unable to marshal log message: {}", Level::Error, cause).into_bytes()
}
