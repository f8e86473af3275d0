//! Logging for the culling subsystems
//!
//! Every subsystem reports through the global logger held by `Engine`.
//! Sources follow the `culling::<Subsystem>` convention, e.g.
//! `culling::TileMap` or `culling::ResourcePreviewer`. Errors carry the
//! file and line of the call site.
//!
//! The tile map rebuild and the preview worker log per quadrant and per
//! request at `Debug`; hosts that find this too chatty install a
//! `DefaultLogger` with a higher floor:
//!
//! ```no_run
//! use scene_culling::culling::{Engine, log::{DefaultLogger, LogSeverity}};
//!
//! Engine::set_logger(DefaultLogger::new(LogSeverity::Warn));
//! ```

use colored::*;
use std::time::SystemTime;
use chrono::{DateTime, Local};

/// Sink for log entries
///
/// Implement this trait to route culling logs into the host's own
/// console, file or editor panel.
pub trait Logger: Send + Sync {
    /// Record one entry
    fn log(&self, entry: &LogEntry);

    /// Whether entries of this severity are wanted at all
    ///
    /// Checked before the message is handed over, so filtered entries
    /// skip building a `LogEntry`.
    fn enabled(&self, _severity: LogSeverity) -> bool {
        true
    }
}

/// One log record
#[derive(Debug, Clone)]
pub struct LogEntry {
    pub severity: LogSeverity,
    pub timestamp: SystemTime,
    /// Subsystem, e.g. "culling::PortalScenario"
    pub source: String,
    pub message: String,
    /// Call site, set for `Error` entries only
    pub file: Option<&'static str>,
    pub line: Option<u32>,
}

/// Log severity levels, ordered from most to least verbose
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum LogSeverity {
    Trace,
    Debug,
    Info,
    Warn,
    Error,
}

impl LogSeverity {
    /// Fixed-width label used in console output
    pub fn label(self) -> &'static str {
        match self {
            LogSeverity::Trace => "TRACE",
            LogSeverity::Debug => "DEBUG",
            LogSeverity::Info => "INFO ",
            LogSeverity::Warn => "WARN ",
            LogSeverity::Error => "ERROR",
        }
    }

    fn colorize(self) -> ColoredString {
        let label = self.label();
        match self {
            LogSeverity::Trace => label.bright_black(),
            LogSeverity::Debug => label.cyan(),
            LogSeverity::Info => label.green(),
            LogSeverity::Warn => label.yellow(),
            LogSeverity::Error => label.red().bold(),
        }
    }
}

/// Console logger with a severity floor
///
/// Format: `[timestamp] [SEVERITY] [source] message (file:line)`, the
/// call site only being present on errors.
#[derive(Debug, Clone, Copy)]
pub struct DefaultLogger {
    min_severity: LogSeverity,
}

impl DefaultLogger {
    pub fn new(min_severity: LogSeverity) -> Self {
        Self { min_severity }
    }

    pub fn min_severity(&self) -> LogSeverity {
        self.min_severity
    }
}

impl Default for DefaultLogger {
    fn default() -> Self {
        Self::new(LogSeverity::Debug)
    }
}

impl Logger for DefaultLogger {
    fn log(&self, entry: &LogEntry) {
        if self.enabled(entry.severity) {
            println!("{}", format_line(entry, true));
        }
    }

    fn enabled(&self, severity: LogSeverity) -> bool {
        severity >= self.min_severity
    }
}

/// Render an entry as one console line
pub(crate) fn format_line(entry: &LogEntry, color: bool) -> String {
    let datetime: DateTime<Local> = entry.timestamp.into();
    let timestamp = datetime.format("%Y-%m-%d %H:%M:%S%.3f");

    let (severity, source) = if color {
        (entry.severity.colorize().to_string(), entry.source.bright_blue().to_string())
    } else {
        (entry.severity.label().to_string(), entry.source.clone())
    };

    let mut line = format!("[{}] [{}] [{}] {}", timestamp, severity, source, entry.message);
    if let (Some(file), Some(at)) = (entry.file, entry.line) {
        line.push_str(&format!(" ({}:{})", file, at));
    }
    line
}

// ===== LOGGING MACROS =====

/// Log a message at the given severity
///
/// ```ignore
/// engine_log!(Debug, "culling::SpatialIndexer2D", "Pass {} touched {} cells", pass, count);
/// ```
#[macro_export]
macro_rules! engine_log {
    ($severity:ident, $source:expr, $($arg:tt)*) => {
        $crate::culling::Engine::log(
            $crate::culling::log::LogSeverity::$severity,
            $source,
            format_args!($($arg)*)
        )
    };
}

#[macro_export]
macro_rules! engine_trace {
    ($source:expr, $($arg:tt)*) => { $crate::engine_log!(Trace, $source, $($arg)*) };
}

#[macro_export]
macro_rules! engine_debug {
    ($source:expr, $($arg:tt)*) => { $crate::engine_log!(Debug, $source, $($arg)*) };
}

#[macro_export]
macro_rules! engine_info {
    ($source:expr, $($arg:tt)*) => { $crate::engine_log!(Info, $source, $($arg)*) };
}

#[macro_export]
macro_rules! engine_warn {
    ($source:expr, $($arg:tt)*) => { $crate::engine_log!(Warn, $source, $($arg)*) };
}

/// Log an ERROR with the call site attached
#[macro_export]
macro_rules! engine_error {
    ($source:expr, $($arg:tt)*) => {
        $crate::culling::Engine::log_detailed(
            $crate::culling::log::LogSeverity::Error,
            $source,
            format_args!($($arg)*),
            file!(),
            line!()
        )
    };
}

/// Log an ERROR and build an `Error` from the same message
///
/// Builds `Error::BackendError` unless a variant is named first.
///
/// ```ignore
/// let err = engine_err!("culling::TileMap", "Canvas item allocation failed");
/// let err = engine_err!(InvalidArgument: "culling::TileMap", "Quadrant size cannot be smaller than 1.");
/// ```
#[macro_export]
macro_rules! engine_err {
    ($variant:ident: $source:expr, $($arg:tt)*) => {{
        let message = format!($($arg)*);
        $crate::engine_error!($source, "{}", message);
        $crate::culling::Error::$variant(message)
    }};
    ($source:expr, $($arg:tt)*) => {
        $crate::engine_err!(BackendError: $source, $($arg)*)
    };
}

/// Log an ERROR and return early with the matching `Error`
///
/// ```ignore
/// engine_bail!("culling::ResourcePreviewer", "Worker already running");
/// engine_bail!(InvalidArgument: "culling::TileMap", "Collision layer bit must be between 0 and 31 inclusive.");
/// ```
#[macro_export]
macro_rules! engine_bail {
    ($variant:ident: $source:expr, $($arg:tt)*) => {
        return Err($crate::engine_err!($variant: $source, $($arg)*))
    };
    ($source:expr, $($arg:tt)*) => {
        return Err($crate::engine_err!($source, $($arg)*))
    };
}

#[cfg(test)]
#[path = "log_tests.rs"]
mod tests;
