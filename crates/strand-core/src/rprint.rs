//! Runtime-style print macros for strand
//!
//! Thread-safe, optionally-flushing debug output on stderr with an atomic
//! global level check, so disabled levels cost one relaxed load.
//!
//! # Environment Variables
//!
//! - `STRAND_LOG_LEVEL=<level>` - 0=off, 1=error, 2=warn, 3=info, 4=debug, 5=trace
//! - `STRAND_FLUSH_EPRINT=1` - flush stderr after each print

use std::io::Write;
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};

/// Log levels
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum LogLevel {
    Off = 0,
    Error = 1,
    Warn = 2,
    Info = 3,
    Debug = 4,
    Trace = 5,
}

impl LogLevel {
    pub fn from_u8(v: u8) -> Self {
        match v {
            0 => LogLevel::Off,
            1 => LogLevel::Error,
            2 => LogLevel::Warn,
            3 => LogLevel::Info,
            4 => LogLevel::Debug,
            _ => LogLevel::Trace,
        }
    }

    pub fn prefix(&self) -> &'static str {
        match self {
            LogLevel::Off => "",
            LogLevel::Error => "[ERROR]",
            LogLevel::Warn => "[WARN] ",
            LogLevel::Info => "[INFO] ",
            LogLevel::Debug => "[DEBUG]",
            LogLevel::Trace => "[TRACE]",
        }
    }
}

static FLUSH_ENABLED: AtomicBool = AtomicBool::new(false);
static LOG_LEVEL: AtomicU8 = AtomicU8::new(LogLevel::Info as u8);
static INITIALIZED: AtomicBool = AtomicBool::new(false);

/// Initialize logging from environment variables
///
/// Called automatically on first log; call explicitly for deterministic
/// initialization at program start.
pub fn init() {
    if INITIALIZED.swap(true, Ordering::SeqCst) {
        return;
    }

    if let Ok(val) = std::env::var("STRAND_FLUSH_EPRINT") {
        let flush = matches!(val.as_str(), "1" | "true" | "yes" | "on");
        FLUSH_ENABLED.store(flush, Ordering::Relaxed);
    }

    if let Ok(val) = std::env::var("STRAND_LOG_LEVEL") {
        let level = match val.to_lowercase().as_str() {
            "off" | "0" => LogLevel::Off,
            "error" | "1" => LogLevel::Error,
            "warn" | "2" => LogLevel::Warn,
            "info" | "3" => LogLevel::Info,
            "debug" | "4" => LogLevel::Debug,
            "trace" | "5" => LogLevel::Trace,
            _ => LogLevel::Info,
        };
        LOG_LEVEL.store(level as u8, Ordering::Relaxed);
    }
}

/// Set the log level programmatically
pub fn set_log_level(level: LogLevel) {
    INITIALIZED.store(true, Ordering::SeqCst);
    LOG_LEVEL.store(level as u8, Ordering::Relaxed);
}

/// Current log level
pub fn log_level() -> LogLevel {
    LogLevel::from_u8(LOG_LEVEL.load(Ordering::Relaxed))
}

/// Check whether a level is enabled
#[inline]
pub fn enabled(level: LogLevel) -> bool {
    if !INITIALIZED.load(Ordering::Relaxed) {
        init();
    }
    level as u8 <= LOG_LEVEL.load(Ordering::Relaxed)
}

#[doc(hidden)]
pub fn emit(level: LogLevel, args: core::fmt::Arguments<'_>) {
    if !enabled(level) {
        return;
    }
    eprintln!("{} {}", level.prefix(), args);
    if FLUSH_ENABLED.load(Ordering::Relaxed) {
        let _ = std::io::stderr().flush();
    }
}

#[doc(hidden)]
pub fn emit_plain(args: core::fmt::Arguments<'_>) {
    eprintln!("{}", args);
    if FLUSH_ENABLED.load(Ordering::Relaxed) {
        let _ = std::io::stderr().flush();
    }
}

/// Unconditional print (bypasses the level check)
#[macro_export]
macro_rules! rprintln {
    ($($arg:tt)*) => {
        $crate::rprint::emit_plain(format_args!($($arg)*))
    };
}

#[macro_export]
macro_rules! rerror {
    ($($arg:tt)*) => {
        $crate::rprint::emit($crate::rprint::LogLevel::Error, format_args!($($arg)*))
    };
}

#[macro_export]
macro_rules! rwarn {
    ($($arg:tt)*) => {
        $crate::rprint::emit($crate::rprint::LogLevel::Warn, format_args!($($arg)*))
    };
}

#[macro_export]
macro_rules! rinfo {
    ($($arg:tt)*) => {
        $crate::rprint::emit($crate::rprint::LogLevel::Info, format_args!($($arg)*))
    };
}

#[macro_export]
macro_rules! rdebug {
    ($($arg:tt)*) => {
        $crate::rprint::emit($crate::rprint::LogLevel::Debug, format_args!($($arg)*))
    };
}

#[macro_export]
macro_rules! rtrace {
    ($($arg:tt)*) => {
        $crate::rprint::emit($crate::rprint::LogLevel::Trace, format_args!($($arg)*))
    };
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_level_ordering() {
        set_log_level(LogLevel::Warn);
        assert!(enabled(LogLevel::Error));
        assert!(enabled(LogLevel::Warn));
        assert!(!enabled(LogLevel::Info));
        set_log_level(LogLevel::Info);
    }

    #[test]
    fn test_from_u8_saturates() {
        assert_eq!(LogLevel::from_u8(9), LogLevel::Trace);
        assert_eq!(LogLevel::from_u8(0), LogLevel::Off);
    }
}
