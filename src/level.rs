use std::fmt;
use std::str::FromStr;

use crate::error::ConfigError;

/// Canonical severity of an event.
///
/// Ordering follows increasing severity: `Debug < Info < Warn < Error < Critical`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Level {
    Debug,
    Info,
    Warn,
    Error,
    Critical,
}

impl Level {
    pub const ALL: [Level; 5] = [
        Level::Debug,
        Level::Info,
        Level::Warn,
        Level::Error,
        Level::Critical,
    ];

    /// Canonical upper-case name as rendered in the `level` field.
    pub fn as_str(&self) -> &'static str {
        match self {
            Level::Debug => "DEBUG",
            Level::Info => "INFO",
            Level::Warn => "WARN",
            Level::Error => "ERROR",
            Level::Critical => "CRITICAL",
        }
    }

    /// RFC 5424 syslog severity code (section 6.2.1).
    pub fn severity(&self) -> u8 {
        match self {
            Level::Debug => 7,
            Level::Info => 6,
            Level::Warn => 4,
            Level::Error => 3,
            Level::Critical => 2,
        }
    }

    /// Resolve a method name or level name, including aliases such as
    /// `trace`, `success`, `warning`, `fatal` and `exception`.
    ///
    /// Matching is case-insensitive. Returns `None` for unknown names.
    pub fn from_alias(name: &str) -> Option<Level> {
        match name.to_ascii_lowercase().as_str() {
            "trace" | "debug" => Some(Level::Debug),
            "info" | "success" => Some(Level::Info),
            "warning" | "warn" => Some(Level::Warn),
            "error" | "exception" => Some(Level::Error),
            "critical" | "fatal" => Some(Level::Critical),
            _ => None,
        }
    }

    /// Like [`Level::from_alias`] but degrades to `default` for unknown names.
    pub fn parse_or(name: &str, default: Level) -> Level {
        Level::from_alias(name).unwrap_or(default)
    }
}

impl fmt::Display for Level {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Level {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Level::from_alias(s).ok_or_else(|| ConfigError::UnknownLevel(s.to_string()))
    }
}
