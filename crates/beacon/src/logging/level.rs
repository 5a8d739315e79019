// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Severity levels and per-sink filter masks.

use std::fmt;
use std::str::FromStr;

use bitflags::bitflags;
use serde::{Deserialize, Serialize};

use crate::errors::ConfigError;

/// Severity of a log record.
///
/// `None` and `All` exist for completeness of the wire format: a record at `None` reaches
/// no sink, a record at `All` reaches every sink with a non-empty filter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    None,
    All,
    #[default]
    Info,
    Warning,
    Error,
    Fatal,
    Debug1,
    Debug2,
    Debug3,
    Debug4,
}

impl LogLevel {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            LogLevel::None => "none",
            LogLevel::All => "all",
            LogLevel::Info => "info",
            LogLevel::Warning => "warning",
            LogLevel::Error => "error",
            LogLevel::Fatal => "fatal",
            LogLevel::Debug1 => "debug1",
            LogLevel::Debug2 => "debug2",
            LogLevel::Debug3 => "debug3",
            LogLevel::Debug4 => "debug4",
        }
    }

    /// The bits this level occupies in a [`LogFilter`].
    #[must_use]
    pub fn mask(&self) -> LogFilter {
        match self {
            LogLevel::None => LogFilter::empty(),
            LogLevel::All => LogFilter::all(),
            LogLevel::Info => LogFilter::INFO,
            LogLevel::Warning => LogFilter::WARNING,
            LogLevel::Error => LogFilter::ERROR,
            LogLevel::Fatal => LogFilter::FATAL,
            LogLevel::Debug1 => LogFilter::DEBUG1,
            LogLevel::Debug2 => LogFilter::DEBUG2,
            LogLevel::Debug3 => LogFilter::DEBUG3,
            LogLevel::Debug4 => LogFilter::DEBUG4,
        }
    }
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for LogLevel {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "none" => Ok(LogLevel::None),
            "all" => Ok(LogLevel::All),
            "info" => Ok(LogLevel::Info),
            "warning" | "warn" => Ok(LogLevel::Warning),
            "error" => Ok(LogLevel::Error),
            "fatal" => Ok(LogLevel::Fatal),
            "debug1" => Ok(LogLevel::Debug1),
            "debug2" => Ok(LogLevel::Debug2),
            "debug3" => Ok(LogLevel::Debug3),
            "debug4" => Ok(LogLevel::Debug4),
            other => Err(ConfigError::InvalidConfig(format!(
                "unknown log level '{other}'"
            ))),
        }
    }
}

bitflags! {
    /// Set of levels a sink accepts.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct LogFilter: u8 {
        const INFO = 0x01;
        const WARNING = 0x02;
        const ERROR = 0x04;
        const FATAL = 0x08;
        const DEBUG1 = 0x10;
        const DEBUG2 = 0x20;
        const DEBUG3 = 0x40;
        const DEBUG4 = 0x80;
    }
}

const NAMED_LEVELS: [LogLevel; 8] = [
    LogLevel::Info,
    LogLevel::Warning,
    LogLevel::Error,
    LogLevel::Fatal,
    LogLevel::Debug1,
    LogLevel::Debug2,
    LogLevel::Debug3,
    LogLevel::Debug4,
];

impl LogFilter {
    /// Whether a record at `level` passes this filter.
    #[must_use]
    pub fn accepts(&self, level: LogLevel) -> bool {
        self.intersects(level.mask())
    }

    /// Console default: everything but debug output.
    #[must_use]
    pub fn console_default() -> Self {
        LogFilter::INFO | LogFilter::WARNING | LogFilter::ERROR | LogFilter::FATAL
    }

    /// File and network default: console levels plus the two coarsest debug levels.
    #[must_use]
    pub fn verbose_default() -> Self {
        Self::console_default() | LogFilter::DEBUG1 | LogFilter::DEBUG2
    }
}

impl Default for LogFilter {
    fn default() -> Self {
        Self::console_default()
    }
}

impl FromStr for LogFilter {
    type Err = ConfigError;

    /// Parses `info,warning,error`, `all`, `none` or an empty string.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut filter = LogFilter::empty();
        for name in s.split(',').map(str::trim).filter(|name| !name.is_empty()) {
            filter |= name.parse::<LogLevel>()?.mask();
        }
        Ok(filter)
    }
}

impl fmt::Display for LogFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_empty() {
            return f.write_str("none");
        }
        if self.is_all() {
            return f.write_str("all");
        }
        let names: Vec<&str> = NAMED_LEVELS
            .iter()
            .filter(|level| self.contains(level.mask()))
            .map(LogLevel::as_str)
            .collect();
        f.write_str(&names.join(","))
    }
}
