//! Client-level log verbosity.
//!
//! Events are always emitted through `tracing`; [`LogLevel`] only decides which
//! client-level events are emitted at all. Formatting and sinks belong to the
//! application's subscriber.

use std::fmt;
use std::str::FromStr;

use crate::error::LLMError;

/// Verbosity of the client's own events, from silent to chatty.
///
/// A level enables every event at least as severe as itself: `Info` enables `Info`,
/// `Warn` and `Error`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum LogLevel {
    #[default]
    Disabled,
    Error,
    Warn,
    Info,
    Debug,
}

impl LogLevel {
    /// Whether an event of severity `event` passes this level.
    ///
    /// # Examples
    ///
    /// ```
    /// use unillm::logging::LogLevel;
    ///
    /// assert!(LogLevel::Info.enables(LogLevel::Warn));
    /// assert!(!LogLevel::Info.enables(LogLevel::Debug));
    /// assert!(!LogLevel::Disabled.enables(LogLevel::Error));
    /// ```
    pub fn enables(self, event: LogLevel) -> bool {
        event != LogLevel::Disabled && event <= self
    }

    pub fn as_str(self) -> &'static str {
        match self {
            LogLevel::Disabled => "disabled",
            LogLevel::Error => "error",
            LogLevel::Warn => "warn",
            LogLevel::Info => "info",
            LogLevel::Debug => "debug",
        }
    }
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for LogLevel {
    type Err = LLMError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "disabled" | "off" | "none" => Ok(LogLevel::Disabled),
            "error" => Ok(LogLevel::Error),
            "warn" | "warning" => Ok(LogLevel::Warn),
            "info" => Ok(LogLevel::Info),
            "debug" => Ok(LogLevel::Debug),
            other => Err(LLMError::Validation {
                message: format!("unknown log level: {other}"),
            }),
        }
    }
}

/// Emits a `tracing` event only when the given [`LogLevel`] enables its severity.
///
/// ```ignore
/// client_log!(self.log_level, Info, provider = %name, "provider resolved");
/// ```
macro_rules! client_log {
    ($level:expr, Debug, $($arg:tt)+) => {
        if $level.enables($crate::logging::LogLevel::Debug) {
            ::tracing::debug!($($arg)+);
        }
    };
    ($level:expr, Info, $($arg:tt)+) => {
        if $level.enables($crate::logging::LogLevel::Info) {
            ::tracing::info!($($arg)+);
        }
    };
    ($level:expr, Warn, $($arg:tt)+) => {
        if $level.enables($crate::logging::LogLevel::Warn) {
            ::tracing::warn!($($arg)+);
        }
    };
    ($level:expr, Error, $($arg:tt)+) => {
        if $level.enables($crate::logging::LogLevel::Error) {
            ::tracing::error!($($arg)+);
        }
    };
}

pub(crate) use client_log;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn levels_gate_by_severity() {
        assert!(LogLevel::Debug.enables(LogLevel::Error));
        assert!(LogLevel::Error.enables(LogLevel::Error));
        assert!(!LogLevel::Error.enables(LogLevel::Warn));
        for event in [LogLevel::Error, LogLevel::Warn, LogLevel::Info, LogLevel::Debug] {
            assert!(!LogLevel::Disabled.enables(event));
        }
        assert_eq!(LogLevel::default(), LogLevel::Disabled);
    }

    #[test]
    fn parses_common_spellings() {
        assert_eq!("WARNING".parse::<LogLevel>().ok(), Some(LogLevel::Warn));
        assert_eq!(" off ".parse::<LogLevel>().ok(), Some(LogLevel::Disabled));
        assert!("verbose".parse::<LogLevel>().is_err());
    }
}
