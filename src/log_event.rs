//! Log event representation shared by every handler.
//!
//! A [`LogEvent`] is created at the call-site and never mutated afterwards.
//! Handlers receive it by value so ownership moves into their queues.

use std::fmt;
use std::time::{SystemTime, UNIX_EPOCH};

use crate::level::LogLevel;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LogEvent {
    timestamp: SystemTime,
    level: LogLevel,
    logger: String,
    message: String,
}

impl LogEvent {
    /// Construct an event stamped with the current wall-clock time.
    pub fn new(logger: &str, level: LogLevel, message: &str) -> Self {
        Self::at(SystemTime::now(), logger, level, message)
    }

    /// Construct an event with an explicit timestamp.
    pub fn at(timestamp: SystemTime, logger: &str, level: LogLevel, message: &str) -> Self {
        Self {
            timestamp,
            level,
            logger: logger.to_owned(),
            message: message.to_owned(),
        }
    }

    pub fn timestamp(&self) -> SystemTime {
        self.timestamp
    }

    /// Nanoseconds since the UNIX epoch, or zero for clocks set before it.
    pub fn timestamp_nanos(&self) -> u128 {
        self.timestamp
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_nanos())
            .unwrap_or(0)
    }

    pub fn level(&self) -> LogLevel {
        self.level
    }

    pub fn logger(&self) -> &str {
        &self.logger
    }

    pub fn message(&self) -> &str {
        &self.message
    }
}

impl fmt::Display for LogEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} - {}", self.level, self.message)
    }
}
