//! Line formatters used by the console and Loki handlers.
//!
//! Formatting is fallible because user formatters and `Display` impls may
//! return [`fmt::Error`]. Handlers call [`render_line`], which falls back to
//! the raw message so a broken formatter never loses the event.

use std::fmt::{self, Write as _};
use std::sync::Arc;

use chrono::{DateTime, Local};

use crate::log_event::LogEvent;

/// Date format used by [`DefaultFormatter`].
pub const DEFAULT_DATE_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Trait for turning a [`LogEvent`] into a single line of text.
///
/// Implementors must be `Send + Sync` so one formatter can be shared by the
/// producer threads that call into a handler.
pub trait LineFormatter: Send + Sync {
    fn format(&self, event: &LogEvent) -> Result<String, fmt::Error>;
}

/// Format `event`, falling back to its unformatted message on failure.
pub fn render_line(formatter: &dyn LineFormatter, event: &LogEvent) -> String {
    formatter
        .format(event)
        .unwrap_or_else(|_| event.message().to_owned())
}

/// Shared formatter trait object used across handlers.
#[derive(Clone)]
pub struct SharedFormatter {
    inner: Arc<dyn LineFormatter>,
}

impl SharedFormatter {
    pub fn new<F>(formatter: F) -> Self
    where
        F: LineFormatter + 'static,
    {
        Self {
            inner: Arc::new(formatter),
        }
    }

    /// Format using the wrapped formatter, with the raw-message fallback.
    pub fn render(&self, event: &LogEvent) -> String {
        render_line(self.inner.as_ref(), event)
    }
}

impl Default for SharedFormatter {
    fn default() -> Self {
        Self::new(DefaultFormatter::default())
    }
}

impl fmt::Debug for SharedFormatter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("SharedFormatter(<dyn LineFormatter>)")
    }
}

/// `asctime - name - LEVEL - message`, with a configurable date format.
#[derive(Clone, Debug)]
pub struct DefaultFormatter {
    date_format: String,
}

impl DefaultFormatter {
    pub fn with_date_format(date_format: impl Into<String>) -> Self {
        Self {
            date_format: date_format.into(),
        }
    }
}

impl Default for DefaultFormatter {
    fn default() -> Self {
        Self::with_date_format(DEFAULT_DATE_FORMAT)
    }
}

impl LineFormatter for DefaultFormatter {
    fn format(&self, event: &LogEvent) -> Result<String, fmt::Error> {
        let local: DateTime<Local> = DateTime::from(event.timestamp());
        let mut out = String::with_capacity(event.message().len() + 48);
        write!(
            out,
            "{} - {} - {} - {}",
            local.format(&self.date_format),
            event.logger(),
            event.level(),
            event.message()
        )?;
        Ok(out)
    }
}

/// Emits the message text only.
#[derive(Clone, Copy, Debug, Default)]
pub struct MessageFormatter;

impl LineFormatter for MessageFormatter {
    fn format(&self, event: &LogEvent) -> Result<String, fmt::Error> {
        Ok(event.message().to_owned())
    }
}
