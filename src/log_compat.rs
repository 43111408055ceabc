//! Compatibility bridge for the Rust `log` crate.
//!
//! [`LogBridge`] implements `log::Log` and forwards records into a
//! [`LoggerRegistry`], resolving the logger from each record's target.
//! Records from the shipper itself and from the HTTP stack it drives are
//! routed to the registry's diagnostics logger, which does not propagate, so
//! they never feed back into the Loki handler.

use std::borrow::Cow;
use std::sync::Arc;

use log::{Metadata, Record};

use crate::level::LogLevel;
use crate::log_event::LogEvent;
use crate::logger::{Logger, LoggerRegistry};
use crate::loki::SENDER_TARGET;

/// Top-level target segments kept off the shipping path.
const LOCAL_ONLY_TARGETS: [&str; 3] = [SENDER_TARGET, "ureq", "native_tls"];

impl From<log::Level> for LogLevel {
    fn from(level: log::Level) -> Self {
        match level {
            log::Level::Trace | log::Level::Debug => LogLevel::Debug,
            log::Level::Info => LogLevel::Info,
            log::Level::Warn => LogLevel::Warn,
            log::Level::Error => LogLevel::Error,
        }
    }
}

fn normalise_target(target: &str) -> Cow<'_, str> {
    if target.contains("::") {
        Cow::Owned(target.replace("::", "."))
    } else {
        Cow::Borrowed(target)
    }
}

fn is_local_only(target: &str) -> bool {
    let head = target.split([':', '.']).next().unwrap_or_default();
    LOCAL_ONLY_TARGETS.contains(&head)
}

/// Adapter implementing the Rust `log::Log` trait over a registry.
#[derive(Clone, Debug)]
pub struct LogBridge {
    registry: Arc<LoggerRegistry>,
}

impl LogBridge {
    pub fn new(registry: Arc<LoggerRegistry>) -> Self {
        Self { registry }
    }

    pub fn registry(&self) -> &Arc<LoggerRegistry> {
        &self.registry
    }

    fn resolve(&self, target: &str) -> Arc<Logger> {
        if is_local_only(target) {
            return self.registry.diagnostics();
        }
        let normalised = normalise_target(target);
        self.registry
            .get(normalised.as_ref())
            .unwrap_or_else(|_| self.registry.root())
    }
}

impl log::Log for LogBridge {
    fn enabled(&self, metadata: &Metadata<'_>) -> bool {
        self.resolve(metadata.target())
            .is_enabled_for(LogLevel::from(metadata.level()))
    }

    // The `log` macros have already applied the global max level.
    fn log(&self, record: &Record<'_>) {
        let logger = self.resolve(record.target());
        let level = LogLevel::from(record.level());
        if !logger.is_enabled_for(level) {
            return;
        }
        let message = record.args().to_string();
        logger.log_event(LogEvent::new(logger.name(), level, &message));
    }

    fn flush(&self) {
        self.registry.flush_all();
    }
}

/// Install `bridge` as the global `log` logger.
///
/// Returns `true` only for the call that installed it. Any later call, or a
/// call made after another global logger was set, returns `false` and
/// discards its bridge.
pub fn install_global_logger(bridge: LogBridge) -> bool {
    if log::set_boxed_logger(Box::new(bridge)).is_err() {
        return false;
    }
    log::set_max_level(log::LevelFilter::Trace);
    true
}
