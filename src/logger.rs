//! Named loggers and the explicit registry that owns them.
//!
//! Loggers form a dotted hierarchy under `root`. An event is handed to the
//! logger's own handlers and, while `propagate` is set, to the handlers of
//! every ancestor. Parents do not re-check their level for propagated events.
//! A logger without its own level uses the nearest ancestor's.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};

use parking_lot::RwLock;
use thiserror::Error;

use crate::handler::LogHandler;
use crate::level::LogLevel;
use crate::log_event::LogEvent;
use crate::loki::SENDER_TARGET;

/// Name of the top-level logger.
pub const ROOT_LOGGER: &str = "root";
/// Application categories used throughout the service.
pub const SERVICE_LOGGERS: [&str; 5] = ["main", "database", "api", "service", "repository"];
/// Web server categories that do not propagate and are wired explicitly.
pub const WEB_LOGGERS: [&str; 4] = ["uvicorn", "uvicorn.access", "uvicorn.error", "fastapi"];

const LEVEL_UNSET: u8 = u8::MAX;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("invalid logger name: {0:?}")]
pub struct InvalidLoggerName(pub String);

/// A named logging category.
pub struct Logger {
    name: String,
    parent: Option<Arc<Logger>>,
    level: AtomicU8,
    propagate: AtomicBool,
    handlers: RwLock<Vec<Arc<dyn LogHandler>>>,
}

impl Logger {
    fn new(name: &str, parent: Option<Arc<Logger>>, level: Option<LogLevel>) -> Self {
        Self {
            name: name.to_owned(),
            parent,
            level: AtomicU8::new(level.map_or(LEVEL_UNSET, u8::from)),
            propagate: AtomicBool::new(true),
            handlers: RwLock::new(Vec::new()),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn parent(&self) -> Option<&Arc<Logger>> {
        self.parent.as_ref()
    }

    pub fn set_level(&self, level: LogLevel) {
        self.level.store(u8::from(level), Ordering::Relaxed);
    }

    /// The level set on this logger, if any.
    pub fn level(&self) -> Option<LogLevel> {
        match self.level.load(Ordering::Relaxed) {
            LEVEL_UNSET => None,
            raw => Some(LogLevel::from(raw)),
        }
    }

    /// This logger's level, else the nearest ancestor's, else `Info`.
    pub fn effective_level(&self) -> LogLevel {
        let mut current = Some(self);
        while let Some(logger) = current {
            if let Some(level) = logger.level() {
                return level;
            }
            current = logger.parent.as_deref();
        }
        LogLevel::Info
    }

    pub fn is_enabled_for(&self, level: LogLevel) -> bool {
        level >= self.effective_level()
    }

    pub fn propagate(&self) -> bool {
        self.propagate.load(Ordering::Relaxed)
    }

    pub fn set_propagate(&self, flag: bool) {
        self.propagate.store(flag, Ordering::Relaxed);
    }

    pub fn add_handler(&self, handler: Arc<dyn LogHandler>) {
        self.handlers.write().push(handler);
    }

    /// Detach a handler previously added to this logger.
    pub fn remove_handler(&self, handler: &Arc<dyn LogHandler>) -> bool {
        let mut handlers = self.handlers.write();
        if let Some(pos) = handlers.iter().position(|h| Arc::ptr_eq(h, handler)) {
            handlers.remove(pos);
            true
        } else {
            false
        }
    }

    pub fn clear_handlers(&self) {
        self.handlers.write().clear();
    }

    pub fn handlers(&self) -> Vec<Arc<dyn LogHandler>> {
        self.handlers.read().clone()
    }

    /// Log `message` at `level`. Returns `true` when the level was enabled.
    ///
    /// Handler refusals (queue full, not running) are counted by the handler
    /// and never surface here.
    pub fn log(&self, level: LogLevel, message: &str) -> bool {
        if !self.is_enabled_for(level) {
            return false;
        }
        self.dispatch(LogEvent::new(&self.name, level, message));
        true
    }

    /// Dispatch an event built elsewhere, after the level check.
    pub fn log_event(&self, event: LogEvent) -> bool {
        if !self.is_enabled_for(event.level()) {
            return false;
        }
        self.dispatch(event);
        true
    }

    pub fn debug(&self, message: &str) -> bool {
        self.log(LogLevel::Debug, message)
    }

    pub fn info(&self, message: &str) -> bool {
        self.log(LogLevel::Info, message)
    }

    pub fn warn(&self, message: &str) -> bool {
        self.log(LogLevel::Warn, message)
    }

    pub fn error(&self, message: &str) -> bool {
        self.log(LogLevel::Error, message)
    }

    pub fn critical(&self, message: &str) -> bool {
        self.log(LogLevel::Critical, message)
    }

    /// Flush this logger's handlers; `true` when all of them succeeded.
    pub fn flush_handlers(&self) -> bool {
        self.handlers().iter().fold(true, |ok, h| h.flush() && ok)
    }

    fn dispatch(&self, event: LogEvent) {
        let mut current = Some(self);
        while let Some(logger) = current {
            // Snapshot so a handler that logs cannot deadlock on the lock.
            let handlers = logger.handlers();
            for handler in &handlers {
                let _ = handler.handle(event.clone());
            }
            current = if logger.propagate() {
                logger.parent.as_deref()
            } else {
                None
            };
        }
    }
}

impl std::fmt::Debug for Logger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Logger")
            .field("name", &self.name)
            .field("level", &self.level())
            .field("propagate", &self.propagate())
            .field("handlers", &self.handlers.read().len())
            .finish()
    }
}

/// Validate a dotted logger name: non-empty with no empty segment.
pub fn validate_name(name: &str) -> Result<(), InvalidLoggerName> {
    if name.is_empty() || name.split('.').any(str::is_empty) {
        return Err(InvalidLoggerName(name.to_owned()));
    }
    Ok(())
}

/// Map from category name to logger.
///
/// The registry is an ordinary value; the service creates one at start-up
/// and passes it (or the [`LogBridge`](crate::log_compat::LogBridge) built
/// on it) to whatever needs it. The diagnostics logger for
/// [`SENDER_TARGET`] is created up front with `propagate` off so shipper
/// diagnostics only reach handlers attached to it directly.
pub struct LoggerRegistry {
    root: Arc<Logger>,
    loggers: RwLock<HashMap<String, Arc<Logger>>>,
}

impl Default for LoggerRegistry {
    fn default() -> Self {
        Self::new(LogLevel::Info)
    }
}

impl LoggerRegistry {
    /// Create a registry whose root logger is set to `root_level`.
    pub fn new(root_level: LogLevel) -> Self {
        let root = Arc::new(Logger::new(ROOT_LOGGER, None, Some(root_level)));
        let registry = Self {
            root,
            loggers: RwLock::new(HashMap::new()),
        };
        let diagnostics = Arc::new(Logger::new(SENDER_TARGET, None, Some(LogLevel::Info)));
        diagnostics.set_propagate(false);
        registry
            .loggers
            .write()
            .insert(SENDER_TARGET.to_owned(), diagnostics);
        registry
    }

    pub fn root(&self) -> Arc<Logger> {
        Arc::clone(&self.root)
    }

    /// Logger receiving the shipper's own diagnostics.
    pub fn diagnostics(&self) -> Arc<Logger> {
        match self.loggers.read().get(SENDER_TARGET) {
            Some(logger) => Arc::clone(logger),
            None => Arc::clone(&self.root),
        }
    }

    /// Fetch `name`, creating it and any missing ancestors on demand.
    pub fn get(&self, name: &str) -> Result<Arc<Logger>, InvalidLoggerName> {
        if name == ROOT_LOGGER {
            return Ok(self.root());
        }
        validate_name(name)?;
        if let Some(logger) = self.loggers.read().get(name) {
            return Ok(Arc::clone(logger));
        }
        let mut loggers = self.loggers.write();
        Ok(self.get_or_create(&mut loggers, name))
    }

    fn get_or_create(&self, loggers: &mut HashMap<String, Arc<Logger>>, name: &str) -> Arc<Logger> {
        if let Some(logger) = loggers.get(name) {
            return Arc::clone(logger);
        }
        let parent = match name.rsplit_once('.') {
            Some((parent, _)) => self.get_or_create(loggers, parent),
            None => self.root(),
        };
        let logger = Arc::new(Logger::new(name, Some(parent), None));
        loggers.insert(name.to_owned(), Arc::clone(&logger));
        logger
    }

    /// Attach `handler` to each named logger. Every name is validated before
    /// any logger is touched.
    pub fn attach_to<'a, I>(
        &self,
        names: I,
        handler: Arc<dyn LogHandler>,
    ) -> Result<(), InvalidLoggerName>
    where
        I: IntoIterator<Item = &'a str>,
    {
        let names: Vec<&str> = names.into_iter().collect();
        for name in &names {
            if *name != ROOT_LOGGER {
                validate_name(name)?;
            }
        }
        for name in names {
            self.get(name)?.add_handler(Arc::clone(&handler));
        }
        Ok(())
    }

    /// Names of every logger created so far, excluding `root`.
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<_> = self.loggers.read().keys().cloned().collect();
        names.sort();
        names
    }

    /// Flush the handlers of every logger, root included.
    pub fn flush_all(&self) -> bool {
        let loggers: Vec<_> = self.loggers.read().values().cloned().collect();
        loggers
            .iter()
            .fold(self.root.flush_handlers(), |ok, l| l.flush_handlers() && ok)
    }
}

impl std::fmt::Debug for LoggerRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LoggerRegistry")
            .field("root", &self.root)
            .field("loggers", &self.names())
            .finish()
    }
}
