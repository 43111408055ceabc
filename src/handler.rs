use std::any::Any;

use thiserror::Error;

use crate::log_event::LogEvent;

/// Reasons a handler refused an event.
///
/// These never reach the log call-site: [`Logger`](crate::logger::Logger)
/// discards them after the handler has counted the drop.
#[derive(Debug, Clone, Copy, Error, PartialEq, Eq)]
pub enum HandlerError {
    /// The bounded queue was at capacity.
    #[error("queue full")]
    QueueFull,
    /// The handler is not accepting events (stopped or draining).
    #[error("handler is not running")]
    NotRunning,
}

/// Trait implemented by all log handlers.
///
/// Handlers are shared between loggers and called from arbitrary threads,
/// so implementations forward events to their own consumer thread without
/// blocking the caller.
pub trait LogHandler: Send + Sync {
    /// Dispatch an event for handling.
    fn handle(&self, event: LogEvent) -> Result<(), HandlerError>;

    /// Wait for queued events to be processed. Returns `true` on success.
    fn flush(&self) -> bool {
        true
    }

    fn as_any(&self) -> &dyn Any;
}
