//! A handler that accumulates events in memory for test assertions.

use crate::handler::{HandlerError, LogHandler};
use crate::log_event::LogEvent;
use parking_lot::Mutex;
use std::any::Any;
use std::sync::Arc;

/// Handler that stores every event it receives for later inspection.
#[derive(Clone, Default)]
pub struct CollectingHandler {
    events: Arc<Mutex<Vec<LogEvent>>>,
}

impl CollectingHandler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of all events received so far.
    pub fn collected(&self) -> Vec<LogEvent> {
        self.events.lock().clone()
    }

    /// Messages received so far, in order.
    pub fn messages(&self) -> Vec<String> {
        self.events
            .lock()
            .iter()
            .map(|e| e.message().to_owned())
            .collect()
    }
}

impl LogHandler for CollectingHandler {
    fn handle(&self, event: LogEvent) -> Result<(), HandlerError> {
        self.events.lock().push(event);
        Ok(())
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}
