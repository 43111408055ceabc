//! Console handler writing formatted lines from a background thread.
//!
//! [`ConsoleHandler`] formats events on the caller's thread and forwards the
//! lines over a bounded channel so producers never block on I/O. It is also
//! the sink for the shipper's own diagnostics, so it reports its drops and
//! write failures directly on stderr instead of through `log`.

use std::{
    any::Any,
    io::{self, Write},
    thread::{self, JoinHandle},
    time::Duration,
};

use crossbeam_channel::{Receiver, Sender, TrySendError, bounded};
use parking_lot::Mutex;

use crate::{
    formatter::SharedFormatter,
    handler::{HandlerError, LogHandler},
    log_event::LogEvent,
    rate_limited_warner::RateLimitedWarner,
};

const DEFAULT_CHANNEL_CAPACITY: usize = 1024;
const FLUSH_TIMEOUT: Duration = Duration::from_secs(1);
const JOIN_TIMEOUT: Duration = Duration::from_secs(1);

enum ConsoleCommand {
    Line(String),
    Flush(Sender<()>),
}

/// Handler that writes formatted lines to an `io::Write` stream.
pub struct ConsoleHandler {
    tx: Option<Sender<ConsoleCommand>>,
    handle: Mutex<Option<JoinHandle<()>>>,
    done_rx: Receiver<()>,
    formatter: SharedFormatter,
    warner: RateLimitedWarner,
}

impl ConsoleHandler {
    /// Write to `stdout` with the default line format.
    pub fn stdout() -> Self {
        Self::new(io::stdout(), SharedFormatter::default())
    }

    pub fn new<W>(writer: W, formatter: SharedFormatter) -> Self
    where
        W: Write + Send + 'static,
    {
        Self::with_capacity(writer, formatter, DEFAULT_CHANNEL_CAPACITY)
    }

    /// Create a handler with a custom channel capacity.
    pub fn with_capacity<W>(writer: W, formatter: SharedFormatter, capacity: usize) -> Self
    where
        W: Write + Send + 'static,
    {
        let (tx, rx) = bounded(capacity.max(1));
        let (done_tx, done_rx) = bounded(1);
        let handle = thread::Builder::new()
            .name("console-log".into())
            .spawn(move || {
                write_loop(writer, rx);
                let _ = done_tx.send(());
            });
        let handle = match handle {
            Ok(handle) => Some(handle),
            Err(err) => {
                eprintln!("ConsoleHandler: failed to spawn writer thread: {err}");
                None
            }
        };
        Self {
            tx: handle.as_ref().map(|_| tx),
            handle: Mutex::new(handle),
            done_rx,
            formatter,
            warner: RateLimitedWarner::default(),
        }
    }

    fn record_drop(&self, reason: HandlerError) -> Result<(), HandlerError> {
        self.warner.record_drop();
        self.warner.warn_if_due(|count| {
            eprintln!("ConsoleHandler: {reason}; dropped {count} log lines");
        });
        Err(reason)
    }
}

fn write_loop<W: Write>(mut writer: W, rx: Receiver<ConsoleCommand>) {
    for command in rx {
        match command {
            ConsoleCommand::Line(line) => {
                if writeln!(writer, "{line}")
                    .and_then(|()| writer.flush())
                    .is_err()
                {
                    eprintln!("ConsoleHandler: write error");
                }
            }
            ConsoleCommand::Flush(ack) => {
                let _ = writer.flush();
                let _ = ack.send(());
            }
        }
    }
}

impl LogHandler for ConsoleHandler {
    fn handle(&self, event: LogEvent) -> Result<(), HandlerError> {
        let Some(tx) = &self.tx else {
            return self.record_drop(HandlerError::NotRunning);
        };
        let line = self.formatter.render(&event);
        match tx.try_send(ConsoleCommand::Line(line)) {
            Ok(()) => Ok(()),
            Err(TrySendError::Full(_)) => self.record_drop(HandlerError::QueueFull),
            Err(TrySendError::Disconnected(_)) => self.record_drop(HandlerError::NotRunning),
        }
    }

    /// Wait until every line queued before this call has been written.
    fn flush(&self) -> bool {
        let Some(tx) = &self.tx else {
            return false;
        };
        self.warner.flush(|count| {
            eprintln!("ConsoleHandler: dropped {count} log lines");
        });
        let (ack_tx, ack_rx) = bounded(1);
        if tx
            .send_timeout(ConsoleCommand::Flush(ack_tx), FLUSH_TIMEOUT)
            .is_err()
        {
            return false;
        }
        ack_rx.recv_timeout(FLUSH_TIMEOUT).is_ok()
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

impl Drop for ConsoleHandler {
    fn drop(&mut self) {
        drop(self.tx.take());
        let Some(handle) = self.handle.lock().take() else {
            return;
        };
        if self.done_rx.recv_timeout(JOIN_TIMEOUT).is_err() {
            eprintln!("ConsoleHandler: writer thread did not finish within 1s");
            return;
        }
        if handle.join().is_err() {
            eprintln!("ConsoleHandler: writer thread panicked");
        }
    }
}

impl std::fmt::Debug for ConsoleHandler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConsoleHandler")
            .field("formatter", &self.formatter)
            .field("running", &self.tx.is_some())
            .finish()
    }
}
