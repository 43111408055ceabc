//! Public handler type shipping events to Loki.

use std::sync::Arc;
use std::time::{Duration, Instant};

use crossbeam_channel::{Sender, TrySendError, bounded};
use log::warn;
use parking_lot::{Mutex, RwLock};

use crate::{
    formatter::SharedFormatter,
    handler::{HandlerError, LogHandler},
    log_event::LogEvent,
    metrics::{DeliveryMetrics, NoopMetrics},
    rate_limited_warner::RateLimitedWarner,
};

use super::{
    SENDER_TARGET,
    config::LokiHandlerConfig,
    delivery::{Deliver, HttpDelivery},
    push::QueuedEntry,
    state::{
        AtomicHandlerState, AtomicWorkerPhase, HandlerState, ShippingStats, ShutdownReport,
        StatsSnapshot, WorkerPhase,
    },
    worker::{WorkerHandles, WorkerSettings, WorkerShared, spawn_worker},
};

type DeliveryFactory = Box<dyn Fn() -> Box<dyn Deliver> + Send + Sync>;

/// Handler queueing events for batched delivery to a Loki collector.
///
/// The handler is created stopped. [`start`](Self::start) spawns the dispatch
/// thread; [`shutdown`](Self::shutdown) closes intake and drains what is
/// queued within a deadline. [`handle`](LogHandler::handle) never blocks: when
/// the queue is full or the handler is not running the event is dropped and
/// counted.
///
/// Events still queued when the process exits without a shutdown are lost.
pub struct LokiHandler {
    config: LokiHandlerConfig,
    formatter: SharedFormatter,
    state: AtomicHandlerState,
    intake: RwLock<Option<Sender<QueuedEntry>>>,
    worker: Mutex<Option<WorkerHandles>>,
    stats: Arc<ShippingStats>,
    /// Replaced on every start so a detached thread cannot overwrite the
    /// phase of its successor.
    phase: Mutex<Arc<AtomicWorkerPhase>>,
    metrics: Arc<dyn DeliveryMetrics>,
    delivery: DeliveryFactory,
    warner: RateLimitedWarner,
}

impl LokiHandler {
    /// Construct a handler posting to `config.endpoint()` over HTTP.
    pub fn with_config(config: LokiHandlerConfig) -> Self {
        let http_config = config.clone();
        Self::with_delivery(config, move || HttpDelivery::new(&http_config))
    }

    /// Construct a handler using a custom sink.
    ///
    /// `factory` is invoked on every [`start`](Self::start), since a sink
    /// moves into the dispatch thread it serves.
    pub fn with_delivery<F, D>(config: LokiHandlerConfig, factory: F) -> Self
    where
        F: Fn() -> D + Send + Sync + 'static,
        D: Deliver + 'static,
    {
        let warner = RateLimitedWarner::new(config.warn_interval);
        Self {
            config,
            formatter: SharedFormatter::default(),
            state: AtomicHandlerState::new(HandlerState::Stopped),
            intake: RwLock::new(None),
            worker: Mutex::new(None),
            stats: Arc::new(ShippingStats::default()),
            phase: Mutex::new(Arc::new(AtomicWorkerPhase::new(WorkerPhase::Stopped))),
            metrics: Arc::new(NoopMetrics),
            delivery: Box::new(move || -> Box<dyn Deliver> { Box::new(factory()) }),
            warner,
        }
    }

    /// Report delivery counts to `metrics`. Takes effect on the next start.
    pub fn with_metrics(mut self, metrics: Arc<dyn DeliveryMetrics>) -> Self {
        self.metrics = metrics;
        self
    }

    /// Render lines with `formatter` instead of [`DefaultFormatter`](crate::formatter::DefaultFormatter).
    pub fn with_formatter(mut self, formatter: SharedFormatter) -> Self {
        self.formatter = formatter;
        self
    }

    pub fn config(&self) -> &LokiHandlerConfig {
        &self.config
    }

    pub fn endpoint(&self) -> String {
        self.config.endpoint()
    }

    pub fn state(&self) -> HandlerState {
        self.state.load()
    }

    pub fn phase(&self) -> WorkerPhase {
        self.phase.lock().load()
    }

    /// Cumulative counters for this handler instance.
    pub fn stats(&self) -> StatsSnapshot {
        self.stats.snapshot()
    }

    /// Spawn the dispatch thread and open intake.
    ///
    /// Returns `false` when the handler is not stopped or the thread could
    /// not be spawned.
    pub fn start(&self) -> bool {
        let mut worker = self.worker.lock();
        if !self.state.transition(HandlerState::Stopped, HandlerState::Running) {
            return false;
        }
        let (tx, rx) = bounded(self.config.capacity.max(1));
        let settings = WorkerSettings {
            batch_size: self.config.batch_size,
            max_wait: self.config.max_wait,
            warn_interval: self.config.warn_interval,
        };
        let phase = Arc::new(AtomicWorkerPhase::new(WorkerPhase::Idle));
        let shared = WorkerShared {
            stats: Arc::clone(&self.stats),
            phase: Arc::clone(&phase),
            metrics: Arc::clone(&self.metrics),
        };
        match spawn_worker(rx, (self.delivery)(), settings, shared) {
            Ok(handles) => {
                *self.phase.lock() = phase;
                *worker = Some(handles);
                *self.intake.write() = Some(tx);
                true
            }
            Err(err) => {
                warn!(target: SENDER_TARGET, "failed to spawn Loki dispatch thread: {err}");
                self.state.reset(HandlerState::Stopped);
                false
            }
        }
    }

    /// Stop intake and drain queued events, waiting at most `timeout`.
    ///
    /// Idempotent: when the handler is not running this returns at once with
    /// `already_stopped` set. When the deadline elapses first the report is
    /// `forced` and the dispatch thread is left to finish on its own.
    pub fn shutdown(&self, timeout: Duration) -> ShutdownReport {
        if !self
            .state
            .transition(HandlerState::Running, HandlerState::Draining)
        {
            return ShutdownReport {
                forced: false,
                already_stopped: true,
                stats: self.stats(),
            };
        }
        let deadline = deadline_after(timeout);
        let handles = {
            let mut worker = self.worker.lock();
            // Removing the sender under the write lock waits out in-flight
            // enqueues, so nothing lands in the queue after the drain starts.
            drop(self.intake.write().take());
            worker.take()
        };
        let forced = handles.is_some_and(|h| h.stop(deadline));
        self.state
            .transition(HandlerState::Draining, HandlerState::Stopped);
        self.warner.flush(|count| {
            warn!(target: SENDER_TARGET, "Loki handler dropped {count} log entries");
        });
        ShutdownReport {
            forced,
            already_stopped: false,
            stats: self.stats(),
        }
    }

    fn record_drop(&self, reason: HandlerError) -> Result<(), HandlerError> {
        ShippingStats::add(&self.stats.dropped, 1);
        self.warner.record_drop();
        self.warner.warn_if_due(|count| match reason {
            HandlerError::QueueFull => {
                warn!(target: SENDER_TARGET, "Loki queue full; dropped {count} log entries");
            }
            HandlerError::NotRunning => {
                warn!(
                    target: SENDER_TARGET,
                    "Loki handler not running; dropped {count} log entries"
                );
            }
        });
        Err(reason)
    }
}

fn deadline_after(timeout: Duration) -> Instant {
    let now = Instant::now();
    now.checked_add(timeout)
        .unwrap_or_else(|| now + Duration::from_secs(86_400 * 365))
}

impl LogHandler for LokiHandler {
    fn handle(&self, event: LogEvent) -> Result<(), HandlerError> {
        let intake = self.intake.read();
        let Some(tx) = intake.as_ref() else {
            drop(intake);
            return self.record_drop(HandlerError::NotRunning);
        };
        let entry = QueuedEntry::from_event(event, &self.formatter);
        match tx.try_send(entry) {
            Ok(()) => {
                ShippingStats::add(&self.stats.enqueued, 1);
                Ok(())
            }
            Err(TrySendError::Full(_)) => {
                drop(intake);
                self.record_drop(HandlerError::QueueFull)
            }
            Err(TrySendError::Disconnected(_)) => {
                drop(intake);
                self.record_drop(HandlerError::NotRunning)
            }
        }
    }

    fn as_any(&self) -> &dyn std::any::Any {
        self
    }
}

impl Drop for LokiHandler {
    fn drop(&mut self) {
        if self.state.load() == HandlerState::Running {
            self.shutdown(self.config.shutdown_timeout);
        }
    }
}

impl std::fmt::Debug for LokiHandler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LokiHandler")
            .field("endpoint", &self.config.endpoint())
            .field("job", &self.config.job)
            .field("state", &self.state.load())
            .field("phase", &self.phase())
            .field("stats", &self.stats.snapshot())
            .finish()
    }
}
