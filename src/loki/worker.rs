//! Dispatch thread: assembles batches from the intake queue and delivers
//! them one at a time.

use std::io;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crossbeam_channel::{
    Receiver, RecvTimeoutError, Sender, TryRecvError, at, bounded, never, select,
};
use log::{info, warn};

use crate::metrics::DeliveryMetrics;
use crate::rate_limited_warner::RateLimitedWarner;

use super::SENDER_TARGET;
use super::batch::{Batch, BatchAssembler};
use super::delivery::Deliver;
use super::push::QueuedEntry;
use super::state::{AtomicWorkerPhase, ShippingStats, WorkerPhase};

/// Messages sent to the dispatch thread outside the data queue.
#[derive(Debug)]
pub(crate) enum Control {
    /// Drain what is queued, stopping at `deadline`.
    Shutdown { deadline: Instant },
}

/// State shared between the handler and its dispatch thread.
pub(crate) struct WorkerShared {
    pub(crate) stats: Arc<ShippingStats>,
    pub(crate) phase: Arc<AtomicWorkerPhase>,
    pub(crate) metrics: Arc<dyn DeliveryMetrics>,
}

#[derive(Clone, Copy, Debug)]
pub(crate) struct WorkerSettings {
    pub(crate) batch_size: usize,
    pub(crate) max_wait: Duration,
    pub(crate) warn_interval: Duration,
}

/// Handler-side ends of a running dispatch thread.
pub(crate) struct WorkerHandles {
    control: Sender<Control>,
    done: Receiver<()>,
    thread: JoinHandle<()>,
}

impl WorkerHandles {
    /// Ask the thread to drain and wait for it until `deadline`.
    ///
    /// Returns `true` when the deadline elapsed first; the thread is then
    /// detached and finishes (or stays blocked on the sink) on its own.
    pub(crate) fn stop(self, deadline: Instant) -> bool {
        let _ = self.control.try_send(Control::Shutdown { deadline });
        let remaining = deadline.saturating_duration_since(Instant::now());
        match self.done.recv_timeout(remaining) {
            Ok(()) => {
                let _ = self.thread.join();
                false
            }
            Err(RecvTimeoutError::Timeout) => {
                warn!(
                    target: SENDER_TARGET,
                    "Loki dispatch thread did not finish before the shutdown deadline; \
                     detaching, final delivered and lost counts settle once it stops"
                );
                true
            }
            Err(RecvTimeoutError::Disconnected) => {
                if self.thread.join().is_err() {
                    warn!(target: SENDER_TARGET, "Loki dispatch thread panicked");
                }
                false
            }
        }
    }
}

/// Spawn the dispatch thread consuming `rx`.
pub(crate) fn spawn_worker(
    rx: Receiver<QueuedEntry>,
    delivery: Box<dyn Deliver>,
    settings: WorkerSettings,
    shared: WorkerShared,
) -> io::Result<WorkerHandles> {
    let (control_tx, control_rx) = bounded(1);
    let (done_tx, done_rx) = bounded(1);
    let worker = Worker {
        rx,
        control: control_rx,
        done: done_tx,
        delivery,
        assembler: BatchAssembler::new(settings.batch_size, settings.max_wait),
        batch_size: settings.batch_size.max(1) as u64,
        failures: RateLimitedWarner::new(settings.warn_interval),
        shared,
    };
    let thread = thread::Builder::new()
        .name("loki-shipper".into())
        .spawn(move || worker.run())?;
    Ok(WorkerHandles {
        control: control_tx,
        done: done_rx,
        thread,
    })
}

struct Worker {
    rx: Receiver<QueuedEntry>,
    control: Receiver<Control>,
    done: Sender<()>,
    delivery: Box<dyn Deliver>,
    assembler: BatchAssembler,
    batch_size: u64,
    failures: RateLimitedWarner,
    shared: WorkerShared,
}

impl Worker {
    fn run(mut self) {
        let deadline = self.dispatch();
        self.drain(deadline);
        let _ = self.done.send(());
        self.shared.phase.store(WorkerPhase::Stopped);
    }

    /// Steady state. Returns the drain deadline once shutdown is requested.
    fn dispatch(&mut self) -> Instant {
        let rx = self.rx.clone();
        let control = self.control.clone();
        loop {
            // A pending shutdown wins over queued entries.
            match control.try_recv() {
                Ok(Control::Shutdown { deadline }) => return deadline,
                Err(TryRecvError::Disconnected) => return Instant::now(),
                Err(TryRecvError::Empty) => {}
            }
            let timer = match self.assembler.deadline() {
                Some(due) => {
                    self.shared.phase.store(WorkerPhase::Assembling);
                    at(due)
                }
                None => {
                    self.shared.phase.store(WorkerPhase::Idle);
                    never()
                }
            };
            select! {
                recv(rx) -> msg => match msg {
                    Ok(entry) => self.accept(entry),
                    // Intake closed: the shutdown signal follows.
                    Err(_) => return self.await_shutdown(),
                },
                recv(control) -> msg => return match msg {
                    Ok(Control::Shutdown { deadline }) => deadline,
                    Err(_) => Instant::now(),
                },
                recv(timer) -> _ => {
                    if let Some(batch) = self.assembler.take_if_due(Instant::now()) {
                        self.deliver(batch);
                    }
                }
            }
        }
    }

    fn await_shutdown(&self) -> Instant {
        match self.control.recv() {
            Ok(Control::Shutdown { deadline }) => deadline,
            Err(_) => Instant::now(),
        }
    }

    fn accept(&mut self, entry: QueuedEntry) {
        if let Some(batch) = self.assembler.push(entry) {
            self.deliver(batch);
        }
    }

    /// Deliver everything still queued until the queue is empty or
    /// `deadline` passes; whatever remains is counted as lost.
    fn drain(&mut self, deadline: Instant) {
        self.shared.phase.store(WorkerPhase::ShuttingDown);
        while Instant::now() < deadline {
            match self.rx.try_recv() {
                Ok(entry) => self.accept(entry),
                Err(_) => {
                    if let Some(batch) = self.assembler.take() {
                        self.deliver(batch);
                    }
                    break;
                }
            }
        }

        let mut lost = self.assembler.take().map_or(0, |batch| batch.len() as u64);
        while self.rx.try_recv().is_ok() {
            lost += 1;
        }
        if lost > 0 {
            ShippingStats::add(&self.shared.stats.lost, lost);
            warn!(
                target: SENDER_TARGET,
                "shutdown deadline reached; discarded {lost} unsent log entries"
            );
        }
        self.failures.flush(|count| {
            warn!(target: SENDER_TARGET, "{count} Loki batches failed delivery");
        });
    }

    fn deliver(&mut self, batch: Batch) {
        self.shared.phase.store(WorkerPhase::Delivering);
        let outcome = self.delivery.deliver(&batch);
        let count = batch.len() as u64;
        let stats = &self.shared.stats;
        if outcome.success {
            let total = ShippingStats::add(&stats.delivered, count);
            let batches = ShippingStats::add(&stats.batches_delivered, 1);
            for ((level, logger), n) in batch.label_counts() {
                self.shared.metrics.record_delivered(level, logger, n);
            }
            if progress_due(total - count, total, self.batch_size) {
                info!(
                    target: SENDER_TARGET,
                    "{total} log entries delivered to Loki in {batches} batches"
                );
            }
        } else {
            ShippingStats::add(&stats.failed, count);
            ShippingStats::add(&stats.batches_failed, 1);
            for ((level, logger), n) in batch.label_counts() {
                self.shared.metrics.record_failed(level, logger, n);
            }
            self.failures.record_drop();
            self.failures.warn_if_due(|failed| {
                warn!(
                    target: SENDER_TARGET,
                    "Loki delivery failed ({:?}, status {:?}); {failed} batches discarded",
                    outcome.error_kind,
                    outcome.http_status,
                );
            });
        }
    }
}

/// A notice is due on the first success and whenever the cumulative total
/// crosses a multiple of the batch size.
fn progress_due(before: u64, after: u64, batch_size: u64) -> bool {
    before == 0 || before / batch_size != after / batch_size
}
