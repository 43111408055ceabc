//! An in-memory [`Deliver`] implementation with controllable latency,
//! status and blocking.

use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use crossbeam_channel::{Receiver, Sender, bounded};
use parking_lot::Mutex;

use crate::loki::{Batch, Deliver, DeliveryOutcome, QueuedEntry};

/// Records every batch it is asked to deliver.
///
/// Clones share the same record, so a test keeps one copy and hands the
/// others to [`LokiHandler::with_delivery`](crate::loki::LokiHandler::with_delivery).
#[derive(Clone)]
pub struct RecordingDelivery {
    batches: Arc<Mutex<Vec<Vec<QueuedEntry>>>>,
    delay: Duration,
    status: u16,
    gate: Option<Receiver<()>>,
}

impl Default for RecordingDelivery {
    fn default() -> Self {
        Self {
            batches: Arc::default(),
            delay: Duration::ZERO,
            status: 204,
            gate: None,
        }
    }
}

impl RecordingDelivery {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sleep for `delay` inside every delivery.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    /// Answer every delivery as if the collector returned `status`.
    pub fn with_status(mut self, status: u16) -> Self {
        self.status = status;
        self
    }

    /// Block every delivery until a token is sent on the returned sender.
    /// Dropping the sender releases all current and future deliveries.
    pub fn gated(mut self) -> (Self, Sender<()>) {
        let (tx, rx) = bounded(0);
        self.gate = Some(rx);
        (self, tx)
    }

    pub fn batches(&self) -> Vec<Vec<QueuedEntry>> {
        self.batches.lock().clone()
    }

    pub fn batch_sizes(&self) -> Vec<usize> {
        self.batches.lock().iter().map(Vec::len).collect()
    }

    /// Every delivered line, flattened in delivery order.
    pub fn lines(&self) -> Vec<String> {
        self.batches
            .lock()
            .iter()
            .flatten()
            .map(|entry| entry.line.clone())
            .collect()
    }

    /// Poll until at least `count` batches were recorded or `timeout` passes.
    pub fn wait_for_batches(&self, count: usize, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        while Instant::now() < deadline {
            if self.batches.lock().len() >= count {
                return true;
            }
            thread::sleep(Duration::from_millis(5));
        }
        self.batches.lock().len() >= count
    }
}

impl Deliver for RecordingDelivery {
    fn deliver(&mut self, batch: &Batch) -> DeliveryOutcome {
        if let Some(gate) = &self.gate {
            let _ = gate.recv();
        }
        if !self.delay.is_zero() {
            thread::sleep(self.delay);
        }
        self.batches.lock().push(batch.entries().to_vec());
        crate::loki::classify_status(self.status)
    }
}
