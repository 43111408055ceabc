//! Delivery metrics sink.
//!
//! The shipping worker reports per-batch delivered and failed counts tagged by
//! `(level, logger)`. The exporter behind the sink (Prometheus in the service)
//! lives outside this crate; [`NoopMetrics`] is used when none is configured.

use std::collections::BTreeMap;

use parking_lot::Mutex;

use crate::level::LogLevel;

/// Receiver for delivery counts.
///
/// Called from the dispatch thread only. Implementations must not block for
/// long and must not log through the shipping handler.
pub trait DeliveryMetrics: Send + Sync {
    fn record_delivered(&self, level: LogLevel, logger: &str, count: u64);
    fn record_failed(&self, level: LogLevel, logger: &str, count: u64);
}

#[derive(Clone, Copy, Debug, Default)]
pub struct NoopMetrics;

impl DeliveryMetrics for NoopMetrics {
    fn record_delivered(&self, _level: LogLevel, _logger: &str, _count: u64) {}
    fn record_failed(&self, _level: LogLevel, _logger: &str, _count: u64) {}
}

/// Keyed by `(level label, logger name)`.
pub type LabelTotals = BTreeMap<(&'static str, String), u64>;

/// In-process totals, useful for health endpoints and tests.
#[derive(Debug, Default)]
pub struct InMemoryMetrics {
    delivered: Mutex<LabelTotals>,
    failed: Mutex<LabelTotals>,
}

impl InMemoryMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn delivered(&self) -> LabelTotals {
        self.delivered.lock().clone()
    }

    pub fn failed(&self) -> LabelTotals {
        self.failed.lock().clone()
    }

    pub fn delivered_total(&self) -> u64 {
        self.delivered.lock().values().sum()
    }

    pub fn failed_total(&self) -> u64 {
        self.failed.lock().values().sum()
    }
}

fn bump(totals: &Mutex<LabelTotals>, level: LogLevel, logger: &str, count: u64) {
    *totals
        .lock()
        .entry((level.as_label(), logger.to_owned()))
        .or_default() += count;
}

impl DeliveryMetrics for InMemoryMetrics {
    fn record_delivered(&self, level: LogLevel, logger: &str, count: u64) {
        bump(&self.delivered, level, logger, count);
    }

    fn record_failed(&self, level: LogLevel, logger: &str, count: u64) {
        bump(&self.failed, level, logger, count);
    }
}
