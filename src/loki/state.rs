//! Lifecycle state and cumulative counters shared between the handler and
//! its dispatch thread.

use std::sync::atomic::{AtomicU8, AtomicU64, Ordering};

/// Lifecycle of a [`LokiHandler`](super::LokiHandler).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum HandlerState {
    Stopped,
    Running,
    Draining,
}

impl HandlerState {
    fn from_u8(value: u8) -> Self {
        match value {
            1 => Self::Running,
            2 => Self::Draining,
            _ => Self::Stopped,
        }
    }

    fn as_u8(self) -> u8 {
        match self {
            Self::Stopped => 0,
            Self::Running => 1,
            Self::Draining => 2,
        }
    }
}

/// Atomic cell holding a [`HandlerState`].
///
/// Only the transitions `Stopped -> Running`, `Running -> Draining` and
/// `Draining -> Stopped` succeed; [`AtomicHandlerState::transition`] rejects
/// anything else.
#[derive(Debug)]
pub struct AtomicHandlerState(AtomicU8);

impl AtomicHandlerState {
    pub fn new(state: HandlerState) -> Self {
        Self(AtomicU8::new(state.as_u8()))
    }

    pub fn load(&self) -> HandlerState {
        HandlerState::from_u8(self.0.load(Ordering::Acquire))
    }

    /// Move from `from` to `to`. Returns `false` when the current state is
    /// not `from` or the transition is not part of the lifecycle.
    pub fn transition(&self, from: HandlerState, to: HandlerState) -> bool {
        let allowed = matches!(
            (from, to),
            (HandlerState::Stopped, HandlerState::Running)
                | (HandlerState::Running, HandlerState::Draining)
                | (HandlerState::Draining, HandlerState::Stopped)
        );
        allowed
            && self
                .0
                .compare_exchange(from.as_u8(), to.as_u8(), Ordering::AcqRel, Ordering::Acquire)
                .is_ok()
    }

    /// Unconditional reset, used when a start attempt fails half way.
    pub(crate) fn reset(&self, state: HandlerState) {
        self.0.store(state.as_u8(), Ordering::Release);
    }
}

/// Phase of the dispatch loop, published for observability.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum WorkerPhase {
    Idle,
    Assembling,
    Delivering,
    ShuttingDown,
    Stopped,
}

#[derive(Debug)]
pub struct AtomicWorkerPhase(AtomicU8);

impl AtomicWorkerPhase {
    pub fn new(phase: WorkerPhase) -> Self {
        let cell = Self(AtomicU8::new(0));
        cell.store(phase);
        cell
    }

    pub fn store(&self, phase: WorkerPhase) {
        let raw = match phase {
            WorkerPhase::Idle => 0,
            WorkerPhase::Assembling => 1,
            WorkerPhase::Delivering => 2,
            WorkerPhase::ShuttingDown => 3,
            WorkerPhase::Stopped => 4,
        };
        self.0.store(raw, Ordering::Release);
    }

    pub fn load(&self) -> WorkerPhase {
        match self.0.load(Ordering::Acquire) {
            0 => WorkerPhase::Idle,
            1 => WorkerPhase::Assembling,
            2 => WorkerPhase::Delivering,
            3 => WorkerPhase::ShuttingDown,
            _ => WorkerPhase::Stopped,
        }
    }
}

/// Cumulative, monotonic counters for one handler instance.
///
/// `enqueued` and `dropped` are written by producers; every other counter is
/// written by the dispatch thread only.
#[derive(Debug, Default)]
pub struct ShippingStats {
    pub(crate) enqueued: AtomicU64,
    pub(crate) dropped: AtomicU64,
    pub(crate) delivered: AtomicU64,
    pub(crate) failed: AtomicU64,
    pub(crate) lost: AtomicU64,
    pub(crate) batches_delivered: AtomicU64,
    pub(crate) batches_failed: AtomicU64,
}

impl ShippingStats {
    pub(crate) fn add(counter: &AtomicU64, n: u64) -> u64 {
        counter.fetch_add(n, Ordering::Relaxed) + n
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            enqueued: self.enqueued.load(Ordering::Relaxed),
            dropped: self.dropped.load(Ordering::Relaxed),
            delivered: self.delivered.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
            lost: self.lost.load(Ordering::Relaxed),
            batches_delivered: self.batches_delivered.load(Ordering::Relaxed),
            batches_failed: self.batches_failed.load(Ordering::Relaxed),
        }
    }
}

/// Point-in-time copy of [`ShippingStats`].
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct StatsSnapshot {
    /// Events accepted into the queue.
    pub enqueued: u64,
    /// Events refused at enqueue (queue full or not running).
    pub dropped: u64,
    /// Events in batches the collector accepted.
    pub delivered: u64,
    /// Events in batches that failed delivery.
    pub failed: u64,
    /// Events still queued when a drain deadline expired.
    pub lost: u64,
    pub batches_delivered: u64,
    pub batches_failed: u64,
}

/// Result of [`LokiHandler::shutdown`](super::LokiHandler::shutdown).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ShutdownReport {
    /// The deadline elapsed before the dispatch loop confirmed it stopped.
    pub forced: bool,
    /// The handler was already draining or stopped; nothing was done.
    pub already_stopped: bool,
    /// Counters observed when shutdown returned.
    ///
    /// When `forced` is set the detached dispatch thread may still deliver
    /// its in-flight batch and count what it discards as `lost`, so only
    /// [`LokiHandler::stats`](super::LokiHandler::stats) read after
    /// [`WorkerPhase::Stopped`] is final.
    pub stats: StatsSnapshot,
}
