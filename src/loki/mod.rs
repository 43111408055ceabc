//! Batched log shipping to a Grafana Loki collector.
//!
//! [`LokiHandler`] accepts [`LogEvent`](crate::log_event::LogEvent)s from any
//! thread without blocking, queues them in a bounded channel and hands them
//! to a dedicated dispatch thread. The thread groups entries into batches of
//! at most `batch_size` entries, closing a partial batch once `max_wait` has
//! passed since its first entry, and posts each batch to
//! `{base_url}/loki/api/v1/push`.
//!
//! # Delivery semantics
//!
//! - **200 / 204**: the batch is counted as delivered.
//! - **Anything else** (other status, connection failure, timeout,
//!   serialisation failure): the batch is counted as failed and discarded.
//!   There are no retries.
//!
//! # Lifecycle
//!
//! Handlers start `Stopped`. [`LokiHandler::start`] moves to `Running`;
//! [`LokiHandler::shutdown`] moves to `Draining`, closes intake, drains until
//! the queue is empty or the deadline passes, and ends `Stopped`.
//!
//! Diagnostics about the shipper itself are emitted through the `log` facade
//! on [`SENDER_TARGET`] and must be routed to local handlers only.

mod batch;
mod config;
mod delivery;
mod handler;
mod push;
mod state;
mod worker;

#[cfg(test)]
mod tests;

/// `log` target for diagnostics emitted by the shipper.
pub const SENDER_TARGET: &str = "loki_sender";

pub use batch::{Batch, BatchAssembler};
pub use config::{
    AuthConfig, DEFAULT_APPLICATION, DEFAULT_BATCH_SIZE, DEFAULT_MAX_WAIT, DEFAULT_QUEUE_CAPACITY,
    DEFAULT_REQUEST_TIMEOUT, DEFAULT_SHUTDOWN_TIMEOUT, LokiHandlerConfig, PUSH_PATH,
};
#[cfg(any(test, feature = "test-util"))]
pub(crate) use delivery::classify_status;
pub use delivery::{Deliver, DeliveryErrorKind, DeliveryOutcome, HttpDelivery};
pub use handler::LokiHandler;
pub use push::{QueuedEntry, StaticLabels, serialise_push};
pub use state::{HandlerState, ShutdownReport, StatsSnapshot, WorkerPhase};
