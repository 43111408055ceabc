//! Structured logging with batched shipping to Grafana Loki.
//!
//! Events are created by [`Logger`]s held in a [`LoggerRegistry`] and fanned
//! out to handlers. [`ConsoleHandler`] writes formatted lines locally;
//! [`LokiHandler`] queues them for a background thread that pushes batches
//! to the Loki HTTP API. [`configure_logging`] wires both from
//! environment-derived [`Settings`].

pub mod config;
pub mod formatter;
pub mod handler;
pub mod handlers;
pub mod level;
pub mod log_compat;
pub mod log_event;
pub mod logger;
pub mod loki;
pub mod metrics;
mod rate_limited_warner;
pub mod setup;
mod stream_handler;

#[cfg(any(test, feature = "test-util"))]
pub mod test_utils;

pub use config::{ConfigError, LokiSettings, Settings};
pub use formatter::{DefaultFormatter, LineFormatter, MessageFormatter, SharedFormatter};
pub use handler::{HandlerError, LogHandler};
pub use handlers::{HandlerBuildError, HandlerBuilderTrait, LokiHandlerBuilder};
pub use level::{LogLevel, ParseLevelError};
pub use log_compat::{LogBridge, install_global_logger};
pub use log_event::LogEvent;
pub use logger::{InvalidLoggerName, Logger, LoggerRegistry};
pub use loki::{
    AuthConfig, HandlerState, LokiHandler, LokiHandlerConfig, ShutdownReport, StatsSnapshot,
    WorkerPhase,
};
pub use metrics::{DeliveryMetrics, InMemoryMetrics, NoopMetrics};
pub use rate_limited_warner::{DEFAULT_WARN_INTERVAL, RateLimitedWarner};
pub use setup::{LoggingSetup, configure_logging, configure_logging_with};
pub use stream_handler::ConsoleHandler;
