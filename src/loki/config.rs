//! Configuration consumed by the Loki handler lifecycle.
//!
//! [`LokiHandlerBuilder`](crate::handlers::LokiHandlerBuilder) validates and
//! constructs these values before handing them to
//! [`LokiHandler`](super::LokiHandler).

use std::collections::HashMap;
use std::time::Duration;

use crate::rate_limited_warner::DEFAULT_WARN_INTERVAL;

/// Default bounded queue capacity.
pub const DEFAULT_QUEUE_CAPACITY: usize = 1024;
/// Default number of entries per push request.
pub const DEFAULT_BATCH_SIZE: usize = 10;
/// Default time a partial batch may wait for more entries.
pub const DEFAULT_MAX_WAIT: Duration = Duration::from_secs(5);
/// Default per-request timeout.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(5);
/// Default bound on the drain performed by `shutdown`.
pub const DEFAULT_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(10);
/// Path of the Loki push API relative to the base URL.
pub const PUSH_PATH: &str = "/loki/api/v1/push";
/// Value of the `application` label when none is configured.
pub const DEFAULT_APPLICATION: &str = "produto-api";

/// Authentication applied to push requests.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub enum AuthConfig {
    #[default]
    None,
    /// HTTP Basic authentication (Grafana Cloud style user id + token).
    Basic { username: String, password: String },
    Bearer { token: String },
}

/// Configuration object describing how to construct a
/// [`LokiHandler`](super::LokiHandler).
#[derive(Clone, Debug)]
pub struct LokiHandlerConfig {
    /// Base URL of the Loki server, e.g. `http://loki:3100`.
    pub base_url: String,
    /// Value of the `job` label.
    pub job: String,
    /// Value of the `application` label.
    pub application: String,
    /// Bounded queue capacity between producers and the worker.
    pub capacity: usize,
    /// Maximum entries per batch.
    pub batch_size: usize,
    /// Maximum time since the first pending entry before a batch is closed.
    pub max_wait: Duration,
    /// Timeout applied to each push request.
    pub request_timeout: Duration,
    /// Drain deadline used when the handler is dropped.
    pub shutdown_timeout: Duration,
    pub auth: AuthConfig,
    /// Additional HTTP headers sent with every push.
    pub headers: HashMap<String, String>,
    /// Interval between rate-limited drop warnings.
    pub warn_interval: Duration,
}

impl LokiHandlerConfig {
    /// Full push URL: the base URL without trailing slashes plus [`PUSH_PATH`].
    pub fn endpoint(&self) -> String {
        format!("{}{PUSH_PATH}", self.base_url.trim_end_matches('/'))
    }
}

impl Default for LokiHandlerConfig {
    fn default() -> Self {
        Self {
            base_url: String::new(),
            job: String::new(),
            application: DEFAULT_APPLICATION.to_owned(),
            capacity: DEFAULT_QUEUE_CAPACITY,
            batch_size: DEFAULT_BATCH_SIZE,
            max_wait: DEFAULT_MAX_WAIT,
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
            shutdown_timeout: DEFAULT_SHUTDOWN_TIMEOUT,
            auth: AuthConfig::default(),
            headers: HashMap::new(),
            warn_interval: DEFAULT_WARN_INTERVAL,
        }
    }
}
