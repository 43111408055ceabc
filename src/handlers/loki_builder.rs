//! Builder for [`LokiHandler`](crate::loki::LokiHandler).
//!
//! Exposes the collector URL, stream labels, authentication, batching policy
//! and timeouts. Everything except the URL and job falls back to the
//! defaults in [`crate::loki`].

use std::{collections::HashMap, sync::Arc, time::Duration};

use crate::formatter::SharedFormatter;
use crate::loki::{AuthConfig, LokiHandler, LokiHandlerConfig};
use crate::metrics::DeliveryMetrics;

use super::builder_macros::{ensure_positive, option_setter};
use super::{HandlerBuildError, HandlerBuilderTrait};

/// Builder for constructing [`LokiHandler`] instances.
#[derive(Clone, Default)]
pub struct LokiHandlerBuilder {
    url: Option<String>,
    job: Option<String>,
    application: Option<String>,
    auth: Option<AuthConfig>,
    headers: HashMap<String, String>,
    capacity: Option<usize>,
    batch_size: Option<usize>,
    max_wait_ms: Option<u64>,
    timeout_ms: Option<u64>,
    shutdown_timeout_ms: Option<u64>,
    warn_interval_ms: Option<u64>,
    formatter: Option<SharedFormatter>,
    metrics: Option<Arc<dyn DeliveryMetrics>>,
}

impl LokiHandlerBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the Loki base URL, e.g. `http://loki:3100` (required).
    pub fn with_url(mut self, url: impl Into<String>) -> Self {
        self.url = Some(url.into());
        self
    }

    /// Set the `job` label (required).
    pub fn with_job(mut self, job: impl Into<String>) -> Self {
        self.job = Some(job.into());
        self
    }

    /// Set the `application` label.
    pub fn with_application(mut self, application: impl Into<String>) -> Self {
        self.application = Some(application.into());
        self
    }

    pub fn with_basic_auth(
        mut self,
        username: impl Into<String>,
        password: impl Into<String>,
    ) -> Self {
        self.auth = Some(AuthConfig::Basic {
            username: username.into(),
            password: password.into(),
        });
        self
    }

    pub fn with_bearer_token(mut self, token: impl Into<String>) -> Self {
        self.auth = Some(AuthConfig::Bearer {
            token: token.into(),
        });
        self
    }

    /// Add a single custom HTTP header.
    pub fn with_header(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(key.into(), value.into());
        self
    }

    option_setter!(
        #[doc = "Set the bounded queue capacity."]
        with_capacity,
        capacity,
        usize
    );
    option_setter!(
        #[doc = "Set the maximum number of entries per push."]
        with_batch_size,
        batch_size,
        usize
    );
    option_setter!(
        #[doc = "Set how long a partial batch may wait, in milliseconds."]
        with_max_wait_ms,
        max_wait_ms,
        u64
    );
    option_setter!(
        #[doc = "Set the per-request timeout in milliseconds."]
        with_timeout_ms,
        timeout_ms,
        u64
    );
    option_setter!(
        #[doc = "Set the drain deadline applied when the handler is dropped."]
        with_shutdown_timeout_ms,
        shutdown_timeout_ms,
        u64
    );
    option_setter!(
        #[doc = "Set the interval between drop warnings in milliseconds."]
        with_warn_interval_ms,
        warn_interval_ms,
        u64
    );

    pub fn with_formatter(mut self, formatter: SharedFormatter) -> Self {
        self.formatter = Some(formatter);
        self
    }

    pub fn with_metrics(mut self, metrics: Arc<dyn DeliveryMetrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    fn validate(&self) -> Result<(), HandlerBuildError> {
        self.validate_url()?;
        self.validate_labels()?;
        self.validate_sizes()?;
        self.validate_timeouts()?;
        Ok(())
    }

    fn validate_url(&self) -> Result<(), HandlerBuildError> {
        let Some(url) = self.url.as_deref().map(str::trim) else {
            return Err(HandlerBuildError::InvalidConfig(
                "Loki handler requires a URL".into(),
            ));
        };
        let host = url
            .strip_prefix("http://")
            .or_else(|| url.strip_prefix("https://"));
        match host {
            Some(rest) if !rest.trim_start_matches('/').is_empty() => Ok(()),
            Some(_) => Err(HandlerBuildError::InvalidConfig(format!(
                "URL {url:?} has no host"
            ))),
            None => Err(HandlerBuildError::InvalidConfig(format!(
                "URL {url:?} must start with http:// or https://"
            ))),
        }
    }

    fn validate_labels(&self) -> Result<(), HandlerBuildError> {
        if self.job.as_deref().is_none_or(|job| job.trim().is_empty()) {
            return Err(HandlerBuildError::InvalidConfig(
                "job label must not be empty".into(),
            ));
        }
        if self
            .application
            .as_deref()
            .is_some_and(|app| app.trim().is_empty())
        {
            return Err(HandlerBuildError::InvalidConfig(
                "application label must not be empty".into(),
            ));
        }
        Ok(())
    }

    fn validate_sizes(&self) -> Result<(), HandlerBuildError> {
        if let Some(capacity) = self.capacity {
            ensure_positive!(capacity, "capacity")?;
        }
        if let Some(batch_size) = self.batch_size {
            ensure_positive!(batch_size, "batch_size")?;
        }
        Ok(())
    }

    fn validate_timeouts(&self) -> Result<(), HandlerBuildError> {
        for (value, field) in [
            (self.max_wait_ms, "max_wait_ms"),
            (self.timeout_ms, "timeout_ms"),
            (self.warn_interval_ms, "warn_interval_ms"),
        ] {
            if let Some(ms) = value {
                ensure_positive!(ms, field)?;
            }
        }
        Ok(())
    }

    /// Validate and produce the handler configuration.
    pub fn build_config(&self) -> Result<LokiHandlerConfig, HandlerBuildError> {
        self.validate()?;

        let defaults = LokiHandlerConfig::default();
        Ok(LokiHandlerConfig {
            base_url: self.url.as_deref().map(str::trim).unwrap_or_default().to_owned(),
            job: self.job.clone().unwrap_or_default(),
            application: self.application.clone().unwrap_or(defaults.application),
            capacity: self.capacity.unwrap_or(defaults.capacity),
            batch_size: self.batch_size.unwrap_or(defaults.batch_size),
            max_wait: self
                .max_wait_ms
                .map_or(defaults.max_wait, Duration::from_millis),
            request_timeout: self
                .timeout_ms
                .map_or(defaults.request_timeout, Duration::from_millis),
            shutdown_timeout: self
                .shutdown_timeout_ms
                .map_or(defaults.shutdown_timeout, Duration::from_millis),
            auth: self.auth.clone().unwrap_or(defaults.auth),
            headers: self.headers.clone(),
            warn_interval: self
                .warn_interval_ms
                .map_or(defaults.warn_interval, Duration::from_millis),
        })
    }
}

impl HandlerBuilderTrait for LokiHandlerBuilder {
    type Handler = LokiHandler;

    /// Build a stopped handler; call [`LokiHandler::start`] before logging.
    fn build_inner(&self) -> Result<Self::Handler, HandlerBuildError> {
        let config = self.build_config()?;
        let mut handler = LokiHandler::with_config(config);
        if let Some(formatter) = &self.formatter {
            handler = handler.with_formatter(formatter.clone());
        }
        if let Some(metrics) = &self.metrics {
            handler = handler.with_metrics(Arc::clone(metrics));
        }
        Ok(handler)
    }
}

impl std::fmt::Debug for LokiHandlerBuilder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LokiHandlerBuilder")
            .field("url", &self.url)
            .field("job", &self.job)
            .field("application", &self.application)
            .field("capacity", &self.capacity)
            .field("batch_size", &self.batch_size)
            .field("max_wait_ms", &self.max_wait_ms)
            .field("timeout_ms", &self.timeout_ms)
            .field("shutdown_timeout_ms", &self.shutdown_timeout_ms)
            .field("has_metrics", &self.metrics.is_some())
            .finish_non_exhaustive()
    }
}
