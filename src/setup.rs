//! Start-up wiring of console and Loki handlers.
//!
//! [`configure_logging`] builds a fresh [`LoggerRegistry`], attaches a
//! console handler, and when Loki is configured starts a [`LokiHandler`] on
//! the root logger and on the web server categories. Failures to build or
//! start the Loki handler are logged and leave the service on console output.

use std::sync::Arc;
use std::time::Duration;

use crate::config::{LokiSettings, Settings};
use crate::handler::LogHandler;
use crate::handlers::{HandlerBuildError, HandlerBuilderTrait};
use crate::log_compat::{LogBridge, install_global_logger};
use crate::logger::{InvalidLoggerName, Logger, LoggerRegistry, SERVICE_LOGGERS, WEB_LOGGERS};
use crate::loki::{LokiHandler, ShutdownReport};
use crate::stream_handler::ConsoleHandler;

/// Category used for the configuration banner.
pub const SETUP_LOGGER: &str = "setup";

/// Handlers and registry produced by [`configure_logging`].
pub struct LoggingSetup {
    /// `true` when a Loki handler was built, started and attached.
    pub loki_connected: bool,
    pub registry: Arc<LoggerRegistry>,
    pub console: Arc<dyn LogHandler>,
    pub loki: Option<Arc<LokiHandler>>,
}

impl LoggingSetup {
    /// Route `log` crate records into this setup's registry.
    ///
    /// Returns `false` if a global logger was already installed.
    pub fn install_global(&self) -> bool {
        install_global_logger(LogBridge::new(Arc::clone(&self.registry)))
    }

    /// Drain the Loki handler within `deadline` and flush the console.
    ///
    /// Returns `None` when no Loki handler was running.
    pub fn shutdown(&self, deadline: Duration) -> Option<ShutdownReport> {
        let report = self.loki.as_ref().map(|loki| loki.shutdown(deadline));
        if let Some(report) = &report {
            let setup = self.setup_logger();
            if report.forced {
                setup.warn("Loki handler shutdown timed out; remaining logs were dropped");
            } else if !report.already_stopped {
                setup.info("Loki handler stopped");
            }
        }
        self.console.flush();
        report
    }

    fn setup_logger(&self) -> Arc<Logger> {
        self.registry
            .get(SETUP_LOGGER)
            .unwrap_or_else(|_| self.registry.root())
    }
}

impl std::fmt::Debug for LoggingSetup {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LoggingSetup")
            .field("loki_connected", &self.loki_connected)
            .field("registry", &self.registry)
            .field("loki", &self.loki)
            .finish_non_exhaustive()
    }
}

/// Configure logging with a stdout console and an HTTP Loki handler.
pub fn configure_logging(settings: &Settings) -> LoggingSetup {
    configure_logging_with(settings, Arc::new(ConsoleHandler::stdout()), |loki| {
        loki.to_builder().build_inner()
    })
}

/// Configure logging with the supplied console handler and Loki factory.
///
/// `build_loki` is only invoked when [`LokiSettings::is_configured`] holds.
pub fn configure_logging_with<F>(
    settings: &Settings,
    console: Arc<dyn LogHandler>,
    build_loki: F,
) -> LoggingSetup
where
    F: FnOnce(&LokiSettings) -> Result<LokiHandler, HandlerBuildError>,
{
    let registry = Arc::new(LoggerRegistry::new(settings.log_level));
    let root = registry.root();
    root.clear_handlers();
    root.set_level(settings.log_level);
    root.add_handler(Arc::clone(&console));
    registry.diagnostics().add_handler(Arc::clone(&console));
    // Service categories exist up front and inherit root's level.
    for name in SERVICE_LOGGERS {
        let _ = registry.get(name);
    }

    let mut setup = LoggingSetup {
        loki_connected: false,
        registry,
        console,
        loki: None,
    };
    let banner = setup.setup_logger();
    let loki = &settings.loki;

    if !loki.enabled {
        banner.info("Loki disabled");
        return setup;
    }
    if !loki.is_configured() {
        banner.warn("Loki not configured (LOKI_URL or LOKI_JOB missing)");
        return setup;
    }

    let handler = match build_loki(loki) {
        Ok(handler) => Arc::new(handler),
        Err(err) => {
            banner.error(&format!("failed to configure Loki handler: {err}"));
            return setup;
        }
    };
    if !handler.start() {
        banner.error("failed to start Loki handler");
        return setup;
    }

    let shared: Arc<dyn LogHandler> = Arc::clone(&handler) as Arc<dyn LogHandler>;
    root.add_handler(Arc::clone(&shared));
    if let Err(err) = wire_web_loggers(&setup, settings, &shared) {
        banner.warn(&format!("web server loggers not wired to Loki: {err}"));
    }
    log_banner(&banner, &handler);

    setup.loki_connected = true;
    setup.loki = Some(handler);
    setup
}

fn wire_web_loggers(
    setup: &LoggingSetup,
    settings: &Settings,
    loki: &Arc<dyn LogHandler>,
) -> Result<(), InvalidLoggerName> {
    for name in WEB_LOGGERS {
        let logger = setup.registry.get(name)?;
        logger.set_level(settings.log_level);
        logger.clear_handlers();
        logger.set_propagate(false);
    }
    setup
        .registry
        .attach_to(WEB_LOGGERS, Arc::clone(&setup.console))?;
    setup.registry.attach_to(WEB_LOGGERS, Arc::clone(loki))
}

fn log_banner(banner: &Logger, handler: &LokiHandler) {
    let config = handler.config();
    banner.info(&"=".repeat(80));
    banner.info("Loki handler configured");
    banner.info(&format!("   endpoint: {}", handler.endpoint()));
    banner.info(&format!("   job: {}", config.job));
    banner.info(&format!(
        "   labels: job={}, application={}",
        config.job, config.application
    ));
    banner.info(&format!(
        "   batching: {} entries or {} ms",
        config.batch_size,
        config.max_wait.as_millis()
    ));
    banner.info(&"=".repeat(80));
}
