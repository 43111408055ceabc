//! Environment driven settings.
//!
//! [`Settings`] mirrors the service's environment variables. Values come from
//! the process environment, optionally layered over a `.env` file parsed with
//! `rust-ini`. Missing variables take their documented defaults; malformed
//! numbers are reported as [`ConfigError::InvalidValue`].

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use ini::Ini;
use thiserror::Error;

use crate::handlers::LokiHandlerBuilder;
use crate::level::LogLevel;
use crate::loki::{
    DEFAULT_APPLICATION, DEFAULT_BATCH_SIZE, DEFAULT_MAX_WAIT, DEFAULT_QUEUE_CAPACITY,
    DEFAULT_REQUEST_TIMEOUT, DEFAULT_SHUTDOWN_TIMEOUT,
};

pub const DEFAULT_LOKI_URL: &str = "http://172.30.0.45:3100";
pub const DEFAULT_LOKI_JOB: &str = "MONITORAMENTO_PRODUTO";

/// Errors raised while loading [`Settings`].
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid value {value:?} for {key}")]
    InvalidValue { key: &'static str, value: String },
    #[error("failed to read {path}: {source}")]
    EnvFile {
        path: PathBuf,
        #[source]
        source: ini::Error,
    },
}

/// Settings for the Loki shipping path.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LokiSettings {
    pub enabled: bool,
    pub url: String,
    pub job: String,
    pub application: String,
    pub batch_size: usize,
    pub max_wait: Duration,
    pub request_timeout: Duration,
    pub shutdown_timeout: Duration,
    pub capacity: usize,
}

impl Default for LokiSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            url: DEFAULT_LOKI_URL.to_owned(),
            job: DEFAULT_LOKI_JOB.to_owned(),
            application: DEFAULT_APPLICATION.to_owned(),
            batch_size: DEFAULT_BATCH_SIZE,
            max_wait: DEFAULT_MAX_WAIT,
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
            shutdown_timeout: DEFAULT_SHUTDOWN_TIMEOUT,
            capacity: DEFAULT_QUEUE_CAPACITY,
        }
    }
}

impl LokiSettings {
    /// Whether shipping should be attempted: enabled with a URL and a job.
    pub fn is_configured(&self) -> bool {
        self.enabled && !self.url.trim().is_empty() && !self.job.trim().is_empty()
    }

    /// Seed a [`LokiHandlerBuilder`] with these settings.
    pub fn to_builder(&self) -> LokiHandlerBuilder {
        LokiHandlerBuilder::new()
            .with_url(self.url.clone())
            .with_job(self.job.clone())
            .with_application(self.application.clone())
            .with_batch_size(self.batch_size)
            .with_capacity(self.capacity)
            .with_max_wait_ms(duration_ms(self.max_wait))
            .with_timeout_ms(duration_ms(self.request_timeout))
            .with_shutdown_timeout_ms(duration_ms(self.shutdown_timeout))
    }
}

fn duration_ms(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

/// Process wide logging settings.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Settings {
    pub log_level: LogLevel,
    pub loki: LokiSettings,
}

impl Settings {
    /// Read settings from the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Read a `.env` file, letting the process environment override it.
    pub fn from_env_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let ini = Ini::load_from_file(path).map_err(|source| ConfigError::EnvFile {
            path: path.to_path_buf(),
            source,
        })?;
        let file: HashMap<String, String> = ini
            .section(None::<String>)
            .map(|props| {
                props
                    .iter()
                    .map(|(key, value)| (key.to_owned(), value.to_owned()))
                    .collect()
            })
            .unwrap_or_default();
        Self::from_lookup(|key| std::env::var(key).ok().or_else(|| file.get(key).cloned()))
    }

    /// Build settings from an arbitrary key lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = LokiSettings::default();
        let log_level = lookup("LOG_LEVEL")
            .map(|raw| LogLevel::parse_or_info(&raw))
            .unwrap_or_default();
        let enabled = lookup("LOKI_ENABLED")
            .map_or(defaults.enabled, |raw| raw.trim().eq_ignore_ascii_case("true"));

        let loki = LokiSettings {
            enabled,
            url: lookup("LOKI_URL").unwrap_or(defaults.url),
            job: lookup("LOKI_JOB").unwrap_or(defaults.job),
            application: lookup("LOKI_APPLICATION").unwrap_or(defaults.application),
            batch_size: parse_number(&lookup, "LOKI_BATCH_SIZE")?.unwrap_or(defaults.batch_size),
            max_wait: parse_millis(&lookup, "LOKI_MAX_WAIT_MS")?.unwrap_or(defaults.max_wait),
            request_timeout: parse_millis(&lookup, "LOKI_TIMEOUT_MS")?
                .unwrap_or(defaults.request_timeout),
            shutdown_timeout: parse_millis(&lookup, "LOKI_SHUTDOWN_TIMEOUT_MS")?
                .unwrap_or(defaults.shutdown_timeout),
            capacity: parse_number(&lookup, "LOKI_QUEUE_CAPACITY")?.unwrap_or(defaults.capacity),
        };
        Ok(Self { log_level, loki })
    }
}

fn parse_number<F, T>(lookup: &F, key: &'static str) -> Result<Option<T>, ConfigError>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
{
    lookup(key)
        .map(|raw| {
            raw.trim()
                .parse::<T>()
                .map_err(|_| ConfigError::InvalidValue { key, value: raw })
        })
        .transpose()
}

fn parse_millis<F>(lookup: &F, key: &'static str) -> Result<Option<Duration>, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    Ok(parse_number::<F, u64>(lookup, key)?.map(Duration::from_millis))
}
