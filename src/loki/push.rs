//! Loki push payload.
//!
//! Every queued entry becomes one stream object carrying the
//! `{job, application, level, logger}` label set and a single
//! `[unix-nanos, line]` pair, in emission order:
//!
//! ```json
//! {"streams":[{"stream":{"job":"j","application":"a","level":"info","logger":"api"},
//!              "values":[["1700000000000000000","line"]]}]}
//! ```

use serde::Serialize;

use crate::formatter::SharedFormatter;
use crate::level::LogLevel;
use crate::log_event::LogEvent;

/// A formatted event waiting in the queue.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct QueuedEntry {
    pub level: LogLevel,
    pub logger: String,
    pub timestamp_nanos: u128,
    pub line: String,
}

impl QueuedEntry {
    /// Render `event` with `formatter`; never fails.
    pub fn from_event(event: LogEvent, formatter: &SharedFormatter) -> Self {
        let line = formatter.render(&event);
        let timestamp_nanos = event.timestamp_nanos();
        let level = event.level();
        Self {
            level,
            logger: event.logger().to_owned(),
            timestamp_nanos,
            line,
        }
    }
}

/// Labels shared by every stream a handler pushes.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StaticLabels {
    pub job: String,
    pub application: String,
}

#[derive(Serialize)]
struct StreamLabels<'a> {
    job: &'a str,
    application: &'a str,
    level: &'static str,
    logger: &'a str,
}

#[derive(Serialize)]
struct PushStream<'a> {
    stream: StreamLabels<'a>,
    values: [(String, &'a str); 1],
}

#[derive(Serialize)]
struct PushPayload<'a> {
    streams: Vec<PushStream<'a>>,
}

/// Serialise `entries` into the JSON body expected by the push API.
pub fn serialise_push<'a, I>(labels: &StaticLabels, entries: I) -> serde_json::Result<String>
where
    I: IntoIterator<Item = &'a QueuedEntry>,
{
    let streams = entries
        .into_iter()
        .map(|entry| PushStream {
            stream: StreamLabels {
                job: &labels.job,
                application: &labels.application,
                level: entry.level.as_label(),
                logger: &entry.logger,
            },
            values: [(entry.timestamp_nanos.to_string(), entry.line.as_str())],
        })
        .collect();
    serde_json::to_string(&PushPayload { streams })
}
