//! Delivery of assembled batches to the Loki push API.
//!
//! [`HttpDelivery`] keeps one `ureq::Agent` for connection pooling and issues
//! one POST per batch. It never retries; every failure becomes a
//! [`DeliveryOutcome`] for the dispatch loop to count.

use std::io;
use std::sync::Arc;

use base64::{Engine, engine::general_purpose::STANDARD as BASE64_STANDARD};
use log::warn;
use native_tls::TlsConnector;
use ureq::{Agent, AgentBuilder};

use super::SENDER_TARGET;
use super::batch::Batch;
use super::config::{AuthConfig, LokiHandlerConfig};
use super::push::{StaticLabels, serialise_push};

/// Why a batch was not accepted.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum DeliveryErrorKind {
    /// The collector could not be reached.
    ConnectionError,
    /// The request did not complete within the request timeout.
    Timeout,
    /// The collector answered with a status other than 200 or 204.
    UnexpectedStatus,
    /// The batch could not be turned into a request body.
    SerializationError,
}

/// Result of one delivery attempt.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct DeliveryOutcome {
    pub success: bool,
    pub http_status: Option<u16>,
    pub error_kind: Option<DeliveryErrorKind>,
}

impl DeliveryOutcome {
    pub fn delivered(status: u16) -> Self {
        Self {
            success: true,
            http_status: Some(status),
            error_kind: None,
        }
    }

    pub fn failed(kind: DeliveryErrorKind, http_status: Option<u16>) -> Self {
        Self {
            success: false,
            http_status,
            error_kind: Some(kind),
        }
    }
}

/// Sends batches to a sink. Implementations run on the dispatch thread only
/// and must report failures through the returned outcome.
pub trait Deliver: Send {
    fn deliver(&mut self, batch: &Batch) -> DeliveryOutcome;
}

impl<D: Deliver + ?Sized> Deliver for Box<D> {
    fn deliver(&mut self, batch: &Batch) -> DeliveryOutcome {
        (**self).deliver(batch)
    }
}

/// Map an HTTP status to an outcome. Only 200 and 204 count as accepted.
pub(crate) fn classify_status(status: u16) -> DeliveryOutcome {
    match status {
        200 | 204 => DeliveryOutcome::delivered(status),
        _ => DeliveryOutcome::failed(DeliveryErrorKind::UnexpectedStatus, Some(status)),
    }
}

fn classify_transport(err: &ureq::Transport) -> DeliveryErrorKind {
    let timed_out = std::error::Error::source(err)
        .and_then(|source| source.downcast_ref::<io::Error>())
        .is_some_and(|io_err| {
            matches!(
                io_err.kind(),
                io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock
            )
        });
    if timed_out {
        DeliveryErrorKind::Timeout
    } else {
        DeliveryErrorKind::ConnectionError
    }
}

/// Blocking HTTP client for the push endpoint.
pub struct HttpDelivery {
    agent: Agent,
    endpoint: String,
    labels: StaticLabels,
    auth_header: Option<String>,
    headers: Vec<(String, String)>,
}

impl HttpDelivery {
    pub fn new(config: &LokiHandlerConfig) -> Self {
        let mut builder = AgentBuilder::new().timeout(config.request_timeout);
        match TlsConnector::new() {
            Ok(connector) => builder = builder.tls_connector(Arc::new(connector)),
            Err(err) => {
                warn!(target: SENDER_TARGET, "TLS initialisation failed, using defaults: {err}");
            }
        }
        let mut headers: Vec<_> = config
            .headers
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        headers.sort();
        Self {
            agent: builder.build(),
            endpoint: config.endpoint(),
            labels: StaticLabels {
                job: config.job.clone(),
                application: config.application.clone(),
            },
            auth_header: auth_header(&config.auth),
            headers,
        }
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    fn post(&self, body: &str) -> DeliveryOutcome {
        let mut req = self
            .agent
            .post(&self.endpoint)
            .set("Content-Type", "application/json");
        if let Some(value) = &self.auth_header {
            req = req.set("Authorization", value);
        }
        for (key, value) in &self.headers {
            req = req.set(key, value);
        }
        match req.send_string(body) {
            Ok(response) => classify_status(response.status()),
            Err(ureq::Error::Status(code, _)) => classify_status(code),
            Err(ureq::Error::Transport(transport)) => {
                DeliveryOutcome::failed(classify_transport(&transport), None)
            }
        }
    }
}

impl Deliver for HttpDelivery {
    fn deliver(&mut self, batch: &Batch) -> DeliveryOutcome {
        match serialise_push(&self.labels, batch.entries()) {
            Ok(body) => self.post(&body),
            Err(err) => {
                warn!(target: SENDER_TARGET, "failed to serialise Loki batch: {err}");
                DeliveryOutcome::failed(DeliveryErrorKind::SerializationError, None)
            }
        }
    }
}

fn auth_header(auth: &AuthConfig) -> Option<String> {
    match auth {
        AuthConfig::None => None,
        AuthConfig::Basic { username, password } => {
            let encoded = BASE64_STANDARD.encode(format!("{username}:{password}"));
            Some(format!("Basic {encoded}"))
        }
        AuthConfig::Bearer { token } => Some(format!("Bearer {token}")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case(200)]
    #[case(204)]
    fn accepted_statuses(#[case] status: u16) {
        assert_eq!(classify_status(status), DeliveryOutcome::delivered(status));
    }

    #[rstest]
    #[case(201)]
    #[case(400)]
    #[case(429)]
    #[case(500)]
    #[case(503)]
    fn every_other_status_is_unexpected(#[case] status: u16) {
        let outcome = classify_status(status);
        assert!(!outcome.success);
        assert_eq!(outcome.http_status, Some(status));
        assert_eq!(outcome.error_kind, Some(DeliveryErrorKind::UnexpectedStatus));
    }

    #[test]
    fn basic_auth_is_base64_encoded() {
        let auth = AuthConfig::Basic {
            username: "user".into(),
            password: "pass".into(),
        };
        assert_eq!(auth_header(&auth).as_deref(), Some("Basic dXNlcjpwYXNz"));
    }

    #[test]
    fn bearer_and_none_auth_headers() {
        let bearer = AuthConfig::Bearer {
            token: "t0k".into(),
        };
        assert_eq!(auth_header(&bearer).as_deref(), Some("Bearer t0k"));
        assert_eq!(auth_header(&AuthConfig::None), None);
    }

    #[test]
    fn http_delivery_targets_push_endpoint() {
        let config = LokiHandlerConfig {
            base_url: "http://127.0.0.1:3100/".into(),
            job: "job".into(),
            ..Default::default()
        };
        let delivery = HttpDelivery::new(&config);
        assert_eq!(delivery.endpoint(), "http://127.0.0.1:3100/loki/api/v1/push");
    }
}
