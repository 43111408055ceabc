//! Tests for the Loki handler against a mock push endpoint and an in-memory
//! sink.

use std::collections::HashMap;
use std::io::{BufRead, BufReader, Read, Write};
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::sync::{Arc, mpsc};
use std::thread;
use std::time::{Duration, Instant};

use rstest::{fixture, rstest};

use crate::formatter::{MessageFormatter, SharedFormatter};
use crate::handler::{HandlerError, LogHandler};
use crate::level::LogLevel;
use crate::log_event::LogEvent;
use crate::metrics::InMemoryMetrics;
use crate::test_utils::RecordingDelivery;

use super::{
    AuthConfig, Batch, Deliver, DeliveryErrorKind, HandlerState, HttpDelivery, LokiHandler,
    LokiHandlerConfig, QueuedEntry, WorkerPhase,
};

#[derive(Debug)]
struct CapturedRequest {
    method: String,
    path: String,
    headers: Vec<(String, String)>,
    body: String,
}

impl CapturedRequest {
    fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.as_str())
    }

    fn json(&self) -> serde_json::Value {
        serde_json::from_str(&self.body).expect("body is JSON")
    }
}

fn status_text(code: u16) -> &'static str {
    match code {
        200 => "OK",
        204 => "No Content",
        400 => "Bad Request",
        500 => "Internal Server Error",
        _ => "Unknown",
    }
}

fn read_http_request(stream: &mut TcpStream) -> CapturedRequest {
    let _ = stream.set_read_timeout(Some(Duration::from_secs(5)));
    let mut reader = BufReader::new(stream.try_clone().expect("clone stream"));

    let mut request_line = String::new();
    reader
        .read_line(&mut request_line)
        .expect("read request line");
    let mut parts = request_line.split_whitespace();
    let method = parts.next().unwrap_or_default().to_owned();
    let path = parts.next().unwrap_or_default().to_owned();

    let mut headers = Vec::new();
    let mut content_length = 0usize;
    loop {
        let mut line = String::new();
        reader.read_line(&mut line).expect("read header");
        let line = line.trim();
        if line.is_empty() {
            break;
        }
        if let Some((key, value)) = line.split_once(':') {
            let key = key.trim().to_lowercase();
            let value = value.trim().to_owned();
            if key == "content-length" {
                content_length = value.parse().unwrap_or(0);
            }
            headers.push((key, value));
        }
    }

    let mut body = vec![0u8; content_length];
    reader.read_exact(&mut body).expect("read body");
    CapturedRequest {
        method,
        path,
        headers,
        body: String::from_utf8_lossy(&body).into_owned(),
    }
}

/// Serve one request per entry in `statuses`, answering in order.
fn spawn_push_server(
    listener: TcpListener,
    statuses: Vec<u16>,
) -> (SocketAddr, mpsc::Receiver<CapturedRequest>) {
    let addr = listener.local_addr().expect("listener has address");
    let (tx, rx) = mpsc::channel();
    thread::spawn(move || {
        for status in statuses {
            let Ok((mut stream, _)) = listener.accept() else {
                break;
            };
            let captured = read_http_request(&mut stream);
            let response = format!(
                "HTTP/1.1 {status} {}\r\nContent-Length: 0\r\nConnection: close\r\n\r\n",
                status_text(status)
            );
            let _ = stream.write_all(response.as_bytes());
            let _ = tx.send(captured);
        }
    });
    (addr, rx)
}

#[fixture]
fn tcp_listener() -> TcpListener {
    TcpListener::bind(("127.0.0.1", 0)).expect("bind ephemeral listener")
}

fn config_for(addr: SocketAddr) -> LokiHandlerConfig {
    LokiHandlerConfig {
        base_url: format!("http://{addr}"),
        job: "MONITORAMENTO_PRODUTO".into(),
        batch_size: 1,
        request_timeout: Duration::from_secs(5),
        ..Default::default()
    }
}

fn started(handler: LokiHandler) -> LokiHandler {
    assert!(handler.start());
    handler
}

fn event(logger: &str, message: &str) -> LogEvent {
    LogEvent::new(logger, LogLevel::Info, message)
}

#[rstest]
fn posts_push_payload_to_endpoint(tcp_listener: TcpListener) {
    let (addr, rx) = spawn_push_server(tcp_listener, vec![204]);
    let handler = started(
        LokiHandler::with_config(config_for(addr))
            .with_formatter(SharedFormatter::new(MessageFormatter)),
    );
    handler
        .handle(LogEvent::new("api", LogLevel::Error, "db unavailable"))
        .expect("enqueue");

    let captured = rx.recv_timeout(Duration::from_secs(5)).expect("request");
    assert_eq!(captured.method, "POST");
    assert_eq!(captured.path, "/loki/api/v1/push");
    assert_eq!(captured.header("content-type"), Some("application/json"));

    let body = captured.json();
    let stream = &body["streams"][0];
    assert_eq!(stream["stream"]["job"], "MONITORAMENTO_PRODUTO");
    assert_eq!(stream["stream"]["application"], "produto-api");
    assert_eq!(stream["stream"]["level"], "error");
    assert_eq!(stream["stream"]["logger"], "api");
    assert_eq!(stream["values"][0][1], "db unavailable");
    let nanos: u128 = stream["values"][0][0]
        .as_str()
        .and_then(|s| s.parse().ok())
        .expect("nanosecond timestamp string");
    assert!(nanos > 1_600_000_000_000_000_000);

    let report = handler.shutdown(Duration::from_secs(5));
    assert!(!report.forced);
    assert_eq!(report.stats.delivered, 1);
}

#[rstest]
fn default_formatter_renders_full_line(tcp_listener: TcpListener) {
    let (addr, rx) = spawn_push_server(tcp_listener, vec![200]);
    let handler = started(LokiHandler::with_config(config_for(addr)));
    handler.handle(event("service", "created product")).expect("enqueue");

    let captured = rx.recv_timeout(Duration::from_secs(5)).expect("request");
    let line = captured.json()["streams"][0]["values"][0][1]
        .as_str()
        .expect("line")
        .to_owned();
    assert!(line.ends_with(" - service - INFO - created product"), "{line}");
    handler.shutdown(Duration::from_secs(5));
}

#[rstest]
fn full_batch_is_one_request_with_one_stream_per_entry(tcp_listener: TcpListener) {
    let (addr, rx) = spawn_push_server(tcp_listener, vec![204, 204]);
    let config = LokiHandlerConfig {
        batch_size: 3,
        max_wait: Duration::from_secs(30),
        ..config_for(addr)
    };
    let handler = started(
        LokiHandler::with_config(config).with_formatter(SharedFormatter::new(MessageFormatter)),
    );
    for n in 0..6 {
        handler.handle(event("api", &format!("m{n}"))).expect("enqueue");
    }

    for expected in [["m0", "m1", "m2"], ["m3", "m4", "m5"]] {
        let body = rx.recv_timeout(Duration::from_secs(5)).expect("request").json();
        let lines: Vec<_> = body["streams"]
            .as_array()
            .expect("streams")
            .iter()
            .map(|s| s["values"][0][1].as_str().unwrap_or_default().to_owned())
            .collect();
        assert_eq!(lines, expected);
    }
    handler.shutdown(Duration::from_secs(5));
}

#[rstest]
fn server_errors_count_batches_as_failed(tcp_listener: TcpListener) {
    let (addr, rx) = spawn_push_server(tcp_listener, vec![500, 500, 500]);
    let metrics = Arc::new(InMemoryMetrics::new());
    let handler = started(LokiHandler::with_config(config_for(addr)).with_metrics(metrics.clone()));
    for n in 0..3 {
        handler.handle(event("database", &format!("e{n}"))).expect("enqueue");
    }
    for _ in 0..3 {
        rx.recv_timeout(Duration::from_secs(5)).expect("request");
    }

    let report = handler.shutdown(Duration::from_secs(5));
    assert_eq!(report.stats.failed, 3);
    assert_eq!(report.stats.batches_failed, 3);
    assert_eq!(report.stats.delivered, 0);
    assert_eq!(metrics.failed_total(), 3);
    assert_eq!(metrics.failed()[&("info", "database".to_owned())], 3);
    // No retries: exactly one request per batch.
    assert!(rx.recv_timeout(Duration::from_millis(200)).is_err());
}

fn auth_header_for(listener: TcpListener, auth: AuthConfig) -> Option<String> {
    let (addr, rx) = spawn_push_server(listener, vec![204]);
    let config = LokiHandlerConfig {
        auth,
        headers: HashMap::from([("X-Scope-OrgID".to_owned(), "tenant-1".to_owned())]),
        ..config_for(addr)
    };
    let handler = started(LokiHandler::with_config(config));
    handler.handle(event("api", "auth")).expect("enqueue");
    let captured = rx.recv_timeout(Duration::from_secs(5)).expect("request");
    assert_eq!(captured.header("x-scope-orgid"), Some("tenant-1"));
    handler.shutdown(Duration::from_secs(5));
    captured.header("authorization").map(str::to_owned)
}

#[rstest]
fn sends_basic_auth_and_custom_headers(tcp_listener: TcpListener) {
    let auth = AuthConfig::Basic {
        username: "user".into(),
        password: "pass".into(),
    };
    assert_eq!(
        auth_header_for(tcp_listener, auth).as_deref(),
        Some("Basic dXNlcjpwYXNz")
    );
}

#[rstest]
fn sends_bearer_token(tcp_listener: TcpListener) {
    let auth = AuthConfig::Bearer {
        token: "glc_secret".into(),
    };
    assert_eq!(
        auth_header_for(tcp_listener, auth).as_deref(),
        Some("Bearer glc_secret")
    );
}

fn single_batch() -> Batch {
    let entry = QueuedEntry {
        level: LogLevel::Info,
        logger: "api".into(),
        timestamp_nanos: 1,
        line: "x".into(),
    };
    Batch::new(vec![entry]).expect("non-empty")
}

#[test]
fn unreachable_collector_is_a_connection_error() {
    let addr = {
        let listener = TcpListener::bind(("127.0.0.1", 0)).expect("bind");
        listener.local_addr().expect("addr")
    };
    let mut delivery = HttpDelivery::new(&config_for(addr));
    let outcome = delivery.deliver(&single_batch());
    assert!(!outcome.success);
    assert_eq!(outcome.http_status, None);
    assert_eq!(outcome.error_kind, Some(DeliveryErrorKind::ConnectionError));
}

#[rstest]
fn silent_collector_is_a_timeout(tcp_listener: TcpListener) {
    let addr = tcp_listener.local_addr().expect("addr");
    let (release_tx, release_rx) = mpsc::channel::<()>();
    thread::spawn(move || {
        let accepted = tcp_listener.accept();
        let _ = release_rx.recv();
        drop(accepted);
    });
    let config = LokiHandlerConfig {
        request_timeout: Duration::from_millis(200),
        ..config_for(addr)
    };
    let mut delivery = HttpDelivery::new(&config);
    let began = Instant::now();
    let outcome = delivery.deliver(&single_batch());
    let _ = release_tx.send(());

    assert_eq!(outcome.error_kind, Some(DeliveryErrorKind::Timeout));
    assert!(began.elapsed() < Duration::from_secs(3));
}

#[rstest]
fn accepted_status_is_reported(tcp_listener: TcpListener) {
    let (addr, _rx) = spawn_push_server(tcp_listener, vec![204]);
    let mut delivery = HttpDelivery::new(&config_for(addr));
    let outcome = delivery.deliver(&single_batch());
    assert!(outcome.success);
    assert_eq!(outcome.http_status, Some(204));
}

mod lifecycle {
    use super::*;

    fn recording_handler(sink: &RecordingDelivery, config: LokiHandlerConfig) -> LokiHandler {
        let sink = sink.clone();
        LokiHandler::with_delivery(config, move || sink.clone())
            .with_formatter(SharedFormatter::new(MessageFormatter))
    }

    fn config(batch_size: usize, max_wait: Duration) -> LokiHandlerConfig {
        LokiHandlerConfig {
            base_url: "http://loki.invalid:3100".into(),
            job: "job".into(),
            batch_size,
            max_wait,
            ..Default::default()
        }
    }

    #[test]
    fn new_handler_is_stopped_and_refuses_events() {
        let sink = RecordingDelivery::new();
        let handler = recording_handler(&sink, config(10, Duration::from_secs(5)));
        assert_eq!(handler.state(), HandlerState::Stopped);
        assert_eq!(
            handler.handle(event("api", "early")),
            Err(HandlerError::NotRunning)
        );
        assert_eq!(handler.stats().dropped, 1);
    }

    #[test]
    fn partial_batch_is_sent_after_max_wait() {
        let sink = RecordingDelivery::new();
        let handler = started(recording_handler(&sink, config(10, Duration::from_millis(100))));
        for n in 0..4 {
            handler.handle(event("api", &format!("m{n}"))).expect("enqueue");
        }
        assert!(sink.wait_for_batches(1, Duration::from_secs(5)));
        assert_eq!(sink.batch_sizes(), [4]);
        handler.shutdown(Duration::from_secs(1));
    }

    #[test]
    fn start_is_rejected_while_running_and_allowed_after_shutdown() {
        let sink = RecordingDelivery::new();
        let handler = started(recording_handler(&sink, config(1, Duration::from_secs(5))));
        assert!(!handler.start());

        handler.handle(event("api", "first run")).expect("enqueue");
        let first = handler.shutdown(Duration::from_secs(2));
        assert_eq!(handler.state(), HandlerState::Stopped);
        assert_eq!(handler.phase(), WorkerPhase::Stopped);
        assert_eq!(first.stats.delivered, 1);

        assert_eq!(
            handler.handle(event("api", "between runs")),
            Err(HandlerError::NotRunning)
        );
        assert!(handler.start());
        handler.handle(event("api", "second run")).expect("enqueue");
        let second = handler.shutdown(Duration::from_secs(2));
        assert_eq!(second.stats.delivered, 2);
        assert_eq!(second.stats.dropped, 1);
        assert_eq!(sink.lines(), ["first run", "second run"]);
    }

    #[test]
    fn shutdown_of_never_started_handler_is_already_stopped() {
        let handler = recording_handler(&RecordingDelivery::new(), config(10, Duration::ZERO));
        let report = handler.shutdown(Duration::from_secs(1));
        assert!(report.already_stopped);
        assert!(!report.forced);
    }

    #[test]
    fn delivered_counts_reach_metrics_per_label() {
        let sink = RecordingDelivery::new();
        let metrics = Arc::new(InMemoryMetrics::new());
        let handler = started(
            recording_handler(&sink, config(3, Duration::from_secs(5)))
                .with_metrics(metrics.clone()),
        );
        handler.handle(event("api", "a")).expect("enqueue");
        handler
            .handle(LogEvent::new("api", LogLevel::Warn, "b"))
            .expect("enqueue");
        handler.handle(event("service", "c")).expect("enqueue");
        handler.shutdown(Duration::from_secs(2));

        let delivered = metrics.delivered();
        assert_eq!(delivered[&("info", "api".to_owned())], 1);
        assert_eq!(delivered[&("warning", "api".to_owned())], 1);
        assert_eq!(delivered[&("info", "service".to_owned())], 1);
    }

    #[test]
    fn drop_drains_with_configured_timeout() {
        let sink = RecordingDelivery::new();
        {
            let handler = started(recording_handler(&sink, config(10, Duration::from_secs(30))));
            handler.handle(event("main", "bye")).expect("enqueue");
        }
        assert_eq!(sink.lines(), ["bye"]);
    }
}
