//! Minimal Loki push endpoint over `TcpListener`.
//!
//! Answers every request with a fixed status and records the decoded push
//! payload. The accept loop runs until the process exits.

use std::io::{BufRead, BufReader, Read, Write};
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use serde_json::Value;

/// One received push request.
#[derive(Clone, Debug)]
pub struct PushRequest {
    pub path: String,
    pub body: Value,
}

impl PushRequest {
    /// Lines carried by the request, in stream order.
    pub fn lines(&self) -> Vec<String> {
        self.body["streams"]
            .as_array()
            .map(|streams| {
                streams
                    .iter()
                    .filter_map(|s| s["values"][0][1].as_str().map(str::to_owned))
                    .collect()
            })
            .unwrap_or_default()
    }
}

pub struct MockLoki {
    addr: SocketAddr,
    requests: Arc<Mutex<Vec<PushRequest>>>,
}

impl MockLoki {
    /// Bind an ephemeral port answering every push with `status`.
    pub fn start(status: u16) -> Self {
        let listener = TcpListener::bind(("127.0.0.1", 0)).expect("bind ephemeral listener");
        let addr = listener.local_addr().expect("listener has address");
        let requests = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&requests);
        thread::spawn(move || {
            for stream in listener.incoming() {
                let Ok(mut stream) = stream else { break };
                let _ = serve(&mut stream, status, &sink);
            }
        });
        Self { addr, requests }
    }

    pub fn base_url(&self) -> String {
        format!("http://{}", self.addr)
    }

    pub fn requests(&self) -> Vec<PushRequest> {
        self.requests.lock().expect("requests mutex poisoned").clone()
    }

    /// Number of entries carried by each request, in arrival order.
    pub fn batch_sizes(&self) -> Vec<usize> {
        self.requests().iter().map(|r| r.lines().len()).collect()
    }

    pub fn lines(&self) -> Vec<String> {
        self.requests().iter().flat_map(PushRequest::lines).collect()
    }
}

fn serve(stream: &mut TcpStream, status: u16, sink: &Mutex<Vec<PushRequest>>) -> Option<()> {
    stream.set_read_timeout(Some(Duration::from_secs(5))).ok()?;
    let mut reader = BufReader::new(stream.try_clone().ok()?);

    let mut request_line = String::new();
    reader.read_line(&mut request_line).ok()?;
    let path = request_line.split_whitespace().nth(1)?.to_owned();

    let mut content_length = 0usize;
    loop {
        let mut line = String::new();
        reader.read_line(&mut line).ok()?;
        let line = line.trim();
        if line.is_empty() {
            break;
        }
        if let Some((key, value)) = line.split_once(':') {
            if key.trim().eq_ignore_ascii_case("content-length") {
                content_length = value.trim().parse().unwrap_or(0);
            }
        }
    }
    let mut body = vec![0u8; content_length];
    reader.read_exact(&mut body).ok()?;

    // Recorded before the response is written.
    let request = PushRequest {
        path,
        body: serde_json::from_slice(&body).unwrap_or(Value::Null),
    };
    sink.lock().expect("requests mutex poisoned").push(request);
    let response =
        format!("HTTP/1.1 {status} Mock\r\nContent-Length: 0\r\nConnection: close\r\n\r\n");
    stream.write_all(response.as_bytes()).ok()
}
