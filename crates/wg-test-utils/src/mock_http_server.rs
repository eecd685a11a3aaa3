// mock_http_server: a mock HTTP/1.1 server for testing the upstream chat
// client and the S3-compatible object-store client.
//
// Binds to 127.0.0.1:0 (random port) and exposes the bound port. Each
// test spins up its own isolated instance. Requests are recorded for
// assertions; responses are served from a caller-programmed FIFO queue,
// falling back to a default 200 `{"ok":true}` JSON body when the queue is
// empty.

use std::collections::VecDeque;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;

#[derive(Debug, Clone)]
pub struct RecordedRequest {
    pub method: String,
    pub path: String,
    pub headers: Vec<(String, String)>,
    pub body: Vec<u8>,
}

#[derive(Debug, Clone)]
pub struct MockResponse {
    pub status: u16,
    pub body: Vec<u8>,
    pub headers: Vec<(String, String)>,
}

impl MockResponse {
    pub fn json(status: u16, body: serde_json::Value) -> Self {
        Self {
            status,
            body: serde_json::to_vec(&body).expect("mock response body must serialize"),
            headers: vec![("content-type".to_owned(), "application/json".to_owned())],
        }
    }

    pub fn empty(status: u16) -> Self {
        Self { status, body: Vec::new(), headers: Vec::new() }
    }
}

struct Shared {
    queued_responses: Mutex<VecDeque<MockResponse>>,
    received: Mutex<Vec<RecordedRequest>>,
}

/// A mock HTTP server for integration testing.
pub struct MockHttpServer {
    addr: SocketAddr,
    shared: Arc<Shared>,
    _task: tokio::task::JoinHandle<()>,
}

impl MockHttpServer {
    /// Starts the mock server, binding to a random available port.
    pub async fn start() -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind mock server");
        let addr = listener.local_addr().expect("mock server must have a local addr");
        let shared = Arc::new(Shared { queued_responses: Mutex::new(VecDeque::new()), received: Mutex::new(Vec::new()) });

        let accept_shared = shared.clone();
        let task = tokio::spawn(async move {
            Self::accept_loop(listener, accept_shared).await;
        });

        Self { addr, shared, _task: task }
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.addr
    }

    pub fn base_url(&self) -> String {
        format!("http://{}", self.addr)
    }

    /// Queues a response to be returned for the next unmatched request, in
    /// FIFO order.
    pub fn push_response(&self, response: MockResponse) {
        self.shared.queued_responses.lock().unwrap().push_back(response);
    }

    /// Returns every request received so far, in arrival order.
    pub fn received_requests(&self) -> Vec<RecordedRequest> {
        self.shared.received.lock().unwrap().clone()
    }

    async fn accept_loop(listener: TcpListener, shared: Arc<Shared>) {
        loop {
            match listener.accept().await {
                Ok((stream, _peer)) => {
                    let conn_shared = shared.clone();
                    tokio::spawn(async move {
                        let _ = Self::handle_connection(stream, conn_shared).await;
                    });
                }
                Err(_) => break,
            }
        }
    }

    async fn handle_connection(
        mut stream: tokio::net::TcpStream,
        shared: Arc<Shared>,
    ) -> Result<(), std::io::Error> {
        let request = read_request(&mut stream).await?;
        shared.received.lock().unwrap().push(request);

        let response = shared.queued_responses.lock().unwrap().pop_front().unwrap_or_else(|| {
            MockResponse::json(200, serde_json::json!({"ok": true, "result": {"message_id": 1}}))
        });

        let status_line = format!("HTTP/1.1 {} {}\r\n", response.status, reason_phrase(response.status));
        stream.write_all(status_line.as_bytes()).await?;
        for (name, value) in &response.headers {
            stream.write_all(format!("{name}: {value}\r\n").as_bytes()).await?;
        }
        stream.write_all(format!("content-length: {}\r\n", response.body.len()).as_bytes()).await?;
        stream.write_all(b"connection: close\r\n\r\n").await?;
        stream.write_all(&response.body).await?;
        stream.shutdown().await?;
        Ok(())
    }
}

async fn read_request(stream: &mut tokio::net::TcpStream) -> Result<RecordedRequest, std::io::Error> {
    let mut buf = Vec::new();
    let mut chunk = [0u8; 4096];
    let header_end = loop {
        let n = stream.read(&mut chunk).await?;
        if n == 0 {
            break None;
        }
        buf.extend_from_slice(&chunk[..n]);
        if let Some(pos) = find_header_terminator(&buf) {
            break Some(pos);
        }
    };

    let Some(header_end) = header_end else {
        return Ok(RecordedRequest { method: String::new(), path: String::new(), headers: Vec::new(), body: Vec::new() });
    };

    let header_text = String::from_utf8_lossy(&buf[..header_end]).into_owned();
    let mut lines = header_text.split("\r\n");
    let request_line = lines.next().unwrap_or_default();
    let mut parts = request_line.split_whitespace();
    let method = parts.next().unwrap_or_default().to_owned();
    let path = parts.next().unwrap_or_default().to_owned();

    let mut headers = Vec::new();
    let mut content_length = 0usize;
    for line in lines {
        if line.is_empty() {
            continue;
        }
        if let Some((name, value)) = line.split_once(':') {
            let name = name.trim().to_owned();
            let value = value.trim().to_owned();
            if name.eq_ignore_ascii_case("content-length") {
                content_length = value.parse().unwrap_or(0);
            }
            headers.push((name, value));
        }
    }

    let mut body = buf[header_end + 4..].to_vec();
    while body.len() < content_length {
        let n = stream.read(&mut chunk).await?;
        if n == 0 {
            break;
        }
        body.extend_from_slice(&chunk[..n]);
    }
    if body.len() > content_length {
        body.truncate(content_length);
    }

    Ok(RecordedRequest { method, path, headers, body })
}

fn find_header_terminator(buf: &[u8]) -> Option<usize> {
    buf.windows(4).position(|w| w == b"\r\n\r\n")
}

fn reason_phrase(status: u16) -> &'static str {
    match status {
        200 => "OK",
        204 => "No Content",
        400 => "Bad Request",
        403 => "Forbidden",
        404 => "Not Found",
        429 => "Too Many Requests",
        500 => "Internal Server Error",
        502 => "Bad Gateway",
        _ => "Unknown",
    }
}
