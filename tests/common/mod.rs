//! Raw TCP mock HTTP server shared by the integration tests.
#![allow(dead_code)]

use std::sync::{Arc, Mutex};

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};

/// One request seen by the mock server.
#[derive(Debug, Clone)]
pub struct Hit {
    pub method: String,
    pub path: String,
    pub body: String,
}

/// Canned response: status, content type, body.
pub struct Reply {
    pub status: u16,
    pub content_type: &'static str,
    pub body: Vec<u8>,
    /// Omit `Content-Length`; the body then ends when the connection closes.
    pub close_delimited: bool,
}

impl Reply {
    pub fn json(status: u16, body: impl Into<String>) -> Self {
        Self {
            status,
            content_type: "application/json",
            body: body.into().into_bytes(),
            close_delimited: false,
        }
    }

    pub fn bytes(content_type: &'static str, body: &[u8]) -> Self {
        Self {
            status: 200,
            content_type,
            body: body.to_vec(),
            close_delimited: false,
        }
    }

    pub fn without_length(mut self) -> Self {
        self.close_delimited = true;
        self
    }
}

pub struct MockServer {
    pub base: String,
    hits: Arc<Mutex<Vec<Hit>>>,
}

impl MockServer {
    pub fn hits(&self) -> Vec<Hit> {
        self.hits.lock().unwrap().clone()
    }

    /// Requests whose path starts with `prefix`.
    pub fn hits_on(&self, prefix: &str) -> Vec<Hit> {
        self.hits()
            .into_iter()
            .filter(|h| h.path.starts_with(prefix))
            .collect()
    }

    pub fn url(&self, path: &str) -> String {
        format!("{}{path}", self.base)
    }
}

/// Start a mock server. `respond` gets the request and how many earlier
/// requests hit the same path.
pub async fn mock_server<F>(respond: F) -> MockServer
where
    F: Fn(&Hit, usize) -> Reply + Send + Sync + 'static,
{
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    let hits: Arc<Mutex<Vec<Hit>>> = Arc::new(Mutex::new(Vec::new()));
    let respond = Arc::new(respond);

    let server_hits = hits.clone();
    tokio::spawn(async move {
        loop {
            let Ok((mut socket, _)) = listener.accept().await else {
                return;
            };
            let hits = server_hits.clone();
            let respond = respond.clone();
            tokio::spawn(async move {
                let Some(hit) = read_request(&mut socket).await else {
                    return;
                };
                let reply = {
                    let mut hits = hits.lock().unwrap();
                    let seen = hits.iter().filter(|h| h.path == hit.path).count();
                    hits.push(hit.clone());
                    respond(&hit, seen)
                };
                write_reply(&mut socket, reply).await;
            });
        }
    });

    MockServer {
        base: format!("http://127.0.0.1:{port}"),
        hits,
    }
}

async fn read_request(socket: &mut TcpStream) -> Option<Hit> {
    let mut buf = Vec::new();
    let mut chunk = [0u8; 8192];

    let header_end = loop {
        let n = socket.read(&mut chunk).await.ok()?;
        if n == 0 {
            return None;
        }
        buf.extend_from_slice(&chunk[..n]);
        if let Some(pos) = buf.windows(4).position(|w| w == b"\r\n\r\n") {
            break pos;
        }
    };

    let head = String::from_utf8_lossy(&buf[..header_end]).into_owned();
    let content_length = head
        .lines()
        .find_map(|line| {
            let (name, value) = line.split_once(':')?;
            name.eq_ignore_ascii_case("content-length")
                .then(|| value.trim().parse::<usize>().ok())
                .flatten()
        })
        .unwrap_or(0);

    let body_start = header_end + 4;
    while buf.len() < body_start + content_length {
        let n = socket.read(&mut chunk).await.ok()?;
        if n == 0 {
            break;
        }
        buf.extend_from_slice(&chunk[..n]);
    }

    let mut request_line = head.lines().next().unwrap_or("").split_whitespace();
    let method = request_line.next().unwrap_or("").to_string();
    let path = request_line.next().unwrap_or("").to_string();
    let body = String::from_utf8_lossy(&buf[body_start.min(buf.len())..]).into_owned();

    Some(Hit { method, path, body })
}

async fn write_reply(socket: &mut TcpStream, reply: Reply) {
    let reason = if reply.status < 400 { "OK" } else { "Error" };
    let length = if reply.close_delimited {
        String::new()
    } else {
        format!("Content-Length: {}\r\n", reply.body.len())
    };
    let head = format!(
        "HTTP/1.1 {} {reason}\r\nContent-Type: {}\r\n{length}Connection: close\r\n\r\n",
        reply.status, reply.content_type,
    );
    let _ = socket.write_all(head.as_bytes()).await;
    let _ = socket.write_all(&reply.body).await;
    let _ = socket.shutdown().await;
}
