//! Raw TCP server that answers requests from a fixed script.
//!
//! Used for wire faults wiremock cannot produce: bodies cut short,
//! responses without framing, connections dropped before a reply.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpListener;
use tokio::task::JoinHandle;

use super::socket_guard::should_skip_socket_bound_test;

/// What the server does with one request.
#[derive(Debug, Clone)]
#[allow(dead_code)]
pub enum Reply {
    /// Writes the bytes and keeps the connection open.
    Send(Vec<u8>),
    /// Writes the bytes, then closes the connection.
    SendAndClose(Vec<u8>),
    /// Closes the connection without answering.
    Close,
}

/// A request as the server saw it.
#[derive(Debug, Clone)]
#[allow(dead_code)]
pub struct SeenRequest {
    /// Request line, e.g. `GET /b/k HTTP/1.1`.
    pub line: String,
    /// Header lines, lowercased names.
    pub headers: Vec<(String, String)>,
    /// Body bytes.
    pub body: Vec<u8>,
}

#[allow(dead_code)]
impl SeenRequest {
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(key, _)| key == name)
            .map(|(_, value)| value.as_str())
    }
}

/// Handle to a running scripted server.
#[allow(dead_code)]
pub struct ScriptedServer {
    pub port: u16,
    requests: Arc<Mutex<Vec<SeenRequest>>>,
    connections: Arc<Mutex<usize>>,
    task: JoinHandle<()>,
}

#[allow(dead_code)]
impl ScriptedServer {
    /// `127.0.0.1:<port>`.
    pub fn authority(&self) -> String {
        format!("127.0.0.1:{}", self.port)
    }

    pub fn requests(&self) -> Vec<SeenRequest> {
        self.requests.lock().unwrap().clone()
    }

    pub fn connections(&self) -> usize {
        *self.connections.lock().unwrap()
    }
}

impl Drop for ScriptedServer {
    fn drop(&mut self) {
        self.task.abort();
    }
}

/// Starts a server that plays `replies` in order across connections.
///
/// Returns `None` when sockets cannot be bound here.
#[allow(dead_code)]
pub async fn scripted_server_or_skip(replies: Vec<Reply>) -> Option<ScriptedServer> {
    if should_skip_socket_bound_test() {
        return None;
    }
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    let requests = Arc::new(Mutex::new(Vec::new()));
    let connections = Arc::new(Mutex::new(0));
    let script = Arc::new(Mutex::new(VecDeque::from(replies)));

    let seen = Arc::clone(&requests);
    let count = Arc::clone(&connections);
    let task = tokio::spawn(async move {
        loop {
            let Ok((socket, _)) = listener.accept().await else {
                return;
            };
            *count.lock().unwrap() += 1;
            let seen = Arc::clone(&seen);
            let script = Arc::clone(&script);
            tokio::spawn(async move {
                let mut socket = BufReader::new(socket);
                loop {
                    let Some(request) = read_request(&mut socket).await else {
                        return;
                    };
                    seen.lock().unwrap().push(request);
                    let reply = script.lock().unwrap().pop_front();
                    match reply {
                        Some(Reply::Send(bytes)) => {
                            if socket.get_mut().write_all(&bytes).await.is_err() {
                                return;
                            }
                        }
                        Some(Reply::SendAndClose(bytes)) => {
                            let _ = socket.get_mut().write_all(&bytes).await;
                            let _ = socket.get_mut().shutdown().await;
                            return;
                        }
                        Some(Reply::Close) | None => return,
                    }
                }
            });
        }
    });

    Some(ScriptedServer {
        port,
        requests,
        connections,
        task,
    })
}

async fn read_request<R: tokio::io::AsyncBufRead + Unpin>(io: &mut R) -> Option<SeenRequest> {
    let mut line = String::new();
    if io.read_line(&mut line).await.ok()? == 0 {
        return None;
    }
    let mut headers = Vec::new();
    loop {
        let mut header = String::new();
        if io.read_line(&mut header).await.ok()? == 0 {
            return None;
        }
        let header = header.trim_end();
        if header.is_empty() {
            break;
        }
        let (name, value) = header.split_once(':')?;
        headers.push((name.trim().to_ascii_lowercase(), value.trim().to_string()));
    }
    let length = headers
        .iter()
        .find(|(name, _)| name == "content-length")
        .and_then(|(_, value)| value.parse::<usize>().ok())
        .unwrap_or(0);
    let mut body = vec![0u8; length];
    io.read_exact(&mut body).await.ok()?;
    Some(SeenRequest {
        line: line.trim_end().to_string(),
        headers,
        body,
    })
}

/// Response head plus the first `sent` bytes of `body`, declaring the
/// full length.
#[allow(dead_code)]
pub fn truncated_response(head: &str, body: &[u8], sent: usize) -> Vec<u8> {
    let mut bytes = format!(
        "{head}\r\nContent-Length: {}\r\n\r\n",
        body.len()
    )
    .into_bytes();
    bytes.extend_from_slice(&body[..sent]);
    bytes
}

/// Complete response with `Content-Length`.
#[allow(dead_code)]
pub fn full_response(head: &str, body: &[u8]) -> Vec<u8> {
    truncated_response(head, body, body.len())
}
