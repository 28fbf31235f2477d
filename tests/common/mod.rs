//! Shared helpers for integration tests.

#![allow(dead_code)]

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};

/// Minimal HTTP/1.1 server answering GET/POST with canned JSON bodies.
///
/// Route keys are tried in order:
/// - `path|needle`: path matches and the request body contains `needle`
/// - the full target (path and query)
/// - the bare path
///
/// Unknown paths get a 404. Every request line and body is recorded.
pub struct MockHttpServer {
    addr: SocketAddr,
    requests: Arc<Mutex<Vec<String>>>,
    bodies: Arc<Mutex<Vec<String>>>,
}

struct Request {
    line: String,
    target: String,
    path: String,
    body: String,
}

async fn read_request(socket: &mut TcpStream) -> Option<Request> {
    let mut buf = Vec::with_capacity(4096);
    let mut chunk = [0u8; 4096];
    let header_end = loop {
        let n = socket.read(&mut chunk).await.ok()?;
        if n == 0 {
            return None;
        }
        buf.extend_from_slice(&chunk[..n]);
        if let Some(pos) = buf.windows(4).position(|w| w == b"\r\n\r\n") {
            break pos + 4;
        }
    };

    let head = String::from_utf8_lossy(&buf[..header_end]).to_string();
    let content_length = head
        .lines()
        .filter_map(|l| l.split_once(':'))
        .find(|(name, _)| name.trim().eq_ignore_ascii_case("content-length"))
        .and_then(|(_, value)| value.trim().parse::<usize>().ok())
        .unwrap_or(0);
    while buf.len() < header_end + content_length {
        let n = socket.read(&mut chunk).await.ok()?;
        if n == 0 {
            break;
        }
        buf.extend_from_slice(&chunk[..n]);
    }

    let line = head.lines().next().unwrap_or_default().to_string();
    let target = line.split_whitespace().nth(1).unwrap_or("/").to_string();
    let path = target.split('?').next().unwrap_or("/").to_string();
    let body = String::from_utf8_lossy(&buf[header_end..]).to_string();
    Some(Request {
        line,
        target,
        path,
        body,
    })
}

fn lookup<'a>(routes: &'a HashMap<String, String>, request: &Request) -> Option<&'a String> {
    routes
        .iter()
        .find(|(key, _)| {
            key.split_once('|').is_some_and(|(path, needle)| {
                path == request.path && request.body.contains(needle)
            })
        })
        .map(|(_, body)| body)
        .or_else(|| routes.get(&request.target))
        .or_else(|| routes.get(&request.path))
}

impl MockHttpServer {
    pub async fn start(routes: HashMap<String, String>) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let requests = Arc::new(Mutex::new(Vec::new()));
        let bodies = Arc::new(Mutex::new(Vec::new()));
        let routes = Arc::new(routes);

        let (recorded, recorded_bodies) = (requests.clone(), bodies.clone());
        tokio::spawn(async move {
            loop {
                let Ok((mut socket, _)) = listener.accept().await else {
                    break;
                };
                let routes = routes.clone();
                let recorded = recorded.clone();
                let recorded_bodies = recorded_bodies.clone();
                tokio::spawn(async move {
                    let Some(request) = read_request(&mut socket).await else {
                        return;
                    };
                    recorded.lock().unwrap().push(request.line.clone());
                    recorded_bodies.lock().unwrap().push(request.body.clone());

                    let (status, body) = match lookup(&routes, &request) {
                        Some(body) => ("200 OK", body.clone()),
                        None => ("404 Not Found", "{\"error\":\"not found\"}".to_string()),
                    };
                    let response = format!(
                        "HTTP/1.1 {}\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
                        status,
                        body.len(),
                        body
                    );
                    let _ = socket.write_all(response.as_bytes()).await;
                    let _ = socket.shutdown().await;
                });
            }
        });

        Self {
            addr,
            requests,
            bodies,
        }
    }

    pub fn url(&self) -> String {
        format!("http://{}", self.addr)
    }

    pub fn requests(&self) -> Vec<String> {
        self.requests.lock().unwrap().clone()
    }

    pub fn bodies(&self) -> Vec<String> {
        self.bodies.lock().unwrap().clone()
    }

    pub fn hits(&self, path_prefix: &str) -> usize {
        self.requests()
            .iter()
            .filter(|line| {
                line.split_whitespace()
                    .nth(1)
                    .is_some_and(|target| target.starts_with(path_prefix))
            })
            .count()
    }
}
