//! Throwaway HTTP responders for tests that exercise real reqwest calls.

use std::sync::{Arc, Mutex};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;

use crate::config::Config;

pub fn config_for_port(port: u16) -> Config {
    Config::from_yaml(&format!(
        "team_api_code: test-token\nserver_host: 127.0.0.1\nserver_port: {}\nrequest_timeout_secs: 2\n",
        port
    ))
    .unwrap()
}

pub async fn read_request(socket: &mut TcpStream) -> String {
    let mut buf = Vec::new();
    let mut chunk = [0u8; 1024];
    loop {
        let n = socket.read(&mut chunk).await.unwrap();
        if n == 0 {
            break;
        }
        buf.extend_from_slice(&chunk[..n]);
        if let Some(pos) = buf.windows(4).position(|w| w == b"\r\n\r\n") {
            let head = String::from_utf8_lossy(&buf[..pos]).to_lowercase();
            let body_len = head
                .lines()
                .find_map(|l| l.strip_prefix("content-length:"))
                .and_then(|v| v.trim().parse::<usize>().ok())
                .unwrap_or(0);
            if buf.len() >= pos + 4 + body_len {
                break;
            }
        }
    }
    String::from_utf8_lossy(&buf).to_string()
}

async fn respond(socket: &mut TcpStream, status: &str, body: &str) {
    let response = format!(
        "HTTP/1.1 {}\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
        status,
        body.len(),
        body
    );
    socket.write_all(response.as_bytes()).await.unwrap();
    let _ = socket.shutdown().await;
}

/// Answer exactly one request with a canned response; yields the raw request text.
pub async fn serve_once(status: &'static str, body: &'static str) -> (Config, JoinHandle<String>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    let handle = tokio::spawn(async move {
        let (mut socket, _) = listener.accept().await.unwrap();
        let request = read_request(&mut socket).await;
        respond(&mut socket, status, body).await;
        request
    });
    (config_for_port(port), handle)
}

/// A canned answer for any request whose target starts with `prefix`.
pub struct Route {
    pub prefix: &'static str,
    pub status: &'static str,
    pub body: String,
}

impl Route {
    pub fn new(prefix: &'static str, status: &'static str, body: impl Into<String>) -> Self {
        Self {
            prefix,
            status,
            body: body.into(),
        }
    }
}

/// Serve any number of requests, first matching route wins, 404 otherwise.
/// Returns the port and the request targets seen so far, in arrival order.
pub async fn serve_routes(routes: Vec<Route>) -> (u16, Arc<Mutex<Vec<String>>>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    let seen = Arc::new(Mutex::new(Vec::new()));
    let log = Arc::clone(&seen);
    tokio::spawn(async move {
        loop {
            let Ok((mut socket, _)) = listener.accept().await else {
                break;
            };
            let request = read_request(&mut socket).await;
            let target = request
                .split_whitespace()
                .nth(1)
                .unwrap_or_default()
                .to_string();
            log.lock().unwrap().push(target.clone());
            match routes.iter().find(|r| target.starts_with(r.prefix)) {
                Some(route) => respond(&mut socket, route.status, &route.body).await,
                None => respond(&mut socket, "404 Not Found", "not found").await,
            }
        }
    });
    (port, seen)
}
