//! Shared utilities for integration testing.

#![allow(dead_code)]

use std::future::Future;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use api_gateway::config::GatewayConfig;
use api_gateway::http::HttpServer;
use api_gateway::lifecycle::Shutdown;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;

/// Request head as seen by a mock backend.
#[derive(Debug, Clone)]
pub struct RecordedRequest {
    pub method: String,
    pub target: String,
    pub headers: Vec<(String, String)>,
}

impl RecordedRequest {
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }
}

/// Requests received by a backend, in arrival order.
pub type Recorder = Arc<Mutex<Vec<RecordedRequest>>>;

async fn read_head(socket: &mut TcpStream) -> Option<RecordedRequest> {
    let mut buf = Vec::new();
    let mut chunk = [0u8; 1024];
    while !buf.windows(4).any(|w| w == b"\r\n\r\n") {
        let n = socket.read(&mut chunk).await.ok()?;
        if n == 0 {
            return None;
        }
        buf.extend_from_slice(&chunk[..n]);
    }

    let head = String::from_utf8_lossy(&buf).to_string();
    let mut lines = head.split("\r\n");
    let mut request_line = lines.next()?.split(' ');
    let method = request_line.next()?.to_string();
    let target = request_line.next()?.to_string();
    let headers = lines
        .take_while(|l| !l.is_empty())
        .filter_map(|l| l.split_once(':'))
        .map(|(k, v)| (k.trim().to_string(), v.trim().to_string()))
        .collect();

    Some(RecordedRequest { method, target, headers })
}

fn status_line(status: u16) -> &'static str {
    match status {
        200 => "200 OK",
        302 => "302 Found",
        404 => "404 Not Found",
        500 => "500 Internal Server Error",
        502 => "502 Bad Gateway",
        503 => "503 Service Unavailable",
        _ => "200 OK",
    }
}

/// Start a mock backend that records every request and answers with `body`.
pub async fn start_mock_backend(addr: SocketAddr, body: &'static str) -> Recorder {
    start_programmable_backend(addr, move || async move { (200, body.to_string()) }).await
}

/// Start a backend whose status and body come from `f`.
pub async fn start_programmable_backend<F, Fut>(addr: SocketAddr, f: F) -> Recorder
where
    F: Fn() -> Fut + Send + Sync + 'static,
    Fut: Future<Output = (u16, String)> + Send + 'static,
{
    let f = Arc::new(f);
    start_backend_with_headers(addr, move || {
        let f = f.clone();
        async move {
            let (status, body) = f().await;
            (status, Vec::new(), body)
        }
    })
    .await
}

/// Start a backend that answers with a status, extra response headers and a body.
pub async fn start_backend_with_headers<F, Fut>(addr: SocketAddr, f: F) -> Recorder
where
    F: Fn() -> Fut + Send + Sync + 'static,
    Fut: Future<Output = (u16, Vec<(String, String)>, String)> + Send + 'static,
{
    let listener = TcpListener::bind(addr).await.unwrap();
    let recorder: Recorder = Arc::new(Mutex::new(Vec::new()));
    let f = Arc::new(f);

    let seen = recorder.clone();
    tokio::spawn(async move {
        while let Ok((mut socket, _)) = listener.accept().await {
            let f = f.clone();
            let seen = seen.clone();
            tokio::spawn(async move {
                let Some(request) = read_head(&mut socket).await else {
                    return;
                };
                seen.lock().unwrap().push(request);

                let (status, headers, body) = f().await;
                let extra: String = headers
                    .iter()
                    .map(|(name, value)| format!("{}: {}\r\n", name, value))
                    .collect();
                let response = format!(
                    "HTTP/1.1 {}\r\n{}Content-Length: {}\r\nConnection: close\r\n\r\n{}",
                    status_line(status),
                    extra,
                    body.len(),
                    body
                );
                let _ = socket.write_all(response.as_bytes()).await;
                let _ = socket.shutdown().await;
            });
        }
    });

    recorder
}

/// Start a backend that accepts connections and reads requests but never answers.
pub async fn start_silent_backend(addr: SocketAddr) -> Recorder {
    let listener = TcpListener::bind(addr).await.unwrap();
    let recorder: Recorder = Arc::new(Mutex::new(Vec::new()));

    let seen = recorder.clone();
    tokio::spawn(async move {
        while let Ok((mut socket, _)) = listener.accept().await {
            let seen = seen.clone();
            tokio::spawn(async move {
                if let Some(request) = read_head(&mut socket).await {
                    seen.lock().unwrap().push(request);
                }
                // hold the connection open until the peer goes away
                let mut rest = [0u8; 64];
                while let Ok(n) = socket.read(&mut rest).await {
                    if n == 0 {
                        break;
                    }
                }
            });
        }
    });

    recorder
}

/// A running gateway with handles to reconfigure and stop it.
pub struct TestGateway {
    pub addr: SocketAddr,
    pub updates: mpsc::UnboundedSender<GatewayConfig>,
    shutdown: Shutdown,
}

impl TestGateway {
    pub fn url(&self, path: &str) -> String {
        format!("http://{}{}", self.addr, path)
    }
}

impl Drop for TestGateway {
    fn drop(&mut self) {
        self.shutdown.trigger();
    }
}

/// Start the gateway on `addr` and wait until it accepts.
pub async fn start_gateway(addr: SocketAddr, config: GatewayConfig) -> TestGateway {
    start_server(addr, HttpServer::new(config).unwrap()).await
}

/// Run an already built server on `addr` and wait until it accepts.
pub async fn start_server(addr: SocketAddr, server: HttpServer) -> TestGateway {
    let shutdown = Shutdown::new();
    let (updates, config_updates) = mpsc::unbounded_channel();
    let listener = TcpListener::bind(addr).await.unwrap();
    let server_shutdown = shutdown.subscribe();

    tokio::spawn(async move {
        let _ = server.run(listener, config_updates, server_shutdown).await;
    });
    tokio::time::sleep(Duration::from_millis(100)).await;

    TestGateway {
        addr,
        updates,
        shutdown,
    }
}

/// Non-pooled client that ignores proxy environment variables.
pub fn client() -> reqwest::Client {
    reqwest::Client::builder()
        .pool_max_idle_per_host(0)
        .no_proxy()
        .build()
        .unwrap()
}
