// tests/common.rs
#![allow(dead_code)]

use futures_util::{SinkExt, StreamExt};
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, Once};
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;
use tokio_tungstenite::accept_hdr_async;
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tokio_tungstenite::tungstenite::http;
use tokio_tungstenite::tungstenite::protocol::Message;
use upstox_connector_rs::auth::{AccessToken, ApiCredentials, CredentialSource, StaticCredentials};
use upstox_connector_rs::config::WebSocketConfig;
use upstox_connector_rs::error::{Result, UpstoxError};
use upstox_connector_rs::retry::{RetryObserver, RetryPolicy};
use upstox_connector_rs::websocket::{ConnectionEvent, FeedMessage, MessageSubscriber};

pub const API_KEY: &str = "test-api-key";
pub const ACCESS_TOKEN: &str = "test-token";

static INIT: Once = Once::new();

// Loads .env (if any) and routes library logs to the test output, once per test binary.
pub fn setup() {
    INIT.call_once(|| {
        if dotenv::from_path(".env").is_err() {
            let _ = dotenv::from_path("../.env");
        }
        env_logger::builder().is_test(true).try_init().ok();
    });
}

pub fn get_env_var(name: &str) -> String {
    std::env::var(name).unwrap_or_else(|_| panic!("{} environment variable not set", name))
}

pub fn test_credentials() -> Arc<StaticCredentials> {
    Arc::new(StaticCredentials::new(
        API_KEY,
        "test-secret",
        AccessToken::bearer(ACCESS_TOKEN),
    ))
}

/// Hands out a new access token on every read: `token-0`, `token-1`, ...
#[derive(Default)]
pub struct RotatingCredentials {
    reads: AtomicUsize,
}

impl RotatingCredentials {
    pub fn reads(&self) -> usize {
        self.reads.load(Ordering::SeqCst)
    }
}

impl CredentialSource for RotatingCredentials {
    fn api_credentials(&self) -> Result<ApiCredentials> {
        Ok(ApiCredentials {
            api_key: API_KEY.to_string(),
            api_secret: "test-secret".to_string(),
        })
    }

    fn access_token(&self) -> Result<AccessToken> {
        let n = self.reads.fetch_add(1, Ordering::SeqCst);
        Ok(AccessToken::bearer(format!("token-{}", n)))
    }
}

pub fn fast_policy(max_attempts: u32) -> RetryPolicy {
    RetryPolicy::new(
        max_attempts,
        Duration::from_millis(1),
        Duration::from_millis(5),
    )
}

pub fn local_ws_config(addr: SocketAddr, reconnect: bool) -> WebSocketConfig {
    WebSocketConfig {
        scheme: "ws".to_string(),
        host: addr.ip().to_string(),
        port: Some(addr.port()),
        path: None,
        reconnect_on_connection_failure: reconnect,
    }
}

pub fn params_body(keepalive: u64, ping_interval: u64, ping_timeout: u64) -> String {
    serde_json::json!({
        "code": 200,
        "status": "OK",
        "timestamp": "2018-06-19T20:11:57+05:30",
        "message": null,
        "data": {
            "keepaliveInterval": keepalive,
            "pingInterval": ping_interval,
            "pingTimeout": ping_timeout
        }
    })
    .to_string()
}

// --- Subscribers ---

/// Records everything it receives.
#[derive(Default)]
pub struct CollectingSubscriber {
    pub messages: Mutex<Vec<FeedMessage>>,
    pub events: Mutex<Vec<ConnectionEvent>>,
}

impl CollectingSubscriber {
    pub fn messages(&self) -> Vec<FeedMessage> {
        self.messages.lock().unwrap().clone()
    }

    pub fn events(&self) -> Vec<ConnectionEvent> {
        self.events.lock().unwrap().clone()
    }
}

impl MessageSubscriber for CollectingSubscriber {
    fn on_message(&self, message: &FeedMessage) -> Result<()> {
        self.messages.lock().unwrap().push(message.clone());
        Ok(())
    }

    fn on_event(&self, event: &ConnectionEvent) {
        self.events.lock().unwrap().push(event.clone());
    }
}

/// Fails on every message.
pub struct FailingSubscriber;

impl MessageSubscriber for FailingSubscriber {
    fn on_message(&self, _message: &FeedMessage) -> Result<()> {
        Err(UpstoxError::SubscriberError("cannot handle tick".to_string()))
    }
}

/// Counts retry notifications.
#[derive(Default)]
pub struct CountingObserver {
    pub retries: AtomicUsize,
    pub failures: AtomicUsize,
}

impl RetryObserver for CountingObserver {
    fn on_retry(&self, _attempt: u32, _cause: &UpstoxError) {
        self.retries.fetch_add(1, Ordering::SeqCst);
    }

    fn on_failure(&self, _attempts: u32, _cause: &UpstoxError) {
        self.failures.fetch_add(1, Ordering::SeqCst);
    }
}

/// Polls `condition` every 10ms until it holds, panicking after `limit`.
pub async fn wait_until(limit: Duration, mut condition: impl FnMut() -> bool) {
    let deadline = tokio::time::Instant::now() + limit;
    while !condition() {
        if tokio::time::Instant::now() >= deadline {
            panic!("condition not met within {:?}", limit);
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

// --- In-process feed server ---

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FeedBehaviour {
    /// Accept, push the configured frames, then echo text frames until the client closes.
    Serve,
    /// Refuse the upgrade with this HTTP status.
    Reject(u16),
    /// Refuse the first `n` upgrades with `status`, then serve.
    RejectFirst { n: usize, status: u16 },
    /// Accept, then never read or write again, so pings go unanswered.
    Silent,
    /// Accept, push the configured frames, then drop the TCP connection.
    DropAfterMessages,
    /// Drop the TCP connection before answering the upgrade.
    DropBeforeHandshake,
}

#[derive(Debug, Clone)]
pub struct CapturedRequest {
    pub uri: String,
    pub headers: HashMap<String, String>,
}

pub struct FeedServer {
    pub addr: SocketAddr,
    pub requests: Arc<Mutex<Vec<CapturedRequest>>>,
    pub connections: Arc<AtomicUsize>,
}

impl FeedServer {
    pub fn connection_count(&self) -> usize {
        self.connections.load(Ordering::SeqCst)
    }

    pub fn captured(&self) -> Vec<CapturedRequest> {
        self.requests.lock().unwrap().clone()
    }
}

pub async fn start_feed_server(behaviour: FeedBehaviour, frames: Vec<Message>) -> FeedServer {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let requests = Arc::new(Mutex::new(Vec::new()));
    let connections = Arc::new(AtomicUsize::new(0));

    let server = FeedServer {
        addr,
        requests: Arc::clone(&requests),
        connections: Arc::clone(&connections),
    };

    tokio::spawn(async move {
        while let Ok((stream, _)) = listener.accept().await {
            let index = connections.fetch_add(1, Ordering::SeqCst);
            if behaviour == FeedBehaviour::DropBeforeHandshake {
                drop(stream);
                continue;
            }

            let requests = Arc::clone(&requests);
            let frames = frames.clone();
            tokio::spawn(async move {
                let callback = |req: &Request, resp: Response| -> std::result::Result<Response, ErrorResponse> {
                    let headers = req
                        .headers()
                        .iter()
                        .map(|(k, v)| {
                            (k.as_str().to_string(), v.to_str().unwrap_or_default().to_string())
                        })
                        .collect();
                    requests.lock().unwrap().push(CapturedRequest {
                        uri: req.uri().to_string(),
                        headers,
                    });
                    let reject = match behaviour {
                        FeedBehaviour::Reject(status) => Some(status),
                        FeedBehaviour::RejectFirst { n, status } if index < n => Some(status),
                        _ => None,
                    };
                    match reject {
                        Some(status) => Err(http::Response::builder()
                            .status(status)
                            .body(None)
                            .unwrap()),
                        None => Ok(resp),
                    }
                };

                let ws = match accept_hdr_async(stream, callback).await {
                    Ok(ws) => ws,
                    Err(_) => return,
                };
                if behaviour == FeedBehaviour::Silent {
                    tokio::time::sleep(Duration::from_secs(60)).await;
                    drop(ws);
                    return;
                }
                let (mut write, mut read) = ws.split();
                for frame in frames {
                    if write.send(frame).await.is_err() {
                        return;
                    }
                }
                if behaviour == FeedBehaviour::DropAfterMessages {
                    let _ = write.flush().await;
                    return;
                }
                while let Some(Ok(message)) = read.next().await {
                    if message.is_close() {
                        let _ = write.close().await;
                        break;
                    }
                    if message.is_text() && write.send(message).await.is_err() {
                        break;
                    }
                }
            });
        }
    });

    server
}

// --- Parameter endpoint that hangs up on the first requests ---

pub struct FlakyParameterServer {
    pub url: String,
    pub accepted: Arc<AtomicUsize>,
}

/// Serves `body` on GET requests, except that the first `failures` connections are closed
/// right after the request was read.
pub async fn start_flaky_parameter_server(failures: usize, body: String) -> FlakyParameterServer {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let url = format!("http://{}", listener.local_addr().unwrap());
    let accepted = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&accepted);

    tokio::spawn(async move {
        while let Ok((mut stream, _)) = listener.accept().await {
            let seen = counter.fetch_add(1, Ordering::SeqCst);
            let body = body.clone();
            tokio::spawn(async move {
                let mut request = Vec::new();
                let mut buf = [0u8; 1024];
                while !request.windows(4).any(|w| w == b"\r\n\r\n") {
                    match stream.read(&mut buf).await {
                        Ok(0) | Err(_) => return,
                        Ok(n) => request.extend_from_slice(&buf[..n]),
                    }
                }
                if seen < failures {
                    return;
                }
                let response = format!(
                    "HTTP/1.1 200 OK\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
                    body.len(),
                    body
                );
                let _ = stream.write_all(response.as_bytes()).await;
                let _ = stream.shutdown().await;
            });
        }
    });

    FlakyParameterServer { url, accepted }
}
