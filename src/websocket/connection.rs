use crate::auth::{self, Credentials};
use crate::config::WebSocketConfig;
use crate::error::{Result, UpstoxError};
use crate::types::{WebsocketParameters, MAX_PARAMETER_SECONDS};
use crate::websocket::dispatcher::MessageDispatcher;
use crate::websocket::handle::ConnectionHandle;
use crate::websocket::subscriber::FeedMessage;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use log::*;
use socket2::{SockRef, TcpKeepalive};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::{lookup_host, TcpSocket, TcpStream};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, timeout, Instant};
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::handshake::client::Request;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::tungstenite::protocol::Message;
use tokio_tungstenite::{client_async_tls, MaybeTlsStream, WebSocketStream};

/// Read/write timeouts are this multiple of the server's ping timeout, so a couple of
/// missed pings do not tear the link down.
pub const TIMEOUT_MULTIPLIER: u32 = 3;
const OUTBOUND_BUFFER: usize = 32;
/// Linux rejects a TCP keep-alive idle time above this.
const MAX_KEEPALIVE_IDLE: Duration = Duration::from_secs(32_767);

// Type alias for the WebSocket stream
type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Transport tuning for one session, derived from [`WebsocketParameters`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransportSettings {
    /// TCP keep-alive is enabled when the server publishes a non-zero interval.
    pub keep_alive: Option<Duration>,
    pub ping_interval: Duration,
    pub read_timeout: Duration,
    pub write_timeout: Duration,
}

impl TransportSettings {
    /// Values above [`MAX_PARAMETER_SECONDS`] are clamped to it.
    pub fn from_parameters(params: &WebsocketParameters) -> Self {
        let secs = |value: u64| Duration::from_secs(value.min(MAX_PARAMETER_SECONDS));
        let io_timeout = secs(params.ping_timeout).saturating_mul(TIMEOUT_MULTIPLIER);
        Self {
            keep_alive: (params.keepalive_interval > 0).then(|| secs(params.keepalive_interval)),
            ping_interval: secs(params.ping_interval),
            read_timeout: io_timeout,
            write_timeout: io_timeout,
        }
    }

    /// Longest the reader waits for any frame: one ping cycle plus the time the server has
    /// to answer it.
    pub fn silence_limit(&self) -> Duration {
        self.ping_interval.saturating_add(self.read_timeout)
    }
}

/// Builds the upgrade request and opens the streaming socket.
#[derive(Debug, Clone)]
pub struct ConnectionBuilder {
    config: WebSocketConfig,
}

impl ConnectionBuilder {
    pub fn new(config: WebSocketConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self { config })
    }

    pub fn config(&self) -> &WebSocketConfig {
        &self.config
    }

    /// The handshake request for one attempt. Every call carries a fresh nonce.
    pub fn build_request(&self, credentials: &Credentials) -> Result<Request> {
        debug!("Preparing WebSocket request");
        let mut url = self.config.endpoint()?;
        url.query_pairs_mut()
            .append_pair("apiKey", credentials.api_key())
            .append_pair("token", &credentials.token.token);

        let mut request = url.as_str().into_client_request()?;
        let headers = request.headers_mut();
        headers.insert("X-API-KEY", header_value(credentials.api_key())?);
        headers.insert("Authorization", header_value(&credentials.authorization())?);
        headers.insert("Sec-WebSocket-Key", header_value(&auth::generate_nonce())?);
        headers.insert("Sec-WebSocket-Version", HeaderValue::from_static("13"));
        Ok(request)
    }

    /// Opens the socket, attaches `dispatcher` and returns the live handle.
    pub(crate) async fn connect(
        &self,
        parameters: &WebsocketParameters,
        credentials: &Credentials,
        dispatcher: &Arc<MessageDispatcher>,
    ) -> Result<ConnectionHandle> {
        let settings = TransportSettings::from_parameters(parameters);

        let ws_stream = match self.open_socket(credentials, &settings).await {
            Err(e) if self.config.reconnect_on_connection_failure && e.is_connection_failure() => {
                warn!("Connection failure ({}), reconnecting once.", e);
                self.open_socket(credentials, &settings).await?
            }
            other => other?,
        };

        dispatcher.on_open();
        let (task, outbound) = spawn_socket_tasks(ws_stream, Arc::clone(dispatcher), settings);
        Ok(ConnectionHandle::new(
            Arc::clone(dispatcher),
            outbound,
            task,
            settings,
        ))
    }

    async fn open_socket(
        &self,
        credentials: &Credentials,
        settings: &TransportSettings,
    ) -> Result<WsStream> {
        let request = self.build_request(credentials)?;
        let host = request
            .uri()
            .host()
            .ok_or_else(|| UpstoxError::ParameterRequiredError {
                param: "host".to_string(),
            })?
            .trim_start_matches('[')
            .trim_end_matches(']')
            .to_string();
        let port = request
            .uri()
            .port_u16()
            .unwrap_or_else(|| self.config.default_port());

        info!("Connecting to WebSocket: {}://{}:{}", self.config.scheme, host, port);
        let stream = timeout(settings.write_timeout, open_tcp(&host, port, settings))
            .await
            .map_err(|_| UpstoxError::Timeout(format!("connecting to {}:{}", host, port)))??;

        let (ws_stream, response) = timeout(settings.write_timeout, client_async_tls(request, stream))
            .await
            .map_err(|_| UpstoxError::Timeout("WebSocket handshake".to_string()))?
            .map_err(UpstoxError::from_handshake)?;
        info!(
            "WebSocket connected successfully. Response: {:?}",
            response.status()
        );
        Ok(ws_stream)
    }
}

async fn open_tcp(host: &str, port: u16, settings: &TransportSettings) -> Result<TcpStream> {
    let mut last_error = None;
    for addr in lookup_host((host, port)).await? {
        let socket = if addr.is_ipv4() {
            TcpSocket::new_v4()?
        } else {
            TcpSocket::new_v6()?
        };
        match settings.keep_alive {
            Some(idle) => SockRef::from(&socket)
                .set_tcp_keepalive(&TcpKeepalive::new().with_time(idle.min(MAX_KEEPALIVE_IDLE)))?,
            None => socket.set_keepalive(false)?,
        }
        match socket.connect(addr).await {
            Ok(stream) => {
                stream.set_nodelay(true)?;
                return Ok(stream);
            }
            Err(e) => {
                debug!("Connecting to {} failed: {}", addr, e);
                last_error = Some(e);
            }
        }
    }
    Err(UpstoxError::IoError(last_error.unwrap_or_else(|| {
        std::io::Error::new(
            std::io::ErrorKind::NotFound,
            format!("no address found for {}", host),
        )
    })))
}

fn header_value(value: &str) -> Result<HeaderValue> {
    HeaderValue::from_str(value).map_err(|e| UpstoxError::InvalidHeaderValue(e.to_string()))
}

/// Spawns the reader and writer tasks for an upgraded socket.
///
/// Returns the handle of the task group and the sender for outbound frames.
fn spawn_socket_tasks(
    ws_stream: WsStream,
    dispatcher: Arc<MessageDispatcher>,
    settings: TransportSettings,
) -> (JoinHandle<()>, mpsc::Sender<Message>) {
    let (write, read) = ws_stream.split();
    let (tx, rx) = mpsc::channel::<Message>(OUTBOUND_BUFFER);

    let mut writer = tokio::spawn(write_loop(write, rx, Arc::clone(&dispatcher), settings));
    let mut reader = tokio::spawn(read_loop(read, tx.clone(), dispatcher, settings));

    let group = tokio::spawn(async move {
        tokio::select! {
            _ = &mut reader => {
                debug!("Reader task completed.");
                writer.abort();
            },
            _ = &mut writer => {
                debug!("Writer task completed.");
                reader.abort();
            },
        }
        info!("WebSocket task group finished.");
    });

    (group, tx)
}

async fn write_loop(
    mut write: SplitSink<WsStream, Message>,
    mut rx: mpsc::Receiver<Message>,
    dispatcher: Arc<MessageDispatcher>,
    settings: TransportSettings,
) {
    let now = Instant::now();
    let mut ping = interval_at(
        now.checked_add(settings.ping_interval).unwrap_or(now),
        settings.ping_interval,
    );
    let mut closing = false;

    loop {
        let message = tokio::select! {
            outbound = rx.recv() => match outbound {
                Some(message) => message,
                None => break,
            },
            _ = ping.tick(), if !closing => Message::Ping(Vec::new()),
        };
        if matches!(message, Message::Close(_)) {
            closing = true;
        }

        trace!("Sending WS frame ({} bytes)", message.len());
        match timeout(settings.write_timeout, write.send(message)).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                dispatcher.on_failure(&UpstoxError::WebsocketError(e));
                break;
            }
            Err(_) => {
                dispatcher.on_failure(&UpstoxError::Timeout(format!(
                    "no write progress within {:?}",
                    settings.write_timeout
                )));
                break;
            }
        }
    }
    debug!("WebSocket writer task finished.");
}

async fn read_loop(
    mut read: SplitStream<WsStream>,
    pong_tx: mpsc::Sender<Message>,
    dispatcher: Arc<MessageDispatcher>,
    settings: TransportSettings,
) {
    loop {
        // Pings go out every `ping_interval`, so a live server answers within this limit.
        let next = match timeout(settings.silence_limit(), read.next()).await {
            Ok(next) => next,
            Err(_) => {
                dispatcher.on_failure(&UpstoxError::Timeout(format!(
                    "nothing received within {:?}",
                    settings.silence_limit()
                )));
                break;
            }
        };

        match next {
            Some(Ok(Message::Text(text))) => {
                trace!("Received WS Text ({} bytes)", text.len());
                dispatcher.on_message(&FeedMessage::Text(text));
            }
            Some(Ok(Message::Binary(bin))) => {
                trace!("Received WS Binary ({} bytes)", bin.len());
                dispatcher.on_message(&FeedMessage::Binary(bin));
            }
            Some(Ok(Message::Ping(data))) => {
                trace!("Received WS Ping, sending Pong via channel");
                if pong_tx.send(Message::Pong(data)).await.is_err() {
                    dispatcher.on_failure(&UpstoxError::ConnectionLost(
                        "writer channel closed".to_string(),
                    ));
                    break;
                }
            }
            Some(Ok(Message::Pong(_))) => trace!("Received WS Pong"),
            Some(Ok(Message::Close(frame))) => {
                info!("Received WS Close frame: {:?}", frame);
                dispatcher.on_closed();
                break;
            }
            Some(Ok(Message::Frame(_))) => {}
            Some(Err(e)) => {
                dispatcher.on_failure(&UpstoxError::WebsocketError(e));
                break;
            }
            None => {
                dispatcher.on_failure(&UpstoxError::ConnectionLost(
                    "stream ended without a close frame".to_string(),
                ));
                break;
            }
        }
    }
    debug!("WebSocket reader task finished.");
}
