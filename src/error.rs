use reqwest::StatusCode;
use serde_json::Value;
use thiserror::Error;
use tokio_tungstenite::tungstenite;
use tokio_tungstenite::tungstenite::error::ProtocolError;
use url::ParseError;

pub type Result<T, E = UpstoxError> = std::result::Result<T, E>;

#[derive(Error, Debug)]
pub enum UpstoxError {
    #[error("Client Error: status={status}, code={code}, message={message}, data={data:?}")]
    ClientError {
        status: StatusCode,
        code: i64,
        message: String,
        data: Option<Value>,
    },

    #[error("Server Error: status={status}, code={code}, message={message}")]
    ServerError {
        status: StatusCode,
        code: i64,
        message: String,
    },

    #[error("Parameter Required Error: Missing required parameter '{param}'")]
    ParameterRequiredError { param: String },

    #[error("Parameter Value Error: Invalid value '{value}' for parameter '{param}'")]
    ParameterValueError { param: String, value: String },

    #[error("Invalid Response: {0}")]
    InvalidResponse(String),

    #[error("WebSocket Handshake Rejected: status={status}")]
    HandshakeRejected { status: u16 },

    #[error("WebSocket Error: {0}")]
    WebsocketError(#[from] tungstenite::Error),

    #[error("Connection Lost: {0}")]
    ConnectionLost(String),

    #[error("Timed out: {0}")]
    Timeout(String),

    #[error("Authentication Error: {0}")]
    AuthenticationError(String),

    #[error("Subscriber Error: {0}")]
    SubscriberError(String),

    #[error("Gave up after {attempts} attempt(s): {source}")]
    RetryExhausted {
        attempts: u32,
        #[source]
        source: Box<UpstoxError>,
    },

    #[error("Retry executor is shut down")]
    ExecutorClosed,

    #[error("HTTP Request Error: {0}")]
    ReqwestError(#[from] reqwest::Error),

    #[error("HTTP Error: {0}")]
    HttpError(#[from] tungstenite::http::Error),

    #[error("JSON Serialization/Deserialization Error: {0}")]
    SerdeError(#[from] serde_json::Error),

    #[error("URL Parsing Error: {0}")]
    UrlParseError(#[from] ParseError),

    #[error("Invalid HTTP Header Value: {0}")]
    InvalidHeaderValue(String),

    #[error("IO Error: {0}")]
    IoError(#[from] std::io::Error),
}

impl UpstoxError {
    /// Missing or invalid caller input, raised before any network activity.
    pub fn is_argument_error(&self) -> bool {
        matches!(
            self,
            UpstoxError::ParameterRequiredError { .. } | UpstoxError::ParameterValueError { .. }
        )
    }

    /// A bare connection-level failure (refused, reset, closed before the upgrade finished).
    /// Handshake rejections and timeouts are not included.
    pub fn is_connection_failure(&self) -> bool {
        match self {
            UpstoxError::IoError(_) | UpstoxError::ConnectionLost(_) => true,
            UpstoxError::WebsocketError(e) => matches!(
                e,
                tungstenite::Error::Io(_)
                    | tungstenite::Error::ConnectionClosed
                    | tungstenite::Error::AlreadyClosed
                    | tungstenite::Error::Protocol(ProtocolError::HandshakeIncomplete)
            ),
            _ => false,
        }
    }

    /// Maps an error raised during the WebSocket upgrade, splitting out HTTP rejections.
    pub(crate) fn from_handshake(err: tungstenite::Error) -> Self {
        match err {
            tungstenite::Error::Http(response) => UpstoxError::HandshakeRejected {
                status: response.status().as_u16(),
            },
            other => UpstoxError::WebsocketError(other),
        }
    }
}
