//! Connection settings for the REST API and the streaming socket.
//!
//! Both structs are plain values handed to the services at construction time.
//! `from_env` is a convenience for reading them once at startup.

use crate::error::{Result, UpstoxError};
use url::Url;

pub const DEFAULT_API_URL: &str = "https://api.upstox.com";
pub const DEFAULT_TIMEOUT_SECONDS: u64 = 10;
pub const DEFAULT_WS_SCHEME: &str = "wss";
pub const DEFAULT_WS_HOST: &str = "ws-api.upstox.com";

const ENV_API_URL: &str = "UPSTOX_API_URL";
const ENV_API_TIMEOUT: &str = "UPSTOX_API_TIMEOUT_SECS";
const ENV_WS_SCHEME: &str = "UPSTOX_WS_SCHEME";
const ENV_WS_HOST: &str = "UPSTOX_WS_HOST";
const ENV_WS_PORT: &str = "UPSTOX_WS_PORT";
const ENV_WS_PATH: &str = "UPSTOX_WS_PATH";
const ENV_WS_RECONNECT: &str = "UPSTOX_WS_RECONNECT";

/// Settings for the REST client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApiConfig {
    pub base_url: String,
    pub timeout_secs: u64,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_API_URL.to_string(),
            timeout_secs: DEFAULT_TIMEOUT_SECONDS,
        }
    }
}

impl ApiConfig {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let mut config = Self::default();
        if let Some(url) = non_empty(lookup(ENV_API_URL)) {
            config.base_url = url;
        }
        if let Some(raw) = non_empty(lookup(ENV_API_TIMEOUT)) {
            config.timeout_secs = parse_value(ENV_API_TIMEOUT, &raw)?;
        }
        Ok(config)
    }
}

/// Where the streaming socket lives and how the transport behaves on a dropped connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WebSocketConfig {
    /// `ws` or `wss`.
    pub scheme: String,
    pub host: String,
    pub port: Option<u16>,
    pub path: Option<String>,
    /// Lets the transport retry a bare connection failure once, inside a single attempt.
    pub reconnect_on_connection_failure: bool,
}

impl Default for WebSocketConfig {
    fn default() -> Self {
        Self {
            scheme: DEFAULT_WS_SCHEME.to_string(),
            host: DEFAULT_WS_HOST.to_string(),
            port: None,
            path: None,
            reconnect_on_connection_failure: true,
        }
    }
}

impl WebSocketConfig {
    /// Reads `UPSTOX_WS_SCHEME`, `UPSTOX_WS_HOST`, `UPSTOX_WS_PORT`, `UPSTOX_WS_PATH`
    /// and `UPSTOX_WS_RECONNECT`, falling back to the defaults for anything unset.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let mut config = Self::default();
        if let Some(scheme) = non_empty(lookup(ENV_WS_SCHEME)) {
            config.scheme = scheme;
        }
        if let Some(host) = non_empty(lookup(ENV_WS_HOST)) {
            config.host = host;
        }
        if let Some(raw) = non_empty(lookup(ENV_WS_PORT)) {
            config.port = Some(parse_value(ENV_WS_PORT, &raw)?);
        }
        config.path = non_empty(lookup(ENV_WS_PATH));
        if let Some(raw) = non_empty(lookup(ENV_WS_RECONNECT)) {
            config.reconnect_on_connection_failure = parse_value(ENV_WS_RECONNECT, &raw)?;
        }
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.scheme != "ws" && self.scheme != "wss" {
            return Err(UpstoxError::ParameterValueError {
                param: "scheme".to_string(),
                value: self.scheme.clone(),
            });
        }
        if self.host.is_empty() {
            return Err(UpstoxError::ParameterRequiredError {
                param: "host".to_string(),
            });
        }
        Ok(())
    }

    /// The socket URL without credentials: `scheme://host[:port][/path]`.
    pub fn endpoint(&self) -> Result<Url> {
        self.validate()?;
        let mut url = Url::parse(&format!("{}://{}", self.scheme, self.host))?;
        if let Some(port) = self.port {
            url.set_port(Some(port))
                .map_err(|_| UpstoxError::ParameterValueError {
                    param: "port".to_string(),
                    value: port.to_string(),
                })?;
        }
        if let Some(path) = &self.path {
            url.set_path(path);
        }
        Ok(url)
    }

    /// Port to dial when the URL does not carry one.
    pub fn default_port(&self) -> u16 {
        if self.scheme == "wss" {
            443
        } else {
            80
        }
    }
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.map(|v| v.trim().to_string()).filter(|v| !v.is_empty())
}

fn parse_value<T: std::str::FromStr>(param: &str, raw: &str) -> Result<T> {
    raw.parse().map_err(|_| UpstoxError::ParameterValueError {
        param: param.to_string(),
        value: raw.to_string(),
    })
}
