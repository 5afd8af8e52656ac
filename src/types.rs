use serde::{Deserialize, Deserializer};

// --- Response Structs ---

/// The envelope every Upstox REST response is wrapped in.
#[derive(Deserialize, Debug, Clone)]
pub struct UpstoxResponse<T> {
    pub code: i64,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub timestamp: Option<String>,
    #[serde(default)]
    pub message: Option<String>,
    pub data: Option<T>,
}

#[derive(Deserialize, Debug, Clone)]
pub struct ErrorDetail {
    pub name: Option<String>,
    pub reason: Option<String>,
}

/// Body of a failed request, e.g. `{"code":400,"status":"Bad Request","message":"...","error":{...}}`.
#[derive(Deserialize, Debug, Clone)]
pub struct ErrorResponse {
    #[serde(default)]
    pub code: i64,
    pub status: Option<String>,
    pub message: Option<String>,
    pub error: Option<ErrorDetail>,
}

/// Server-issued tuning values for a streaming session, in seconds.
///
/// The server has historically published the ping values as `pythonPingInterval` and
/// `pythonPingTimeout`, sometimes as strings; both spellings are accepted.
#[derive(Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct WebsocketParameters {
    #[serde(default, deserialize_with = "seconds")]
    pub keepalive_interval: u64,
    #[serde(alias = "pythonPingInterval", deserialize_with = "seconds")]
    pub ping_interval: u64,
    #[serde(alias = "pythonPingTimeout", deserialize_with = "seconds")]
    pub ping_timeout: u64,
}

/// Upper bound for any server-issued interval, in seconds.
pub const MAX_PARAMETER_SECONDS: u64 = 24 * 60 * 60;

impl WebsocketParameters {
    /// Ping interval and timeout must both be positive, and no value may exceed
    /// [`MAX_PARAMETER_SECONDS`].
    pub fn validate(&self) -> Result<(), String> {
        if self.ping_interval == 0 {
            return Err("pingInterval must be greater than zero".to_string());
        }
        if self.ping_timeout == 0 {
            return Err("pingTimeout must be greater than zero".to_string());
        }
        for (name, value) in [
            ("keepaliveInterval", self.keepalive_interval),
            ("pingInterval", self.ping_interval),
            ("pingTimeout", self.ping_timeout),
        ] {
            if value > MAX_PARAMETER_SECONDS {
                return Err(format!(
                    "{} of {}s exceeds {}s",
                    name, value, MAX_PARAMETER_SECONDS
                ));
            }
        }
        Ok(())
    }
}

fn seconds<'de, D: Deserializer<'de>>(deserializer: D) -> Result<u64, D::Error> {
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Number(u64),
        Text(String),
    }

    match Raw::deserialize(deserializer)? {
        Raw::Number(value) => Ok(value),
        Raw::Text(text) => text.trim().parse().map_err(serde::de::Error::custom),
    }
}
