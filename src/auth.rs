use crate::error::{Result, UpstoxError};
use base64::Engine;
use uuid::Uuid;

/// The application's API key and secret as issued by Upstox.
#[derive(Clone, PartialEq, Eq)]
pub struct ApiCredentials {
    pub api_key: String,
    pub api_secret: String,
}

/// An OAuth access token, e.g. `token_type = "Bearer"`.
#[derive(Clone, PartialEq, Eq)]
pub struct AccessToken {
    pub token_type: String,
    pub token: String,
}

impl AccessToken {
    pub fn bearer(token: impl Into<String>) -> Self {
        Self {
            token_type: "Bearer".to_string(),
            token: token.into(),
        }
    }

    /// Value for the `Authorization` header: `"<token_type> <token>"`.
    pub fn authorization(&self) -> String {
        format!("{} {}", self.token_type, self.token)
    }
}

// Secrets stay out of logs.
impl std::fmt::Debug for ApiCredentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ApiCredentials")
            .field("api_key", &self.api_key)
            .field("api_secret", &"<redacted>")
            .finish()
    }
}

impl std::fmt::Debug for AccessToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AccessToken")
            .field("token_type", &self.token_type)
            .field("token", &"<redacted>")
            .finish()
    }
}

/// A point-in-time copy of the credentials, taken once per request attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Credentials {
    pub api: ApiCredentials,
    pub token: AccessToken,
}

impl Credentials {
    pub fn api_key(&self) -> &str {
        &self.api.api_key
    }

    pub fn authorization(&self) -> String {
        self.token.authorization()
    }
}

/// Supplies the current API credentials and access token.
///
/// Implementations may refresh the token behind the scenes; callers read it again
/// on every attempt instead of caching it.
pub trait CredentialSource: Send + Sync {
    fn api_credentials(&self) -> Result<ApiCredentials>;

    fn access_token(&self) -> Result<AccessToken>;

    fn snapshot(&self) -> Result<Credentials> {
        let api = self.api_credentials()?;
        let token = self.access_token()?;
        if api.api_key.is_empty() {
            return Err(UpstoxError::AuthenticationError(
                "API key is empty".to_string(),
            ));
        }
        if token.token.is_empty() {
            return Err(UpstoxError::AuthenticationError(
                "Access token is empty".to_string(),
            ));
        }
        Ok(Credentials { api, token })
    }
}

/// A fixed set of credentials, e.g. loaded from the environment at startup.
#[derive(Debug, Clone)]
pub struct StaticCredentials {
    credentials: Credentials,
}

impl StaticCredentials {
    pub fn new(api_key: impl Into<String>, api_secret: impl Into<String>, token: AccessToken) -> Self {
        Self {
            credentials: Credentials {
                api: ApiCredentials {
                    api_key: api_key.into(),
                    api_secret: api_secret.into(),
                },
                token,
            },
        }
    }

    /// Reads `UPSTOX_API_KEY`, `UPSTOX_API_SECRET` and `UPSTOX_ACCESS_TOKEN`.
    pub fn from_env() -> Result<Self> {
        let read = |name: &str| {
            std::env::var(name).map_err(|_| UpstoxError::ParameterRequiredError {
                param: name.to_string(),
            })
        };
        Ok(Self::new(
            read("UPSTOX_API_KEY")?,
            std::env::var("UPSTOX_API_SECRET").unwrap_or_default(),
            AccessToken::bearer(read("UPSTOX_ACCESS_TOKEN")?),
        ))
    }
}

impl CredentialSource for StaticCredentials {
    fn api_credentials(&self) -> Result<ApiCredentials> {
        Ok(self.credentials.api.clone())
    }

    fn access_token(&self) -> Result<AccessToken> {
        Ok(self.credentials.token.clone())
    }
}

/// Generates a fresh `Sec-WebSocket-Key`: 16 random bytes, base64 encoded.
pub fn generate_nonce() -> String {
    base64::engine::general_purpose::STANDARD.encode(Uuid::new_v4().as_bytes())
}
