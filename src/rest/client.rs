use crate::auth::Credentials;
use crate::config::{ApiConfig, DEFAULT_TIMEOUT_SECONDS};
use crate::error::{Result, UpstoxError};
use crate::types::*;
use log::*;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use reqwest::{Client as HttpClient, Method, Request, Response};
use serde::de::DeserializeOwned;
use std::time::Duration;
use url::Url;

const SOCKET_PARAMS_PATH: &str = "/live/socket-params";
/// Idle connections kept per host by the underlying HTTP pool.
pub const MAX_IDLE_CONNECTIONS: usize = 5;

/// A client for the Upstox REST API.
///
/// Only the call the streaming subsystem depends on is bound here: fetching the
/// connection parameters published for the WebSocket feed.
///
/// # Examples
///
/// ```no_run
/// use upstox_connector_rs::auth::{AccessToken, CredentialSource, StaticCredentials};
/// use upstox_connector_rs::rest::UpstoxService;
///
/// #[tokio::main]
/// async fn main() {
///     let service = UpstoxService::with_base_url("https://api.upstox.com", None)
///         .expect("Failed to create client");
///     let credentials = StaticCredentials::new("api_key", "api_secret", AccessToken::bearer("token"))
///         .snapshot()
///         .expect("Invalid credentials");
///
///     let params = service
///         .get_websocket_parameters(&credentials)
///         .await
///         .expect("Failed to get parameters");
///     println!("Ping every {}s", params.ping_interval);
/// }
/// ```
#[derive(Clone, Debug)]
pub struct UpstoxService {
    /// The underlying HTTP client used for making requests.
    http_client: HttpClient,
    /// Base URL every endpoint path is joined onto.
    base_url: Url,
}

impl UpstoxService {
    pub fn new(config: &ApiConfig) -> Result<Self> {
        Self::with_base_url(&config.base_url, Some(config.timeout_secs))
    }

    /// Creates a client against an arbitrary base URL, e.g. a local mock server.
    pub fn with_base_url(base_url: &str, timeout_sec: Option<u64>) -> Result<Self> {
        let base_url = Url::parse(base_url)?;
        let timeout_duration = Duration::from_secs(timeout_sec.unwrap_or(DEFAULT_TIMEOUT_SECONDS));

        let http_client = HttpClient::builder()
            .timeout(timeout_duration)
            .pool_max_idle_per_host(MAX_IDLE_CONNECTIONS)
            .build()?;

        Ok(Self {
            http_client,
            base_url,
        })
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    /// Builds a request carrying the API key and the authorization token.
    fn build_authorized_request(
        &self,
        method: Method,
        path: &str,
        credentials: &Credentials,
    ) -> Result<Request> {
        let full_url = self.base_url.join(path)?;

        let mut headers = HeaderMap::new();
        headers.insert(
            HeaderName::from_static("x-api-key"),
            header_value(credentials.api_key())?,
        );
        headers.insert(
            reqwest::header::AUTHORIZATION,
            header_value(&credentials.authorization())?,
        );
        headers.insert(
            reqwest::header::ACCEPT,
            HeaderValue::from_static("application/json"),
        );

        Ok(self
            .http_client
            .request(method, full_url)
            .headers(headers)
            .build()?)
    }

    async fn send_request<T: DeserializeOwned>(&self, request: Request) -> Result<UpstoxResponse<T>> {
        let response = self.http_client.execute(request).await?;
        Self::handle_response(response).await
    }

    /// Maps a non-2xx status to a client/server error and parses the envelope otherwise.
    async fn handle_response<T: DeserializeOwned>(response: Response) -> Result<UpstoxResponse<T>> {
        let status = response.status();
        let body = response.text().await?;

        if status.is_success() {
            let parsed: UpstoxResponse<T> = serde_json::from_str(&body)?;
            if !(200..300).contains(&parsed.code) {
                return Err(UpstoxError::ServerError {
                    status,
                    code: parsed.code,
                    message: parsed
                        .message
                        .unwrap_or_else(|| "Unsuccessful response code".to_string()),
                });
            }
            return Ok(parsed);
        }

        let (code, message, data) = match serde_json::from_str::<ErrorResponse>(&body) {
            Ok(err) => {
                let message = err
                    .error
                    .as_ref()
                    .and_then(|detail| detail.reason.clone())
                    .or(err.message)
                    .unwrap_or_else(|| "Unknown error message".to_string());
                (err.code, message, serde_json::from_str::<serde_json::Value>(&body).ok())
            }
            Err(_) => (
                0,
                format!(
                    "Request failed with status {} (could not parse error body)",
                    status
                ),
                None,
            ),
        };

        if status.is_client_error() {
            Err(UpstoxError::ClientError {
                status,
                code,
                message,
                data,
            })
        } else {
            Err(UpstoxError::ServerError {
                status,
                code,
                message,
            })
        }
    }

    /// Retrieves the parameters a client must use to open the streaming socket.
    /// GET /live/socket-params
    ///
    /// Makes exactly one round trip. A missing or invalid `data` payload is reported as
    /// [`UpstoxError::InvalidResponse`].
    pub async fn get_websocket_parameters(
        &self,
        credentials: &Credentials,
    ) -> Result<WebsocketParameters> {
        debug!("Making request - GET WebSocket parameters");
        let request = self.build_authorized_request(Method::GET, SOCKET_PARAMS_PATH, credentials)?;
        let response = self.send_request::<WebsocketParameters>(request).await?;

        let params = response.data.ok_or_else(|| {
            UpstoxError::InvalidResponse("WebSocket parameters missing from response".to_string())
        })?;
        params.validate().map_err(UpstoxError::InvalidResponse)?;
        Ok(params)
    }
}

fn header_value(value: &str) -> Result<HeaderValue> {
    HeaderValue::from_str(value).map_err(|e| UpstoxError::InvalidHeaderValue(e.to_string()))
}
