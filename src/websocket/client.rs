use crate::auth::CredentialSource;
use crate::config::{ApiConfig, WebSocketConfig};
use crate::error::{Result, UpstoxError};
use crate::rest::UpstoxService;
use crate::retry::{LogObserver, RetryExecutor, RetryObserver, RetryPolicy};
use crate::websocket::connection::ConnectionBuilder;
use crate::websocket::dispatcher::MessageDispatcher;
use crate::websocket::handle::ConnectionHandle;
use crate::websocket::subscriber::Subscribers;
use log::*;
use std::sync::Arc;

/// Entry point for the streaming feed.
///
/// Cheap to clone; clones share the credential source and the retry pool.
#[derive(Clone)]
pub struct WebSocketService {
    rest: UpstoxService,
    credentials: Arc<dyn CredentialSource>,
    builder: ConnectionBuilder,
    executor: RetryExecutor,
    parameters_policy: RetryPolicy,
    connection_policy: RetryPolicy,
    observer: Option<Arc<dyn RetryObserver>>,
}

impl WebSocketService {
    pub fn new(
        credentials: Arc<dyn CredentialSource>,
        api_config: &ApiConfig,
        ws_config: WebSocketConfig,
    ) -> Result<Self> {
        Ok(Self::with_rest_client(
            credentials,
            UpstoxService::new(api_config)?,
            ConnectionBuilder::new(ws_config)?,
        ))
    }

    /// Reads both configurations from the environment, see [`ApiConfig::from_env`] and
    /// [`WebSocketConfig::from_env`].
    pub fn from_env(credentials: Arc<dyn CredentialSource>) -> Result<Self> {
        Self::new(
            credentials,
            &ApiConfig::from_env()?,
            WebSocketConfig::from_env()?,
        )
    }

    pub fn with_rest_client(
        credentials: Arc<dyn CredentialSource>,
        rest: UpstoxService,
        builder: ConnectionBuilder,
    ) -> Self {
        Self {
            rest,
            credentials,
            builder,
            executor: RetryExecutor::default(),
            parameters_policy: RetryPolicy::default(),
            connection_policy: RetryPolicy::default(),
            observer: None,
        }
    }

    /// Uses `policy` for both the parameter fetch and the handshake.
    pub fn with_retry_policy(self, policy: RetryPolicy) -> Self {
        self.with_parameters_retry_policy(policy.clone())
            .with_connection_retry_policy(policy)
    }

    pub fn with_parameters_retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.parameters_policy = policy;
        self
    }

    pub fn with_connection_retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.connection_policy = policy;
        self
    }

    /// Shares a retry pool with other services.
    pub fn with_executor(mut self, executor: RetryExecutor) -> Self {
        self.executor = executor;
        self
    }

    /// Receives retry diagnostics from both stages, in addition to the log output.
    pub fn with_observer(mut self, observer: Arc<dyn RetryObserver>) -> Self {
        self.observer = Some(observer);
        self
    }

    /// Connects to the feed and starts delivering messages to `subscribers`.
    ///
    /// Fetches the connection parameters first and only then attempts the handshake, each
    /// under its own retry policy. Resolves once the connection is open, or with
    /// [`UpstoxError::RetryExhausted`] once either stage gave up; subscribers are told
    /// about the failure as well. An empty subscriber list is rejected before any
    /// network call.
    ///
    /// A connection that drops after opening is not re-established: subscribers receive
    /// [`ConnectionEvent::Failed`](crate::websocket::ConnectionEvent::Failed) and the
    /// caller decides whether to connect again.
    pub async fn connect(&self, subscribers: Subscribers) -> Result<ConnectionHandle> {
        if subscribers.is_empty() {
            return Err(UpstoxError::ParameterRequiredError {
                param: "subscribers".to_string(),
            });
        }
        let dispatcher = Arc::new(MessageDispatcher::new(subscribers));

        // Step 1: the parameters must be in hand before any connection attempt.
        let rest = &self.rest;
        let credentials = &self.credentials;
        let parameters_observer =
            LogObserver::new("retrieve web-socket parameters").with_next(self.observer.clone());
        let fetched = self
            .executor
            .execute(&self.parameters_policy, &parameters_observer, move || async move {
                let snapshot = credentials.snapshot()?;
                rest.get_websocket_parameters(&snapshot).await
            })
            .await;
        let parameters = match fetched {
            Ok(parameters) => parameters,
            Err(e) => {
                dispatcher.on_failure(&e);
                return Err(e);
            }
        };
        debug!("WebSocket connection parameters are: {:?}", parameters);

        // Step 2: open the socket; credentials are re-read on every attempt.
        let builder = &self.builder;
        let parameters = &parameters;
        let dispatcher_ref = &dispatcher;
        let connection_observer =
            LogObserver::new("connect to web-socket").with_next(self.observer.clone());
        let connected = self
            .executor
            .execute(&self.connection_policy, &connection_observer, move || async move {
                let snapshot = credentials.snapshot()?;
                builder.connect(parameters, &snapshot, dispatcher_ref).await
            })
            .await;

        match connected {
            Ok(handle) => Ok(handle),
            Err(e) => {
                dispatcher.on_failure(&e);
                Err(e)
            }
        }
    }
}
