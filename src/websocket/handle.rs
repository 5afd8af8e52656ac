use crate::error::{Result, UpstoxError};
use crate::websocket::connection::TransportSettings;
use crate::websocket::dispatcher::MessageDispatcher;
use log::*;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tokio_tungstenite::tungstenite::protocol::Message;

/// Lifecycle of one streaming connection.
///
/// `Connecting -> Open -> Closing -> Closed`, or `Connecting | Open -> Failed`.
/// `Closed` and `Failed` are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ConnectionState {
    Connecting = 0,
    Open = 1,
    Closing = 2,
    Closed = 3,
    Failed = 4,
}

impl ConnectionState {
    pub fn is_terminal(self) -> bool {
        matches!(self, ConnectionState::Closed | ConnectionState::Failed)
    }

    fn from_u8(raw: u8) -> Self {
        match raw {
            0 => ConnectionState::Connecting,
            1 => ConnectionState::Open,
            2 => ConnectionState::Closing,
            3 => ConnectionState::Closed,
            _ => ConnectionState::Failed,
        }
    }
}

/// Atomically updated state, shared between the handle and the socket tasks.
#[derive(Debug, Clone)]
pub(crate) struct StateCell(Arc<AtomicU8>);

impl StateCell {
    pub(crate) fn new() -> Self {
        Self(Arc::new(AtomicU8::new(ConnectionState::Connecting as u8)))
    }

    pub(crate) fn get(&self) -> ConnectionState {
        ConnectionState::from_u8(self.0.load(Ordering::Acquire))
    }

    /// Moves to `to` if the current state is one of `from`. Returns whether it moved.
    pub(crate) fn transition(&self, from: &[ConnectionState], to: ConnectionState) -> bool {
        self.0
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |current| {
                from.contains(&ConnectionState::from_u8(current))
                    .then_some(to as u8)
            })
            .is_ok()
    }
}

/// A live streaming connection.
///
/// Owns the socket tasks. [`ConnectionHandle::close`] releases them in an orderly way;
/// dropping the handle aborts them.
pub struct ConnectionHandle {
    dispatcher: Arc<MessageDispatcher>,
    outbound: mpsc::Sender<Message>,
    task: Mutex<Option<JoinHandle<()>>>,
    settings: TransportSettings,
}

impl std::fmt::Debug for ConnectionHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionHandle")
            .field("state", &self.state())
            .field("settings", &self.settings)
            .finish()
    }
}

impl ConnectionHandle {
    pub(crate) fn new(
        dispatcher: Arc<MessageDispatcher>,
        outbound: mpsc::Sender<Message>,
        task: JoinHandle<()>,
        settings: TransportSettings,
    ) -> Self {
        Self {
            dispatcher,
            outbound,
            task: Mutex::new(Some(task)),
            settings,
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.dispatcher.state().get()
    }

    pub fn is_open(&self) -> bool {
        self.state() == ConnectionState::Open
    }

    /// Tuning derived from the connection parameters for this session.
    pub fn transport_settings(&self) -> &TransportSettings {
        &self.settings
    }

    /// Sends a text frame to the server.
    pub async fn send_text(&self, text: &str) -> Result<()> {
        if !self.is_open() {
            return Err(UpstoxError::ConnectionLost(format!(
                "Not connected (state {:?})",
                self.state()
            )));
        }
        timeout(
            self.settings.write_timeout,
            self.outbound.send(Message::Text(text.to_string())),
        )
        .await
        .map_err(|_| UpstoxError::Timeout("queueing outbound message".to_string()))?
        .map_err(|e| UpstoxError::ConnectionLost(format!("Failed to send message: {}", e)))
    }

    /// Closes the connection and releases the socket tasks.
    ///
    /// Safe to call any number of times, including after the connection failed.
    pub async fn close(&self) {
        let task = self.task.lock().await.take();

        if self.dispatcher.on_closing() {
            info!("Closing WebSocket connection...");
            let wait = self.settings.write_timeout;
            if timeout(wait, self.outbound.send(Message::Close(None)))
                .await
                .map_or(true, |sent| sent.is_err())
            {
                warn!("Could not queue close frame; dropping the socket.");
            }
            if let Some(mut task) = task {
                if timeout(wait, &mut task).await.is_err() {
                    warn!("Server did not acknowledge close within {:?}.", wait);
                    task.abort();
                }
            }
            self.dispatcher.on_closed();
        } else if let Some(task) = task {
            debug!("Releasing socket tasks in state {:?}", self.state());
            task.abort();
        }
    }
}

impl Drop for ConnectionHandle {
    fn drop(&mut self) {
        if let Some(task) = self.task.get_mut().take() {
            task.abort();
        }
    }
}
