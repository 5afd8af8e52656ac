use crate::error::Result;
use std::sync::Arc;

/// One frame received on the feed. The payload is handed over untouched.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FeedMessage {
    Text(String),
    Binary(Vec<u8>),
}

impl FeedMessage {
    pub fn as_bytes(&self) -> &[u8] {
        match self {
            FeedMessage::Text(text) => text.as_bytes(),
            FeedMessage::Binary(bytes) => bytes,
        }
    }
}

/// Lifecycle notifications delivered to every subscriber.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionEvent {
    Opened,
    Closed,
    /// The connection could not be established or dropped mid-session.
    Failed(String),
}

/// A consumer of the live feed.
///
/// Callbacks run on the socket's reader task, in registration order, one message at a
/// time; keep them short. An `Err` (or a panic) is logged and does not affect other
/// subscribers or the connection.
pub trait MessageSubscriber: Send + Sync {
    fn on_message(&self, message: &FeedMessage) -> Result<()>;

    fn on_event(&self, _event: &ConnectionEvent) {}
}

impl<F> MessageSubscriber for F
where
    F: Fn(&FeedMessage) -> Result<()> + Send + Sync,
{
    fn on_message(&self, message: &FeedMessage) -> Result<()> {
        self(message)
    }
}

pub type Subscribers = Vec<Arc<dyn MessageSubscriber>>;
