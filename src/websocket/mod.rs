//! Streaming market-data feed over a WebSocket.
//!
//! [`WebSocketService::connect`] runs in two stages:
//!
//! 1. Fetch the connection parameters (ping interval, ping timeout, keep-alive) from the
//!    REST API.
//! 2. Open the socket with those parameters and attach the subscribers.
//!
//! Each stage runs under its own [`RetryPolicy`](crate::retry::RetryPolicy) with
//! exponential backoff, and the second stage starts only after the first has succeeded.
//!
//! # Usage
//!
//! ```no_run
//! use std::sync::Arc;
//! use upstox_connector_rs::auth::StaticCredentials;
//! use upstox_connector_rs::websocket::{FeedMessage, MessageSubscriber, WebSocketService};
//!
//! #[tokio::main]
//! async fn main() {
//!     let credentials = Arc::new(StaticCredentials::from_env().expect("Missing credentials"));
//!     let service = WebSocketService::from_env(credentials).expect("Invalid configuration");
//!
//!     let printer: Arc<dyn MessageSubscriber> = Arc::new(|msg: &FeedMessage| -> upstox_connector_rs::Result<()> {
//!         println!("Received: {:?}", msg);
//!         Ok(())
//!     });
//!
//!     let handle = service.connect(vec![printer]).await.expect("Failed to connect");
//!
//!     tokio::signal::ctrl_c().await.expect("Failed to listen for ctrl+c");
//!     handle.close().await;
//! }
//! ```
//!
//! # Message Handling
//!
//! Each received frame is handed to every subscriber in registration order on the
//! socket's reader task. A subscriber that returns an error or panics is logged and
//! skipped; the others still receive the message.
//!
//! # Connection Drops
//!
//! Once open, a dropped connection is reported to subscribers as
//! [`ConnectionEvent::Failed`] and the handle moves to
//! [`ConnectionState::Failed`]. It is not re-established automatically.

pub mod client;
pub mod connection;
mod dispatcher;
pub mod handle;
pub mod subscriber;

pub use client::WebSocketService;
pub use connection::{ConnectionBuilder, TransportSettings};
pub use handle::{ConnectionHandle, ConnectionState};
pub use subscriber::{ConnectionEvent, FeedMessage, MessageSubscriber, Subscribers};
