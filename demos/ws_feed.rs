// demos/ws_feed.rs
use std::sync::Arc;
use tokio::time::{sleep, Duration};
use tracing::{error, info, warn};
use upstox_connector_rs::{
    auth::StaticCredentials,
    retry::{RetryObserver, RetryPolicy},
    websocket::{ConnectionEvent, FeedMessage, MessageSubscriber, WebSocketService},
    UpstoxError,
};

/// Sets up logging with a custom format
fn setup_logging() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_target(false)
        .with_thread_ids(true)
        .with_level(true)
        .init();
}

/// Prints a short summary of every frame and every lifecycle event.
struct FeedPrinter;

impl MessageSubscriber for FeedPrinter {
    fn on_message(&self, message: &FeedMessage) -> upstox_connector_rs::Result<()> {
        match message {
            FeedMessage::Text(text) => info!("Text frame: {}", text),
            FeedMessage::Binary(bytes) => info!("Binary frame ({} bytes)", bytes.len()),
        }
        Ok(())
    }

    fn on_event(&self, event: &ConnectionEvent) {
        match event {
            ConnectionEvent::Failed(reason) => error!("Feed failed: {}", reason),
            other => info!("Feed event: {:?}", other),
        }
    }
}

struct RetryReporter;

impl RetryObserver for RetryReporter {
    fn on_retry(&self, attempt: u32, cause: &UpstoxError) {
        warn!("Attempt {} failed: {}", attempt, cause);
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    setup_logging();
    dotenv::dotenv().ok();

    let credentials = Arc::new(StaticCredentials::from_env()?);
    let service = WebSocketService::from_env(credentials)?
        .with_retry_policy(RetryPolicy::new(
            5,
            Duration::from_secs(1),
            Duration::from_secs(30),
        ))
        .with_observer(Arc::new(RetryReporter));

    info!("Connecting to the Upstox feed...");
    let handle = service.connect(vec![Arc::new(FeedPrinter)]).await?;
    info!("Connected: {:?}", handle);

    info!("Listening for messages for 30 seconds...");
    tokio::select! {
        _ = sleep(Duration::from_secs(30)) => {},
        _ = tokio::signal::ctrl_c() => info!("Interrupted."),
    }

    handle.close().await;
    info!("Final state: {:?}", handle.state());
    Ok(())
}
