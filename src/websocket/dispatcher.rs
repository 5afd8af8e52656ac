use crate::error::UpstoxError;
use crate::websocket::handle::{ConnectionState, StateCell};
use crate::websocket::subscriber::{ConnectionEvent, FeedMessage, Subscribers};
use log::*;
use std::panic::{catch_unwind, AssertUnwindSafe};

/// Fans socket events out to the subscribers captured at connect time and drives the
/// connection state machine. Terminal notifications go out exactly once.
pub(crate) struct MessageDispatcher {
    subscribers: Subscribers,
    state: StateCell,
}

impl MessageDispatcher {
    pub(crate) fn new(subscribers: Subscribers) -> Self {
        Self {
            subscribers,
            state: StateCell::new(),
        }
    }

    pub(crate) fn state(&self) -> &StateCell {
        &self.state
    }

    pub(crate) fn on_open(&self) {
        if self
            .state
            .transition(&[ConnectionState::Connecting], ConnectionState::Open)
        {
            info!("WebSocket connection is open.");
            self.notify(&ConnectionEvent::Opened);
        }
    }

    /// Delivers `message` to every subscriber in registration order.
    pub(crate) fn on_message(&self, message: &FeedMessage) {
        if !matches!(
            self.state.get(),
            ConnectionState::Open | ConnectionState::Closing
        ) {
            trace!("Dropping message received in state {:?}", self.state.get());
            return;
        }
        for (index, subscriber) in self.subscribers.iter().enumerate() {
            let outcome = catch_unwind(AssertUnwindSafe(|| subscriber.on_message(message)));
            let failure = match outcome {
                Ok(Ok(())) => continue,
                Ok(Err(e)) => UpstoxError::SubscriberError(e.to_string()),
                Err(panic) => UpstoxError::SubscriberError(panic_message(panic.as_ref())),
            };
            error!("Subscriber #{} failed to handle a message: {}", index, failure);
        }
    }

    pub(crate) fn on_failure(&self, cause: &UpstoxError) {
        if self.state.transition(
            &[ConnectionState::Connecting, ConnectionState::Open],
            ConnectionState::Failed,
        ) {
            error!("WebSocket connection failed: {}", cause);
            self.notify(&ConnectionEvent::Failed(cause.to_string()));
        }
    }

    /// Marks a caller-initiated close as started. False if the connection is not open.
    pub(crate) fn on_closing(&self) -> bool {
        self.state
            .transition(&[ConnectionState::Open], ConnectionState::Closing)
    }

    pub(crate) fn on_closed(&self) {
        if self.state.transition(
            &[ConnectionState::Open, ConnectionState::Closing],
            ConnectionState::Closed,
        ) {
            info!("WebSocket connection closed.");
            self.notify(&ConnectionEvent::Closed);
        }
    }

    fn notify(&self, event: &ConnectionEvent) {
        for (index, subscriber) in self.subscribers.iter().enumerate() {
            if let Err(panic) = catch_unwind(AssertUnwindSafe(|| subscriber.on_event(event))) {
                error!(
                    "Subscriber #{} failed to handle {:?}: {}",
                    index,
                    event,
                    panic_message(panic.as_ref())
                );
            }
        }
    }
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(msg) = panic.downcast_ref::<&str>() {
        msg.to_string()
    } else if let Some(msg) = panic.downcast_ref::<String>() {
        msg.clone()
    } else {
        "subscriber panicked".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Result;
    use crate::websocket::subscriber::MessageSubscriber;
    use std::sync::{Arc, Mutex};

    #[derive(Default)]
    struct Collector {
        messages: Mutex<Vec<FeedMessage>>,
        events: Mutex<Vec<ConnectionEvent>>,
    }

    impl MessageSubscriber for Collector {
        fn on_message(&self, message: &FeedMessage) -> Result<()> {
            self.messages.lock().unwrap().push(message.clone());
            Ok(())
        }

        fn on_event(&self, event: &ConnectionEvent) {
            self.events.lock().unwrap().push(event.clone());
        }
    }

    fn open_dispatcher(subscribers: Subscribers) -> MessageDispatcher {
        let dispatcher = MessageDispatcher::new(subscribers);
        dispatcher.on_open();
        dispatcher
    }

    #[test]
    fn test_failing_subscriber_does_not_block_others() {
        let first = Arc::new(Collector::default());
        let third = Arc::new(Collector::default());
        let failing: Arc<dyn MessageSubscriber> = Arc::new(|_: &FeedMessage| -> Result<()> {
            Err(UpstoxError::InvalidResponse("cannot decode".to_string()))
        });
        let dispatcher = open_dispatcher(vec![first.clone(), failing, third.clone()]);

        let tick = FeedMessage::Text("NSE_EQ|RELIANCE,2500.5".to_string());
        dispatcher.on_message(&tick);

        assert_eq!(*first.messages.lock().unwrap(), vec![tick.clone()]);
        assert_eq!(*third.messages.lock().unwrap(), vec![tick]);
    }

    #[test]
    fn test_panicking_subscriber_is_isolated() {
        let first = Arc::new(Collector::default());
        let third = Arc::new(Collector::default());
        let panicking: Arc<dyn MessageSubscriber> =
            Arc::new(|_: &FeedMessage| -> Result<()> { panic!("subscriber blew up") });
        let dispatcher = open_dispatcher(vec![first.clone(), panicking, third.clone()]);

        dispatcher.on_message(&FeedMessage::Binary(vec![1, 2, 3]));
        dispatcher.on_message(&FeedMessage::Binary(vec![4]));

        assert_eq!(first.messages.lock().unwrap().len(), 2);
        assert_eq!(third.messages.lock().unwrap().len(), 2);
        assert_eq!(dispatcher.state().get(), ConnectionState::Open);
    }

    #[test]
    fn test_messages_keep_arrival_order() {
        let collector = Arc::new(Collector::default());
        let dispatcher = open_dispatcher(vec![collector.clone()]);
        for i in 0..50 {
            dispatcher.on_message(&FeedMessage::Text(i.to_string()));
        }
        let received: Vec<String> = collector
            .messages
            .lock()
            .unwrap()
            .iter()
            .map(|m| String::from_utf8(m.as_bytes().to_vec()).unwrap())
            .collect();
        let expected: Vec<String> = (0..50).map(|i| i.to_string()).collect();
        assert_eq!(received, expected);
    }

    #[test]
    fn test_nothing_delivered_after_failure() {
        let collector = Arc::new(Collector::default());
        let dispatcher = open_dispatcher(vec![collector.clone()]);

        dispatcher.on_failure(&UpstoxError::ConnectionLost("reset".to_string()));
        dispatcher.on_failure(&UpstoxError::ConnectionLost("again".to_string()));
        dispatcher.on_message(&FeedMessage::Text("late".to_string()));
        dispatcher.on_closed();

        assert_eq!(dispatcher.state().get(), ConnectionState::Failed);
        assert!(collector.messages.lock().unwrap().is_empty());
        let events = collector.events.lock().unwrap();
        assert_eq!(events.len(), 2);
        assert_eq!(events[0], ConnectionEvent::Opened);
        assert!(matches!(&events[1], ConnectionEvent::Failed(cause) if cause.contains("reset")));
    }

    #[test]
    fn test_close_notifies_once() {
        let collector = Arc::new(Collector::default());
        let dispatcher = open_dispatcher(vec![collector.clone()]);

        assert!(dispatcher.on_closing());
        assert!(!dispatcher.on_closing());
        dispatcher.on_closed();
        dispatcher.on_closed();
        dispatcher.on_failure(&UpstoxError::ConnectionLost("after close".to_string()));

        assert_eq!(dispatcher.state().get(), ConnectionState::Closed);
        assert_eq!(
            *collector.events.lock().unwrap(),
            vec![ConnectionEvent::Opened, ConnectionEvent::Closed]
        );
    }

    #[test]
    fn test_failure_while_connecting() {
        let collector = Arc::new(Collector::default());
        let dispatcher = MessageDispatcher::new(vec![collector.clone()]);

        dispatcher.on_failure(&UpstoxError::HandshakeRejected { status: 403 });
        dispatcher.on_open();

        assert_eq!(dispatcher.state().get(), ConnectionState::Failed);
        assert_eq!(collector.events.lock().unwrap().len(), 1);
    }
}
