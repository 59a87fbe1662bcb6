//! Sign-in/sign-out broadcast between execution contexts.
//!
//! Every context sharing one credential store joins the same named channel.
//! An event is delivered to every *other* context that is subscribed at the
//! time it is published; there is no persistence and no replay for contexts
//! that join later.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use thiserror::Error;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

/// Buffer for in-flight events per channel; slow receivers past this lag.
const CHANNEL_CAPACITY: usize = 64;

/// Closed set of cross-context events. Neither carries a payload: the shared
/// credential store is the source of truth.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BroadcastEvent {
    SignedIn,
    SignedOut,
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum BusError {
    #[error("A handler is already subscribed on channel '{0}'")]
    AlreadySubscribed(String),

    #[error("No async runtime available to listen on channel '{0}'")]
    NoRuntime(String),

    #[error("Bus is on channel '{actual}', expected '{expected}'")]
    ChannelMismatch { expected: String, actual: String },
}

pub type EventHandler = Box<dyn Fn(BroadcastEvent) + Send + Sync + 'static>;

pub trait CrossContextBus: Send + Sync {
    /// Name of the channel this endpoint publishes and listens on.
    fn channel_name(&self) -> &str;

    /// Fire-and-forget to all other contexts.
    fn publish(&self, event: BroadcastEvent);

    /// Register the single inbound handler for this context. Dropping the
    /// returned `Subscription` unregisters it.
    fn subscribe(&self, handler: EventHandler) -> Result<Subscription, BusError>;
}

/// Listener registration; the listener stops when this is dropped.
#[must_use = "dropping a Subscription stops event delivery"]
pub struct Subscription {
    task: Option<JoinHandle<()>>,
    registered: Arc<Mutex<bool>>,
}

impl Subscription {
    pub fn cancel(mut self) {
        self.stop();
    }

    fn stop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
        *self.registered.lock() = false;
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.stop();
    }
}

#[derive(Debug, Clone, Copy)]
struct Envelope {
    origin: u64,
    event: BroadcastEvent,
}

/// In-process channel hub. Each context calls `connect()` once to obtain
/// its own `LocalBus` endpoint.
#[derive(Clone)]
pub struct BroadcastHub {
    name: Arc<str>,
    tx: broadcast::Sender<Envelope>,
    next_origin: Arc<AtomicU64>,
}

impl BroadcastHub {
    pub fn new(name: &str) -> Self {
        let (tx, _rx) = broadcast::channel(CHANNEL_CAPACITY);
        Self {
            name: Arc::from(name),
            tx,
            next_origin: Arc::new(AtomicU64::new(1)),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn connect(&self) -> LocalBus {
        LocalBus {
            hub: self.clone(),
            origin: self.next_origin.fetch_add(1, Ordering::Relaxed),
            registered: Arc::new(Mutex::new(false)),
        }
    }
}

/// One context's endpoint on a `BroadcastHub`.
pub struct LocalBus {
    hub: BroadcastHub,
    origin: u64,
    registered: Arc<Mutex<bool>>,
}

impl CrossContextBus for LocalBus {
    fn channel_name(&self) -> &str {
        self.hub.name()
    }

    fn publish(&self, event: BroadcastEvent) {
        let envelope = Envelope {
            origin: self.origin,
            event,
        };
        // Err only means nobody is listening right now
        match self.hub.tx.send(envelope) {
            Ok(receivers) => {
                debug!(channel = %self.hub.name, ?event, receivers, "Published event")
            }
            Err(_) => debug!(channel = %self.hub.name, ?event, "Published event with no listeners"),
        }
    }

    fn subscribe(&self, handler: EventHandler) -> Result<Subscription, BusError> {
        let runtime = tokio::runtime::Handle::try_current()
            .map_err(|_| BusError::NoRuntime(self.hub.name.to_string()))?;

        {
            let mut registered = self.registered.lock();
            if *registered {
                return Err(BusError::AlreadySubscribed(self.hub.name.to_string()));
            }
            *registered = true;
        }

        let mut rx = self.hub.tx.subscribe();
        let origin = self.origin;
        let channel = self.hub.name.clone();

        let task = runtime.spawn(async move {
            loop {
                match rx.recv().await {
                    Ok(envelope) if envelope.origin == origin => continue,
                    Ok(envelope) => {
                        debug!(channel = %channel, event = ?envelope.event, "Received event");
                        handler(envelope.event);
                    }
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        warn!(channel = %channel, skipped, "Event listener lagged, events dropped");
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        });

        Ok(Subscription {
            task: Some(task),
            registered: self.registered.clone(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tokio::sync::mpsc;

    fn forwarding_handler(tx: mpsc::UnboundedSender<BroadcastEvent>) -> EventHandler {
        Box::new(move |event| {
            let _ = tx.send(event);
        })
    }

    #[tokio::test]
    async fn test_event_reaches_other_contexts_not_sender() {
        let hub = BroadcastHub::new("auth");
        let sender = hub.connect();
        let receiver = hub.connect();

        let (sender_tx, mut sender_rx) = mpsc::unbounded_channel();
        let (receiver_tx, mut receiver_rx) = mpsc::unbounded_channel();
        let _s1 = sender.subscribe(forwarding_handler(sender_tx)).unwrap();
        let _s2 = receiver.subscribe(forwarding_handler(receiver_tx)).unwrap();

        sender.publish(BroadcastEvent::SignedOut);
        sender.publish(BroadcastEvent::SignedIn);

        let first = tokio::time::timeout(Duration::from_secs(1), receiver_rx.recv())
            .await
            .unwrap();
        let second = tokio::time::timeout(Duration::from_secs(1), receiver_rx.recv())
            .await
            .unwrap();
        assert_eq!(first, Some(BroadcastEvent::SignedOut));
        assert_eq!(second, Some(BroadcastEvent::SignedIn));

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(sender_rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_single_handler_per_context() {
        let hub = BroadcastHub::new("auth");
        let bus = hub.connect();

        let first = bus.subscribe(Box::new(|_| {})).unwrap();
        assert_eq!(
            bus.subscribe(Box::new(|_| {})).err(),
            Some(BusError::AlreadySubscribed("auth".to_string()))
        );

        // Tearing down frees the slot
        first.cancel();
        assert!(bus.subscribe(Box::new(|_| {})).is_ok());
    }

    #[tokio::test]
    async fn test_dropped_subscription_stops_delivery() {
        let hub = BroadcastHub::new("auth");
        let sender = hub.connect();
        let receiver = hub.connect();

        let (tx, mut rx) = mpsc::unbounded_channel();
        let subscription = receiver.subscribe(forwarding_handler(tx)).unwrap();
        drop(subscription);
        tokio::task::yield_now().await;

        sender.publish(BroadcastEvent::SignedOut);
        let received = tokio::time::timeout(Duration::from_millis(100), rx.recv()).await;
        // Either timed out or the channel closed with the aborted task
        assert!(!matches!(received, Ok(Some(_))));
    }

    #[test]
    fn test_subscribe_outside_runtime_fails() {
        let hub = BroadcastHub::new("auth");
        let bus = hub.connect();
        assert_eq!(
            bus.subscribe(Box::new(|_| {})).err(),
            Some(BusError::NoRuntime("auth".to_string()))
        );
    }

    #[test]
    fn test_publish_without_listeners_is_silent() {
        let hub = BroadcastHub::new("auth");
        hub.connect().publish(BroadcastEvent::SignedIn);
    }
}
