//! Connection Manager
//!
//! Owns the push channel for the lifetime of the process and fans domain
//! update events out to registered handlers.

use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{watch, Notify, RwLock};
use tokio::task::JoinHandle;
use uuid::Uuid;

use super::channel::{ChannelEvent, PushChannel};
use super::messages::PushEvent;
use crate::model::Domain;

/// Handle returned by [`ConnectionManager::subscribe`]
pub type SubscriptionId = Uuid;

/// Callback run for every push event of a domain
pub type EventHandler = Arc<dyn Fn(&PushEvent) + Send + Sync>;

/// Observable state of the push channel
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    /// Not connected (yet, or after a drop); polling still covers updates
    Disconnected,
    Connected,
    /// Stopped for good
    Closed,
}

struct Subscription {
    id: SubscriptionId,
    handler: EventHandler,
}

/// Maintains the single push channel and its subscriptions
pub struct ConnectionManager {
    /// Domain → handlers, in registration order
    subscriptions: Arc<RwLock<HashMap<Domain, Vec<Subscription>>>>,
    state_tx: watch::Sender<ConnectionState>,
    shutdown: Notify,
}

impl ConnectionManager {
    pub fn new() -> Self {
        let (state_tx, _) = watch::channel(ConnectionState::Disconnected);
        Self {
            subscriptions: Arc::new(RwLock::new(HashMap::new())),
            state_tx,
            shutdown: Notify::new(),
        }
    }

    /// Register `handler` for push events of `domain`
    ///
    /// Several handlers per domain are allowed; each runs on every event.
    pub async fn subscribe<F>(&self, domain: Domain, handler: F) -> SubscriptionId
    where
        F: Fn(&PushEvent) + Send + Sync + 'static,
    {
        let id = Uuid::new_v4();
        self.subscriptions
            .write()
            .await
            .entry(domain)
            .or_default()
            .push(Subscription {
                id,
                handler: Arc::new(handler),
            });

        tracing::debug!(domain = %domain, subscription_id = %id, "Subscribed to push events");
        id
    }

    /// Remove a handler; returns whether it was registered
    pub async fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let mut subs = self.subscriptions.write().await;
        let mut removed = false;
        for handlers in subs.values_mut() {
            let before = handlers.len();
            handlers.retain(|s| s.id != id);
            removed |= handlers.len() != before;
        }
        subs.retain(|_, handlers| !handlers.is_empty());
        removed
    }

    /// Number of handlers registered for `domain`
    pub async fn subscription_count(&self, domain: Domain) -> usize {
        self.subscriptions
            .read()
            .await
            .get(&domain)
            .map(|s| s.len())
            .unwrap_or(0)
    }

    /// Current channel state
    pub fn state(&self) -> ConnectionState {
        *self.state_tx.borrow()
    }

    /// Watch channel state changes without blocking the manager
    pub fn watch_state(&self) -> watch::Receiver<ConnectionState> {
        self.state_tx.subscribe()
    }

    /// Run every handler registered for the event's domain
    ///
    /// Returns the number of handlers run.
    pub async fn dispatch(&self, event: &PushEvent) -> usize {
        // clone out so handlers may (un)subscribe without deadlocking
        let handlers: Vec<EventHandler> = self
            .subscriptions
            .read()
            .await
            .get(&event.domain)
            .map(|subs| subs.iter().map(|s| Arc::clone(&s.handler)).collect())
            .unwrap_or_default();

        for handler in &handlers {
            handler(event);
        }

        tracing::trace!(
            domain = %event.domain,
            handlers = handlers.len(),
            "Dispatched push event"
        );
        handlers.len()
    }

    /// Start pumping `channel` in a background task
    pub fn start(self: Arc<Self>, channel: Box<dyn PushChannel>) -> JoinHandle<()> {
        tokio::spawn(async move { self.run(channel).await })
    }

    /// Ask the background task to close the channel and exit
    pub fn stop(&self) {
        self.shutdown.notify_one();
    }

    async fn run(&self, mut channel: Box<dyn PushChannel>) {
        tracing::info!("Push channel started");

        loop {
            tokio::select! {
                _ = self.shutdown.notified() => break,
                next = channel.next_event() => match next {
                    None => break,
                    Some(Ok(event)) => self.handle(event).await,
                    // logged and swallowed: polling covers whatever was missed
                    Some(Err(e)) => tracing::warn!(error = %e, "Push channel error"),
                },
            }
        }

        channel.close().await;
        self.set_state(ConnectionState::Closed);
        tracing::info!("Push channel stopped");
    }

    async fn handle(&self, event: ChannelEvent) {
        match event {
            ChannelEvent::Connected => {
                tracing::info!("Push channel connected");
                self.set_state(ConnectionState::Connected);
            }
            ChannelEvent::Disconnected { reason } => {
                tracing::warn!(reason = %reason, "Push channel disconnected");
                self.set_state(ConnectionState::Disconnected);
            }
            ChannelEvent::Event { name, payload } => {
                let now = chrono::Utc::now().timestamp_millis();
                match PushEvent::from_raw(&name, payload, now) {
                    Some(event) => {
                        self.dispatch(&event).await;
                    }
                    None => tracing::debug!(event = %name, "Ignoring unknown push event"),
                }
            }
        }
    }

    fn set_state(&self, state: ConnectionState) {
        self.state_tx.send_if_modified(|current| {
            let changed = *current != state;
            *current = state;
            changed
        });
    }
}

impl Default for ConnectionManager {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection::TransportError;
    use async_trait::async_trait;
    use serde_json::Value;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::sync::mpsc;

    /// Channel fed from a test-controlled queue
    struct QueueChannel {
        rx: mpsc::UnboundedReceiver<Result<ChannelEvent, TransportError>>,
        closed: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl PushChannel for QueueChannel {
        async fn next_event(&mut self) -> Option<Result<ChannelEvent, TransportError>> {
            self.rx.recv().await
        }

        async fn close(&mut self) {
            self.closed.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn event(name: &str) -> Result<ChannelEvent, TransportError> {
        Ok(ChannelEvent::Event {
            name: name.to_string(),
            payload: Value::Null,
        })
    }

    fn counter() -> (Arc<AtomicUsize>, impl Fn(&PushEvent) + Send + Sync + 'static) {
        let count = Arc::new(AtomicUsize::new(0));
        let c = Arc::clone(&count);
        (count, move |_: &PushEvent| {
            c.fetch_add(1, Ordering::SeqCst);
        })
    }

    #[tokio::test]
    async fn test_multiple_handlers_per_domain() {
        let manager = ConnectionManager::new();
        let (first, h1) = counter();
        let (second, h2) = counter();
        manager.subscribe(Domain::Parking, h1).await;
        manager.subscribe(Domain::Parking, h2).await;

        let ev = PushEvent::from_raw("update_parking", Value::Null, 0).unwrap();
        assert_eq!(manager.dispatch(&ev).await, 2);
        assert_eq!(first.load(Ordering::SeqCst), 1);
        assert_eq!(second.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_unsubscribe() {
        let manager = ConnectionManager::new();
        let (count, handler) = counter();
        let id = manager.subscribe(Domain::Wifi, handler).await;
        assert_eq!(manager.subscription_count(Domain::Wifi).await, 1);

        assert!(manager.unsubscribe(id).await);
        assert!(!manager.unsubscribe(id).await);
        assert_eq!(manager.subscription_count(Domain::Wifi).await, 0);

        let ev = PushEvent::from_raw("update_wifi", Value::Null, 0).unwrap();
        assert_eq!(manager.dispatch(&ev).await, 0);
        assert_eq!(count.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_run_loop_routes_events_and_swallows_errors() {
        let manager = Arc::new(ConnectionManager::new());
        let (parking, h1) = counter();
        let (taxi, h2) = counter();
        manager.subscribe(Domain::Parking, h1).await;
        manager.subscribe(Domain::TransportTaxi, h2).await;

        let (tx, rx) = mpsc::unbounded_channel();
        let closed = Arc::new(AtomicUsize::new(0));
        let mut state = manager.watch_state();

        tx.send(Ok(ChannelEvent::Connected)).unwrap();
        tx.send(event("update_parking")).unwrap();
        tx.send(Err(TransportError::Protocol("garbage".to_string()))).unwrap();
        tx.send(event("update_parking")).unwrap();
        tx.send(event("update_transport_taxi")).unwrap();
        tx.send(event("update_unknown")).unwrap();
        drop(tx);

        let handle = Arc::clone(&manager).start(Box::new(QueueChannel {
            rx,
            closed: Arc::clone(&closed),
        }));
        handle.await.unwrap();

        assert_eq!(parking.load(Ordering::SeqCst), 2);
        assert_eq!(taxi.load(Ordering::SeqCst), 1);
        assert_eq!(closed.load(Ordering::SeqCst), 1);
        assert_eq!(manager.state(), ConnectionState::Closed);
        assert!(state.has_changed().unwrap());
        assert_eq!(*state.borrow_and_update(), ConnectionState::Closed);
    }

    #[tokio::test]
    async fn test_disconnect_is_observable() {
        let manager = Arc::new(ConnectionManager::new());
        let (tx, rx) = mpsc::unbounded_channel();
        let mut state = manager.watch_state();

        let handle = Arc::clone(&manager).start(Box::new(QueueChannel {
            rx,
            closed: Arc::new(AtomicUsize::new(0)),
        }));

        tx.send(Ok(ChannelEvent::Connected)).unwrap();
        state.changed().await.unwrap();
        assert_eq!(*state.borrow(), ConnectionState::Connected);

        tx.send(Ok(ChannelEvent::Disconnected {
            reason: "server restart".to_string(),
        }))
        .unwrap();
        state.changed().await.unwrap();
        assert_eq!(*state.borrow(), ConnectionState::Disconnected);

        manager.stop();
        handle.await.unwrap();
        assert_eq!(manager.state(), ConnectionState::Closed);
    }

    #[tokio::test]
    async fn test_reconnect_resumes_dispatch() {
        let manager = Arc::new(ConnectionManager::new());
        let (parking, handler) = counter();
        manager.subscribe(Domain::Parking, handler).await;
        let (tx, rx) = mpsc::unbounded_channel();
        let mut state = manager.watch_state();

        let handle = Arc::clone(&manager).start(Box::new(QueueChannel {
            rx,
            closed: Arc::new(AtomicUsize::new(0)),
        }));

        tx.send(Ok(ChannelEvent::Connected)).unwrap();
        state.changed().await.unwrap();
        assert_eq!(*state.borrow_and_update(), ConnectionState::Connected);

        tx.send(Ok(ChannelEvent::Disconnected {
            reason: "socket closed".to_string(),
        }))
        .unwrap();
        state.changed().await.unwrap();
        assert_eq!(*state.borrow_and_update(), ConnectionState::Disconnected);

        tx.send(Err(TransportError::Connect("refused".to_string()))).unwrap();
        tx.send(Ok(ChannelEvent::Connected)).unwrap();
        state.changed().await.unwrap();
        assert_eq!(*state.borrow_and_update(), ConnectionState::Connected);

        tx.send(event("update_parking")).unwrap();
        drop(tx);
        handle.await.unwrap();
        assert_eq!(parking.load(Ordering::SeqCst), 1);
        assert_eq!(manager.state(), ConnectionState::Closed);
    }
}
