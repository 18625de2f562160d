//! Fan-out of decoded alarms to registered observers.
//!
//! The dispatcher hands every decoded [`AlarmEvent`] and [`AttachedResource`]
//! to an [`EventSink`] and moves on; publishing only enqueues. A single
//! delivery task drains the queue and calls each observer in turn, so
//! observers see items in the order they were published. Observers can be
//! registered and unregistered at any time, including while items are being
//! delivered.

use alarm_parser::{AlarmEvent, AttachedResource};
use async_trait::async_trait;
use futures::FutureExt;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, RwLock};
use tracing::{debug, error};

/// An item flowing through the sink.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SinkItem {
    Alarm(AlarmEvent),
    Resource(AttachedResource),
}

/// Receives published alarms.
///
/// Implementations may run arbitrary downstream logic; a slow observer delays
/// later deliveries but never the HTTP side.
#[async_trait]
pub trait AlarmObserver: Send + Sync {
    async fn on_alarm(&self, event: &AlarmEvent);

    async fn on_resource(&self, _resource: &AttachedResource) {}
}

/// Handle returned by [`EventSink::register`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ObserverId(u64);

type ObserverList = Arc<RwLock<Vec<(ObserverId, Arc<dyn AlarmObserver>)>>>;

/// Fire-and-forget publisher with an observer list.
///
/// Cloning yields another handle to the same queue and observers. The
/// delivery task ends once every handle is dropped.
#[derive(Clone)]
pub struct EventSink {
    observers: ObserverList,
    next_id: Arc<AtomicU64>,
    queue: mpsc::UnboundedSender<SinkItem>,
}

impl EventSink {
    /// Create a sink and spawn its delivery task.
    ///
    /// Must be called from within a tokio runtime.
    pub fn new() -> Self {
        let observers: ObserverList = Arc::new(RwLock::new(Vec::new()));
        let (queue, receiver) = mpsc::unbounded_channel();

        tokio::spawn(deliver(receiver, observers.clone()));

        Self {
            observers,
            next_id: Arc::new(AtomicU64::new(1)),
            queue,
        }
    }

    /// Register an observer for all subsequently delivered items.
    pub async fn register(&self, observer: Arc<dyn AlarmObserver>) -> ObserverId {
        let id = ObserverId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.observers.write().await.push((id, observer));
        debug!(?id, "Registered alarm observer");
        id
    }

    /// Remove an observer. Returns `false` if the id was not registered.
    pub async fn unregister(&self, id: ObserverId) -> bool {
        let mut observers = self.observers.write().await;
        let before = observers.len();
        observers.retain(|(existing, _)| *existing != id);
        before != observers.len()
    }

    /// Register a channel that receives a copy of every delivered item.
    pub async fn subscribe(&self) -> (ObserverId, mpsc::UnboundedReceiver<SinkItem>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let id = self.register(Arc::new(ChannelObserver::new(tx))).await;
        (id, rx)
    }

    pub async fn observer_count(&self) -> usize {
        self.observers.read().await.len()
    }

    pub fn publish_event(&self, event: AlarmEvent) {
        self.publish(SinkItem::Alarm(event));
    }

    pub fn publish_resource(&self, resource: AttachedResource) {
        self.publish(SinkItem::Resource(resource));
    }

    fn publish(&self, item: SinkItem) {
        // Fails only once the delivery task is gone, i.e. the runtime is shutting down
        if self.queue.send(item).is_err() {
            debug!("Alarm sink delivery task has stopped; item dropped");
        }
    }
}

impl Default for EventSink {
    fn default() -> Self {
        Self::new()
    }
}

async fn deliver(mut receiver: mpsc::UnboundedReceiver<SinkItem>, observers: ObserverList) {
    while let Some(item) = receiver.recv().await {
        // Snapshot so registration is never blocked behind a slow observer
        let current: Vec<_> = observers.read().await.clone();

        for (id, observer) in current {
            let delivery = match &item {
                SinkItem::Alarm(event) => AssertUnwindSafe(observer.on_alarm(event)).catch_unwind().await,
                SinkItem::Resource(resource) => {
                    AssertUnwindSafe(observer.on_resource(resource)).catch_unwind().await
                }
            };
            if delivery.is_err() {
                error!(?id, "Alarm observer panicked; continuing with remaining observers");
            }
        }
    }
    debug!("Alarm sink delivery task finished");
}

/// Forwards every item into a tokio channel.
pub struct ChannelObserver {
    sender: mpsc::UnboundedSender<SinkItem>,
}

impl ChannelObserver {
    pub fn new(sender: mpsc::UnboundedSender<SinkItem>) -> Self {
        Self { sender }
    }
}

#[async_trait]
impl AlarmObserver for ChannelObserver {
    async fn on_alarm(&self, event: &AlarmEvent) {
        // Ignore errors if the receiver is dropped
        let _ = self.sender.send(SinkItem::Alarm(event.clone()));
    }

    async fn on_resource(&self, resource: &AttachedResource) {
        let _ = self.sender.send(SinkItem::Resource(resource.clone()));
    }
}
