//! In-process event bus.
//!
//! Publishers enqueue onto a bounded mpsc; a dedicated dispatcher thread
//! delivers each event, in publication order, to every subscriber whose
//! filter matches.
//!
//! ```text
//! ┌──────────────┐  publish().await  ┌────────────┐  handle(&event)  ┌─────────────┐
//! │SessionActor  │──────────────────▶│  bounded   │─────────────────▶│ Subscriber  │
//! │HookIngestor  │                   │   mpsc     │  (dispatcher     │ (filtered)  │
//! └──────────────┘                   └────────────┘   thread)        └─────────────┘
//! ```
//!
//! A subscriber that panics is unregistered; the others still receive the
//! event. Nothing is persisted.

mod subscriber;

pub use subscriber::{ChannelSubscriber, Subscriber, SubscriptionFilter};

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, RwLock};

use tokio::sync::mpsc;
use tracing::{debug, error, info};

use deck_protocol::BusEvent;

/// Identifies a registration for [`EventBus::unsubscribe`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

struct Slot {
    id: SubscriptionId,
    filter: SubscriptionFilter,
    subscriber: Arc<dyn Subscriber>,
}

type Slots = Arc<RwLock<Vec<Slot>>>;

/// Cheap-to-clone publishing and subscription handle.
#[derive(Clone)]
pub struct EventBus {
    sender: mpsc::Sender<BusEvent>,
    slots: Slots,
    next_id: Arc<AtomicU64>,
}

impl std::fmt::Debug for EventBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventBus")
            .field("subscribers", &self.subscriber_count())
            .finish()
    }
}

/// Creates the bus and starts its dispatcher thread.
///
/// The dispatcher exits once every `EventBus` clone has been dropped and the
/// queue is drained.
pub fn spawn_bus(capacity: usize) -> EventBus {
    let (sender, receiver) = mpsc::channel(capacity.max(1));
    let slots: Slots = Arc::new(RwLock::new(Vec::new()));

    let dispatcher_slots = Arc::clone(&slots);
    let spawned = std::thread::Builder::new()
        .name("deck-bus".to_string())
        .spawn(move || dispatch_loop(receiver, dispatcher_slots));
    if let Err(e) = spawned {
        error!(error = %e, "Failed to start bus dispatcher; events will be dropped");
    }

    EventBus {
        sender,
        slots,
        next_id: Arc::new(AtomicU64::new(1)),
    }
}

impl EventBus {
    /// Enqueues an event, waiting while the queue is full.
    pub async fn publish(&self, event: BusEvent) {
        if let Err(e) = self.sender.send(event).await {
            debug!(kind = %e.0.kind, "Bus dispatcher gone, event dropped");
        }
    }

    /// Registers a subscriber for events published after this call.
    pub fn subscribe(
        &self,
        filter: SubscriptionFilter,
        subscriber: Arc<dyn Subscriber>,
    ) -> SubscriptionId {
        let id = SubscriptionId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.slots
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push(Slot {
                id,
                filter,
                subscriber,
            });
        debug!(subscription = id.0, "Bus subscriber registered");
        id
    }

    /// Registers a [`ChannelSubscriber`] and returns its receiving end.
    pub fn subscribe_channel(
        &self,
        filter: SubscriptionFilter,
        capacity: usize,
    ) -> (SubscriptionId, mpsc::Receiver<BusEvent>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        let id = self.subscribe(filter, Arc::new(ChannelSubscriber::new(tx)));
        (id, rx)
    }

    /// Returns false if `id` was not registered.
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let mut slots = self.slots.write().unwrap_or_else(PoisonError::into_inner);
        let before = slots.len();
        slots.retain(|s| s.id != id);
        slots.len() != before
    }

    pub fn subscriber_count(&self) -> usize {
        self.slots
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }
}

fn dispatch_loop(mut receiver: mpsc::Receiver<BusEvent>, slots: Slots) {
    info!("Bus dispatcher starting");
    while let Some(event) = receiver.blocking_recv() {
        deliver(&slots, &event);
    }
    info!("Bus dispatcher stopped");
}

fn deliver(slots: &Slots, event: &BusEvent) {
    // Snapshot so subscribers run without the lock held.
    let targets: Vec<(SubscriptionId, Arc<dyn Subscriber>)> = slots
        .read()
        .unwrap_or_else(PoisonError::into_inner)
        .iter()
        .filter(|s| s.filter.matches(event))
        .map(|s| (s.id, Arc::clone(&s.subscriber)))
        .collect();

    let mut dead = Vec::new();
    for (id, subscriber) in targets {
        if subscriber.is_closed() {
            dead.push(id);
            continue;
        }
        if catch_unwind(AssertUnwindSafe(|| subscriber.handle(event))).is_err() {
            error!(
                subscription = id.0,
                kind = %event.kind,
                "Bus subscriber panicked, unregistering"
            );
            dead.push(id);
        }
    }

    if !dead.is_empty() {
        slots
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .retain(|s| !dead.contains(&s.id));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use deck_core::{SessionId, SessionStatus};
    use deck_protocol::BusEventKind;
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;
    use tokio::time::timeout;

    fn status(id: u64) -> BusEvent {
        BusEvent::status(SessionId::new(id), SessionStatus::Working, None, None)
    }

    #[tokio::test]
    async fn test_delivery_in_publication_order() {
        let bus = spawn_bus(8);
        let (_, mut rx) = bus.subscribe_channel(SubscriptionFilter::all(), 64);

        for i in 0..20 {
            bus.publish(status(i)).await;
        }
        for i in 0..20 {
            let event = timeout(Duration::from_secs(2), rx.recv())
                .await
                .unwrap()
                .unwrap();
            assert_eq!(event.session_id(), Some(SessionId::new(i)));
        }
    }

    #[tokio::test]
    async fn test_filters_apply_per_subscriber() {
        let bus = spawn_bus(8);
        let (_, mut only_one) =
            bus.subscribe_channel(SubscriptionFilter::sessions([SessionId::new(1)]), 8);
        let (_, mut dismissals) =
            bus.subscribe_channel(SubscriptionFilter::kinds([BusEventKind::LoadingDismissed]), 8);

        bus.publish(status(2)).await;
        bus.publish(status(1)).await;
        bus.publish(BusEvent::loading_dismissed(SessionId::new(2))).await;

        let got = timeout(Duration::from_secs(2), only_one.recv()).await.unwrap().unwrap();
        assert_eq!(got.session_id(), Some(SessionId::new(1)));
        let got = timeout(Duration::from_secs(2), dismissals.recv()).await.unwrap().unwrap();
        assert_eq!(got.kind, BusEventKind::LoadingDismissed);
    }

    #[tokio::test]
    async fn test_panicking_subscriber_is_removed() {
        let bus = spawn_bus(8);
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);
        bus.subscribe(
            SubscriptionFilter::all(),
            Arc::new(move |_: &BusEvent| {
                counter.fetch_add(1, Ordering::SeqCst);
                panic!("subscriber bug");
            }),
        );
        let (_, mut healthy) = bus.subscribe_channel(SubscriptionFilter::all(), 8);
        assert_eq!(bus.subscriber_count(), 2);

        bus.publish(status(1)).await;
        bus.publish(status(2)).await;

        for _ in 0..2 {
            timeout(Duration::from_secs(2), healthy.recv()).await.unwrap().unwrap();
        }
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(bus.subscriber_count(), 1);
    }

    #[tokio::test]
    async fn test_dropped_receiver_is_pruned() {
        let bus = spawn_bus(8);
        let (_, rx) = bus.subscribe_channel(SubscriptionFilter::all(), 1);
        let (_, mut keep) = bus.subscribe_channel(SubscriptionFilter::all(), 8);
        drop(rx);

        bus.publish(status(1)).await;
        timeout(Duration::from_secs(2), keep.recv()).await.unwrap().unwrap();
        assert_eq!(bus.subscriber_count(), 1);
    }

    #[tokio::test]
    async fn test_unsubscribe() {
        let bus = spawn_bus(8);
        let (id, _rx) = bus.subscribe_channel(SubscriptionFilter::all(), 8);
        assert!(bus.unsubscribe(id));
        assert!(!bus.unsubscribe(id));
        assert_eq!(bus.subscriber_count(), 0);
    }
}
