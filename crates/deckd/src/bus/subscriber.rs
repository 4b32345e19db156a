//! Subscriber capability and filters.

use std::collections::HashSet;

use tokio::sync::mpsc;

use deck_core::SessionId;
use deck_protocol::{BusEvent, BusEventKind};

/// A bus consumer.
///
/// `handle` runs on the bus dispatcher thread and may block; a blocking
/// subscriber slows every publisher. A panic inside `handle` unregisters
/// the subscriber.
pub trait Subscriber: Send + Sync + 'static {
    fn handle(&self, event: &BusEvent);

    /// Closed subscribers are dropped on the next delivery.
    fn is_closed(&self) -> bool {
        false
    }
}

impl<F> Subscriber for F
where
    F: Fn(&BusEvent) + Send + Sync + 'static,
{
    fn handle(&self, event: &BusEvent) {
        self(event)
    }
}

/// Forwards events into a bounded tokio channel.
///
/// Delivery waits for channel capacity, so a paused receiver applies
/// backpressure all the way to the PTY readers.
#[derive(Debug, Clone)]
pub struct ChannelSubscriber {
    sender: mpsc::Sender<BusEvent>,
}

impl ChannelSubscriber {
    pub fn new(sender: mpsc::Sender<BusEvent>) -> Self {
        Self { sender }
    }
}

impl Subscriber for ChannelSubscriber {
    fn handle(&self, event: &BusEvent) {
        // Receiver gone; is_closed() reports it.
        let _ = self.sender.blocking_send(event.clone());
    }

    fn is_closed(&self) -> bool {
        self.sender.is_closed()
    }
}

/// Which events a subscriber receives. Empty sets mean "any".
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SubscriptionFilter {
    kinds: HashSet<BusEventKind>,
    sessions: HashSet<SessionId>,
}

impl SubscriptionFilter {
    /// Matches every event.
    pub fn all() -> Self {
        Self::default()
    }

    pub fn kinds<I: IntoIterator<Item = BusEventKind>>(kinds: I) -> Self {
        Self {
            kinds: kinds.into_iter().collect(),
            sessions: HashSet::new(),
        }
    }

    pub fn sessions<I: IntoIterator<Item = SessionId>>(sessions: I) -> Self {
        Self {
            kinds: HashSet::new(),
            sessions: sessions.into_iter().collect(),
        }
    }

    #[must_use]
    pub fn with_kinds<I: IntoIterator<Item = BusEventKind>>(mut self, kinds: I) -> Self {
        self.kinds.extend(kinds);
        self
    }

    #[must_use]
    pub fn with_sessions<I: IntoIterator<Item = SessionId>>(mut self, sessions: I) -> Self {
        self.sessions.extend(sessions);
        self
    }

    /// Session filters only match events that carry a session id; hook
    /// events (keyed by cwd) never match one.
    pub fn matches(&self, event: &BusEvent) -> bool {
        if !self.kinds.is_empty() && !self.kinds.contains(&event.kind) {
            return false;
        }
        if self.sessions.is_empty() {
            return true;
        }
        event
            .session_id()
            .is_some_and(|id| self.sessions.contains(&id))
    }
}
