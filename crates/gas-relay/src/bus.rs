//! In-process publish/subscribe between the poller, the funding coordinator
//! and notification consumers.
//!
//! Every subscriber owns a bounded channel. Publishing awaits capacity on
//! each matching subscriber in subscription order, so a slow subscriber
//! blocks the publisher instead of dropping events or buffering without
//! bound. Subscribers whose receiver is gone are pruned on the next publish.

use std::{fmt, sync::Arc};

use parking_lot::RwLock;
use tokio::sync::mpsc;
use tracing::debug;

use crate::types::{BridgeEvent, FundingEvent};

/// The kinds of event carried by the bus.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    BridgeDetected,
    FundingCompleted,
    FundingSkipped,
}

impl EventKind {
    pub const ALL: [Self; 3] = [
        Self::BridgeDetected,
        Self::FundingCompleted,
        Self::FundingSkipped,
    ];

    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::BridgeDetected => "bridge:detected",
            Self::FundingCompleted => "funding:completed",
            Self::FundingSkipped => "funding:skipped",
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RelayEvent {
    /// A deposit at or above the threshold.
    BridgeDetected(BridgeEvent),
    /// A top-up whose receipt reported success.
    FundingCompleted(FundingEvent),
    /// A deposit that did not lead to a top-up, either because it was below
    /// the threshold or because the recipient already had enough gas.
    FundingSkipped(BridgeEvent),
}

impl RelayEvent {
    pub const fn kind(&self) -> EventKind {
        match self {
            Self::BridgeDetected(_) => EventKind::BridgeDetected,
            Self::FundingCompleted(_) => EventKind::FundingCompleted,
            Self::FundingSkipped(_) => EventKind::FundingSkipped,
        }
    }
}

struct Subscriber {
    kinds: Vec<EventKind>,
    tx: mpsc::Sender<RelayEvent>,
}

/// Receiving end of a subscription.
pub type Subscription = mpsc::Receiver<RelayEvent>;

/// Registry of subscribers. Cheap to clone; clones share the registry.
#[derive(Clone, Default)]
pub struct EventBus {
    subscribers: Arc<RwLock<Vec<Subscriber>>>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a subscriber for `kinds` with a buffer of `capacity` events.
    ///
    /// # Panics
    ///
    /// If `capacity` is zero.
    pub fn subscribe(&self, kinds: &[EventKind], capacity: usize) -> Subscription {
        let (tx, rx) = mpsc::channel(capacity);
        self.subscribers.write().push(Subscriber {
            kinds: kinds.to_vec(),
            tx,
        });
        rx
    }

    /// Registers a subscriber for every event kind.
    pub fn subscribe_all(&self, capacity: usize) -> Subscription {
        self.subscribe(&EventKind::ALL, capacity)
    }

    /// Handle used by components to publish events.
    pub fn publisher(&self) -> EventPublisher {
        EventPublisher { bus: self.clone() }
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers.read().len()
    }
}

impl fmt::Debug for EventBus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventBus")
            .field("subscribers", &self.subscriber_count())
            .finish()
    }
}

/// Publishing side of the [`EventBus`], injected into the poller and the
/// funding coordinator.
#[derive(Clone, Debug)]
pub struct EventPublisher {
    bus: EventBus,
}

impl EventPublisher {
    /// Delivers `event` to every subscriber of its kind, waiting for buffer
    /// space where needed. Returns the number of subscribers reached.
    pub async fn publish(&self, event: RelayEvent) -> usize {
        let kind = event.kind();
        let targets: Vec<_> = self
            .bus
            .subscribers
            .read()
            .iter()
            .filter(|sub| sub.kinds.contains(&kind))
            .map(|sub| sub.tx.clone())
            .collect();

        let mut delivered = 0;
        let mut closed = false;
        for tx in targets {
            if tx.send(event.clone()).await.is_ok() {
                delivered += 1;
            } else {
                closed = true;
            }
        }

        if closed {
            self.bus.subscribers.write().retain(|sub| !sub.tx.is_closed());
            debug!(%kind, "pruned closed subscribers");
        }

        delivered
    }

    pub async fn bridge_detected(&self, event: BridgeEvent) -> usize {
        self.publish(RelayEvent::BridgeDetected(event)).await
    }

    pub async fn funding_completed(&self, event: FundingEvent) -> usize {
        self.publish(RelayEvent::FundingCompleted(event)).await
    }

    pub async fn funding_skipped(&self, event: BridgeEvent) -> usize {
        self.publish(RelayEvent::FundingSkipped(event)).await
    }
}
