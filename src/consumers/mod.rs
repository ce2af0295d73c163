//! Consumer adapters that turn bus events into UI-ready state
//!
//! Each adapter is a cheap-to-clone handle over shared state. `attach`
//! registers it on an [`EventBus`]; `detach` releases the subscription and
//! must be called on teardown; until then the bus and the adapter keep each
//! other alive. Adapters never see the connection itself, so
//! they survive reconnects untouched.

pub mod dashboard;
pub mod feed;
pub mod tray;

pub use dashboard::{DashboardCounters, RealtimeStats};
pub use feed::{ActivityFeed, ActivityItem, ActivityKind};
pub use tray::{Notification, NotificationCategory, NotificationTray};

use crate::core::events::{Event, EventBus, EventFilter, SubscriptionId};
use parking_lot::Mutex;

/// Slot remembering the bus and subscription an adapter currently holds
#[derive(Debug, Default)]
pub struct Attachment(Mutex<Option<(EventBus, SubscriptionId)>>);

impl Attachment {
    fn replace(&self, bus: &EventBus, id: SubscriptionId) -> Option<(EventBus, SubscriptionId)> {
        self.0.lock().replace((bus.clone(), id))
    }

    fn take(&self) -> Option<(EventBus, SubscriptionId)> {
        self.0.lock().take()
    }

    pub fn current(&self) -> Option<SubscriptionId> {
        self.0.lock().as_ref().map(|(_, id)| *id)
    }
}

/// A bus consumer with managed subscription lifetime
pub trait EventConsumer: Clone + Send + Sync + 'static {
    /// Filter used when attaching; `None` receives everything
    fn filter(&self) -> Option<EventFilter> {
        None
    }

    fn handle(&self, event: &Event);

    fn attachment(&self) -> &Attachment;

    /// Subscribe to `bus`, releasing any previous subscription on whichever
    /// bus held it
    fn attach(&self, bus: &EventBus) -> SubscriptionId {
        let consumer = self.clone();
        let id = bus.subscribe(self.filter(), move |event| consumer.handle(event));

        if let Some((previous_bus, previous)) = self.attachment().replace(bus, id) {
            previous_bus.unsubscribe(previous);
        }
        id
    }

    /// Release the subscription from the bus it was made on; returns whether
    /// one was held
    fn detach(&self) -> bool {
        match self.attachment().take() {
            Some((bus, id)) => bus.unsubscribe(id),
            None => false,
        }
    }

    fn is_attached(&self) -> bool {
        self.attachment().current().is_some()
    }
}

/// Read a non-empty string field from an event payload
pub(crate) fn payload_str<'a>(event: &'a Event, key: &str) -> Option<&'a str> {
    event
        .payload_field(key)
        .and_then(|v| v.as_str())
        .filter(|s| !s.is_empty())
}
