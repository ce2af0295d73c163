//! Event model and in-process event bus
//!
//! The EventBus decouples the connection manager (which produces events) from
//! the consumers that render them: the notification tray, the activity feed,
//! dashboard counters. Consumers never see each other or the connection.
//!
//! # Architecture
//!
//! ```text
//! ConnectionManager ──decode──▶ EventBus::publish() ──snapshot──▶ callback #1
//!                                                            ├──▶ callback #2
//!                                                            └──▶ callback #n
//! ```
//!
//! # Dispatch rules
//!
//! - Callbacks run synchronously, in subscription order.
//! - The registry is snapshotted before dispatch, so a callback may subscribe
//!   or unsubscribe (itself included) without disturbing the pass in flight.
//! - A panicking callback is caught and logged; the remaining callbacks still
//!   run.
//!
//! # Usage
//!
//! ```rust,ignore
//! let bus = EventBus::new();
//!
//! let id = bus.subscribe(Some(EventFilter::types(["commission_paid"])), |event| {
//!     println!("paid: {}", event.message());
//! });
//!
//! bus.publish(&Event::new(EventKind::CommissionPaid, "£500 paid"));
//! bus.unsubscribe(id);
//! ```

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize, Serializer};
use std::any::Any;
use std::fmt;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::mpsc;
use uuid::Uuid;

/// Display priority of an event
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    Low,
    #[default]
    Medium,
    High,
}

impl Priority {
    /// Parse a wire priority ("high", "medium", "low"), ignoring case
    pub fn parse(value: &str) -> Option<Self> {
        match value.to_ascii_lowercase().as_str() {
            "high" => Some(Priority::High),
            "medium" => Some(Priority::Medium),
            "low" => Some(Priority::Low),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Priority::Low => "low",
            Priority::Medium => "medium",
            Priority::High => "high",
        }
    }
}

/// Classified event type
///
/// A closed set of the types the backend is known to push, plus `Unknown`
/// for anything else. Unknown types keep the full raw frame so newer server
/// messages are still delivered to consumers that understand them.
#[derive(Debug, Clone, PartialEq)]
pub enum EventKind {
    CommissionCreated,
    CommissionUpdated,
    CommissionPaid,
    ClientAssigned,
    SystemAnnouncement,
    DeadlineReminder,
    /// Aggregate counters for the dashboard
    StatsUpdate,
    /// Server greeting after the socket opens
    Connection,
    InitialData,
    Pong,
    /// Server-side error notice
    Error,
    /// Raised locally when reconnection attempts are exhausted
    ConnectionFailed,
    /// Any other `type` tag
    Unknown {
        tag: String,
        raw: serde_json::Value,
    },
}

impl EventKind {
    /// Every recognized tag, in declaration order
    pub const KNOWN_TAGS: [&'static str; 12] = [
        "commission_created",
        "commission_updated",
        "commission_paid",
        "client_assigned",
        "system_announcement",
        "deadline_reminder",
        "stats_update",
        "connection",
        "initial_data",
        "pong",
        "error",
        "connection_failed",
    ];

    /// Classify a wire `type` tag
    ///
    /// `raw` is only cloned when the tag is not recognized.
    pub fn from_tag(tag: &str, raw: &serde_json::Value) -> Self {
        match tag {
            "commission_created" => EventKind::CommissionCreated,
            "commission_updated" => EventKind::CommissionUpdated,
            "commission_paid" => EventKind::CommissionPaid,
            "client_assigned" => EventKind::ClientAssigned,
            "system_announcement" => EventKind::SystemAnnouncement,
            "deadline_reminder" => EventKind::DeadlineReminder,
            "stats_update" => EventKind::StatsUpdate,
            "connection" => EventKind::Connection,
            "initial_data" => EventKind::InitialData,
            "pong" => EventKind::Pong,
            "error" => EventKind::Error,
            "connection_failed" => EventKind::ConnectionFailed,
            other => EventKind::Unknown {
                tag: other.to_string(),
                raw: raw.clone(),
            },
        }
    }

    /// The wire tag for this kind
    pub fn tag(&self) -> &str {
        match self {
            EventKind::CommissionCreated => "commission_created",
            EventKind::CommissionUpdated => "commission_updated",
            EventKind::CommissionPaid => "commission_paid",
            EventKind::ClientAssigned => "client_assigned",
            EventKind::SystemAnnouncement => "system_announcement",
            EventKind::DeadlineReminder => "deadline_reminder",
            EventKind::StatsUpdate => "stats_update",
            EventKind::Connection => "connection",
            EventKind::InitialData => "initial_data",
            EventKind::Pong => "pong",
            EventKind::Error => "error",
            EventKind::ConnectionFailed => "connection_failed",
            EventKind::Unknown { tag, .. } => tag,
        }
    }

    pub fn is_unknown(&self) -> bool {
        matches!(self, EventKind::Unknown { .. })
    }

    /// Whether this kind only carries connection plumbing (greeting, pong, ...)
    pub fn is_control(&self) -> bool {
        matches!(
            self,
            EventKind::Connection | EventKind::InitialData | EventKind::Pong
        )
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.tag())
    }
}

impl Serialize for EventKind {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.tag())
    }
}

/// A decoded, classified application event
///
/// Built once (by the decoder or by the connection manager) and then shared
/// read-only with every consumer.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Event {
    id: Uuid,
    #[serde(rename = "type")]
    kind: EventKind,
    #[serde(skip_serializing_if = "Option::is_none")]
    title: Option<String>,
    message: String,
    #[serde(rename = "data", skip_serializing_if = "Option::is_none")]
    payload: Option<serde_json::Value>,
    timestamp: DateTime<Utc>,
    priority: Priority,
}

impl Event {
    /// Create an event stamped with the current time and medium priority
    pub fn new(kind: EventKind, message: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            kind,
            title: None,
            message: message.into(),
            payload: None,
            timestamp: Utc::now(),
            priority: Priority::default(),
        }
    }

    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title = Some(title.into());
        self
    }

    pub fn with_payload(mut self, payload: serde_json::Value) -> Self {
        self.payload = Some(payload);
        self
    }

    pub fn with_priority(mut self, priority: Priority) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_timestamp(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = timestamp;
        self
    }

    pub(crate) fn with_optional(
        mut self,
        title: Option<String>,
        payload: Option<serde_json::Value>,
    ) -> Self {
        self.title = title;
        self.payload = payload;
        self
    }

    /// The terminal event published once reconnection gives up
    pub fn connection_failed(attempts: u32) -> Self {
        Event::new(
            EventKind::ConnectionFailed,
            "Unable to establish real-time connection",
        )
        .with_title("Connection failed")
        .with_priority(Priority::High)
        .with_payload(serde_json::json!({ "attempts": attempts }))
    }

    /// Client-side identifier, unique per decoded frame
    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn kind(&self) -> &EventKind {
        &self.kind
    }

    /// Shorthand for `kind().tag()`
    pub fn event_type(&self) -> &str {
        self.kind.tag()
    }

    pub fn title(&self) -> Option<&str> {
        self.title.as_deref()
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    /// The frame's `data` object, if any
    pub fn payload(&self) -> Option<&serde_json::Value> {
        self.payload.as_ref()
    }

    /// Look up a key in the payload object
    pub fn payload_field(&self, key: &str) -> Option<&serde_json::Value> {
        self.payload.as_ref().and_then(|p| p.get(key))
    }

    pub fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }

    pub fn priority(&self) -> Priority {
        self.priority
    }
}

/// Filter criteria for a subscription
///
/// All fields are optional and combine with AND. An empty `event_types` list
/// matches every type.
///
/// ```json
/// {"event_types": ["commission_paid", "commission_created"], "min_priority": "medium"}
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventFilter {
    /// Accepted type tags; empty = all
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub event_types: Vec<String>,

    /// Lowest accepted priority; None = all
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min_priority: Option<Priority>,
}

impl EventFilter {
    /// Filter accepting only the given type tags
    pub fn types<I, S>(types: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            event_types: types.into_iter().map(Into::into).collect(),
            min_priority: None,
        }
    }

    pub fn with_min_priority(mut self, priority: Priority) -> Self {
        self.min_priority = Some(priority);
        self
    }

    /// Check if an event matches this filter
    pub fn matches(&self, event: &Event) -> bool {
        if !self.event_types.is_empty()
            && !self.event_types.iter().any(|t| t == event.event_type())
        {
            return false;
        }

        if let Some(min) = self.min_priority
            && event.priority() < min
        {
            return false;
        }

        true
    }
}

/// Opaque handle identifying one subscription
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SubscriptionId(u64);

impl fmt::Display for SubscriptionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "sub_{}", self.0)
    }
}

type Callback = dyn Fn(&Event) + Send + Sync;

struct Subscriber {
    id: SubscriptionId,
    filter: Option<EventFilter>,
    callback: Box<Callback>,
}

impl Subscriber {
    fn accepts(&self, event: &Event) -> bool {
        self.filter.as_ref().is_none_or(|f| f.matches(event))
    }
}

#[derive(Default)]
struct Registry {
    next_id: AtomicU64,
    // Append-only order == subscription order
    subscribers: RwLock<Vec<Arc<Subscriber>>>,
}

/// In-process publish/subscribe dispatcher
///
/// Cheap to clone (Arc internally); every clone shares the same registry.
#[derive(Clone, Default)]
pub struct EventBus {
    registry: Arc<Registry>,
}

impl fmt::Debug for EventBus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventBus")
            .field("subscribers", &self.subscriber_count())
            .finish()
    }
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a consumer
    ///
    /// `filter: None` receives every event. The returned id must be passed to
    /// [`unsubscribe`](Self::unsubscribe) when the consumer goes away; the bus
    /// never drops subscriptions on its own, including across reconnects.
    #[must_use = "keep the SubscriptionId to unsubscribe on teardown"]
    pub fn subscribe<F>(&self, filter: Option<EventFilter>, callback: F) -> SubscriptionId
    where
        F: Fn(&Event) + Send + Sync + 'static,
    {
        let id = SubscriptionId(self.registry.next_id.fetch_add(1, Ordering::Relaxed) + 1);

        self.registry.subscribers.write().push(Arc::new(Subscriber {
            id,
            filter,
            callback: Box::new(callback),
        }));

        tracing::debug!(subscription_id = %id, "Subscription added");
        id
    }

    /// Register a consumer that receives events over a channel
    ///
    /// Useful for async consumers that would rather `recv().await` than run
    /// inside the dispatch pass.
    #[must_use = "keep the SubscriptionId to unsubscribe on teardown"]
    pub fn subscribe_channel(
        &self,
        filter: Option<EventFilter>,
    ) -> (SubscriptionId, mpsc::UnboundedReceiver<Event>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let id = self.subscribe(filter, move |event| {
            // Receiver dropped: the owner will unsubscribe on teardown
            let _ = tx.send(event.clone());
        });
        (id, rx)
    }

    /// Remove a subscription
    ///
    /// Idempotent. Returns `true` if the subscription was found and removed.
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let mut subscribers = self.registry.subscribers.write();
        let before = subscribers.len();
        subscribers.retain(|s| s.id != id);
        let removed = subscribers.len() < before;

        if removed {
            tracing::debug!(subscription_id = %id, "Subscription removed");
        }

        removed
    }

    /// Dispatch an event to every matching subscriber
    ///
    /// Runs over a snapshot of the registry taken on entry; the lock is not
    /// held while callbacks run. Returns the number of callbacks that
    /// completed without panicking.
    pub fn publish(&self, event: &Event) -> usize {
        let snapshot: Vec<Arc<Subscriber>> = self.registry.subscribers.read().clone();
        let mut delivered = 0;

        for subscriber in snapshot.iter().filter(|s| s.accepts(event)) {
            match catch_unwind(AssertUnwindSafe(|| (subscriber.callback)(event))) {
                Ok(()) => delivered += 1,
                Err(panic) => {
                    tracing::error!(
                        subscription_id = %subscriber.id,
                        event_type = %event.kind(),
                        panic = %panic_message(panic.as_ref()),
                        "Event consumer panicked, continuing dispatch"
                    );
                }
            }
        }

        delivered
    }

    /// Get the current number of subscriptions (for monitoring)
    pub fn subscriber_count(&self) -> usize {
        self.registry.subscribers.read().len()
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> &str {
    if let Some(s) = panic.downcast_ref::<&str>() {
        s
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s
    } else {
        "non-string panic payload"
    }
}
