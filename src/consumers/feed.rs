//! Live activity feed

use super::{Attachment, EventConsumer, payload_str};
use crate::config::ChannelConfig;
use crate::core::events::{Event, EventKind};
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::Serialize;
use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use uuid::Uuid;

/// Actor shown when the event does not name one
pub const SYSTEM_ACTOR: &str = "System";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ActivityKind {
    Commission,
    Payment,
    Client,
    User,
    System,
}

impl ActivityKind {
    /// Kind for an event, or `None` for connection plumbing
    pub fn for_kind(kind: &EventKind) -> Option<Self> {
        let activity = match kind {
            EventKind::CommissionCreated | EventKind::CommissionUpdated => Self::Commission,
            EventKind::CommissionPaid => Self::Payment,
            EventKind::ClientAssigned => Self::Client,
            EventKind::Unknown { tag, .. } if tag == "user_login" => Self::User,
            EventKind::Connection
            | EventKind::InitialData
            | EventKind::Pong
            | EventKind::StatsUpdate => return None,
            _ => Self::System,
        };
        Some(activity)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ActivityItem {
    pub id: Uuid,
    pub kind: ActivityKind,
    /// What happened, taken from the event message
    pub action: String,
    pub actor: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub target: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub amount: Option<f64>,
    pub timestamp: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata: Option<serde_json::Value>,
}

impl ActivityItem {
    fn from_event(event: &Event, kind: ActivityKind) -> Self {
        Self {
            id: event.id(),
            kind,
            action: event.message().to_string(),
            actor: actor_of(event).unwrap_or(SYSTEM_ACTOR).to_string(),
            target: payload_str(event, "client_name")
                .or_else(|| payload_str(event, "target"))
                .map(str::to_string),
            amount: event.payload_field("amount").and_then(|v| v.as_f64()),
            timestamp: event.timestamp(),
            metadata: event.payload().cloned(),
        }
    }
}

// `data.user`, or a top-level `user` kept on unrecognized frames
fn actor_of(event: &Event) -> Option<&str> {
    if let Some(user) = payload_str(event, "user") {
        return Some(user);
    }
    match event.kind() {
        EventKind::Unknown { raw, .. } => raw
            .get("user")
            .and_then(|v| v.as_str())
            .filter(|s| !s.is_empty()),
        _ => None,
    }
}

struct FeedInner {
    capacity: usize,
    live: AtomicBool,
    items: Mutex<VecDeque<ActivityItem>>,
    attachment: Attachment,
}

/// Newest-first activity list that can be paused
///
/// While paused, incoming events are dropped rather than queued.
#[derive(Clone)]
pub struct ActivityFeed {
    inner: Arc<FeedInner>,
}

impl ActivityFeed {
    pub fn new(capacity: usize) -> Self {
        Self {
            inner: Arc::new(FeedInner {
                capacity,
                live: AtomicBool::new(true),
                items: Mutex::new(VecDeque::new()),
                attachment: Attachment::default(),
            }),
        }
    }

    pub fn from_config(config: &ChannelConfig) -> Self {
        Self::new(config.feed_capacity)
    }

    pub fn is_live(&self) -> bool {
        self.inner.live.load(Ordering::Acquire)
    }

    pub fn set_live(&self, live: bool) {
        self.inner.live.store(live, Ordering::Release);
    }

    /// Flip between live and paused; returns the new setting
    pub fn toggle_live(&self) -> bool {
        !self.inner.live.fetch_xor(true, Ordering::AcqRel)
    }

    /// Record `event`; `None` if paused or the kind is not shown
    pub fn push(&self, event: &Event) -> Option<Uuid> {
        if !self.is_live() {
            return None;
        }
        let kind = ActivityKind::for_kind(event.kind())?;
        let item = ActivityItem::from_event(event, kind);
        let id = item.id;

        let mut items = self.inner.items.lock();
        items.push_front(item);
        items.truncate(self.inner.capacity);

        Some(id)
    }

    /// Snapshot, newest first
    pub fn items(&self) -> Vec<ActivityItem> {
        self.inner.items.lock().iter().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.inner.items.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.items.lock().is_empty()
    }

    pub fn count_of(&self, kind: ActivityKind) -> usize {
        self.inner
            .items
            .lock()
            .iter()
            .filter(|item| item.kind == kind)
            .count()
    }

    pub fn clear(&self) {
        self.inner.items.lock().clear();
    }
}

impl EventConsumer for ActivityFeed {
    fn handle(&self, event: &Event) {
        self.push(event);
    }

    fn attachment(&self) -> &Attachment {
        &self.inner.attachment
    }
}
