//! Notification tray: the bell-icon list of recent notifications

use super::{Attachment, EventConsumer};
use crate::config::ChannelConfig;
use crate::core::events::{Event, EventKind, Priority};
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::Serialize;
use std::collections::VecDeque;
use std::sync::Arc;
use uuid::Uuid;

/// Title used when the frame carries none
pub const DEFAULT_TITLE: &str = "New Update";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum NotificationCategory {
    Commission,
    Payment,
    Client,
    System,
    Deadline,
}

impl NotificationCategory {
    /// Category for an event kind, or `None` for kinds the tray does not show
    pub fn for_kind(kind: &EventKind) -> Option<Self> {
        let category = match kind {
            EventKind::CommissionCreated | EventKind::CommissionUpdated => Self::Commission,
            EventKind::CommissionPaid => Self::Payment,
            EventKind::ClientAssigned => Self::Client,
            EventKind::DeadlineReminder => Self::Deadline,
            EventKind::SystemAnnouncement
            | EventKind::Error
            | EventKind::ConnectionFailed
            | EventKind::Unknown { .. } => Self::System,
            EventKind::Connection
            | EventKind::InitialData
            | EventKind::Pong
            | EventKind::StatsUpdate => return None,
        };
        Some(category)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Notification {
    pub id: Uuid,
    pub category: NotificationCategory,
    pub title: String,
    pub message: String,
    pub timestamp: DateTime<Utc>,
    pub priority: Priority,
    pub read: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
}

impl Notification {
    fn from_event(event: &Event, category: NotificationCategory) -> Self {
        Self {
            id: event.id(),
            category,
            title: event.title().unwrap_or(DEFAULT_TITLE).to_string(),
            message: event.message().to_string(),
            timestamp: event.timestamp(),
            priority: event.priority(),
            read: false,
            data: event.payload().cloned(),
        }
    }
}

struct TrayInner {
    capacity: usize,
    // Newest first
    items: Mutex<VecDeque<Notification>>,
    attachment: Attachment,
}

/// Newest-first notification list with read tracking
#[derive(Clone)]
pub struct NotificationTray {
    inner: Arc<TrayInner>,
}

impl NotificationTray {
    pub fn new(capacity: usize) -> Self {
        Self {
            inner: Arc::new(TrayInner {
                capacity,
                items: Mutex::new(VecDeque::new()),
                attachment: Attachment::default(),
            }),
        }
    }

    pub fn from_config(config: &ChannelConfig) -> Self {
        Self::new(config.tray_capacity)
    }

    /// Add a notification for `event`; returns its id, or `None` if the kind
    /// is not shown in the tray
    pub fn push(&self, event: &Event) -> Option<Uuid> {
        let category = NotificationCategory::for_kind(event.kind())?;
        let notification = Notification::from_event(event, category);
        let id = notification.id;

        let mut items = self.inner.items.lock();
        items.push_front(notification);
        items.truncate(self.inner.capacity);

        Some(id)
    }

    /// Snapshot, newest first
    pub fn notifications(&self) -> Vec<Notification> {
        self.inner.items.lock().iter().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.inner.items.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.items.lock().is_empty()
    }

    pub fn unread_count(&self) -> usize {
        self.inner.items.lock().iter().filter(|n| !n.read).count()
    }

    /// Returns `false` if no notification has this id
    pub fn mark_as_read(&self, id: Uuid) -> bool {
        match self.inner.items.lock().iter_mut().find(|n| n.id == id) {
            Some(notification) => {
                notification.read = true;
                true
            }
            None => false,
        }
    }

    /// Returns how many were unread
    pub fn mark_all_as_read(&self) -> usize {
        let mut items = self.inner.items.lock();
        let mut changed = 0;
        for notification in items.iter_mut().filter(|n| !n.read) {
            notification.read = true;
            changed += 1;
        }
        changed
    }

    pub fn clear_all(&self) {
        self.inner.items.lock().clear();
    }
}

impl EventConsumer for NotificationTray {
    fn handle(&self, event: &Event) {
        if let Some(id) = self.push(event) {
            tracing::debug!(notification_id = %id, event_type = %event.kind(), "Notification added");
        }
    }

    fn attachment(&self) -> &Attachment {
        &self.inner.attachment
    }
}
