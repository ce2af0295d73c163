//! Dashboard counters fed by `stats_update` pushes

use super::{Attachment, EventConsumer};
use crate::core::events::{Event, EventKind};
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;

/// Server-computed aggregates, replaced wholesale on every update
///
/// ```json
/// {"onlineUsers": 12, "activeConnections": 15, "todayCommissions": 4, "todayPayments": 1250.5}
/// ```
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RealtimeStats {
    pub online_users: u64,
    pub active_connections: u64,
    pub today_commissions: f64,
    pub today_payments: f64,
}

#[derive(Default)]
struct DashboardState {
    stats: RealtimeStats,
    updated_at: Option<DateTime<Utc>>,
    // Events seen per type tag
    tallies: HashMap<String, u64>,
}

struct DashboardInner {
    state: Mutex<DashboardState>,
    attachment: Attachment,
}

/// Latest stats plus running per-type event tallies
#[derive(Clone)]
pub struct DashboardCounters {
    inner: Arc<DashboardInner>,
}

impl DashboardCounters {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(DashboardInner {
                state: Mutex::new(DashboardState::default()),
                attachment: Attachment::default(),
            }),
        }
    }

    /// Latest stats; all zero until the first update
    pub fn stats(&self) -> RealtimeStats {
        self.inner.state.lock().stats
    }

    /// Timestamp of the last applied `stats_update`
    pub fn updated_at(&self) -> Option<DateTime<Utc>> {
        self.inner.state.lock().updated_at
    }

    pub fn tally(&self, event_type: &str) -> u64 {
        self.inner
            .state
            .lock()
            .tallies
            .get(event_type)
            .copied()
            .unwrap_or(0)
    }

    pub fn tallies(&self) -> HashMap<String, u64> {
        self.inner.state.lock().tallies.clone()
    }

    pub fn total_events(&self) -> u64 {
        self.inner.state.lock().tallies.values().sum()
    }

    pub fn reset(&self) {
        *self.inner.state.lock() = DashboardState::default();
    }

    /// Count `event` and apply it if it is a stats update
    pub fn record(&self, event: &Event) {
        let mut state = self.inner.state.lock();
        *state
            .tallies
            .entry(event.event_type().to_string())
            .or_default() += 1;

        if *event.kind() != EventKind::StatsUpdate {
            return;
        }

        let Some(payload) = event.payload() else {
            tracing::warn!("stats_update without data, keeping previous stats");
            return;
        };

        match RealtimeStats::deserialize(payload) {
            Ok(stats) => {
                state.stats = stats;
                state.updated_at = Some(event.timestamp());
            }
            Err(e) => {
                tracing::warn!(error = %e, "Invalid stats_update payload, keeping previous stats");
            }
        }
    }
}

impl Default for DashboardCounters {
    fn default() -> Self {
        Self::new()
    }
}

impl EventConsumer for DashboardCounters {
    fn handle(&self, event: &Event) {
        self.record(event);
    }

    fn attachment(&self) -> &Attachment {
        &self.inner.attachment
    }
}
