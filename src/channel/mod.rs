//! The real-time channel: one persistent connection feeding an event bus
//!
//! # Architecture
//!
//! ```text
//! backend ──ws──▶ Transport ──frames──▶ ConnectionManager ──decode──▶ EventBus
//!                                             │                          │
//!                                   heartbeat / reconnect       ┌────────┼────────┐
//!                                                               ▼        ▼        ▼
//!                                                             tray     feed   dashboard
//! ```
//!
//! # Protocol
//!
//! Server → Client (JSON text frames):
//! - `{"type": "commission_paid", "message": "...", "data": {...}, "priority": "high"}`
//! - `{"type": "connection", ...}`, `{"type": "initial_data", ...}`, `{"type": "pong"}`
//! - anything else is delivered as `EventKind::Unknown`
//!
//! Client → Server (JSON):
//! - `{"type": "ping", "timestamp": "..."}` every heartbeat interval
//! - whatever the application passes to [`RealtimeChannel::send`]

pub mod builder;
pub mod manager;
pub mod protocol;
pub mod state;
pub mod transport;

pub use builder::ChannelBuilder;
pub use manager::{ConnectionManager, DEFAULT_DISCONNECT_REASON};
pub use state::{ConnectionIndicator, ConnectionState, ConnectionStatus, StateTransition};
pub use transport::{Transport, TransportConnection, TransportFrame, TungsteniteTransport};

use crate::config::ChannelConfig;
use crate::core::error::ChannelError;
use crate::core::events::EventBus;
use crate::core::identity::{IdentityProvider, SessionIdentity};
use std::fmt;
use std::sync::Arc;
use tokio::sync::{broadcast, watch};
use tokio_stream::wrappers::WatchStream;

/// Owned instance of the channel, built once per application session
///
/// Hand [`bus`](Self::bus) to consumers; keep the channel itself at the
/// composition root and call [`shutdown`](Self::shutdown) on logout.
pub struct RealtimeChannel {
    pub(crate) config: ChannelConfig,
    pub(crate) bus: EventBus,
    pub(crate) manager: ConnectionManager,
    pub(crate) identity_provider: Arc<dyn IdentityProvider>,
}

impl RealtimeChannel {
    pub fn builder() -> ChannelBuilder {
        ChannelBuilder::new()
    }

    /// Connect with the identity from the provider
    ///
    /// Without a current identity this only logs; it is not an error.
    pub fn connect(&self) {
        self.manager
            .connect(self.identity_provider.current_identity());
    }

    /// Connect with an explicit identity, bypassing the provider
    pub fn connect_as(&self, identity: SessionIdentity) {
        self.manager.connect(Some(identity));
    }

    pub fn disconnect(&self, reason: impl Into<String>) {
        self.manager.disconnect(reason);
    }

    /// Send a message while open; dropped with a warning otherwise
    pub fn send(&self, message: serde_json::Value) {
        self.manager.send(message);
    }

    pub fn state(&self) -> ConnectionState {
        self.manager.state()
    }

    pub fn status(&self) -> ConnectionStatus {
        self.manager.status()
    }

    pub fn indicator(&self) -> ConnectionIndicator {
        self.manager.status().indicator()
    }

    pub fn transitions(&self) -> broadcast::Receiver<StateTransition> {
        self.manager.transitions()
    }

    pub fn status_receiver(&self) -> watch::Receiver<ConnectionStatus> {
        self.manager.status_receiver()
    }

    pub fn watch_status(&self) -> WatchStream<ConnectionStatus> {
        self.manager.watch_status()
    }

    pub fn bus(&self) -> &EventBus {
        &self.bus
    }

    pub fn manager(&self) -> &ConnectionManager {
        &self.manager
    }

    pub fn config(&self) -> &ChannelConfig {
        &self.config
    }

    pub async fn pending_timers(&self) -> Result<usize, ChannelError> {
        self.manager.pending_timers().await
    }

    /// Close the connection, cancel every timer and stop the actor
    ///
    /// Subscriptions on the bus are left alone; consumers release their own.
    pub async fn shutdown(&self) {
        self.manager.shutdown().await;
        tracing::info!("Real-time channel shut down");
    }
}

impl fmt::Debug for RealtimeChannel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RealtimeChannel")
            .field("endpoint", &self.config.endpoint)
            .field("status", &self.manager.status())
            .field("bus", &self.bus)
            .finish()
    }
}
