//! # Commission Live
//!
//! Client-side real-time notification channel for the commission tracker.
//!
//! ## Features
//!
//! - **Single Managed Connection**: one WebSocket per session, owned by an actor
//! - **Bounded Reconnection**: fixed-interval retries, then a terminal `connection_failed` event
//! - **Heartbeat**: periodic `ping` frames, optional pong timeout
//! - **Tolerant Decoding**: unknown message types are classified, never dropped
//! - **Decoupled Dispatch**: in-process event bus with ordered, panic-isolated delivery
//! - **Ready-made Consumers**: notification tray, activity feed, dashboard counters
//! - **Configuration-Based**: endpoint, retry and heartbeat settings via YAML
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use live::prelude::*;
//!
//! let channel = ChannelBuilder::new()
//!     .with_config(ChannelConfig::from_yaml_file("live.yaml")?)
//!     .with_identity_provider(StaticIdentityProvider::new(SessionIdentity::new("42", token)))
//!     .build()?;
//!
//! let tray = NotificationTray::from_config(channel.config());
//! tray.attach(channel.bus());
//!
//! channel.connect();
//!
//! // on logout
//! tray.detach();
//! channel.shutdown().await;
//! ```

pub mod channel;
pub mod config;
pub mod consumers;
pub mod core;

/// Re-exports of commonly used types and traits
pub mod prelude {
    // === Core ===
    pub use crate::core::{
        error::{ChannelError, ConfigError, DecodeError, TransportError},
        events::{Event, EventBus, EventFilter, EventKind, Priority, SubscriptionId},
        identity::{IdentityProvider, NoIdentityProvider, SessionIdentity, StaticIdentityProvider},
    };

    // === Channel ===
    pub use crate::channel::{
        ChannelBuilder, ConnectionIndicator, ConnectionManager, ConnectionState,
        ConnectionStatus, RealtimeChannel, StateTransition, Transport, TransportConnection,
        TransportFrame, TungsteniteTransport,
        protocol::{ClientMessage, decode},
        transport::FrameSink,
    };

    // === Consumers ===
    pub use crate::consumers::{
        ActivityFeed, ActivityItem, ActivityKind, DashboardCounters, EventConsumer, Notification,
        NotificationCategory, NotificationTray, RealtimeStats,
    };

    // === Config ===
    pub use crate::config::{ChannelConfig, HeartbeatConfig, ReconnectPolicy};

    // === External dependencies ===
    pub use async_trait::async_trait;
    pub use chrono::{DateTime, Utc};
    pub use serde::{Deserialize, Serialize};
    pub use uuid::Uuid;
}
