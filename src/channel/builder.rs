//! ChannelBuilder for fluent construction of a RealtimeChannel

use super::RealtimeChannel;
use super::manager::ConnectionManager;
use super::transport::{Transport, TungsteniteTransport};
use crate::config::ChannelConfig;
use crate::core::error::ChannelError;
use crate::core::events::EventBus;
use crate::core::identity::{IdentityProvider, NoIdentityProvider};
use std::sync::Arc;

/// Builder for the real-time channel
///
/// Every part has a default: the stock configuration, the tokio-tungstenite
/// transport, no identity provider and a fresh event bus.
///
/// # Example
///
/// ```ignore
/// let channel = ChannelBuilder::new()
///     .with_config(ChannelConfig::from_yaml_file("live.yaml")?)
///     .with_identity_provider(session.clone())
///     .build()?;
///
/// let tray = NotificationTray::new(50);
/// tray.attach(channel.bus());
/// channel.connect();
/// ```
pub struct ChannelBuilder {
    config: ChannelConfig,
    transport: Option<Arc<dyn Transport>>,
    identity_provider: Option<Arc<dyn IdentityProvider>>,
    event_bus: Option<EventBus>,
}

impl ChannelBuilder {
    /// Create a new ChannelBuilder
    pub fn new() -> Self {
        Self {
            config: ChannelConfig::default(),
            transport: None,
            identity_provider: None,
            event_bus: None,
        }
    }

    pub fn with_config(mut self, config: ChannelConfig) -> Self {
        self.config = config;
        self
    }

    /// Replace the WebSocket transport (tests use an in-process one)
    pub fn with_transport(mut self, transport: impl Transport + 'static) -> Self {
        self.transport = Some(Arc::new(transport));
        self
    }

    /// Set where `connect()` gets the session identity from
    pub fn with_identity_provider(mut self, provider: impl IdentityProvider + 'static) -> Self {
        self.identity_provider = Some(Arc::new(provider));
        self
    }

    /// Share an existing bus instead of creating one
    ///
    /// Subscriptions made on the bus before `build()` stay registered.
    pub fn with_event_bus(mut self, bus: EventBus) -> Self {
        self.event_bus = Some(bus);
        self
    }

    /// Validate the configuration and start the connection actor
    ///
    /// Must be called from within a tokio runtime.
    pub fn build(self) -> Result<RealtimeChannel, ChannelError> {
        let bus = self.event_bus.unwrap_or_default();
        let transport: Arc<dyn Transport> = match self.transport {
            Some(transport) => transport,
            None => Arc::new(TungsteniteTransport),
        };
        let identity_provider: Arc<dyn IdentityProvider> = match self.identity_provider {
            Some(provider) => provider,
            None => Arc::new(NoIdentityProvider),
        };

        let manager = ConnectionManager::spawn(&self.config, transport, bus.clone())?;

        tracing::debug!(endpoint = %self.config.endpoint, "Real-time channel built");

        Ok(RealtimeChannel {
            config: self.config,
            bus,
            manager,
            identity_provider,
        })
    }
}

impl Default for ChannelBuilder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::state::ConnectionState;

    #[tokio::test]
    async fn test_build_with_defaults() {
        let channel = ChannelBuilder::new().build().unwrap();

        assert_eq!(channel.state(), ConnectionState::Idle);
        assert_eq!(channel.config(), &ChannelConfig::default());
        channel.shutdown().await;
    }

    #[tokio::test]
    async fn test_build_rejects_invalid_config() {
        let mut config = ChannelConfig::default();
        config.heartbeat.interval_ms = 0;

        let err = ChannelBuilder::new().with_config(config).build().unwrap_err();
        assert_eq!(err.error_code(), "CONFIG_INVALID");
    }

    #[tokio::test]
    async fn test_shared_bus_keeps_subscriptions() {
        let bus = EventBus::new();
        let _id = bus.subscribe(None, |_| {});

        let channel = ChannelBuilder::new()
            .with_event_bus(bus.clone())
            .build()
            .unwrap();

        assert_eq!(channel.bus().subscriber_count(), 1);
        channel.shutdown().await;
    }
}
