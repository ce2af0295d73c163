//! Core types shared by the channel and its consumers

pub mod error;
pub mod events;
pub mod identity;

pub use error::{ChannelError, ConfigError, DecodeError, TransportError};
pub use events::{Event, EventBus, EventFilter, EventKind, Priority, SubscriptionId};
pub use identity::{IdentityProvider, SessionIdentity};
