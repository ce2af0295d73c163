//! Typed error handling for the real-time channel
//!
//! Errors are split by where they originate so callers can match on the
//! category they care about instead of inspecting strings.
//!
//! # Error Categories
//!
//! - [`TransportError`]: socket open/read/write/close failures, recovered by
//!   bounded reconnection inside the connection manager
//! - [`DecodeError`]: an inbound frame that could not be parsed; only that
//!   frame is discarded
//! - [`ConfigError`]: configuration loading and validation
//!
//! Transport and decode errors never cross the channel boundary. Consumers only
//! ever observe classified events and connection state transitions; these types
//! are public so transports and tests can construct and match them.
//!
//! # Example
//!
//! ```rust,ignore
//! match ChannelConfig::from_yaml_file("live.yaml") {
//!     Ok(config) => run(config),
//!     Err(ConfigError::Invalid { field, message }) => {
//!         eprintln!("bad value for {field}: {message}");
//!     }
//!     Err(e) => eprintln!("{} ({})", e, e.error_code()),
//! }
//! ```

use std::time::Duration;
use thiserror::Error;

/// The top-level error type for the channel
#[derive(Debug, Error)]
pub enum ChannelError {
    /// Transport-level failure
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// Frame decoding failure
    #[error(transparent)]
    Decode(#[from] DecodeError),

    /// Configuration failure
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// The connection manager's actor has stopped
    #[error("connection manager is no longer running")]
    ChannelClosed,
}

impl ChannelError {
    /// Get the error code for this error
    pub fn error_code(&self) -> &'static str {
        match self {
            ChannelError::Transport(e) => e.error_code(),
            ChannelError::Decode(e) => e.error_code(),
            ChannelError::Config(e) => e.error_code(),
            ChannelError::ChannelClosed => "CHANNEL_CLOSED",
        }
    }
}

// =============================================================================
// Transport Errors
// =============================================================================

/// Errors raised by a [`Transport`](crate::channel::transport::Transport) or
/// detected by the connection manager while a connection is live
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportError {
    /// The connection could not be established
    #[error("failed to open connection to {endpoint}: {reason}")]
    Open { endpoint: String, reason: String },

    /// The peer closed the connection with a non-normal close code
    #[error("connection closed abnormally (code {code}): {reason}")]
    AbnormalClose { code: u16, reason: String },

    /// The frame stream ended without a close frame
    #[error("connection stream ended without a close frame")]
    StreamEnded,

    /// Reading from the connection failed
    #[error("read failed: {0}")]
    Read(String),

    /// Writing to the connection failed
    #[error("write failed: {0}")]
    Write(String),

    /// No frame arrived in time after a heartbeat ping
    #[error("no response to heartbeat within {0:?}")]
    PongTimeout(Duration),

    /// The connection URL could not be built
    #[error("invalid endpoint: {0}")]
    InvalidEndpoint(String),
}

impl TransportError {
    pub fn error_code(&self) -> &'static str {
        match self {
            TransportError::Open { .. } => "TRANSPORT_OPEN_FAILED",
            TransportError::AbnormalClose { .. } => "TRANSPORT_ABNORMAL_CLOSE",
            TransportError::StreamEnded => "TRANSPORT_STREAM_ENDED",
            TransportError::Read(_) => "TRANSPORT_READ_FAILED",
            TransportError::Write(_) => "TRANSPORT_WRITE_FAILED",
            TransportError::PongTimeout(_) => "TRANSPORT_PONG_TIMEOUT",
            TransportError::InvalidEndpoint(_) => "TRANSPORT_INVALID_ENDPOINT",
        }
    }
}

// =============================================================================
// Decode Errors
// =============================================================================

/// Errors raised while decoding an inbound frame
///
/// A well-formed frame with an unrecognized `type` is *not* an error; it
/// decodes to [`EventKind::Unknown`](crate::core::events::EventKind::Unknown).
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DecodeError {
    /// The frame is not a JSON object with a string `type` field
    #[error("malformed frame: {reason}")]
    Malformed { reason: String },
}

impl DecodeError {
    pub(crate) fn malformed(reason: impl Into<String>) -> Self {
        DecodeError::Malformed {
            reason: reason.into(),
        }
    }

    pub fn error_code(&self) -> &'static str {
        match self {
            DecodeError::Malformed { .. } => "DECODE_MALFORMED",
        }
    }
}

// =============================================================================
// Config Errors
// =============================================================================

/// Errors related to configuration loading and validation
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The configuration file could not be read
    #[error("failed to read config file {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    /// The configuration could not be parsed
    #[error("failed to parse config: {0}")]
    Parse(#[from] serde_yaml::Error),

    /// A field holds an unusable value
    #[error("invalid value for `{field}`: {message}")]
    Invalid {
        field: &'static str,
        message: String,
    },
}

impl ConfigError {
    pub fn error_code(&self) -> &'static str {
        match self {
            ConfigError::Io { .. } => "CONFIG_IO_ERROR",
            ConfigError::Parse(_) => "CONFIG_PARSE_ERROR",
            ConfigError::Invalid { .. } => "CONFIG_INVALID",
        }
    }
}
