//! Connection state and the user-facing indicator derived from it

use serde::{Deserialize, Serialize};
use std::fmt;

/// Lifecycle state of the single connection owned by the manager
///
/// ```text
/// Idle --connect()--> Connecting --open--> Open --normal close/disconnect()--> Closed
/// Open --abnormal close/error [attempts < max]--> Connecting (after delay)
/// Connecting --abnormal close/error [attempts >= max]--> Faulted
/// Faulted --connect()--> Connecting
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    #[default]
    Idle,
    Connecting,
    Open,
    /// Graceful close handshake in progress
    Closing,
    Closed,
    /// Reconnection attempts exhausted
    Faulted,
}

impl ConnectionState {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConnectionState::Idle => "idle",
            ConnectionState::Connecting => "connecting",
            ConnectionState::Open => "open",
            ConnectionState::Closing => "closing",
            ConnectionState::Closed => "closed",
            ConnectionState::Faulted => "faulted",
        }
    }

    /// States the manager leaves only on an explicit `connect()`
    pub fn is_terminal(&self) -> bool {
        matches!(self, ConnectionState::Closed | ConnectionState::Faulted)
    }

    /// Whether a `connect()` in this state starts a new attempt
    pub fn accepts_connect(&self) -> bool {
        matches!(
            self,
            ConnectionState::Idle | ConnectionState::Closed | ConnectionState::Faulted
        )
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Current state plus the reconnect attempt counter
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct ConnectionStatus {
    pub state: ConnectionState,
    pub attempt: u32,
}

impl ConnectionStatus {
    pub fn indicator(&self) -> ConnectionIndicator {
        ConnectionIndicator::from(*self)
    }
}

/// One recorded state change
///
/// A transition may have `from == to` when a failed retry schedules another
/// one (`Connecting` → `Connecting` with a higher `attempt`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct StateTransition {
    pub from: ConnectionState,
    pub to: ConnectionState,
    /// Attempt counter after the transition
    pub attempt: u32,
}

/// What a UI should show for the connection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionIndicator {
    Disconnected,
    Connecting,
    Live,
    /// Transient drop, retry scheduled
    Reconnecting,
    /// Gave up; stays until the next explicit connect
    Offline,
}

impl From<ConnectionStatus> for ConnectionIndicator {
    fn from(status: ConnectionStatus) -> Self {
        match status.state {
            ConnectionState::Open => ConnectionIndicator::Live,
            ConnectionState::Connecting if status.attempt > 0 => ConnectionIndicator::Reconnecting,
            ConnectionState::Connecting => ConnectionIndicator::Connecting,
            ConnectionState::Faulted => ConnectionIndicator::Offline,
            ConnectionState::Idle | ConnectionState::Closing | ConnectionState::Closed => {
                ConnectionIndicator::Disconnected
            }
        }
    }
}
