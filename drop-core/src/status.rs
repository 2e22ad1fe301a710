//! Session connection status.

use std::fmt;

/// Connection status of a session, as observed by the application.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ConnectionStatus {
    /// No peer channel has opened yet.
    #[default]
    Idle,
    /// A peer channel is open.
    Connected,
    /// The peer or the relay went away.
    Disconnected,
}

impl ConnectionStatus {
    /// Check if a peer channel is currently open.
    pub fn is_connected(&self) -> bool {
        matches!(self, Self::Connected)
    }
}

impl fmt::Display for ConnectionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Idle => "idle",
            Self::Connected => "connected",
            Self::Disconnected => "disconnected",
        };
        f.write_str(name)
    }
}
